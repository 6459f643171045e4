//! Lot-sizing policy: scales an admin's base quantity by the user's
//! configured multiplier. Pure; risk profile is deliberately not consulted
//! here (see `TradingProfile::risk_profile`).

use crate::domain::entities::trading_profile::LotMultiplier;
use crate::domain::errors::ConfigurationError;
use once_cell::sync::Lazy;
use std::collections::HashMap;

/// Exchange-defined contract lot sizes per index symbol.
static INSTRUMENT_LOT_SIZES: Lazy<HashMap<&'static str, i64>> = Lazy::new(|| {
    HashMap::from([("BANKNIFTY", 30), ("NIFTY", 65), ("SENSEX", 20)])
});

/// Base quantity for one lot of the given symbol; 1 for unknown symbols.
pub fn lot_size_for_symbol(symbol: &str) -> i64 {
    INSTRUMENT_LOT_SIZES
        .get(symbol.to_uppercase().as_str())
        .copied()
        .unwrap_or(1)
}

/// `base_quantity * multiplier`. A multiplier value that does not parse is a
/// `ConfigurationError`; there is no silent default.
pub fn compute_quantity(
    base_quantity: i64,
    multiplier: &str,
) -> Result<i64, ConfigurationError> {
    let multiplier = LotMultiplier::parse(multiplier)?;
    Ok(scale(base_quantity, multiplier))
}

pub fn scale(base_quantity: i64, multiplier: LotMultiplier) -> i64 {
    base_quantity * multiplier.factor()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lot_sizes() {
        assert_eq!(lot_size_for_symbol("BANKNIFTY"), 30);
        assert_eq!(lot_size_for_symbol("nifty"), 65);
        assert_eq!(lot_size_for_symbol("SENSEX"), 20);
        assert_eq!(lot_size_for_symbol("FINNIFTY"), 1);
    }

    #[test]
    fn test_compute_quantity() {
        assert_eq!(compute_quantity(30, "1X").unwrap(), 30);
        assert_eq!(compute_quantity(30, "2X").unwrap(), 60);
        assert_eq!(compute_quantity(30, "3X").unwrap(), 90);
    }

    #[test]
    fn test_compute_quantity_rejects_unrecognized() {
        let err = compute_quantity(30, "5X").unwrap_err();
        assert_eq!(err, ConfigurationError::UnknownMultiplier("5X".to_string()));

        let err = compute_quantity(30, "").unwrap_err();
        assert!(matches!(err, ConfigurationError::UnknownMultiplier(_)));
    }

    #[test]
    fn test_scale_with_parsed_multiplier() {
        assert_eq!(scale(65, LotMultiplier::TwoX), 130);
    }
}
