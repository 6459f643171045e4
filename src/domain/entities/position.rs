use crate::domain::entities::broadcast::{OptionType, OrderIntent, Side};
use crate::domain::entities::user::UserId;
use crate::domain::errors::ConfigurationError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PositionStatus {
    Open,
    Closed,
}

impl PositionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PositionStatus::Open => "OPEN",
            PositionStatus::Closed => "CLOSED",
        }
    }

    pub fn parse(value: &str) -> Result<Self, ConfigurationError> {
        match value {
            "OPEN" => Ok(PositionStatus::Open),
            "CLOSED" => Ok(PositionStatus::Closed),
            other => Err(ConfigurationError::UnknownEnumValue {
                field: "position.status",
                value: other.to_string(),
            }),
        }
    }
}

/// One instrument leg held by a user. Created by a successful broadcast
/// execution; mutated only by partial/full close. A CLOSED position has
/// `closed_at` set and is never mutated again.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub id: i64,
    pub user_id: UserId,
    pub broker_account_id: i64,
    pub symbol: String,
    pub expiry: String,
    pub strike: f64,
    pub option_type: OptionType,
    pub side: Side,
    pub quantity: i64,
    pub entry_price: f64,
    /// Latest known market price. Live P&L is always computed from this on
    /// read; it is never persisted as a running total.
    pub current_price: Option<f64>,
    /// P&L realized by partial/full closes so far.
    pub realized_pnl: f64,
    pub status: PositionStatus,
    pub opened_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
}

impl Position {
    pub fn is_open(&self) -> bool {
        self.status == PositionStatus::Open
    }

    /// P&L of the remaining quantity at the given price.
    pub fn pnl_at(&self, price: f64) -> f64 {
        (price - self.entry_price) * self.quantity as f64 * self.side.sign()
    }

    /// Live P&L from the latest known price; None until a price is seen.
    pub fn unrealized_pnl(&self) -> Option<f64> {
        self.current_price.map(|price| self.pnl_at(price))
    }

    pub fn pnl_percentage(&self) -> Option<f64> {
        let pnl = self.unrealized_pnl()?;
        let basis = self.entry_price * self.quantity as f64;
        if basis > 0.0 {
            Some(pnl / basis * 100.0)
        } else {
            None
        }
    }

    /// Whether this position is the leg an EXIT intent refers to.
    pub fn matches_leg(&self, intent: &OrderIntent) -> bool {
        self.symbol == intent.symbol
            && self.expiry == intent.expiry
            && (self.strike - intent.strike).abs() < f64::EPSILON
            && self.option_type == intent.option_type
            && self.side == intent.side
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entities::broadcast::{BroadcastType, ExecutionType, ProductType};

    fn position(side: Side) -> Position {
        Position {
            id: 1,
            user_id: 1,
            broker_account_id: 1,
            symbol: "BANKNIFTY".to_string(),
            expiry: "24JAN2026".to_string(),
            strike: 48000.0,
            option_type: OptionType::Ce,
            side,
            quantity: 60,
            entry_price: 100.0,
            current_price: None,
            realized_pnl: 0.0,
            status: PositionStatus::Open,
            opened_at: Utc::now(),
            closed_at: None,
        }
    }

    #[test]
    fn test_unrealized_pnl_buy() {
        let mut pos = position(Side::Buy);
        assert!(pos.unrealized_pnl().is_none());

        pos.current_price = Some(110.0);
        assert_eq!(pos.unrealized_pnl().unwrap(), 600.0);
        assert_eq!(pos.pnl_percentage().unwrap(), 10.0);
    }

    #[test]
    fn test_unrealized_pnl_sell() {
        let mut pos = position(Side::Sell);
        pos.current_price = Some(90.0);
        // Short leg gains when price falls.
        assert_eq!(pos.unrealized_pnl().unwrap(), 600.0);
    }

    #[test]
    fn test_matches_leg() {
        let pos = position(Side::Buy);
        let intent = OrderIntent {
            symbol: "BANKNIFTY".to_string(),
            expiry: "24JAN2026".to_string(),
            strike: 48000.0,
            option_type: OptionType::Ce,
            side: Side::Buy,
            execution_type: ExecutionType::Market,
            limit_price: None,
            product_type: ProductType::Mis,
            broadcast_type: BroadcastType::Exit,
            notes: None,
        };
        assert!(pos.matches_leg(&intent));

        let mut other_strike = intent.clone();
        other_strike.strike = 48100.0;
        assert!(!pos.matches_leg(&other_strike));

        let mut other_side = intent;
        other_side.side = Side::Sell;
        assert!(!pos.matches_leg(&other_side));
    }
}
