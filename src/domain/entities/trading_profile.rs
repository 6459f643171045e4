use crate::domain::entities::user::UserId;
use crate::domain::errors::ConfigurationError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Per-user scale factor applied to the admin's base order quantity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LotMultiplier {
    OneX,
    TwoX,
    ThreeX,
}

impl LotMultiplier {
    pub fn as_str(&self) -> &'static str {
        match self {
            LotMultiplier::OneX => "1X",
            LotMultiplier::TwoX => "2X",
            LotMultiplier::ThreeX => "3X",
        }
    }

    /// Parse a stored multiplier value. Unrecognized values are a
    /// configuration error, never a silent 1X default.
    pub fn parse(value: &str) -> Result<Self, ConfigurationError> {
        match value {
            "1X" => Ok(LotMultiplier::OneX),
            "2X" => Ok(LotMultiplier::TwoX),
            "3X" => Ok(LotMultiplier::ThreeX),
            other => Err(ConfigurationError::UnknownMultiplier(other.to_string())),
        }
    }

    pub fn factor(&self) -> i64 {
        match self {
            LotMultiplier::OneX => 1,
            LotMultiplier::TwoX => 2,
            LotMultiplier::ThreeX => 3,
        }
    }
}

/// Informational risk classification. Stored and surfaced but not consulted
/// by sizing or order gating; reserved for future enforcement such as
/// max-loss gating (see `max_loss_per_day` on the profile).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RiskProfile {
    Conservative,
    Moderate,
    Aggressive,
}

impl RiskProfile {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskProfile::Conservative => "CONSERVATIVE",
            RiskProfile::Moderate => "MODERATE",
            RiskProfile::Aggressive => "AGGRESSIVE",
        }
    }

    pub fn parse(value: &str) -> Result<Self, ConfigurationError> {
        match value {
            "CONSERVATIVE" => Ok(RiskProfile::Conservative),
            "MODERATE" => Ok(RiskProfile::Moderate),
            "AGGRESSIVE" => Ok(RiskProfile::Aggressive),
            other => Err(ConfigurationError::UnknownRiskProfile(other.to_string())),
        }
    }
}

/// 1:1 with a user. A user without a trading profile cannot receive ENTRY
/// broadcasts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradingProfile {
    pub user_id: UserId,
    pub lot_size_multiplier: LotMultiplier,
    pub risk_profile: RiskProfile,
    pub max_loss_per_day: Option<f64>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_multiplier_parse_and_factor() {
        assert_eq!(LotMultiplier::parse("1X").unwrap().factor(), 1);
        assert_eq!(LotMultiplier::parse("2X").unwrap().factor(), 2);
        assert_eq!(LotMultiplier::parse("3X").unwrap().factor(), 3);
    }

    #[test]
    fn test_multiplier_rejects_unknown() {
        let err = LotMultiplier::parse("4X").unwrap_err();
        assert_eq!(err, ConfigurationError::UnknownMultiplier("4X".to_string()));
    }

    #[test]
    fn test_risk_profile_round_trip() {
        for value in ["CONSERVATIVE", "MODERATE", "AGGRESSIVE"] {
            assert_eq!(RiskProfile::parse(value).unwrap().as_str(), value);
        }
        assert!(RiskProfile::parse("YOLO").is_err());
    }
}
