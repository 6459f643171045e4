use crate::domain::entities::user::UserId;
use crate::domain::errors::ConfigurationError;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BrokerType {
    Zerodha,
    Dhan,
}

impl BrokerType {
    pub fn as_str(&self) -> &'static str {
        match self {
            BrokerType::Zerodha => "ZERODHA",
            BrokerType::Dhan => "DHAN",
        }
    }

    pub fn parse(value: &str) -> Result<Self, ConfigurationError> {
        match value {
            "ZERODHA" => Ok(BrokerType::Zerodha),
            "DHAN" => Ok(BrokerType::Dhan),
            other => Err(ConfigurationError::UnknownBrokerType(other.to_string())),
        }
    }
}

impl std::fmt::Display for BrokerType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BrokerAccountStatus {
    Active,
    Inactive,
    Pending,
}

impl BrokerAccountStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BrokerAccountStatus::Active => "ACTIVE",
            BrokerAccountStatus::Inactive => "INACTIVE",
            BrokerAccountStatus::Pending => "PENDING",
        }
    }

    pub fn parse(value: &str) -> Result<Self, ConfigurationError> {
        match value {
            "ACTIVE" => Ok(BrokerAccountStatus::Active),
            "INACTIVE" => Ok(BrokerAccountStatus::Inactive),
            "PENDING" => Ok(BrokerAccountStatus::Pending),
            other => Err(ConfigurationError::UnknownEnumValue {
                field: "broker_account.status",
                value: other.to_string(),
            }),
        }
    }
}

/// Credential validity, derived from the account status and token expiry.
/// `Expired` needs no stored mutation: it is detected lazily on query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenState {
    /// No token has ever been issued for this account.
    Pending,
    /// A token exists and has not passed its expiry.
    Active,
    /// The token's expiry timestamp is in the past.
    Expired,
}

/// A user's linked brokerage account. Exactly one per user, one broker type
/// at a time. `access_token` is stored encrypted (see `security::CredentialVault`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerAccount {
    pub id: i64,
    pub user_id: UserId,
    pub broker_type: BrokerType,
    /// Broker-side identity: Zerodha user id or Dhan client id.
    pub broker_account_id: String,
    /// Encrypted access token, base64(nonce || ciphertext).
    pub access_token: String,
    pub token_expires_at: DateTime<Utc>,
    pub last_token_refresh_at: Option<DateTime<Utc>>,
    pub status: BrokerAccountStatus,
    pub created_at: DateTime<Utc>,
}

impl BrokerAccount {
    pub fn token_state(&self, now: DateTime<Utc>) -> TokenState {
        if self.status == BrokerAccountStatus::Pending || self.access_token.is_empty() {
            TokenState::Pending
        } else if self.token_expires_at > now {
            TokenState::Active
        } else {
            TokenState::Expired
        }
    }

    pub fn is_token_valid(&self, now: DateTime<Utc>) -> bool {
        self.token_state(now) == TokenState::Active
    }

    pub fn token_time_remaining(&self, now: DateTime<Utc>) -> Duration {
        self.token_expires_at - now
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn account(status: BrokerAccountStatus, expires_in_secs: i64) -> BrokerAccount {
        BrokerAccount {
            id: 1,
            user_id: 1,
            broker_type: BrokerType::Dhan,
            broker_account_id: "client-1".to_string(),
            access_token: "opaque".to_string(),
            token_expires_at: Utc::now() + Duration::seconds(expires_in_secs),
            last_token_refresh_at: None,
            status,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_token_state_active_until_expiry() {
        let acct = account(BrokerAccountStatus::Active, 3600);
        assert_eq!(acct.token_state(Utc::now()), TokenState::Active);
        assert!(acct.is_token_valid(Utc::now()));
    }

    #[test]
    fn test_token_state_expired_after_expiry() {
        let acct = account(BrokerAccountStatus::Active, -1);
        assert_eq!(acct.token_state(Utc::now()), TokenState::Expired);
    }

    #[test]
    fn test_token_state_pending_without_token() {
        let mut acct = account(BrokerAccountStatus::Pending, 3600);
        assert_eq!(acct.token_state(Utc::now()), TokenState::Pending);

        acct.status = BrokerAccountStatus::Active;
        acct.access_token = String::new();
        assert_eq!(acct.token_state(Utc::now()), TokenState::Pending);
    }

    #[test]
    fn test_broker_type_parse() {
        assert_eq!(BrokerType::parse("ZERODHA").unwrap(), BrokerType::Zerodha);
        assert_eq!(BrokerType::parse("DHAN").unwrap(), BrokerType::Dhan);
        assert!(BrokerType::parse("UPSTOX").is_err());
    }
}
