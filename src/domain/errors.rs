use thiserror::Error;

/// Request-level validation failures. These propagate to the caller before
/// any per-user processing begins; no broadcast record is created.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ValidationError {
    #[error("broadcast has no target users")]
    NoTargetUsers,

    #[error("user {0} is not an admin")]
    NotAdmin(i64),

    #[error("LIMIT orders require a limit price")]
    MissingLimitPrice,

    #[error("MARKET orders must not carry a limit price")]
    UnexpectedLimitPrice,

    #[error("position {0} not found")]
    PositionNotFound(i64),

    #[error("position {0} is already closed")]
    PositionAlreadyClosed(i64),

    #[error("exit quantity {requested} exceeds remaining quantity {remaining}")]
    ExitQuantityExceedsRemaining { requested: i64, remaining: i64 },

    #[error("quantity must be positive, got {0}")]
    NonPositiveQuantity(i64),

    #[error("exit price must be positive, got {0}")]
    NonPositivePrice(f64),
}

/// System misconfiguration. Fatal for the affected user's step only, or for
/// the whole request when detected before fan-out.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConfigurationError {
    #[error("unknown lot size multiplier: {0}")]
    UnknownMultiplier(String),

    #[error("unknown risk profile: {0}")]
    UnknownRiskProfile(String),

    #[error("unknown broker type: {0}")]
    UnknownBrokerType(String),

    #[error("unknown enum value {value} for {field}")]
    UnknownEnumValue { field: &'static str, value: String },

    #[error("encryption key is not configured")]
    MissingEncryptionKey,

    #[error("encryption key must be at least {min} bytes, got {len}")]
    WeakEncryptionKey { min: usize, len: usize },

    #[error("credential encryption failed: {0}")]
    CredentialEncryption(String),

    #[error("credential decryption failed: {0}")]
    CredentialDecryption(String),

    #[error("no broker client registered for {0}")]
    BrokerNotRegistered(String),
}

/// Failure classification at the broker adapter boundary.
///
/// `Auth` must stay distinguishable from `Rejected`: the orchestrator marks
/// the account's token expired on `Auth` but only fails the single order on
/// `Rejected`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrokerErrorKind {
    Rejected,
    Network,
    Auth,
    RateLimit,
    Timeout,
}

impl std::fmt::Display for BrokerErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BrokerErrorKind::Rejected => write!(f, "REJECTED"),
            BrokerErrorKind::Network => write!(f, "NETWORK"),
            BrokerErrorKind::Auth => write!(f, "AUTH"),
            BrokerErrorKind::RateLimit => write!(f, "RATE_LIMIT"),
            BrokerErrorKind::Timeout => write!(f, "TIMEOUT"),
        }
    }
}

/// Per-user failure reported by a broker adapter. Recorded as a FAILED
/// execution detail with the message preserved; never aborts the broadcast.
#[derive(Debug, Error, Clone, PartialEq)]
#[error("{kind}: {message}")]
pub struct BrokerError {
    pub kind: BrokerErrorKind,
    pub message: String,
}

impl BrokerError {
    pub fn new(kind: BrokerErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn rejected(message: impl Into<String>) -> Self {
        Self::new(BrokerErrorKind::Rejected, message)
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(BrokerErrorKind::Network, message)
    }

    pub fn auth(message: impl Into<String>) -> Self {
        Self::new(BrokerErrorKind::Auth, message)
    }

    pub fn rate_limit(message: impl Into<String>) -> Self {
        Self::new(BrokerErrorKind::RateLimit, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(BrokerErrorKind::Timeout, message)
    }

    pub fn is_auth(&self) -> bool {
        self.kind == BrokerErrorKind::Auth
    }
}

/// Per-user business-rule gate. Not an error: recorded as SKIPPED and the
/// broadcast continues with the next user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    NoBrokerAccount,
    AccountInactive,
    AccountPending,
    NoTradingProfile,
    TokenExpired,
    NoOpenPosition,
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SkipReason::NoBrokerAccount => write!(f, "no broker account"),
            SkipReason::AccountInactive => write!(f, "broker account inactive"),
            SkipReason::AccountPending => write!(f, "broker account pending token setup"),
            SkipReason::NoTradingProfile => write!(f, "no trading profile"),
            SkipReason::TokenExpired => write!(f, "token expired"),
            SkipReason::NoOpenPosition => write!(f, "no matching open position"),
        }
    }
}

/// Persistence layer failures.
#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error("database connection error: {0}")]
    ConnectionError(#[from] sqlx::Error),

    #[error("migration error: {0}")]
    MigrationError(String),

    #[error("query error: {0}")]
    QueryError(String),

    #[error("corrupt record: {0}")]
    CorruptRecord(#[from] ConfigurationError),
}

/// Request-level broadcast failures. Per-user problems never surface here;
/// they become FAILED or SKIPPED details instead.
#[derive(Debug, Error)]
pub enum BroadcastError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Database(#[from] DatabaseError),
}

/// Failures surfaced by token activation and refresh.
#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("broker account {0} not found")]
    AccountNotFound(i64),

    #[error(transparent)]
    Database(#[from] DatabaseError),

    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error(transparent)]
    Broker(#[from] BrokerError),
}

/// Failures surfaced by the position ledger's close path.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Database(#[from] DatabaseError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_broker_error_display_preserves_message() {
        let err = BrokerError::rejected("insufficient margin");
        assert_eq!(err.to_string(), "REJECTED: insufficient margin");
        assert!(!err.is_auth());

        let err = BrokerError::auth("token invalid");
        assert!(err.is_auth());
        assert_eq!(err.kind, BrokerErrorKind::Auth);
    }

    #[test]
    fn test_skip_reason_display() {
        assert_eq!(SkipReason::TokenExpired.to_string(), "token expired");
        assert_eq!(SkipReason::NoBrokerAccount.to_string(), "no broker account");
    }

    #[test]
    fn test_validation_error_display() {
        let err = ValidationError::ExitQuantityExceedsRemaining {
            requested: 90,
            remaining: 60,
        };
        assert_eq!(
            err.to_string(),
            "exit quantity 90 exceeds remaining quantity 60"
        );
    }
}
