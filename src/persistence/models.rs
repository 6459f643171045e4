//! Row types mapped 1:1 to the SQLite schema. Enum columns are stored as
//! their canonical uppercase strings and re-validated on read; a value the
//! domain cannot parse is a corrupt record, not a default.

use crate::domain::entities::broadcast::{
    BroadcastType, ExecutionDetail, ExecutionStatus, ExecutionType, OptionType, OrderIntent,
    ProductType, Side,
};
use crate::domain::entities::broker_account::{BrokerAccount, BrokerAccountStatus, BrokerType};
use crate::domain::entities::position::{Position, PositionStatus};
use crate::domain::entities::trading_profile::TradingProfile;
use crate::domain::entities::user::{User, UserRole, UserStatus};
use crate::domain::errors::ConfigurationError;
use chrono::{DateTime, Utc};
use sqlx::FromRow;

#[derive(Debug, Clone, FromRow)]
pub struct UserRecord {
    pub id: i64,
    pub email: String,
    pub role: String,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<UserRecord> for User {
    type Error = ConfigurationError;

    fn try_from(record: UserRecord) -> Result<Self, Self::Error> {
        Ok(User {
            id: record.id,
            email: record.email,
            role: UserRole::parse(&record.role)?,
            status: UserStatus::parse(&record.status)?,
            created_at: record.created_at,
        })
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct TradingProfileRecord {
    pub user_id: i64,
    /// Kept as the raw stored string; the sizing path parses and rejects it
    /// per user so one bad row cannot fail a whole broadcast.
    pub lot_size_multiplier: String,
    pub risk_profile: String,
    pub max_loss_per_day: Option<f64>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<TradingProfileRecord> for TradingProfile {
    type Error = ConfigurationError;

    fn try_from(record: TradingProfileRecord) -> Result<Self, Self::Error> {
        Ok(TradingProfile {
            user_id: record.user_id,
            lot_size_multiplier: crate::domain::entities::trading_profile::LotMultiplier::parse(
                &record.lot_size_multiplier,
            )?,
            risk_profile: crate::domain::entities::trading_profile::RiskProfile::parse(
                &record.risk_profile,
            )?,
            max_loss_per_day: record.max_loss_per_day,
            updated_at: record.updated_at,
        })
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct BrokerAccountRecord {
    pub id: i64,
    pub user_id: i64,
    pub broker_type: String,
    pub broker_account_id: String,
    pub access_token: String,
    pub token_expires_at: DateTime<Utc>,
    pub last_token_refresh_at: Option<DateTime<Utc>>,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<BrokerAccountRecord> for BrokerAccount {
    type Error = ConfigurationError;

    fn try_from(record: BrokerAccountRecord) -> Result<Self, Self::Error> {
        Ok(BrokerAccount {
            id: record.id,
            user_id: record.user_id,
            broker_type: BrokerType::parse(&record.broker_type)?,
            broker_account_id: record.broker_account_id,
            access_token: record.access_token,
            token_expires_at: record.token_expires_at,
            last_token_refresh_at: record.last_token_refresh_at,
            status: BrokerAccountStatus::parse(&record.status)?,
            created_at: record.created_at,
        })
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct PositionRecord {
    pub id: i64,
    pub user_id: i64,
    pub broker_account_id: i64,
    pub symbol: String,
    pub expiry: String,
    pub strike: f64,
    pub option_type: String,
    pub side: String,
    pub quantity: i64,
    pub entry_price: f64,
    pub current_price: Option<f64>,
    pub realized_pnl: f64,
    pub status: String,
    pub opened_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
}

impl TryFrom<PositionRecord> for Position {
    type Error = ConfigurationError;

    fn try_from(record: PositionRecord) -> Result<Self, Self::Error> {
        Ok(Position {
            id: record.id,
            user_id: record.user_id,
            broker_account_id: record.broker_account_id,
            symbol: record.symbol,
            expiry: record.expiry,
            strike: record.strike,
            option_type: OptionType::parse(&record.option_type)?,
            side: Side::parse(&record.side)?,
            quantity: record.quantity,
            entry_price: record.entry_price,
            current_price: record.current_price,
            realized_pnl: record.realized_pnl,
            status: PositionStatus::parse(&record.status)?,
            opened_at: record.opened_at,
            closed_at: record.closed_at,
        })
    }
}

/// Persisted broadcast: the immutable intent plus final aggregate counts.
#[derive(Debug, Clone, FromRow)]
pub struct BroadcastOrderRecord {
    pub id: i64,
    pub admin_id: i64,
    pub symbol: String,
    pub expiry: String,
    pub strike: f64,
    pub option_type: String,
    pub side: String,
    pub execution_type: String,
    pub limit_price: Option<f64>,
    pub product_type: String,
    pub broadcast_type: String,
    pub notes: Option<String>,
    pub total_users: i64,
    pub successful_executions: i64,
    pub failed_executions: i64,
    pub skipped_executions: i64,
    pub created_at: DateTime<Utc>,
}

impl BroadcastOrderRecord {
    pub fn intent(&self) -> Result<OrderIntent, ConfigurationError> {
        Ok(OrderIntent {
            symbol: self.symbol.clone(),
            expiry: self.expiry.clone(),
            strike: self.strike,
            option_type: OptionType::parse(&self.option_type)?,
            side: Side::parse(&self.side)?,
            execution_type: ExecutionType::parse(&self.execution_type)?,
            limit_price: self.limit_price,
            product_type: ProductType::parse(&self.product_type)?,
            broadcast_type: BroadcastType::parse(&self.broadcast_type)?,
            notes: self.notes.clone(),
        })
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct ExecutionDetailRecord {
    pub id: i64,
    pub broadcast_order_id: i64,
    /// Position of this detail in the broadcast's target list.
    pub seq: i64,
    pub user_id: i64,
    pub status: String,
    pub message: String,
    pub quantity: Option<i64>,
    pub broker_order_id: Option<String>,
    pub execution_price: Option<f64>,
}

impl TryFrom<ExecutionDetailRecord> for ExecutionDetail {
    type Error = ConfigurationError;

    fn try_from(record: ExecutionDetailRecord) -> Result<Self, Self::Error> {
        Ok(ExecutionDetail {
            user_id: record.user_id,
            status: ExecutionStatus::parse(&record.status)?,
            message: record.message,
            quantity: record.quantity,
            broker_order_id: record.broker_order_id,
            execution_price: record.execution_price,
        })
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct TokenRefreshLogRecord {
    pub id: i64,
    pub broker_account_id: i64,
    pub status: String,
    pub error_message: Option<String>,
    pub old_expiry: DateTime<Utc>,
    pub new_expiry: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}
