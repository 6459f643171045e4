use crate::domain::entities::user::UserId;
use crate::domain::errors::{ConfigurationError, ValidationError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OptionType {
    Ce,
    Pe,
}

impl OptionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OptionType::Ce => "CE",
            OptionType::Pe => "PE",
        }
    }

    pub fn parse(value: &str) -> Result<Self, ConfigurationError> {
        match value {
            "CE" => Ok(OptionType::Ce),
            "PE" => Ok(OptionType::Pe),
            other => Err(ConfigurationError::UnknownEnumValue {
                field: "option_type",
                value: other.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Buy => "BUY",
            Side::Sell => "SELL",
        }
    }

    pub fn parse(value: &str) -> Result<Self, ConfigurationError> {
        match value {
            "BUY" => Ok(Side::Buy),
            "SELL" => Ok(Side::Sell),
            other => Err(ConfigurationError::UnknownEnumValue {
                field: "side",
                value: other.to_string(),
            }),
        }
    }

    /// Sign applied to price movement when computing P&L.
    pub fn sign(&self) -> f64 {
        match self {
            Side::Buy => 1.0,
            Side::Sell => -1.0,
        }
    }

    pub fn opposite(&self) -> Side {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutionType {
    Market,
    Limit,
}

impl ExecutionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionType::Market => "MARKET",
            ExecutionType::Limit => "LIMIT",
        }
    }

    pub fn parse(value: &str) -> Result<Self, ConfigurationError> {
        match value {
            "MARKET" => Ok(ExecutionType::Market),
            "LIMIT" => Ok(ExecutionType::Limit),
            other => Err(ConfigurationError::UnknownEnumValue {
                field: "execution_type",
                value: other.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProductType {
    Mis,
    Nrml,
    Cnc,
}

impl ProductType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProductType::Mis => "MIS",
            ProductType::Nrml => "NRML",
            ProductType::Cnc => "CNC",
        }
    }

    pub fn parse(value: &str) -> Result<Self, ConfigurationError> {
        match value {
            "MIS" => Ok(ProductType::Mis),
            "NRML" => Ok(ProductType::Nrml),
            "CNC" => Ok(ProductType::Cnc),
            other => Err(ConfigurationError::UnknownEnumValue {
                field: "product_type",
                value: other.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BroadcastType {
    Entry,
    Exit,
}

impl BroadcastType {
    pub fn as_str(&self) -> &'static str {
        match self {
            BroadcastType::Entry => "ENTRY",
            BroadcastType::Exit => "EXIT",
        }
    }

    pub fn parse(value: &str) -> Result<Self, ConfigurationError> {
        match value {
            "ENTRY" => Ok(BroadcastType::Entry),
            "EXIT" => Ok(BroadcastType::Exit),
            other => Err(ConfigurationError::UnknownEnumValue {
                field: "broadcast_type",
                value: other.to_string(),
            }),
        }
    }
}

/// The admin-issued order intent. Immutable once the broadcast run starts.
///
/// For EXIT broadcasts the intent identifies an instrument leg; each targeted
/// user's matching open position supplies the quantity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderIntent {
    pub symbol: String,
    pub expiry: String,
    pub strike: f64,
    pub option_type: OptionType,
    pub side: Side,
    pub execution_type: ExecutionType,
    pub limit_price: Option<f64>,
    pub product_type: ProductType,
    pub broadcast_type: BroadcastType,
    pub notes: Option<String>,
}

impl OrderIntent {
    pub fn validate(&self) -> Result<(), ValidationError> {
        match (self.execution_type, self.limit_price) {
            (ExecutionType::Limit, None) => Err(ValidationError::MissingLimitPrice),
            (ExecutionType::Market, Some(_)) => Err(ValidationError::UnexpectedLimitPrice),
            _ => Ok(()),
        }
    }

    /// Broker-facing trading symbol, e.g. `BANKNIFTY24JAN202648000CE`.
    pub fn trading_symbol(&self) -> String {
        format!(
            "{}{}{}{}",
            self.symbol,
            self.expiry,
            self.strike as i64,
            self.option_type.as_str()
        )
    }

    /// NSE F&O instruments trade on NFO; everything else here is BSE F&O.
    pub fn exchange_segment(&self) -> &'static str {
        match self.symbol.as_str() {
            "BANKNIFTY" | "NIFTY" => "NFO",
            _ => "BFO",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutionStatus {
    Success,
    Failed,
    Skipped,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Success => "SUCCESS",
            ExecutionStatus::Failed => "FAILED",
            ExecutionStatus::Skipped => "SKIPPED",
        }
    }

    pub fn parse(value: &str) -> Result<Self, ConfigurationError> {
        match value {
            "SUCCESS" => Ok(ExecutionStatus::Success),
            "FAILED" => Ok(ExecutionStatus::Failed),
            "SKIPPED" => Ok(ExecutionStatus::Skipped),
            other => Err(ConfigurationError::UnknownEnumValue {
                field: "execution_status",
                value: other.to_string(),
            }),
        }
    }
}

/// Per-user outcome record of one broadcast. Ordered by input target
/// position, written once with the parent broadcast.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionDetail {
    pub user_id: UserId,
    pub status: ExecutionStatus,
    pub message: String,
    pub quantity: Option<i64>,
    pub broker_order_id: Option<String>,
    pub execution_price: Option<f64>,
}

impl ExecutionDetail {
    pub fn success(
        user_id: UserId,
        quantity: i64,
        broker_order_id: String,
        execution_price: Option<f64>,
    ) -> Self {
        Self {
            user_id,
            status: ExecutionStatus::Success,
            message: "order placed".to_string(),
            quantity: Some(quantity),
            broker_order_id: Some(broker_order_id),
            execution_price,
        }
    }

    pub fn failed(user_id: UserId, message: impl Into<String>) -> Self {
        Self {
            user_id,
            status: ExecutionStatus::Failed,
            message: message.into(),
            quantity: None,
            broker_order_id: None,
            execution_price: None,
        }
    }

    pub fn skipped(user_id: UserId, message: impl Into<String>) -> Self {
        Self {
            user_id,
            status: ExecutionStatus::Skipped,
            message: message.into(),
            quantity: None,
            broker_order_id: None,
            execution_price: None,
        }
    }
}

/// Aggregate outcome of one broadcast run, returned to the caller and
/// persisted as the broadcast record plus its detail list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BroadcastResult {
    pub broadcast_id: i64,
    pub total_users: u32,
    pub successful_executions: u32,
    pub failed_executions: u32,
    pub skipped_executions: u32,
    pub details: Vec<ExecutionDetail>,
    pub completed_at: DateTime<Utc>,
}

impl BroadcastResult {
    /// Invariant: total == successful + failed + skipped == details.len().
    pub fn is_consistent(&self) -> bool {
        self.total_users
            == self.successful_executions + self.failed_executions + self.skipped_executions
            && self.total_users as usize == self.details.len()
    }
}
