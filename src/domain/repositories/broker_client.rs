//! Broker Client Trait
//!
//! Common capability interface over broker integrations. The orchestrator
//! and token lifecycle depend only on this trait; each broker type supplies
//! its own request shaping behind it.

use crate::domain::entities::broadcast::{ExecutionType, ProductType, Side};
use crate::domain::entities::broker_account::BrokerType;
use crate::domain::errors::BrokerError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use zeroize::Zeroizing;

pub type BrokerResult<T> = Result<T, BrokerError>;

/// Decrypted credentials handed to an adapter for one call. The token is
/// wiped from memory on drop.
pub struct BrokerCredentials {
    /// Broker-side identity (Zerodha user id / Dhan client id).
    pub client_id: String,
    pub access_token: Zeroizing<String>,
}

impl BrokerCredentials {
    pub fn new(client_id: impl Into<String>, access_token: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            access_token: Zeroizing::new(access_token.into()),
        }
    }
}

/// A fully shaped order, ready for one broker call.
#[derive(Debug, Clone)]
pub struct OrderSpec {
    pub trading_symbol: String,
    pub exchange_segment: String,
    /// Transaction side sent to the broker (already flipped for exits).
    pub transaction_side: Side,
    pub quantity: i64,
    pub product_type: ProductType,
    pub execution_type: ExecutionType,
    pub limit_price: Option<f64>,
}

/// Broker acknowledgement of a placed order.
#[derive(Debug, Clone)]
pub struct ExecutionReceipt {
    pub broker_order_id: String,
    /// Fill or reference price when the broker reports one.
    pub average_price: Option<f64>,
}

/// A new access token obtained by refresh or OAuth exchange.
#[derive(Debug)]
pub struct RefreshedToken {
    pub access_token: Zeroizing<String>,
    pub expires_at: DateTime<Utc>,
}

/// Authorization artifact from a user-driven OAuth flow, supplied by the
/// external auth collaborator.
#[derive(Debug, Clone)]
pub struct AuthArtifact {
    /// Zerodha request token or Dhan auth code.
    pub code: String,
    /// Dhan consent application id; unused by Zerodha.
    pub consent_app_id: Option<String>,
}

#[async_trait]
pub trait BrokerClient: Send + Sync {
    fn broker_type(&self) -> BrokerType;

    /// Place an order. Errors carry a `BrokerErrorKind` so callers can tell
    /// an auth failure from a plain rejection.
    async fn place_order(
        &self,
        credentials: &BrokerCredentials,
        spec: &OrderSpec,
    ) -> BrokerResult<ExecutionReceipt>;

    /// Refresh the access token. Brokers without a refresh API report
    /// `BrokerErrorKind::Rejected` and the account stays expired until the
    /// user re-authorizes.
    async fn refresh_token(&self, credentials: &BrokerCredentials) -> BrokerResult<RefreshedToken>;

    /// Exchange a user-supplied authorization artifact for a first token
    /// (PENDING -> ACTIVE transition).
    async fn exchange_token(
        &self,
        client_id: &str,
        artifact: &AuthArtifact,
    ) -> BrokerResult<RefreshedToken>;
}

impl std::fmt::Debug for dyn BrokerClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BrokerClient")
            .field("broker_type", &self.broker_type())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_credentials_hold_token() {
        let creds = BrokerCredentials::new("client-1", "tok-123");
        assert_eq!(creds.client_id, "client-1");
        assert_eq!(creds.access_token.as_str(), "tok-123");
    }
}
