//! Zerodha Kite Connect Adapter
//!
//! Speaks the Kite REST API: form-encoded order placement with the
//! `token api_key:access_token` authorization scheme, and the request-token
//! session exchange with its SHA-256 checksum. Kite has no refresh endpoint;
//! an expired session needs a fresh user login.

use crate::domain::entities::broadcast::ExecutionType;
use crate::domain::entities::broker_account::BrokerType;
use crate::domain::errors::BrokerError;
use crate::domain::repositories::broker_client::{
    AuthArtifact, BrokerClient, BrokerCredentials, BrokerResult, ExecutionReceipt, OrderSpec,
    RefreshedToken,
};
use async_trait::async_trait;
use chrono::{DateTime, Datelike, Duration, TimeZone, Utc};
use reqwest::StatusCode;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};
use zeroize::Zeroizing;

const DEFAULT_BASE_URL: &str = "https://api.kite.trade";
const KITE_VERSION: &str = "3";

pub struct ZerodhaClient {
    api_key: String,
    api_secret: String,
    base_url: String,
    http: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct KiteEnvelope {
    status: String,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    error_type: Option<String>,
    #[serde(default)]
    data: Option<serde_json::Value>,
}

impl ZerodhaClient {
    pub fn new(api_key: impl Into<String>, api_secret: impl Into<String>) -> Self {
        Self::with_base_url(api_key, api_secret, DEFAULT_BASE_URL)
    }

    pub fn with_base_url(
        api_key: impl Into<String>,
        api_secret: impl Into<String>,
        base_url: impl Into<String>,
    ) -> Self {
        Self {
            api_key: api_key.into(),
            api_secret: api_secret.into(),
            base_url: base_url.into(),
            http: reqwest::Client::new(),
        }
    }

    fn authorization(&self, credentials: &BrokerCredentials) -> String {
        format!("token {}:{}", self.api_key, credentials.access_token.as_str())
    }

    fn classify(status: StatusCode, envelope: &KiteEnvelope) -> BrokerError {
        let message = envelope
            .message
            .clone()
            .unwrap_or_else(|| format!("HTTP {}", status));
        match envelope.error_type.as_deref() {
            Some("TokenException") => BrokerError::auth(message),
            Some("NetworkException") => BrokerError::network(message),
            _ if status == StatusCode::TOO_MANY_REQUESTS => BrokerError::rate_limit(message),
            _ if status == StatusCode::FORBIDDEN => BrokerError::auth(message),
            _ => BrokerError::rejected(message),
        }
    }

    fn transport_error(e: reqwest::Error) -> BrokerError {
        if e.is_timeout() {
            BrokerError::timeout(e.to_string())
        } else {
            BrokerError::network(e.to_string())
        }
    }

    async fn parse_envelope(response: reqwest::Response) -> BrokerResult<serde_json::Value> {
        let status = response.status();
        let envelope: KiteEnvelope = response.json().await.map_err(Self::transport_error)?;
        if envelope.status == "success" {
            envelope
                .data
                .ok_or_else(|| BrokerError::rejected("response missing data"))
        } else {
            Err(Self::classify(status, &envelope))
        }
    }
}

/// Kite invalidates every session around 06:00 IST the next morning. Token
/// expiry is pinned to the next 06:00 IST (00:30 UTC) after issuance.
pub fn next_session_expiry(now: DateTime<Utc>) -> DateTime<Utc> {
    let today_cutoff = Utc
        .with_ymd_and_hms(now.year(), now.month(), now.day(), 0, 30, 0)
        .single()
        .unwrap_or(now);
    if now < today_cutoff {
        today_cutoff
    } else {
        today_cutoff + Duration::days(1)
    }
}

#[async_trait]
impl BrokerClient for ZerodhaClient {
    fn broker_type(&self) -> BrokerType {
        BrokerType::Zerodha
    }

    async fn place_order(
        &self,
        credentials: &BrokerCredentials,
        spec: &OrderSpec,
    ) -> BrokerResult<ExecutionReceipt> {
        let mut form: Vec<(&str, String)> = vec![
            ("exchange", spec.exchange_segment.clone()),
            ("tradingsymbol", spec.trading_symbol.clone()),
            ("transaction_type", spec.transaction_side.as_str().to_string()),
            ("quantity", spec.quantity.to_string()),
            ("product", spec.product_type.as_str().to_string()),
            ("order_type", spec.execution_type.as_str().to_string()),
            ("validity", "DAY".to_string()),
        ];
        if spec.execution_type == ExecutionType::Limit {
            if let Some(price) = spec.limit_price {
                form.push(("price", price.to_string()));
            }
        }

        debug!(
            "Placing Zerodha order: {} {} x{}",
            spec.transaction_side.as_str(),
            spec.trading_symbol,
            spec.quantity
        );

        let response = self
            .http
            .post(format!("{}/orders/regular", self.base_url))
            .header("X-Kite-Version", KITE_VERSION)
            .header("Authorization", self.authorization(credentials))
            .form(&form)
            .send()
            .await
            .map_err(Self::transport_error)?;

        let data = Self::parse_envelope(response).await?;
        let order_id = data
            .get("order_id")
            .and_then(|v| v.as_str())
            .ok_or_else(|| BrokerError::rejected("response missing order_id"))?
            .to_string();

        Ok(ExecutionReceipt {
            broker_order_id: order_id,
            // Kite acknowledges placement without a fill price.
            average_price: None,
        })
    }

    async fn refresh_token(&self, _credentials: &BrokerCredentials) -> BrokerResult<RefreshedToken> {
        warn!("Zerodha sessions cannot be refreshed server-side");
        Err(BrokerError::rejected(
            "Zerodha has no token refresh API; user must log in again",
        ))
    }

    async fn exchange_token(
        &self,
        _client_id: &str,
        artifact: &AuthArtifact,
    ) -> BrokerResult<RefreshedToken> {
        let mut hasher = Sha256::new();
        hasher.update(self.api_key.as_bytes());
        hasher.update(artifact.code.as_bytes());
        hasher.update(self.api_secret.as_bytes());
        let checksum = hex::encode(hasher.finalize());

        let form = [
            ("api_key", self.api_key.as_str()),
            ("request_token", artifact.code.as_str()),
            ("checksum", checksum.as_str()),
        ];

        let response = self
            .http
            .post(format!("{}/session/token", self.base_url))
            .header("X-Kite-Version", KITE_VERSION)
            .form(&form)
            .send()
            .await
            .map_err(Self::transport_error)?;

        let data = Self::parse_envelope(response).await?;
        let access_token = data
            .get("access_token")
            .and_then(|v| v.as_str())
            .ok_or_else(|| BrokerError::rejected("response missing access_token"))?;

        Ok(RefreshedToken {
            access_token: Zeroizing::new(access_token.to_string()),
            expires_at: next_session_expiry(Utc::now()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_next_session_expiry_rolls_to_next_morning() {
        let afternoon = Utc.with_ymd_and_hms(2026, 1, 24, 10, 0, 0).unwrap();
        let expiry = next_session_expiry(afternoon);
        assert_eq!(expiry, Utc.with_ymd_and_hms(2026, 1, 25, 0, 30, 0).unwrap());

        let early = Utc.with_ymd_and_hms(2026, 1, 24, 0, 0, 0).unwrap();
        let expiry = next_session_expiry(early);
        assert_eq!(expiry, Utc.with_ymd_and_hms(2026, 1, 24, 0, 30, 0).unwrap());
    }

    #[test]
    fn test_classify_token_exception_is_auth() {
        let envelope = KiteEnvelope {
            status: "error".to_string(),
            message: Some("Token is invalid or has expired".to_string()),
            error_type: Some("TokenException".to_string()),
            data: None,
        };
        let err = ZerodhaClient::classify(StatusCode::FORBIDDEN, &envelope);
        assert!(err.is_auth());
    }

    #[test]
    fn test_classify_rate_limit() {
        let envelope = KiteEnvelope {
            status: "error".to_string(),
            message: Some("Too many requests".to_string()),
            error_type: Some("InputException".to_string()),
            data: None,
        };
        let err = ZerodhaClient::classify(StatusCode::TOO_MANY_REQUESTS, &envelope);
        assert_eq!(err.kind, crate::domain::errors::BrokerErrorKind::RateLimit);
    }
}
