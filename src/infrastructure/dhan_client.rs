//! DhanHQ Adapter
//!
//! JSON order placement plus the Dhan token lifecycle: `RenewToken` for
//! in-place refresh and `generate-token` for the consent-flow exchange.
//! Dhan reports token validity as a `DD/MM/YYYY HH:MM` string.

use crate::domain::entities::broadcast::{ExecutionType, ProductType};
use crate::domain::entities::broker_account::BrokerType;
use crate::domain::errors::BrokerError;
use crate::domain::repositories::broker_client::{
    AuthArtifact, BrokerClient, BrokerCredentials, BrokerResult, ExecutionReceipt, OrderSpec,
    RefreshedToken,
};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;
use zeroize::Zeroizing;

const DEFAULT_BASE_URL: &str = "https://api.dhan.co/v2";
const TOKEN_VALIDITY_FORMAT: &str = "%d/%m/%Y %H:%M";

pub struct DhanClient {
    base_url: String,
    client_secret: String,
    http: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct DhanErrorBody {
    #[serde(default, rename = "errorMessage")]
    error_message: Option<String>,
    #[serde(default, rename = "errorType")]
    error_type: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DhanOrderResponse {
    #[serde(rename = "orderId")]
    order_id: String,
    #[serde(default, rename = "averageTradedPrice")]
    average_traded_price: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct DhanTokenResponse {
    #[serde(default, rename = "accessToken")]
    access_token: Option<String>,
    #[serde(default)]
    token: Option<String>,
    #[serde(default, rename = "tokenValidity")]
    token_validity: Option<String>,
}

impl DhanClient {
    pub fn new(client_secret: impl Into<String>) -> Self {
        Self::with_base_url(client_secret, DEFAULT_BASE_URL)
    }

    pub fn with_base_url(client_secret: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            client_secret: client_secret.into(),
            http: reqwest::Client::new(),
        }
    }

    fn transport_error(e: reqwest::Error) -> BrokerError {
        if e.is_timeout() {
            BrokerError::timeout(e.to_string())
        } else {
            BrokerError::network(e.to_string())
        }
    }

    async fn error_from(response: reqwest::Response) -> BrokerError {
        let status = response.status();
        let body: DhanErrorBody = response.json().await.unwrap_or(DhanErrorBody {
            error_message: None,
            error_type: None,
        });
        let message = body
            .error_message
            .or(body.error_type)
            .unwrap_or_else(|| format!("HTTP {}", status));
        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => BrokerError::auth(message),
            StatusCode::TOO_MANY_REQUESTS => BrokerError::rate_limit(message),
            _ => BrokerError::rejected(message),
        }
    }

    fn token_from(body: DhanTokenResponse) -> BrokerResult<RefreshedToken> {
        let access_token = body
            .access_token
            .or(body.token)
            .ok_or_else(|| BrokerError::rejected("response missing access token"))?;
        let validity = body
            .token_validity
            .ok_or_else(|| BrokerError::rejected("response missing tokenValidity"))?;
        let expires_at = parse_token_validity(&validity)?;

        Ok(RefreshedToken {
            access_token: Zeroizing::new(access_token),
            expires_at,
        })
    }
}

/// Parse Dhan's `tokenValidity` timestamp, e.g. `30/03/2025 15:37` (UTC).
pub fn parse_token_validity(value: &str) -> BrokerResult<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(value, TOKEN_VALIDITY_FORMAT)
        .map(|naive| naive.and_utc())
        .map_err(|e| BrokerError::rejected(format!("bad tokenValidity '{}': {}", value, e)))
}

fn dhan_product(product: ProductType) -> &'static str {
    match product {
        ProductType::Mis => "INTRADAY",
        ProductType::Nrml => "MARGIN",
        ProductType::Cnc => "CNC",
    }
}

fn dhan_segment(segment: &str) -> &'static str {
    match segment {
        "NFO" => "NSE_FNO",
        _ => "BSE_FNO",
    }
}

#[async_trait]
impl BrokerClient for DhanClient {
    fn broker_type(&self) -> BrokerType {
        BrokerType::Dhan
    }

    async fn place_order(
        &self,
        credentials: &BrokerCredentials,
        spec: &OrderSpec,
    ) -> BrokerResult<ExecutionReceipt> {
        let mut body = json!({
            "dhanClientId": credentials.client_id,
            "transactionType": spec.transaction_side.as_str(),
            "exchangeSegment": dhan_segment(&spec.exchange_segment),
            "productType": dhan_product(spec.product_type),
            "orderType": spec.execution_type.as_str(),
            "validity": "DAY",
            "tradingSymbol": spec.trading_symbol,
            "quantity": spec.quantity,
        });
        if spec.execution_type == ExecutionType::Limit {
            if let Some(price) = spec.limit_price {
                body["price"] = json!(price);
            }
        }

        debug!(
            "Placing Dhan order: {} {} x{}",
            spec.transaction_side.as_str(),
            spec.trading_symbol,
            spec.quantity
        );

        let response = self
            .http
            .post(format!("{}/orders", self.base_url))
            .header("access-token", credentials.access_token.as_str())
            .json(&body)
            .send()
            .await
            .map_err(Self::transport_error)?;

        if !response.status().is_success() {
            return Err(Self::error_from(response).await);
        }

        let order: DhanOrderResponse = response.json().await.map_err(Self::transport_error)?;
        Ok(ExecutionReceipt {
            broker_order_id: order.order_id,
            average_price: order.average_traded_price,
        })
    }

    async fn refresh_token(&self, credentials: &BrokerCredentials) -> BrokerResult<RefreshedToken> {
        let response = self
            .http
            .post(format!("{}/RenewToken", self.base_url))
            .header("access-token", credentials.access_token.as_str())
            .header("dhanClientId", &credentials.client_id)
            .send()
            .await
            .map_err(Self::transport_error)?;

        if !response.status().is_success() {
            return Err(Self::error_from(response).await);
        }

        let body: DhanTokenResponse = response.json().await.map_err(Self::transport_error)?;
        Self::token_from(body)
    }

    async fn exchange_token(
        &self,
        client_id: &str,
        artifact: &AuthArtifact,
    ) -> BrokerResult<RefreshedToken> {
        let consent_app_id = artifact
            .consent_app_id
            .as_deref()
            .ok_or_else(|| BrokerError::rejected("Dhan exchange requires a consentAppId"))?;

        let response = self
            .http
            .post(format!("{}/generate-token", self.base_url))
            .json(&json!({
                "consentAppId": consent_app_id,
                "authCode": artifact.code,
                "clientId": client_id,
                "clientSecret": self.client_secret,
            }))
            .send()
            .await
            .map_err(Self::transport_error)?;

        if !response.status().is_success() {
            return Err(Self::error_from(response).await);
        }

        let body: DhanTokenResponse = response.json().await.map_err(Self::transport_error)?;
        Self::token_from(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_parse_token_validity() {
        let parsed = parse_token_validity("30/03/2025 15:37").unwrap();
        assert_eq!(parsed, Utc.with_ymd_and_hms(2025, 3, 30, 15, 37, 0).unwrap());

        assert!(parse_token_validity("2025-03-30T15:37:00Z").is_err());
        assert!(parse_token_validity("").is_err());
    }

    #[test]
    fn test_product_and_segment_mapping() {
        assert_eq!(dhan_product(ProductType::Mis), "INTRADAY");
        assert_eq!(dhan_product(ProductType::Nrml), "MARGIN");
        assert_eq!(dhan_segment("NFO"), "NSE_FNO");
        assert_eq!(dhan_segment("BFO"), "BSE_FNO");
    }

    #[test]
    fn test_token_from_accepts_either_field() {
        let token = DhanClient::token_from(DhanTokenResponse {
            access_token: None,
            token: Some("tok".to_string()),
            token_validity: Some("30/03/2025 15:37".to_string()),
        })
        .unwrap();
        assert_eq!(token.access_token.as_str(), "tok");

        let err = DhanClient::token_from(DhanTokenResponse {
            access_token: Some("tok".to_string()),
            token: None,
            token_validity: None,
        })
        .unwrap_err();
        assert_eq!(err.to_string(), "REJECTED: response missing tokenValidity");
    }
}
