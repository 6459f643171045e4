//! Runtime configuration, loaded from the environment on startup.

use crate::domain::errors::ConfigurationError;

#[derive(Clone)]
pub struct AppConfig {
    pub database_url: String,
    /// Key material for the credential vault. Required.
    pub encryption_key: String,
    /// Maximum in-flight broker orders during one broadcast.
    pub broadcast_fan_out_limit: usize,
    /// Timeout applied to each broker call (seconds).
    pub broker_timeout_secs: u64,
    /// How often the token refresh sweep runs (seconds).
    pub token_refresh_interval_secs: u64,
    /// Refresh tokens expiring within this many hours.
    pub token_refresh_threshold_hours: i64,
    /// Not-before delay after a failed refresh (seconds).
    pub token_refresh_backoff_secs: i64,
    pub zerodha_api_key: String,
    pub zerodha_api_secret: String,
    pub dhan_client_secret: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        AppConfig {
            database_url: "sqlite://data/tradecast.db".to_string(),
            encryption_key: String::new(),
            broadcast_fan_out_limit: 10,
            broker_timeout_secs: 10,
            token_refresh_interval_secs: 300,
            token_refresh_threshold_hours: 2,
            token_refresh_backoff_secs: 300,
            zerodha_api_key: String::new(),
            zerodha_api_secret: String::new(),
            dhan_client_secret: String::new(),
        }
    }
}

impl AppConfig {
    /// Load configuration from environment variables. Missing numeric
    /// values fall back to defaults with a warning; a missing encryption
    /// key is fatal.
    pub fn from_env() -> Result<AppConfig, ConfigurationError> {
        let mut config = AppConfig::default();

        if let Ok(url) = std::env::var("DATABASE_URL") {
            if !url.is_empty() {
                config.database_url = url;
            }
        }

        config.encryption_key =
            std::env::var("ENCRYPTION_KEY").map_err(|_| ConfigurationError::MissingEncryptionKey)?;

        if let Ok(limit) = std::env::var("BROADCAST_FAN_OUT_LIMIT") {
            match limit.parse::<usize>() {
                Ok(value) if value >= 1 => config.broadcast_fan_out_limit = value,
                _ => tracing::warn!(
                    "Invalid BROADCAST_FAN_OUT_LIMIT '{}', using default: {}",
                    limit,
                    config.broadcast_fan_out_limit
                ),
            }
        }

        if let Ok(timeout) = std::env::var("BROKER_TIMEOUT_SECS") {
            match timeout.parse::<u64>() {
                Ok(value) if value >= 1 => config.broker_timeout_secs = value,
                _ => tracing::warn!(
                    "Invalid BROKER_TIMEOUT_SECS '{}', using default: {}",
                    timeout,
                    config.broker_timeout_secs
                ),
            }
        }

        if let Ok(interval) = std::env::var("TOKEN_REFRESH_INTERVAL_SECS") {
            match interval.parse::<u64>() {
                Ok(value) if value >= 10 => config.token_refresh_interval_secs = value,
                _ => tracing::warn!(
                    "Invalid TOKEN_REFRESH_INTERVAL_SECS '{}', using default: {}",
                    interval,
                    config.token_refresh_interval_secs
                ),
            }
        }

        if let Ok(threshold) = std::env::var("TOKEN_REFRESH_THRESHOLD_HOURS") {
            match threshold.parse::<i64>() {
                Ok(value) if value >= 1 => config.token_refresh_threshold_hours = value,
                _ => tracing::warn!(
                    "Invalid TOKEN_REFRESH_THRESHOLD_HOURS '{}', using default: {}",
                    threshold,
                    config.token_refresh_threshold_hours
                ),
            }
        }

        if let Ok(backoff) = std::env::var("TOKEN_REFRESH_BACKOFF_SECS") {
            if let Ok(value) = backoff.parse::<i64>() {
                if value >= 0 {
                    config.token_refresh_backoff_secs = value;
                }
            }
        }

        if let Ok(key) = std::env::var("ZERODHA_API_KEY") {
            config.zerodha_api_key = key;
        }
        if let Ok(secret) = std::env::var("ZERODHA_API_SECRET") {
            config.zerodha_api_secret = secret;
        }
        if let Ok(secret) = std::env::var("DHAN_CLIENT_SECRET") {
            config.dhan_client_secret = secret;
        }

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.broadcast_fan_out_limit, 10);
        assert_eq!(config.broker_timeout_secs, 10);
        assert_eq!(config.token_refresh_threshold_hours, 2);
    }
}
