use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tradecast::config::AppConfig;
use tradecast::domain::services::token_lifecycle::TokenLifecycleService;
use tradecast::infrastructure::broker_registry::BrokerRegistry;
use tradecast::infrastructure::dhan_client::DhanClient;
use tradecast::infrastructure::zerodha_client::ZerodhaClient;
use tradecast::persistence::init_database;
use tradecast::persistence::repository::{BrokerAccountRepository, TokenRefreshLogRepository};
use tradecast::scheduler::TokenRefreshScheduler;
use tradecast::security::CredentialVault;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tradecast=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = AppConfig::from_env()?;
    info!("Starting tradecast");

    let pool = init_database(&config.database_url).await?;
    let vault = Arc::new(CredentialVault::new(&config.encryption_key)?);

    let mut registry = BrokerRegistry::new();
    registry.register(Arc::new(ZerodhaClient::new(
        config.zerodha_api_key.clone(),
        config.zerodha_api_secret.clone(),
    )));
    registry.register(Arc::new(DhanClient::new(config.dhan_client_secret.clone())));

    let lifecycle = Arc::new(TokenLifecycleService::new(
        BrokerAccountRepository::new(pool.clone()),
        TokenRefreshLogRepository::new(pool.clone()),
        registry,
        Arc::clone(&vault),
        chrono::Duration::hours(config.token_refresh_threshold_hours),
        chrono::Duration::seconds(config.token_refresh_backoff_secs),
        Duration::from_secs(config.broker_timeout_secs),
    ));

    let mut scheduler = TokenRefreshScheduler::new(
        Arc::clone(&lifecycle),
        Duration::from_secs(config.token_refresh_interval_secs),
    );
    scheduler.start();
    info!("Ready; press Ctrl+C to stop");

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
    }

    info!("Shutting down");
    scheduler.stop().await;
    pool.close().await;
    Ok(())
}
