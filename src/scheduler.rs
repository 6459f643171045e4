//! Background token refresh scheduler. Runs the lifecycle sweep on a fixed
//! interval until shutdown is signalled.

use crate::domain::services::token_lifecycle::TokenLifecycleService;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info};

pub struct TokenRefreshScheduler {
    lifecycle: Arc<TokenLifecycleService>,
    interval: Duration,
    shutdown_tx: Option<watch::Sender<bool>>,
    handle: Option<JoinHandle<()>>,
}

impl TokenRefreshScheduler {
    pub fn new(lifecycle: Arc<TokenLifecycleService>, interval: Duration) -> Self {
        Self {
            lifecycle,
            interval,
            shutdown_tx: None,
            handle: None,
        }
    }

    pub fn start(&mut self) {
        if self.handle.is_some() {
            return;
        }

        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let lifecycle = Arc::clone(&self.lifecycle);
        let interval = self.interval;

        let handle = tokio::spawn(async move {
            info!("Token refresh scheduler started (every {:?})", interval);
            let mut ticker = tokio::time::interval(interval);
            // The first tick fires immediately; a sweep at startup is wanted.
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        match lifecycle.refresh_due_accounts().await {
                            Ok((0, 0)) => {}
                            Ok((refreshed, failed)) => info!(
                                "Token sweep finished: {} refreshed, {} failed",
                                refreshed, failed
                            ),
                            Err(e) => error!("Token sweep failed: {}", e),
                        }
                    }
                    _ = shutdown_rx.changed() => {
                        info!("Token refresh scheduler stopping");
                        break;
                    }
                }
            }
        });

        self.shutdown_tx = Some(shutdown_tx);
        self.handle = Some(handle);
    }

    pub async fn stop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(true);
        }
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                error!("Token refresh scheduler task panicked: {}", e);
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::broker_registry::BrokerRegistry;
    use crate::persistence::init_database;
    use crate::persistence::repository::{BrokerAccountRepository, TokenRefreshLogRepository};
    use crate::security::CredentialVault;
    use chrono::Duration as ChronoDuration;

    #[tokio::test]
    async fn test_start_and_stop() {
        let pool = init_database("sqlite::memory:").await.unwrap();
        let lifecycle = Arc::new(TokenLifecycleService::new(
            BrokerAccountRepository::new(pool.clone()),
            TokenRefreshLogRepository::new(pool),
            BrokerRegistry::new(),
            Arc::new(CredentialVault::new("unit-test-key-with-enough-length").unwrap()),
            ChronoDuration::hours(2),
            ChronoDuration::minutes(5),
            Duration::from_secs(5),
        ));

        let mut scheduler = TokenRefreshScheduler::new(lifecycle, Duration::from_millis(50));
        assert!(!scheduler.is_running());

        scheduler.start();
        assert!(scheduler.is_running());
        tokio::time::sleep(Duration::from_millis(120)).await;

        scheduler.stop().await;
        assert!(!scheduler.is_running());
    }
}
