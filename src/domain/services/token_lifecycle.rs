//! Token Lifecycle Service
//!
//! Owns broker token validity: PENDING accounts are activated through the
//! broker's auth exchange, ACTIVE tokens nearing expiry are refreshed by the
//! background sweep, and accounts whose calls fail authentication are forced
//! into the expired state so broadcasts skip them until re-login.
//!
//! Refreshes for one account are exclusive, and a failed refresh sets a
//! not-before stamp so the next sweep does not hammer the broker.

use crate::domain::entities::broker_account::{BrokerAccount, TokenState};
use crate::domain::errors::{LifecycleError, SkipReason};
use crate::domain::repositories::broker_client::AuthArtifact;
use crate::infrastructure::broker_registry::BrokerRegistry;
use crate::persistence::repository::{BrokerAccountRepository, TokenRefreshLogRepository};
use crate::security::CredentialVault;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

/// Outcome of one refresh attempt, reported per account by the sweep.
#[derive(Debug, Clone, PartialEq)]
pub enum RefreshOutcome {
    Refreshed { expires_at: DateTime<Utc> },
    Failed { error: String },
    /// A recent failure's not-before stamp is still in effect.
    BackedOff { until: DateTime<Utc> },
}

pub struct TokenLifecycleService {
    accounts: BrokerAccountRepository,
    refresh_log: TokenRefreshLogRepository,
    registry: BrokerRegistry,
    vault: Arc<CredentialVault>,
    refresh_threshold: Duration,
    failure_backoff: Duration,
    broker_timeout: std::time::Duration,
    locks: Mutex<HashMap<i64, Arc<Mutex<()>>>>,
    not_before: Mutex<HashMap<i64, DateTime<Utc>>>,
}

impl TokenLifecycleService {
    pub fn new(
        accounts: BrokerAccountRepository,
        refresh_log: TokenRefreshLogRepository,
        registry: BrokerRegistry,
        vault: Arc<CredentialVault>,
        refresh_threshold: Duration,
        failure_backoff: Duration,
        broker_timeout: std::time::Duration,
    ) -> Self {
        Self {
            accounts,
            refresh_log,
            registry,
            vault,
            refresh_threshold,
            failure_backoff,
            broker_timeout,
            locks: Mutex::new(HashMap::new()),
            not_before: Mutex::new(HashMap::new()),
        }
    }

    /// The skip reason a broadcast should record for this account's token
    /// state, if any.
    pub fn gate(&self, account: &BrokerAccount, now: DateTime<Utc>) -> Option<SkipReason> {
        match account.token_state(now) {
            TokenState::Active => None,
            TokenState::Pending => Some(SkipReason::AccountPending),
            TokenState::Expired => Some(SkipReason::TokenExpired),
        }
    }

    /// Exchange a user-supplied auth artifact for the account's first token.
    /// PENDING to ACTIVE transition.
    pub async fn activate(
        &self,
        account_id: i64,
        artifact: &AuthArtifact,
    ) -> Result<BrokerAccount, LifecycleError> {
        let account = self
            .accounts
            .get(account_id)
            .await?
            .ok_or(LifecycleError::AccountNotFound(account_id))?;

        let client = self.registry.get(account.broker_type)?;
        let token = client
            .exchange_token(&account.broker_account_id, artifact)
            .await?;

        let encrypted = self.vault.encrypt(token.access_token.as_str())?;
        let now = Utc::now();
        self.accounts
            .update_token(account.id, &encrypted, token.expires_at, now)
            .await?;

        info!(
            "Activated {} account {} for user {}, token valid until {}",
            account.broker_type, account.id, account.user_id, token.expires_at
        );

        self.accounts
            .get(account.id)
            .await?
            .ok_or(LifecycleError::AccountNotFound(account.id))
    }

    /// Backdate the account's token expiry after an AUTH failure so later
    /// broadcasts skip it instead of retrying a dead credential.
    pub async fn mark_expired(&self, account_id: i64) -> Result<(), LifecycleError> {
        warn!("Marking token expired for broker account {}", account_id);
        self.accounts
            .mark_token_expired(account_id, Utc::now())
            .await?;
        Ok(())
    }

    /// Refresh one account's token through its broker adapter. Exclusive per
    /// account; concurrent callers queue rather than double-refresh.
    pub async fn refresh_account(&self, account: &BrokerAccount) -> RefreshOutcome {
        let lock = {
            let mut locks = self.locks.lock().await;
            Arc::clone(locks.entry(account.id).or_default())
        };
        let _guard = lock.lock().await;

        let now = Utc::now();
        if let Some(&until) = self.not_before.lock().await.get(&account.id) {
            if now < until {
                return RefreshOutcome::BackedOff { until };
            }
        }

        match self.try_refresh(account).await {
            Ok(expires_at) => {
                self.not_before.lock().await.remove(&account.id);
                if let Err(e) = self
                    .refresh_log
                    .record_success(account.id, account.token_expires_at, expires_at)
                    .await
                {
                    error!("Failed to log refresh for account {}: {}", account.id, e);
                }
                info!(
                    "Refreshed token for broker account {}, valid until {}",
                    account.id, expires_at
                );
                RefreshOutcome::Refreshed { expires_at }
            }
            Err(e) => {
                let message = e.to_string();
                warn!("Token refresh failed for account {}: {}", account.id, message);
                let until = Utc::now() + self.failure_backoff;
                self.not_before.lock().await.insert(account.id, until);
                if let Err(log_err) = self
                    .refresh_log
                    .record_failure(account.id, account.token_expires_at, &message)
                    .await
                {
                    error!(
                        "Failed to log refresh failure for account {}: {}",
                        account.id, log_err
                    );
                }
                if let LifecycleError::Broker(ref broker_err) = e {
                    if broker_err.is_auth() {
                        if let Err(db_err) = self.mark_expired(account.id).await {
                            error!(
                                "Failed to expire token for account {}: {}",
                                account.id, db_err
                            );
                        }
                    }
                }
                RefreshOutcome::Failed { error: message }
            }
        }
    }

    async fn try_refresh(&self, account: &BrokerAccount) -> Result<DateTime<Utc>, LifecycleError> {
        let client = self.registry.get(account.broker_type)?;
        let credentials = self
            .vault
            .credentials_for(&account.broker_account_id, &account.access_token)?;

        let token = tokio::time::timeout(self.broker_timeout, client.refresh_token(&credentials))
            .await
            .map_err(|_| {
                LifecycleError::Broker(crate::domain::errors::BrokerError::timeout(
                    "token refresh timed out",
                ))
            })??;

        let encrypted = self.vault.encrypt(token.access_token.as_str())?;
        self.accounts
            .update_token(account.id, &encrypted, token.expires_at, Utc::now())
            .await?;
        Ok(token.expires_at)
    }

    /// One sweep: refresh every active account whose token expires within
    /// the threshold. Returns (refreshed, failed) counts.
    pub async fn refresh_due_accounts(&self) -> Result<(usize, usize), LifecycleError> {
        let cutoff = Utc::now() + self.refresh_threshold;
        let candidates = self.accounts.list_refresh_candidates(cutoff).await?;
        if candidates.is_empty() {
            return Ok((0, 0));
        }

        info!("Token sweep: {} account(s) due for refresh", candidates.len());
        let mut refreshed = 0;
        let mut failed = 0;
        for account in &candidates {
            match self.refresh_account(account).await {
                RefreshOutcome::Refreshed { .. } => refreshed += 1,
                RefreshOutcome::Failed { .. } => failed += 1,
                RefreshOutcome::BackedOff { .. } => {}
            }
        }
        Ok((refreshed, failed))
    }
}

/// Human-readable time until expiry, e.g. `5h 41m`, or `EXPIRED`.
pub fn format_time_remaining(remaining: Duration) -> String {
    if remaining <= Duration::zero() {
        "EXPIRED".to_string()
    } else {
        let hours = remaining.num_hours();
        let minutes = remaining.num_minutes() % 60;
        format!("{}h {}m", hours, minutes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entities::broker_account::{BrokerAccountStatus, BrokerType};
    use crate::domain::entities::user::UserRole;
    use crate::domain::errors::BrokerError;
    use crate::domain::repositories::broker_client::{
        BrokerClient, BrokerCredentials, BrokerResult, ExecutionReceipt, OrderSpec, RefreshedToken,
    };
    use crate::persistence::repository::{NewBrokerAccount, UserRepository};
    use crate::persistence::{init_database, DbPool};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use zeroize::Zeroizing;

    struct ScriptedBroker {
        refresh_ok: bool,
        auth_failure: bool,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl BrokerClient for ScriptedBroker {
        fn broker_type(&self) -> BrokerType {
            BrokerType::Dhan
        }

        async fn place_order(
            &self,
            _credentials: &BrokerCredentials,
            _spec: &OrderSpec,
        ) -> BrokerResult<ExecutionReceipt> {
            Err(BrokerError::rejected("not under test"))
        }

        async fn refresh_token(
            &self,
            _credentials: &BrokerCredentials,
        ) -> BrokerResult<RefreshedToken> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.auth_failure {
                Err(BrokerError::auth("token invalid"))
            } else if self.refresh_ok {
                Ok(RefreshedToken {
                    access_token: Zeroizing::new("fresh-token".to_string()),
                    expires_at: Utc::now() + Duration::hours(24),
                })
            } else {
                Err(BrokerError::network("connection reset"))
            }
        }

        async fn exchange_token(
            &self,
            _client_id: &str,
            artifact: &AuthArtifact,
        ) -> BrokerResult<RefreshedToken> {
            assert_eq!(artifact.code, "auth-code");
            Ok(RefreshedToken {
                access_token: Zeroizing::new("first-token".to_string()),
                expires_at: Utc::now() + Duration::hours(24),
            })
        }
    }

    async fn setup(
        broker: Arc<ScriptedBroker>,
    ) -> (DbPool, Arc<CredentialVault>, TokenLifecycleService, BrokerAccount) {
        let pool = init_database("sqlite::memory:").await.unwrap();
        let vault = Arc::new(CredentialVault::new("unit-test-key-with-enough-length").unwrap());

        let users = UserRepository::new(pool.clone());
        let accounts = BrokerAccountRepository::new(pool.clone());
        let user = users.create("trader@example.com", UserRole::User).await.unwrap();
        let encrypted = vault.encrypt("old-token").unwrap();
        let account = accounts
            .create(NewBrokerAccount {
                user_id: user.id,
                broker_type: BrokerType::Dhan,
                broker_account_id: "client-1".to_string(),
                encrypted_token: encrypted,
                token_expires_at: Utc::now() + Duration::minutes(30),
                status: BrokerAccountStatus::Active,
            })
            .await
            .unwrap();

        let mut registry = BrokerRegistry::new();
        registry.register(broker);

        let service = TokenLifecycleService::new(
            accounts,
            TokenRefreshLogRepository::new(pool.clone()),
            registry,
            Arc::clone(&vault),
            Duration::hours(2),
            Duration::minutes(10),
            std::time::Duration::from_secs(5),
        );
        (pool, vault, service, account)
    }

    #[tokio::test]
    async fn test_sweep_refreshes_due_token() {
        let broker = Arc::new(ScriptedBroker {
            refresh_ok: true,
            auth_failure: false,
            calls: AtomicUsize::new(0),
        });
        let (pool, vault, service, account) = setup(Arc::clone(&broker)).await;

        let (refreshed, failed) = service.refresh_due_accounts().await.unwrap();
        assert_eq!((refreshed, failed), (1, 0));
        assert_eq!(broker.calls.load(Ordering::SeqCst), 1);

        let stored = BrokerAccountRepository::new(pool)
            .get(account.id)
            .await
            .unwrap()
            .unwrap();
        assert!(stored.token_expires_at > Utc::now() + Duration::hours(20));
        assert!(stored.last_token_refresh_at.is_some());
        assert_eq!(vault.decrypt(&stored.access_token).unwrap().as_str(), "fresh-token");
    }

    #[tokio::test]
    async fn test_failed_refresh_backs_off() {
        let broker = Arc::new(ScriptedBroker {
            refresh_ok: false,
            auth_failure: false,
            calls: AtomicUsize::new(0),
        });
        let (pool, _vault, service, account) = setup(Arc::clone(&broker)).await;

        let outcome = service.refresh_account(&account).await;
        assert!(matches!(outcome, RefreshOutcome::Failed { .. }));

        // Second attempt inside the backoff window never reaches the broker.
        let outcome = service.refresh_account(&account).await;
        assert!(matches!(outcome, RefreshOutcome::BackedOff { .. }));
        assert_eq!(broker.calls.load(Ordering::SeqCst), 1);

        let log = TokenRefreshLogRepository::new(pool).recent(10).await.unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].status, "FAILED");
    }

    #[tokio::test]
    async fn test_auth_failure_expires_token() {
        let broker = Arc::new(ScriptedBroker {
            refresh_ok: false,
            auth_failure: true,
            calls: AtomicUsize::new(0),
        });
        let (pool, _vault, service, account) = setup(broker).await;

        let outcome = service.refresh_account(&account).await;
        assert!(matches!(outcome, RefreshOutcome::Failed { .. }));

        let stored = BrokerAccountRepository::new(pool)
            .get(account.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.token_state(Utc::now()), TokenState::Expired);
    }

    #[tokio::test]
    async fn test_activate_pending_account() {
        let broker = Arc::new(ScriptedBroker {
            refresh_ok: true,
            auth_failure: false,
            calls: AtomicUsize::new(0),
        });
        let pool = init_database("sqlite::memory:").await.unwrap();
        let vault = Arc::new(CredentialVault::new("unit-test-key-with-enough-length").unwrap());
        let users = UserRepository::new(pool.clone());
        let accounts = BrokerAccountRepository::new(pool.clone());
        let user = users.create("pending@example.com", UserRole::User).await.unwrap();
        let account = accounts
            .create(NewBrokerAccount {
                user_id: user.id,
                broker_type: BrokerType::Dhan,
                broker_account_id: "client-9".to_string(),
                encrypted_token: String::new(),
                token_expires_at: Utc::now(),
                status: BrokerAccountStatus::Pending,
            })
            .await
            .unwrap();
        assert_eq!(account.token_state(Utc::now()), TokenState::Pending);

        let mut registry = BrokerRegistry::new();
        registry.register(broker);
        let service = TokenLifecycleService::new(
            accounts,
            TokenRefreshLogRepository::new(pool),
            registry,
            Arc::clone(&vault),
            Duration::hours(2),
            Duration::minutes(10),
            std::time::Duration::from_secs(5),
        );

        let artifact = AuthArtifact {
            code: "auth-code".to_string(),
            consent_app_id: Some("consent-1".to_string()),
        };
        let activated = service.activate(account.id, &artifact).await.unwrap();
        assert_eq!(activated.status, BrokerAccountStatus::Active);
        assert_eq!(activated.token_state(Utc::now()), TokenState::Active);
        assert_eq!(
            vault.decrypt(&activated.access_token).unwrap().as_str(),
            "first-token"
        );
    }

    #[test]
    fn test_format_time_remaining() {
        assert_eq!(format_time_remaining(Duration::minutes(341)), "5h 41m");
        assert_eq!(format_time_remaining(Duration::minutes(-5)), "EXPIRED");
        assert_eq!(format_time_remaining(Duration::zero()), "EXPIRED");
    }
}
