//! Broadcast Orchestrator
//!
//! Fans one admin order intent out to every targeted user: sizes the order
//! per user, places it through the user's broker adapter, and records the
//! fill in the position ledger. One user's failure never touches another
//! user's execution; every target ends up as exactly one execution detail,
//! in target-list order.
//!
//! The broadcast record and its details are written in a single transaction
//! after every user has settled.

use crate::domain::entities::broadcast::{
    BroadcastResult, BroadcastType, ExecutionDetail, ExecutionStatus, OrderIntent,
};
use crate::domain::entities::broker_account::{BrokerAccount, BrokerAccountStatus};
use crate::domain::entities::user::UserId;
use crate::domain::errors::{BroadcastError, SkipReason, ValidationError};
use crate::domain::services::lot_sizer::{compute_quantity, lot_size_for_symbol};
use crate::domain::services::position_ledger::PositionLedger;
use crate::domain::services::token_lifecycle::TokenLifecycleService;
use crate::domain::repositories::broker_client::OrderSpec;
use crate::infrastructure::broker_registry::BrokerRegistry;
use crate::persistence::repository::{
    BroadcastRepository, BrokerAccountRepository, NewBroadcast, TradingProfileRepository,
    UserRepository,
};
use crate::security::CredentialVault;
use chrono::Utc;
use futures_util::stream::{self, StreamExt};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// An admin's request to broadcast one intent to a set of users.
#[derive(Debug, Clone)]
pub struct BroadcastRequest {
    pub admin_id: UserId,
    pub intent: OrderIntent,
    pub target_user_ids: Vec<UserId>,
    pub include_admin: bool,
}

pub struct BroadcastOrchestrator {
    users: UserRepository,
    profiles: TradingProfileRepository,
    accounts: BrokerAccountRepository,
    broadcasts: BroadcastRepository,
    ledger: Arc<PositionLedger>,
    tokens: Arc<TokenLifecycleService>,
    registry: BrokerRegistry,
    vault: Arc<CredentialVault>,
    fan_out_limit: usize,
    broker_timeout: Duration,
}

impl BroadcastOrchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        users: UserRepository,
        profiles: TradingProfileRepository,
        accounts: BrokerAccountRepository,
        broadcasts: BroadcastRepository,
        ledger: Arc<PositionLedger>,
        tokens: Arc<TokenLifecycleService>,
        registry: BrokerRegistry,
        vault: Arc<CredentialVault>,
        fan_out_limit: usize,
        broker_timeout: Duration,
    ) -> Self {
        Self {
            users,
            profiles,
            accounts,
            broadcasts,
            ledger,
            tokens,
            registry,
            vault,
            fan_out_limit: fan_out_limit.max(1),
            broker_timeout,
        }
    }

    /// Run one broadcast end to end. Fails fast on a bad request; after
    /// fan-out starts, per-user problems only mark that user's detail.
    pub async fn execute(
        &self,
        request: &BroadcastRequest,
    ) -> Result<BroadcastResult, BroadcastError> {
        request.intent.validate()?;

        let admin = self
            .users
            .get(request.admin_id)
            .await?
            .filter(|u| u.is_admin())
            .ok_or(ValidationError::NotAdmin(request.admin_id))?;

        let targets = build_target_list(request);
        if targets.is_empty() {
            return Err(ValidationError::NoTargetUsers.into());
        }

        info!(
            "Broadcasting {} {} {} to {} user(s)",
            request.intent.broadcast_type.as_str(),
            request.intent.side.as_str(),
            request.intent.trading_symbol(),
            targets.len()
        );

        // Bounded concurrency; `buffered` yields results in input order.
        let details: Vec<ExecutionDetail> = stream::iter(targets.iter().copied())
            .map(|user_id| self.execute_for_user(user_id, &request.intent))
            .buffered(self.fan_out_limit)
            .collect()
            .await;

        let successful = count(&details, ExecutionStatus::Success);
        let failed = count(&details, ExecutionStatus::Failed);
        let skipped = count(&details, ExecutionStatus::Skipped);

        let broadcast_id = self
            .broadcasts
            .create_completed(
                &NewBroadcast {
                    admin_id: admin.id,
                    intent: request.intent.clone(),
                    total_users: targets.len() as u32,
                    successful_executions: successful,
                    failed_executions: failed,
                    skipped_executions: skipped,
                },
                &details,
            )
            .await?;

        info!(
            "Broadcast {} complete: {} success, {} failed, {} skipped",
            broadcast_id, successful, failed, skipped
        );

        Ok(BroadcastResult {
            broadcast_id,
            total_users: targets.len() as u32,
            successful_executions: successful,
            failed_executions: failed,
            skipped_executions: skipped,
            details,
            completed_at: Utc::now(),
        })
    }

    /// One user's leg of the broadcast. Never propagates an error; every
    /// outcome is folded into the returned detail.
    async fn execute_for_user(&self, user_id: UserId, intent: &OrderIntent) -> ExecutionDetail {
        let account = match self.accounts.get_by_user(user_id).await {
            Ok(Some(account)) => account,
            Ok(None) => {
                return ExecutionDetail::skipped(user_id, SkipReason::NoBrokerAccount.to_string())
            }
            Err(e) => return ExecutionDetail::failed(user_id, e.to_string()),
        };

        // Eligibility gates apply in a fixed order: account status, trading
        // profile (ENTRY only), then token validity. The recorded skip
        // reason is the first unmet requirement.
        if account.status == BrokerAccountStatus::Inactive {
            return ExecutionDetail::skipped(user_id, SkipReason::AccountInactive.to_string());
        }
        let entry_profile = match intent.broadcast_type {
            BroadcastType::Entry => match self.profiles.get(user_id).await {
                Ok(Some(profile)) => Some(profile),
                Ok(None) => {
                    return ExecutionDetail::skipped(
                        user_id,
                        SkipReason::NoTradingProfile.to_string(),
                    )
                }
                Err(e) => return ExecutionDetail::failed(user_id, e.to_string()),
            },
            BroadcastType::Exit => None,
        };
        if let Some(reason) = self.tokens.gate(&account, Utc::now()) {
            return ExecutionDetail::skipped(user_id, reason.to_string());
        }

        // Per-user sizing. ENTRY scales the instrument lot by the user's
        // multiplier; EXIT closes the full remaining quantity of the leg.
        let (quantity, transaction_side, exit_position) = match entry_profile {
            Some(profile) => {
                let base = lot_size_for_symbol(&intent.symbol);
                match compute_quantity(base, &profile.lot_size_multiplier) {
                    Ok(quantity) => (quantity, intent.side, None),
                    Err(e) => return ExecutionDetail::failed(user_id, e.to_string()),
                }
            }
            None => match self.ledger.open_leg(user_id, intent).await {
                Ok(Some(position)) => {
                    (position.quantity, intent.side.opposite(), Some(position))
                }
                Ok(None) => {
                    return ExecutionDetail::skipped(
                        user_id,
                        SkipReason::NoOpenPosition.to_string(),
                    )
                }
                Err(e) => return ExecutionDetail::failed(user_id, e.to_string()),
            },
        };

        let credentials = match self
            .vault
            .credentials_for(&account.broker_account_id, &account.access_token)
        {
            Ok(credentials) => credentials,
            Err(e) => return ExecutionDetail::failed(user_id, e.to_string()),
        };
        let client = match self.registry.get(account.broker_type) {
            Ok(client) => client,
            Err(e) => return ExecutionDetail::failed(user_id, e.to_string()),
        };

        let spec = OrderSpec {
            trading_symbol: intent.trading_symbol(),
            exchange_segment: intent.exchange_segment().to_string(),
            transaction_side,
            quantity,
            product_type: intent.product_type,
            execution_type: intent.execution_type,
            limit_price: intent.limit_price,
        };

        let receipt =
            match tokio::time::timeout(self.broker_timeout, client.place_order(&credentials, &spec))
                .await
            {
                Err(_) => {
                    warn!("Order for user {} timed out", user_id);
                    return ExecutionDetail::failed(user_id, "TIMEOUT: order placement timed out");
                }
                Ok(Err(e)) => {
                    warn!("Order for user {} failed: {}", user_id, e);
                    if e.is_auth() {
                        if let Err(expire_err) = self.tokens.mark_expired(account.id).await {
                            error!(
                                "Failed to expire token for account {}: {}",
                                account.id, expire_err
                            );
                        }
                    }
                    return ExecutionDetail::failed(user_id, e.to_string());
                }
                Ok(Ok(receipt)) => receipt,
            };

        let fill_price = receipt.average_price.or(intent.limit_price);
        self.settle_ledger(user_id, &account, intent, quantity, fill_price, exit_position)
            .await;

        ExecutionDetail::success(user_id, quantity, receipt.broker_order_id, fill_price)
    }

    /// Best-effort ledger update after a placed order. A ledger problem is
    /// logged but never demotes an already-accepted order.
    async fn settle_ledger(
        &self,
        user_id: UserId,
        account: &BrokerAccount,
        intent: &OrderIntent,
        quantity: i64,
        fill_price: Option<f64>,
        exit_position: Option<crate::domain::entities::position::Position>,
    ) {
        let Some(price) = fill_price else {
            warn!(
                "No execution price for user {} on {}; ledger not updated",
                user_id,
                intent.trading_symbol()
            );
            return;
        };

        let result = match intent.broadcast_type {
            BroadcastType::Entry => self
                .ledger
                .record_fill(user_id, account.id, intent, quantity, price)
                .await
                .map(|_| ()),
            BroadcastType::Exit => match exit_position {
                Some(position) => self.ledger.close(position.id, price, None).await.map(|_| ()),
                None => Ok(()),
            },
        };
        if let Err(e) = result {
            warn!("Ledger update failed for user {}: {}", user_id, e);
        }
    }
}

/// Deduplicated target list in request order, admin first when included.
fn build_target_list(request: &BroadcastRequest) -> Vec<UserId> {
    let mut seen = HashSet::new();
    let mut targets = Vec::with_capacity(request.target_user_ids.len() + 1);
    if request.include_admin && seen.insert(request.admin_id) {
        targets.push(request.admin_id);
    }
    for &user_id in &request.target_user_ids {
        if seen.insert(user_id) {
            targets.push(user_id);
        }
    }
    targets
}

fn count(details: &[ExecutionDetail], status: ExecutionStatus) -> u32 {
    details.iter().filter(|d| d.status == status).count() as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(target_user_ids: Vec<UserId>, include_admin: bool) -> BroadcastRequest {
        use crate::domain::entities::broadcast::{
            ExecutionType, OptionType, ProductType, Side,
        };
        BroadcastRequest {
            admin_id: 1,
            intent: OrderIntent {
                symbol: "BANKNIFTY".to_string(),
                expiry: "24JAN2026".to_string(),
                strike: 48000.0,
                option_type: OptionType::Ce,
                side: Side::Buy,
                execution_type: ExecutionType::Market,
                limit_price: None,
                product_type: ProductType::Mis,
                broadcast_type: BroadcastType::Entry,
                notes: None,
            },
            target_user_ids,
            include_admin,
        }
    }

    #[test]
    fn test_target_list_dedupes_and_orders_admin_first() {
        let targets = build_target_list(&request(vec![3, 2, 3, 1, 2], true));
        assert_eq!(targets, vec![1, 3, 2]);

        let targets = build_target_list(&request(vec![3, 2], false));
        assert_eq!(targets, vec![3, 2]);
    }

    #[test]
    fn test_target_list_empty() {
        assert!(build_target_list(&request(vec![], false)).is_empty());
    }
}
