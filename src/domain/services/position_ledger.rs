//! Position Ledger
//!
//! Single writer for a user's positions. Entry fills either open a new leg
//! or average into the existing open leg on the same instrument and side;
//! closes realize P&L partially or fully. Writes for one user are serialized
//! behind a per-user lock so a broadcast fill and a close cannot interleave.

use crate::domain::entities::broadcast::OrderIntent;
use crate::domain::entities::position::{Position, PositionStatus};
use crate::domain::entities::user::UserId;
use crate::domain::errors::{LedgerError, ValidationError};
use crate::persistence::repository::{NewPosition, PositionRepository};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Result of a close. `realized_pnl` is the P&L of this close alone; the
/// position carries the running total.
#[derive(Debug, Clone)]
pub struct CloseOutcome {
    pub position: Position,
    pub realized_pnl: f64,
    pub fully_closed: bool,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PnlSummary {
    pub open_positions: usize,
    pub unrealized_pnl: f64,
    pub realized_pnl: f64,
}

pub struct PositionLedger {
    positions: PositionRepository,
    locks: Mutex<HashMap<UserId, Arc<Mutex<()>>>>,
}

impl PositionLedger {
    pub fn new(positions: PositionRepository) -> Self {
        Self {
            positions,
            locks: Mutex::new(HashMap::new()),
        }
    }

    async fn user_lock(&self, user_id: UserId) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        Arc::clone(locks.entry(user_id).or_default())
    }

    /// Record a successful entry fill. Averages into the user's open leg on
    /// the same instrument and side when one exists; otherwise opens a new
    /// position. An opposite-side entry always opens its own position.
    pub async fn record_fill(
        &self,
        user_id: UserId,
        broker_account_id: i64,
        intent: &OrderIntent,
        quantity: i64,
        fill_price: f64,
    ) -> Result<Position, LedgerError> {
        if quantity <= 0 {
            return Err(ValidationError::NonPositiveQuantity(quantity).into());
        }
        if fill_price <= 0.0 {
            return Err(ValidationError::NonPositivePrice(fill_price).into());
        }

        let lock = self.user_lock(user_id).await;
        let _guard = lock.lock().await;

        if let Some(existing) = self.positions.find_open_leg(user_id, intent).await? {
            let total = existing.quantity + quantity;
            let blended = (existing.entry_price * existing.quantity as f64
                + fill_price * quantity as f64)
                / total as f64;
            self.positions
                .average_in(existing.id, total, blended)
                .await?;
            debug!(
                "Averaged user {} position {}: qty {} -> {}, entry {:.2} -> {:.2}",
                user_id, existing.id, existing.quantity, total, existing.entry_price, blended
            );
            let mut updated = existing;
            updated.quantity = total;
            updated.entry_price = blended;
            return Ok(updated);
        }

        let position = self
            .positions
            .create(NewPosition {
                user_id,
                broker_account_id,
                symbol: intent.symbol.clone(),
                expiry: intent.expiry.clone(),
                strike: intent.strike,
                option_type: intent.option_type,
                side: intent.side,
                quantity,
                entry_price: fill_price,
            })
            .await?;
        Ok(position)
    }

    /// Close some or all of a position at the given price. `exit_quantity`
    /// of `None` closes the full remaining quantity.
    pub async fn close(
        &self,
        position_id: i64,
        exit_price: f64,
        exit_quantity: Option<i64>,
    ) -> Result<CloseOutcome, LedgerError> {
        if exit_price <= 0.0 {
            return Err(ValidationError::NonPositivePrice(exit_price).into());
        }

        let probe = self
            .positions
            .get(position_id)
            .await?
            .ok_or(ValidationError::PositionNotFound(position_id))?;

        let lock = self.user_lock(probe.user_id).await;
        let _guard = lock.lock().await;

        // Re-read under the lock; a concurrent close may have won.
        let position = self
            .positions
            .get(position_id)
            .await?
            .ok_or(ValidationError::PositionNotFound(position_id))?;
        if !position.is_open() {
            return Err(ValidationError::PositionAlreadyClosed(position_id).into());
        }

        let exit_quantity = exit_quantity.unwrap_or(position.quantity);
        if exit_quantity <= 0 {
            return Err(ValidationError::NonPositiveQuantity(exit_quantity).into());
        }
        if exit_quantity > position.quantity {
            return Err(ValidationError::ExitQuantityExceedsRemaining {
                requested: exit_quantity,
                remaining: position.quantity,
            }
            .into());
        }

        let realized =
            (exit_price - position.entry_price) * exit_quantity as f64 * position.side.sign();
        let remaining = position.quantity - exit_quantity;
        let fully_closed = remaining == 0;
        let total_realized = position.realized_pnl + realized;
        let closed_at = fully_closed.then(Utc::now);
        let status = if fully_closed {
            PositionStatus::Closed
        } else {
            PositionStatus::Open
        };

        self.positions
            .apply_close(position.id, remaining, total_realized, status, closed_at)
            .await?;

        info!(
            "Closed {}x of position {} for user {} at {:.2}, realized {:.2}{}",
            exit_quantity,
            position.id,
            position.user_id,
            exit_price,
            realized,
            if fully_closed { " (fully closed)" } else { "" }
        );

        let mut updated = position;
        updated.quantity = remaining;
        updated.realized_pnl = total_realized;
        updated.status = status;
        updated.closed_at = closed_at;
        Ok(CloseOutcome {
            position: updated,
            realized_pnl: realized,
            fully_closed,
        })
    }

    /// Record the latest market price on an open position.
    pub async fn mark_price(&self, position_id: i64, price: f64) -> Result<Position, LedgerError> {
        if price <= 0.0 {
            return Err(ValidationError::NonPositivePrice(price).into());
        }
        let mut position = self
            .positions
            .get(position_id)
            .await?
            .ok_or(ValidationError::PositionNotFound(position_id))?;
        self.positions
            .update_current_price(position_id, price)
            .await?;
        position.current_price = Some(price);
        Ok(position)
    }

    /// The user's open position on the instrument leg an intent names.
    pub async fn open_leg(
        &self,
        user_id: UserId,
        intent: &OrderIntent,
    ) -> Result<Option<Position>, LedgerError> {
        let position = self.positions.find_open_leg(user_id, intent).await?;
        if let Some(ref position) = position {
            debug_assert!(position.matches_leg(intent));
        }
        Ok(position)
    }

    pub async fn open_positions(&self, user_id: UserId) -> Result<Vec<Position>, LedgerError> {
        Ok(self.positions.list_open_for_user(user_id).await?)
    }

    /// Aggregate P&L across all of a user's positions. Unrealized P&L only
    /// counts open positions with a known price.
    pub async fn user_pnl_summary(&self, user_id: UserId) -> Result<PnlSummary, LedgerError> {
        let all = self.positions.list_for_user(user_id).await?;
        let mut summary = PnlSummary {
            open_positions: 0,
            unrealized_pnl: 0.0,
            realized_pnl: 0.0,
        };
        for position in &all {
            summary.realized_pnl += position.realized_pnl;
            if position.is_open() {
                summary.open_positions += 1;
                if let Some(pnl) = position.unrealized_pnl() {
                    summary.unrealized_pnl += pnl;
                }
            }
        }
        Ok(summary)
    }
}
