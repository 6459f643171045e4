//! Repositories over the SQLite pool. Each returns domain entities (rows are
//! re-validated on read) and maps driver failures to `DatabaseError`.

use crate::domain::entities::broadcast::{ExecutionDetail, OrderIntent};
use crate::domain::entities::broker_account::{BrokerAccount, BrokerAccountStatus, BrokerType};
use crate::domain::entities::position::{Position, PositionStatus};
use crate::domain::entities::trading_profile::{LotMultiplier, RiskProfile};
use crate::domain::entities::user::{User, UserId, UserRole, UserStatus};
use crate::domain::errors::DatabaseError;
use crate::persistence::models::{
    BroadcastOrderRecord, BrokerAccountRecord, ExecutionDetailRecord, PositionRecord,
    TokenRefreshLogRecord, TradingProfileRecord, UserRecord,
};
use crate::persistence::DbPool;
use chrono::{DateTime, Utc};
use tracing::{debug, error};

fn query_error(context: &str, e: sqlx::Error) -> DatabaseError {
    error!("{}: {}", context, e);
    DatabaseError::QueryError(format!("{}: {}", context, e))
}

#[derive(Clone)]
pub struct UserRepository {
    pool: DbPool,
}

impl UserRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn create(&self, email: &str, role: UserRole) -> Result<User, DatabaseError> {
        let now = Utc::now();
        let result = sqlx::query(
            "INSERT INTO users (email, role, status, created_at) VALUES (?, ?, ?, ?)",
        )
        .bind(email)
        .bind(role.as_str())
        .bind(UserStatus::Active.as_str())
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| query_error("Failed to insert user", e))?;

        debug!("Created user {} ({})", email, role.as_str());
        Ok(User {
            id: result.last_insert_rowid(),
            email: email.to_string(),
            role,
            status: UserStatus::Active,
            created_at: now,
        })
    }

    pub async fn get(&self, id: UserId) -> Result<Option<User>, DatabaseError> {
        let record = sqlx::query_as::<_, UserRecord>("SELECT * FROM users WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| query_error("Failed to fetch user", e))?;

        record.map(User::try_from).transpose().map_err(Into::into)
    }
}

#[derive(Clone)]
pub struct TradingProfileRepository {
    pool: DbPool,
}

impl TradingProfileRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn upsert(
        &self,
        user_id: UserId,
        multiplier: LotMultiplier,
        risk_profile: RiskProfile,
        max_loss_per_day: Option<f64>,
    ) -> Result<(), DatabaseError> {
        sqlx::query(
            r#"
            INSERT INTO trading_profiles
                (user_id, lot_size_multiplier, risk_profile, max_loss_per_day, updated_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(user_id) DO UPDATE SET
                lot_size_multiplier = excluded.lot_size_multiplier,
                risk_profile = excluded.risk_profile,
                max_loss_per_day = excluded.max_loss_per_day,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(user_id)
        .bind(multiplier.as_str())
        .bind(risk_profile.as_str())
        .bind(max_loss_per_day)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(|e| query_error("Failed to upsert trading profile", e))?;

        debug!("Upserted trading profile for user {}", user_id);
        Ok(())
    }

    /// Raw row fetch. The multiplier stays a string here so the sizing path
    /// can reject a corrupt value per user instead of failing the read.
    pub async fn get(
        &self,
        user_id: UserId,
    ) -> Result<Option<TradingProfileRecord>, DatabaseError> {
        sqlx::query_as::<_, TradingProfileRecord>(
            "SELECT * FROM trading_profiles WHERE user_id = ?",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| query_error("Failed to fetch trading profile", e))
    }
}

/// Input for linking a broker account. `encrypted_token` is empty for a
/// PENDING account that has not completed the login flow yet.
#[derive(Debug, Clone)]
pub struct NewBrokerAccount {
    pub user_id: UserId,
    pub broker_type: BrokerType,
    pub broker_account_id: String,
    pub encrypted_token: String,
    pub token_expires_at: DateTime<Utc>,
    pub status: BrokerAccountStatus,
}

#[derive(Clone)]
pub struct BrokerAccountRepository {
    pool: DbPool,
}

impl BrokerAccountRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn create(&self, new: NewBrokerAccount) -> Result<BrokerAccount, DatabaseError> {
        let now = Utc::now();
        let result = sqlx::query(
            r#"
            INSERT INTO broker_accounts
                (user_id, broker_type, broker_account_id, access_token,
                 token_expires_at, last_token_refresh_at, status, created_at)
            VALUES (?, ?, ?, ?, ?, NULL, ?, ?)
            "#,
        )
        .bind(new.user_id)
        .bind(new.broker_type.as_str())
        .bind(&new.broker_account_id)
        .bind(&new.encrypted_token)
        .bind(new.token_expires_at)
        .bind(new.status.as_str())
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| query_error("Failed to insert broker account", e))?;

        debug!(
            "Linked {} account for user {}",
            new.broker_type.as_str(),
            new.user_id
        );
        Ok(BrokerAccount {
            id: result.last_insert_rowid(),
            user_id: new.user_id,
            broker_type: new.broker_type,
            broker_account_id: new.broker_account_id,
            access_token: new.encrypted_token,
            token_expires_at: new.token_expires_at,
            last_token_refresh_at: None,
            status: new.status,
            created_at: now,
        })
    }

    pub async fn get(&self, id: i64) -> Result<Option<BrokerAccount>, DatabaseError> {
        let record =
            sqlx::query_as::<_, BrokerAccountRecord>("SELECT * FROM broker_accounts WHERE id = ?")
                .bind(id)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| query_error("Failed to fetch broker account", e))?;

        record
            .map(BrokerAccount::try_from)
            .transpose()
            .map_err(Into::into)
    }

    pub async fn get_by_user(
        &self,
        user_id: UserId,
    ) -> Result<Option<BrokerAccount>, DatabaseError> {
        let record = sqlx::query_as::<_, BrokerAccountRecord>(
            "SELECT * FROM broker_accounts WHERE user_id = ?",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| query_error("Failed to fetch broker account by user", e))?;

        record
            .map(BrokerAccount::try_from)
            .transpose()
            .map_err(Into::into)
    }

    /// Store a fresh token and activate the account. Covers both the initial
    /// PENDING to ACTIVE transition and routine refreshes.
    pub async fn update_token(
        &self,
        id: i64,
        encrypted_token: &str,
        expires_at: DateTime<Utc>,
        refreshed_at: DateTime<Utc>,
    ) -> Result<(), DatabaseError> {
        sqlx::query(
            r#"
            UPDATE broker_accounts
            SET access_token = ?, token_expires_at = ?, last_token_refresh_at = ?,
                status = 'ACTIVE'
            WHERE id = ?
            "#,
        )
        .bind(encrypted_token)
        .bind(expires_at)
        .bind(refreshed_at)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| query_error("Failed to update broker token", e))?;

        debug!("Stored refreshed token for broker account {}", id);
        Ok(())
    }

    /// Force the token into the expired state by backdating its expiry.
    pub async fn mark_token_expired(
        &self,
        id: i64,
        now: DateTime<Utc>,
    ) -> Result<(), DatabaseError> {
        sqlx::query("UPDATE broker_accounts SET token_expires_at = ? WHERE id = ?")
            .bind(now)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| query_error("Failed to expire broker token", e))?;
        Ok(())
    }

    /// Active accounts holding a token that expires at or before the cutoff.
    /// Already-expired tokens are included; their refresh attempt surfaces
    /// the failure in the refresh log.
    pub async fn list_refresh_candidates(
        &self,
        expiring_before: DateTime<Utc>,
    ) -> Result<Vec<BrokerAccount>, DatabaseError> {
        let records = sqlx::query_as::<_, BrokerAccountRecord>(
            r#"
            SELECT * FROM broker_accounts
            WHERE status = 'ACTIVE' AND access_token != '' AND token_expires_at <= ?
            ORDER BY token_expires_at ASC
            "#,
        )
        .bind(expiring_before)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| query_error("Failed to list refresh candidates", e))?;

        records
            .into_iter()
            .map(|r| BrokerAccount::try_from(r).map_err(Into::into))
            .collect()
    }
}

#[derive(Debug, Clone)]
pub struct NewPosition {
    pub user_id: UserId,
    pub broker_account_id: i64,
    pub symbol: String,
    pub expiry: String,
    pub strike: f64,
    pub option_type: crate::domain::entities::broadcast::OptionType,
    pub side: crate::domain::entities::broadcast::Side,
    pub quantity: i64,
    pub entry_price: f64,
}

#[derive(Clone)]
pub struct PositionRepository {
    pool: DbPool,
}

impl PositionRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn create(&self, new: NewPosition) -> Result<Position, DatabaseError> {
        let now = Utc::now();
        let result = sqlx::query(
            r#"
            INSERT INTO positions
                (user_id, broker_account_id, symbol, expiry, strike, option_type,
                 side, quantity, entry_price, current_price, realized_pnl, status,
                 opened_at, closed_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, NULL, 0.0, 'OPEN', ?, NULL)
            "#,
        )
        .bind(new.user_id)
        .bind(new.broker_account_id)
        .bind(&new.symbol)
        .bind(&new.expiry)
        .bind(new.strike)
        .bind(new.option_type.as_str())
        .bind(new.side.as_str())
        .bind(new.quantity)
        .bind(new.entry_price)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| query_error("Failed to insert position", e))?;

        debug!(
            "Opened position for user {}: {} {} x{} @ {}",
            new.user_id,
            new.side.as_str(),
            new.symbol,
            new.quantity,
            new.entry_price
        );
        Ok(Position {
            id: result.last_insert_rowid(),
            user_id: new.user_id,
            broker_account_id: new.broker_account_id,
            symbol: new.symbol,
            expiry: new.expiry,
            strike: new.strike,
            option_type: new.option_type,
            side: new.side,
            quantity: new.quantity,
            entry_price: new.entry_price,
            current_price: None,
            realized_pnl: 0.0,
            status: PositionStatus::Open,
            opened_at: now,
            closed_at: None,
        })
    }

    pub async fn get(&self, id: i64) -> Result<Option<Position>, DatabaseError> {
        let record = sqlx::query_as::<_, PositionRecord>("SELECT * FROM positions WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| query_error("Failed to fetch position", e))?;

        record
            .map(Position::try_from)
            .transpose()
            .map_err(Into::into)
    }

    /// The user's open position on the exact instrument leg the intent
    /// names, if any.
    pub async fn find_open_leg(
        &self,
        user_id: UserId,
        intent: &OrderIntent,
    ) -> Result<Option<Position>, DatabaseError> {
        let record = sqlx::query_as::<_, PositionRecord>(
            r#"
            SELECT * FROM positions
            WHERE user_id = ? AND symbol = ? AND expiry = ? AND strike = ?
              AND option_type = ? AND side = ? AND status = 'OPEN'
            ORDER BY opened_at ASC
            LIMIT 1
            "#,
        )
        .bind(user_id)
        .bind(&intent.symbol)
        .bind(&intent.expiry)
        .bind(intent.strike)
        .bind(intent.option_type.as_str())
        .bind(intent.side.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| query_error("Failed to find open leg", e))?;

        record
            .map(Position::try_from)
            .transpose()
            .map_err(Into::into)
    }

    /// Replace quantity and entry price after averaging a fill into an
    /// existing open leg.
    pub async fn average_in(
        &self,
        id: i64,
        quantity: i64,
        entry_price: f64,
    ) -> Result<(), DatabaseError> {
        sqlx::query("UPDATE positions SET quantity = ?, entry_price = ? WHERE id = ?")
            .bind(quantity)
            .bind(entry_price)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| query_error("Failed to average into position", e))?;
        Ok(())
    }

    /// Write the outcome of a partial or full close in one update.
    pub async fn apply_close(
        &self,
        id: i64,
        remaining_quantity: i64,
        realized_pnl: f64,
        status: PositionStatus,
        closed_at: Option<DateTime<Utc>>,
    ) -> Result<(), DatabaseError> {
        sqlx::query(
            r#"
            UPDATE positions
            SET quantity = ?, realized_pnl = ?, status = ?, closed_at = ?
            WHERE id = ?
            "#,
        )
        .bind(remaining_quantity)
        .bind(realized_pnl)
        .bind(status.as_str())
        .bind(closed_at)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| query_error("Failed to apply position close", e))?;
        Ok(())
    }

    pub async fn update_current_price(&self, id: i64, price: f64) -> Result<(), DatabaseError> {
        sqlx::query("UPDATE positions SET current_price = ? WHERE id = ?")
            .bind(price)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| query_error("Failed to update position price", e))?;
        Ok(())
    }

    pub async fn list_open_for_user(
        &self,
        user_id: UserId,
    ) -> Result<Vec<Position>, DatabaseError> {
        let records = sqlx::query_as::<_, PositionRecord>(
            "SELECT * FROM positions WHERE user_id = ? AND status = 'OPEN' ORDER BY opened_at ASC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| query_error("Failed to list open positions", e))?;

        records
            .into_iter()
            .map(|r| Position::try_from(r).map_err(Into::into))
            .collect()
    }

    pub async fn list_for_user(&self, user_id: UserId) -> Result<Vec<Position>, DatabaseError> {
        let records = sqlx::query_as::<_, PositionRecord>(
            "SELECT * FROM positions WHERE user_id = ? ORDER BY opened_at ASC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| query_error("Failed to list positions", e))?;

        records
            .into_iter()
            .map(|r| Position::try_from(r).map_err(Into::into))
            .collect()
    }
}

/// Input for the single-transaction broadcast write.
#[derive(Debug, Clone)]
pub struct NewBroadcast {
    pub admin_id: UserId,
    pub intent: OrderIntent,
    pub total_users: u32,
    pub successful_executions: u32,
    pub failed_executions: u32,
    pub skipped_executions: u32,
}

#[derive(Clone)]
pub struct BroadcastRepository {
    pool: DbPool,
}

impl BroadcastRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Persist a completed broadcast with its full, ordered detail list in
    /// one transaction. Either everything lands or nothing does.
    pub async fn create_completed(
        &self,
        new: &NewBroadcast,
        details: &[ExecutionDetail],
    ) -> Result<i64, DatabaseError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| query_error("Failed to begin broadcast transaction", e))?;

        let result = sqlx::query(
            r#"
            INSERT INTO broadcast_orders
                (admin_id, symbol, expiry, strike, option_type, side, execution_type,
                 limit_price, product_type, broadcast_type, notes, total_users,
                 successful_executions, failed_executions, skipped_executions, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(new.admin_id)
        .bind(&new.intent.symbol)
        .bind(&new.intent.expiry)
        .bind(new.intent.strike)
        .bind(new.intent.option_type.as_str())
        .bind(new.intent.side.as_str())
        .bind(new.intent.execution_type.as_str())
        .bind(new.intent.limit_price)
        .bind(new.intent.product_type.as_str())
        .bind(new.intent.broadcast_type.as_str())
        .bind(&new.intent.notes)
        .bind(new.total_users as i64)
        .bind(new.successful_executions as i64)
        .bind(new.failed_executions as i64)
        .bind(new.skipped_executions as i64)
        .bind(Utc::now())
        .execute(&mut *tx)
        .await
        .map_err(|e| query_error("Failed to insert broadcast order", e))?;

        let broadcast_id = result.last_insert_rowid();

        for (seq, detail) in details.iter().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO execution_details
                    (broadcast_order_id, seq, user_id, status, message, quantity,
                     broker_order_id, execution_price)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(broadcast_id)
            .bind(seq as i64)
            .bind(detail.user_id)
            .bind(detail.status.as_str())
            .bind(&detail.message)
            .bind(detail.quantity)
            .bind(&detail.broker_order_id)
            .bind(detail.execution_price)
            .execute(&mut *tx)
            .await
            .map_err(|e| query_error("Failed to insert execution detail", e))?;
        }

        tx.commit()
            .await
            .map_err(|e| query_error("Failed to commit broadcast transaction", e))?;

        debug!(
            "Persisted broadcast {} with {} details",
            broadcast_id,
            details.len()
        );
        Ok(broadcast_id)
    }

    pub async fn get(
        &self,
        id: i64,
    ) -> Result<Option<(BroadcastOrderRecord, Vec<ExecutionDetail>)>, DatabaseError> {
        let order = sqlx::query_as::<_, BroadcastOrderRecord>(
            "SELECT * FROM broadcast_orders WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| query_error("Failed to fetch broadcast order", e))?;

        let Some(order) = order else {
            return Ok(None);
        };

        let detail_records = sqlx::query_as::<_, ExecutionDetailRecord>(
            "SELECT * FROM execution_details WHERE broadcast_order_id = ? ORDER BY seq ASC",
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| query_error("Failed to fetch execution details", e))?;

        let details = detail_records
            .into_iter()
            .map(|r| ExecutionDetail::try_from(r).map_err(DatabaseError::from))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Some((order, details)))
    }

    pub async fn list_recent(
        &self,
        limit: i64,
    ) -> Result<Vec<BroadcastOrderRecord>, DatabaseError> {
        sqlx::query_as::<_, BroadcastOrderRecord>(
            "SELECT * FROM broadcast_orders ORDER BY created_at DESC, id DESC LIMIT ?",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| query_error("Failed to list broadcasts", e))
    }
}

#[derive(Clone)]
pub struct TokenRefreshLogRepository {
    pool: DbPool,
}

impl TokenRefreshLogRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn record_success(
        &self,
        broker_account_id: i64,
        old_expiry: DateTime<Utc>,
        new_expiry: DateTime<Utc>,
    ) -> Result<(), DatabaseError> {
        sqlx::query(
            r#"
            INSERT INTO token_refresh_log
                (broker_account_id, status, error_message, old_expiry, new_expiry, created_at)
            VALUES (?, 'SUCCESS', NULL, ?, ?, ?)
            "#,
        )
        .bind(broker_account_id)
        .bind(old_expiry)
        .bind(new_expiry)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(|e| query_error("Failed to log token refresh", e))?;
        Ok(())
    }

    pub async fn record_failure(
        &self,
        broker_account_id: i64,
        old_expiry: DateTime<Utc>,
        error_message: &str,
    ) -> Result<(), DatabaseError> {
        sqlx::query(
            r#"
            INSERT INTO token_refresh_log
                (broker_account_id, status, error_message, old_expiry, new_expiry, created_at)
            VALUES (?, 'FAILED', ?, ?, NULL, ?)
            "#,
        )
        .bind(broker_account_id)
        .bind(error_message)
        .bind(old_expiry)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(|e| query_error("Failed to log token refresh failure", e))?;
        Ok(())
    }

    pub async fn recent(&self, limit: i64) -> Result<Vec<TokenRefreshLogRecord>, DatabaseError> {
        sqlx::query_as::<_, TokenRefreshLogRecord>(
            "SELECT * FROM token_refresh_log ORDER BY created_at DESC, id DESC LIMIT ?",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| query_error("Failed to list token refresh log", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entities::broadcast::{
        BroadcastType, ExecutionStatus, ExecutionType, OptionType, ProductType,
    };
    use crate::persistence::init_database;
    use chrono::Duration;

    async fn pool() -> DbPool {
        init_database("sqlite::memory:").await.unwrap()
    }

    // Seed rows that satisfy foreign keys for tests using literal ids.
    async fn seed_users(pool: &DbPool, ids: &[i64]) {
        for id in ids {
            sqlx::query("INSERT INTO users (id, email, role, status) VALUES (?, ?, 'USER', 'ACTIVE')")
                .bind(id)
                .bind(format!("u{}@example.com", id))
                .execute(pool)
                .await
                .unwrap();
        }
    }

    async fn seed_broker_account(pool: &DbPool, id: i64, user_id: i64) {
        sqlx::query(
            "INSERT INTO broker_accounts (id, user_id, broker_type, broker_account_id, token_expires_at, status) \
             VALUES (?, ?, 'DHAN', 'client-1', CURRENT_TIMESTAMP, 'ACTIVE')",
        )
        .bind(id)
        .bind(user_id)
        .execute(pool)
        .await
        .unwrap();
    }

    fn intent() -> OrderIntent {
        OrderIntent {
            symbol: "BANKNIFTY".to_string(),
            expiry: "24JAN2026".to_string(),
            strike: 48000.0,
            option_type: OptionType::Ce,
            side: crate::domain::entities::broadcast::Side::Buy,
            execution_type: ExecutionType::Market,
            limit_price: None,
            product_type: ProductType::Mis,
            broadcast_type: BroadcastType::Entry,
            notes: None,
        }
    }

    #[tokio::test]
    async fn test_user_and_profile_round_trip() {
        let pool = pool().await;
        let users = UserRepository::new(pool.clone());
        let profiles = TradingProfileRepository::new(pool);

        let user = users.create("trader@example.com", UserRole::User).await.unwrap();
        profiles
            .upsert(user.id, LotMultiplier::TwoX, RiskProfile::Moderate, None)
            .await
            .unwrap();

        let fetched = users.get(user.id).await.unwrap().unwrap();
        assert_eq!(fetched.email, "trader@example.com");

        let profile = profiles.get(user.id).await.unwrap().unwrap();
        assert_eq!(profile.lot_size_multiplier, "2X");

        assert!(profiles.get(9999).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_broker_account_token_updates() {
        let pool = pool().await;
        let users = UserRepository::new(pool.clone());
        let accounts = BrokerAccountRepository::new(pool);

        let user = users.create("dhan@example.com", UserRole::User).await.unwrap();
        let account = accounts
            .create(NewBrokerAccount {
                user_id: user.id,
                broker_type: BrokerType::Dhan,
                broker_account_id: "client-1".to_string(),
                encrypted_token: "blob".to_string(),
                token_expires_at: Utc::now() + Duration::hours(1),
                status: BrokerAccountStatus::Active,
            })
            .await
            .unwrap();

        // Expiring within two hours makes it a refresh candidate.
        let candidates = accounts
            .list_refresh_candidates(Utc::now() + Duration::hours(2))
            .await
            .unwrap();
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].id, account.id);

        let new_expiry = Utc::now() + Duration::hours(24);
        accounts
            .update_token(account.id, "blob2", new_expiry, Utc::now())
            .await
            .unwrap();
        let candidates = accounts
            .list_refresh_candidates(Utc::now() + Duration::hours(2))
            .await
            .unwrap();
        assert!(candidates.is_empty());

        accounts.mark_token_expired(account.id, Utc::now()).await.unwrap();
        let fetched = accounts.get(account.id).await.unwrap().unwrap();
        assert!(fetched.token_expires_at <= Utc::now());
    }

    #[tokio::test]
    async fn test_position_lifecycle_queries() {
        let pool = pool().await;
        seed_users(&pool, &[1]).await;
        seed_broker_account(&pool, 1, 1).await;
        let positions = PositionRepository::new(pool);

        let position = positions
            .create(NewPosition {
                user_id: 1,
                broker_account_id: 1,
                symbol: "BANKNIFTY".to_string(),
                expiry: "24JAN2026".to_string(),
                strike: 48000.0,
                option_type: OptionType::Ce,
                side: crate::domain::entities::broadcast::Side::Buy,
                quantity: 60,
                entry_price: 100.0,
            })
            .await
            .unwrap();

        let found = positions.find_open_leg(1, &intent()).await.unwrap().unwrap();
        assert_eq!(found.id, position.id);

        positions
            .apply_close(position.id, 0, 600.0, PositionStatus::Closed, Some(Utc::now()))
            .await
            .unwrap();
        assert!(positions.find_open_leg(1, &intent()).await.unwrap().is_none());

        let closed = positions.get(position.id).await.unwrap().unwrap();
        assert_eq!(closed.status, PositionStatus::Closed);
        assert_eq!(closed.realized_pnl, 600.0);
        assert!(closed.closed_at.is_some());
    }

    #[tokio::test]
    async fn test_broadcast_write_is_ordered_and_atomic() {
        let pool = pool().await;
        seed_users(&pool, &[1, 2, 3]).await;
        let broadcasts = BroadcastRepository::new(pool);

        let details = vec![
            ExecutionDetail::success(3, 60, "ord-1".to_string(), Some(101.0)),
            ExecutionDetail::skipped(1, "no broker account"),
            ExecutionDetail::failed(2, "REJECTED: insufficient margin"),
        ];
        let id = broadcasts
            .create_completed(
                &NewBroadcast {
                    admin_id: 1,
                    intent: intent(),
                    total_users: 3,
                    successful_executions: 1,
                    failed_executions: 1,
                    skipped_executions: 1,
                },
                &details,
            )
            .await
            .unwrap();

        let (order, stored) = broadcasts.get(id).await.unwrap().unwrap();
        assert_eq!(order.total_users, 3);
        // Detail order mirrors the target list, not status or user id.
        let user_ids: Vec<i64> = stored.iter().map(|d| d.user_id).collect();
        assert_eq!(user_ids, vec![3, 1, 2]);
        assert_eq!(stored[2].status, ExecutionStatus::Failed);
    }
}
