//! Persistence Layer
//!
//! SQLite storage for users, trading profiles, broker accounts, positions,
//! broadcasts with their execution details, and token refresh logs. Uses
//! async sqlx with schema migrations applied at startup.
//!
//! A broadcast and its detail list are written together in one transaction,
//! exactly once, by the orchestration run that produced them.

pub mod models;
pub mod repository;

use crate::domain::errors::DatabaseError;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::ConnectOptions;
use std::path::Path;
use std::str::FromStr;
use tracing::info;

pub type DbPool = SqlitePool;

/// Initialize the connection pool and apply migrations.
pub async fn init_database(database_url: &str) -> Result<DbPool, DatabaseError> {
    info!("Initializing database: {}", database_url);

    if let Some(db_path) = database_url.strip_prefix("sqlite://") {
        if let Some(parent) = Path::new(db_path).parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::ConnectionError(sqlx::Error::Configuration(Box::new(e)))
            })?;
        }
    }

    let options = SqliteConnectOptions::from_str(database_url)?
        .create_if_missing(true)
        .log_statements(log::LevelFilter::Debug);

    // An in-memory database is per-connection; keep the pool at one
    // connection so every query sees the same schema.
    let max_connections = if database_url.contains(":memory:") { 1 } else { 5 };

    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections)
        .connect_with(options)
        .await?;

    run_migrations(&pool).await?;

    info!("Database initialized");
    Ok(pool)
}

async fn run_migrations(pool: &DbPool) -> Result<(), DatabaseError> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS users (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            email TEXT NOT NULL UNIQUE,
            role TEXT NOT NULL CHECK(role IN ('ADMIN', 'USER')),
            status TEXT NOT NULL CHECK(status IN ('ACTIVE', 'INACTIVE', 'SUSPENDED')),
            created_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await
    .map_err(|e| DatabaseError::MigrationError(format!("Failed to create users table: {}", e)))?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS trading_profiles (
            user_id INTEGER PRIMARY KEY,
            lot_size_multiplier TEXT NOT NULL,
            risk_profile TEXT NOT NULL,
            max_loss_per_day REAL,
            updated_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP,
            FOREIGN KEY (user_id) REFERENCES users(id)
        )
        "#,
    )
    .execute(pool)
    .await
    .map_err(|e| {
        DatabaseError::MigrationError(format!("Failed to create trading_profiles table: {}", e))
    })?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS broker_accounts (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id INTEGER NOT NULL UNIQUE,
            broker_type TEXT NOT NULL CHECK(broker_type IN ('ZERODHA', 'DHAN')),
            broker_account_id TEXT NOT NULL,
            access_token TEXT NOT NULL DEFAULT '',
            token_expires_at DATETIME NOT NULL,
            last_token_refresh_at DATETIME,
            status TEXT NOT NULL CHECK(status IN ('ACTIVE', 'INACTIVE', 'PENDING')),
            created_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP,
            FOREIGN KEY (user_id) REFERENCES users(id)
        )
        "#,
    )
    .execute(pool)
    .await
    .map_err(|e| {
        DatabaseError::MigrationError(format!("Failed to create broker_accounts table: {}", e))
    })?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS positions (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id INTEGER NOT NULL,
            broker_account_id INTEGER NOT NULL,
            symbol TEXT NOT NULL,
            expiry TEXT NOT NULL,
            strike REAL NOT NULL,
            option_type TEXT NOT NULL CHECK(option_type IN ('CE', 'PE')),
            side TEXT NOT NULL CHECK(side IN ('BUY', 'SELL')),
            quantity INTEGER NOT NULL CHECK(quantity >= 0),
            entry_price REAL NOT NULL,
            current_price REAL,
            realized_pnl REAL NOT NULL DEFAULT 0.0,
            status TEXT NOT NULL CHECK(status IN ('OPEN', 'CLOSED')),
            opened_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP,
            closed_at DATETIME,
            FOREIGN KEY (user_id) REFERENCES users(id),
            FOREIGN KEY (broker_account_id) REFERENCES broker_accounts(id)
        )
        "#,
    )
    .execute(pool)
    .await
    .map_err(|e| {
        DatabaseError::MigrationError(format!("Failed to create positions table: {}", e))
    })?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_positions_user_status ON positions(user_id, status)",
    )
    .execute(pool)
    .await
    .map_err(|e| DatabaseError::MigrationError(format!("Failed to create index: {}", e)))?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS broadcast_orders (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            admin_id INTEGER NOT NULL,
            symbol TEXT NOT NULL,
            expiry TEXT NOT NULL,
            strike REAL NOT NULL,
            option_type TEXT NOT NULL CHECK(option_type IN ('CE', 'PE')),
            side TEXT NOT NULL CHECK(side IN ('BUY', 'SELL')),
            execution_type TEXT NOT NULL CHECK(execution_type IN ('MARKET', 'LIMIT')),
            limit_price REAL,
            product_type TEXT NOT NULL CHECK(product_type IN ('MIS', 'NRML', 'CNC')),
            broadcast_type TEXT NOT NULL CHECK(broadcast_type IN ('ENTRY', 'EXIT')),
            notes TEXT,
            total_users INTEGER NOT NULL,
            successful_executions INTEGER NOT NULL,
            failed_executions INTEGER NOT NULL,
            skipped_executions INTEGER NOT NULL,
            created_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP,
            FOREIGN KEY (admin_id) REFERENCES users(id)
        )
        "#,
    )
    .execute(pool)
    .await
    .map_err(|e| {
        DatabaseError::MigrationError(format!("Failed to create broadcast_orders table: {}", e))
    })?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS execution_details (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            broadcast_order_id INTEGER NOT NULL,
            seq INTEGER NOT NULL,
            user_id INTEGER NOT NULL,
            status TEXT NOT NULL CHECK(status IN ('SUCCESS', 'FAILED', 'SKIPPED')),
            message TEXT NOT NULL,
            quantity INTEGER,
            broker_order_id TEXT,
            execution_price REAL,
            FOREIGN KEY (broadcast_order_id) REFERENCES broadcast_orders(id),
            FOREIGN KEY (user_id) REFERENCES users(id)
        )
        "#,
    )
    .execute(pool)
    .await
    .map_err(|e| {
        DatabaseError::MigrationError(format!("Failed to create execution_details table: {}", e))
    })?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS token_refresh_log (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            broker_account_id INTEGER NOT NULL,
            status TEXT NOT NULL CHECK(status IN ('SUCCESS', 'FAILED')),
            error_message TEXT,
            old_expiry DATETIME NOT NULL,
            new_expiry DATETIME,
            created_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP,
            FOREIGN KEY (broker_account_id) REFERENCES broker_accounts(id)
        )
        "#,
    )
    .execute(pool)
    .await
    .map_err(|e| {
        DatabaseError::MigrationError(format!("Failed to create token_refresh_log table: {}", e))
    })?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_init_database_in_memory() {
        let pool = init_database("sqlite::memory:").await.unwrap();
        // Migrations are idempotent.
        run_migrations(&pool).await.unwrap();
    }
}
