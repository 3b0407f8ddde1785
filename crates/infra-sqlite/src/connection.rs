// SQLite Connection Pool Setup

use crate::error::map_sqlx_error;
use jobstore_core::error::{AppError, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;
use std::time::Duration;
use tracing::info;

/// Pool sizing and per-connection prepared statement capacity
#[derive(Debug, Clone, Copy)]
pub struct PoolSettings {
    pub max_connections: u32,
    /// Persistent prepared statements kept per connection
    pub statement_cache_capacity: usize,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            max_connections: 10,
            statement_cache_capacity: 100,
        }
    }
}

/// Create SQLite connection pool with WAL mode, busy timeout and foreign keys
pub async fn create_pool(database_url: &str, settings: PoolSettings) -> Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str(database_url)
        .map_err(|e| AppError::Config(format!("invalid database url {}: {}", database_url, e)))?
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_secs(5))
        .foreign_keys(true)
        .statement_cache_capacity(settings.statement_cache_capacity)
        .create_if_missing(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(settings.max_connections)
        .connect_with(options)
        .await
        .map_err(map_sqlx_error)?;

    info!(
        url = %database_url,
        max_connections = settings.max_connections,
        statement_cache_capacity = settings.statement_cache_capacity,
        "Database pool ready"
    );
    Ok(pool)
}
