// Statement Cache
// Every query text is prepared once for validation; executions then reuse the
// per-connection persistent statements kept by sqlx.

use crate::dialect::Driver;
use crate::error::map_sqlx_error;
use jobstore_core::error::Result;
use sqlx::query::Query;
use sqlx::sqlite::{SqliteArguments, SqlitePool, SqliteRow};
use sqlx::{Executor, FromRow, Sqlite};
use std::collections::HashSet;
use std::sync::Mutex;
use tracing::{debug, warn};

/// A bound value. Values never end up in the SQL text.
#[derive(Debug, Clone, PartialEq)]
pub enum Bind {
    Int(i64),
    Float(f64),
    Text(String),
    Null,
}

impl From<i64> for Bind {
    fn from(v: i64) -> Self {
        Bind::Int(v)
    }
}

impl From<i32> for Bind {
    fn from(v: i32) -> Self {
        Bind::Int(v as i64)
    }
}

impl From<f64> for Bind {
    fn from(v: f64) -> Self {
        Bind::Float(v)
    }
}

impl From<&str> for Bind {
    fn from(v: &str) -> Self {
        Bind::Text(v.to_string())
    }
}

impl From<String> for Bind {
    fn from(v: String) -> Self {
        Bind::Text(v)
    }
}

impl<T: Into<Bind>> From<Option<T>> for Bind {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Bind::Null)
    }
}

/// Query text plus its ordered bind values
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Statement {
    pub sql: String,
    pub binds: Vec<Bind>,
}

impl Statement {
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            binds: Vec::new(),
        }
    }

    pub fn bind(mut self, value: impl Into<Bind>) -> Self {
        self.binds.push(value.into());
        self
    }

    /// sqlx query with every value bound, for use inside a transaction
    pub(crate) fn query(&self) -> Query<'_, Sqlite, SqliteArguments<'_>> {
        let mut query = sqlx::query(&self.sql);
        for bind in &self.binds {
            query = match bind {
                Bind::Int(v) => query.bind(*v),
                Bind::Float(v) => query.bind(*v),
                Bind::Text(v) => query.bind(v.as_str()),
                Bind::Null => query.bind(None::<i64>),
            };
        }
        query
    }
}

/// Shared, concurrency-safe statement runner over the pool
pub struct StatementCache {
    pool: SqlitePool,
    driver: Driver,
    /// Query texts that passed preparation
    prepared: Mutex<HashSet<String>>,
}

impl StatementCache {
    pub fn new(pool: SqlitePool, driver: Driver) -> Self {
        Self {
            pool,
            driver,
            prepared: Mutex::new(HashSet::new()),
        }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn driver(&self) -> Driver {
        self.driver
    }

    /// Number of distinct query texts seen so far
    pub fn len(&self) -> usize {
        self.prepared().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_prepared(&self, sql: &str) -> bool {
        self.prepared().contains(sql)
    }

    /// Prepare `sql` unless it was prepared before. A failure is returned and
    /// not remembered, so the next call tries again.
    pub async fn prepare(&self, sql: &str) -> Result<()> {
        if self.is_prepared(sql) {
            return Ok(());
        }

        if let Err(e) = (&self.pool).prepare(sql).await {
            warn!(sql = %sql, error = %e, "Statement preparation failed");
            return Err(map_sqlx_error(e));
        }

        debug!(sql = %sql, "Statement prepared");
        self.prepared().insert(sql.to_string());
        Ok(())
    }

    pub async fn fetch_all(&self, stmt: &Statement) -> Result<Vec<SqliteRow>> {
        self.prepare(&stmt.sql).await?;
        stmt.query()
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx_error)
    }

    pub async fn fetch_optional(&self, stmt: &Statement) -> Result<Option<SqliteRow>> {
        self.prepare(&stmt.sql).await?;
        stmt.query()
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)
    }

    pub async fn fetch_all_as<T>(&self, stmt: &Statement) -> Result<Vec<T>>
    where
        T: for<'r> FromRow<'r, SqliteRow>,
    {
        self.fetch_all(stmt)
            .await?
            .iter()
            .map(|row| T::from_row(row).map_err(map_sqlx_error))
            .collect()
    }

    pub async fn fetch_optional_as<T>(&self, stmt: &Statement) -> Result<Option<T>>
    where
        T: for<'r> FromRow<'r, SqliteRow>,
    {
        match self.fetch_optional(stmt).await? {
            Some(row) => Ok(Some(T::from_row(&row).map_err(map_sqlx_error)?)),
            None => Ok(None),
        }
    }

    /// Returns rows affected
    pub async fn execute(&self, stmt: &Statement) -> Result<u64> {
        Ok(self.execute_raw(stmt).await?.rows_affected())
    }

    /// Returns the rowid of the inserted row
    pub async fn insert(&self, stmt: &Statement) -> Result<i64> {
        Ok(self.execute_raw(stmt).await?.last_insert_rowid())
    }

    async fn execute_raw(&self, stmt: &Statement) -> Result<sqlx::sqlite::SqliteQueryResult> {
        self.prepare(&stmt.sql).await?;
        stmt.query()
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)
    }

    fn prepared(&self) -> std::sync::MutexGuard<'_, HashSet<String>> {
        self.prepared.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{create_pool, PoolSettings};
    use sqlx::Row;

    async fn cache() -> StatementCache {
        let pool = create_pool(
            "sqlite::memory:",
            PoolSettings {
                max_connections: 1,
                ..PoolSettings::default()
            },
        )
        .await
        .unwrap();
        sqlx::query("CREATE TABLE kv (k TEXT PRIMARY KEY, v INTEGER, f REAL)")
            .execute(&pool)
            .await
            .unwrap();
        StatementCache::new(pool, Driver::Sqlite)
    }

    #[tokio::test]
    async fn test_same_text_prepared_once() {
        let cache = cache().await;
        let insert = "INSERT INTO kv (k, v, f) VALUES (?, ?, ?)";

        cache
            .execute(&Statement::new(insert).bind("a").bind(1_i64).bind(0.5))
            .await
            .unwrap();
        cache
            .execute(&Statement::new(insert).bind("b").bind(None::<i64>).bind(1.5))
            .await
            .unwrap();

        assert_eq!(cache.len(), 1);
        assert!(cache.is_prepared(insert));

        let rows = cache
            .fetch_all(&Statement::new("SELECT k, v FROM kv ORDER BY k"))
            .await
            .unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].get::<Option<i64>, _>("v"), Some(1));
        assert_eq!(rows[1].get::<Option<i64>, _>("v"), None);
        assert_eq!(cache.len(), 2);
    }

    #[tokio::test]
    async fn test_prepare_failure_is_not_remembered() {
        let cache = cache().await;
        let bad = "SELECT nope FROM missing_table";

        let rows = cache.fetch_all(&Statement::new(bad)).await.map(|rows| rows.len());
        tokio_test::assert_err!(rows);
        assert!(!cache.is_prepared(bad));
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_insert_returns_rowid() {
        let cache = cache().await;
        let id = cache
            .insert(&Statement::new("INSERT INTO kv (k, v) VALUES (?, ?)").bind("x").bind(7_i32))
            .await
            .unwrap();
        assert!(id > 0);

        let row = cache
            .fetch_optional(&Statement::new("SELECT v FROM kv WHERE k = ?").bind("x"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(row.get::<i64, _>("v"), 7);
    }
}
