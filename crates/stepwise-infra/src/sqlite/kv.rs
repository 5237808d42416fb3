//! SQLite key-value store implementation.
//!
//! Implements `KvStore` from `stepwise-core` over the `kv_store` table.
//! Values are stored as JSON text and deserialized on read.

use chrono::Utc;
use sqlx::Row;
use stepwise_core::storage::KvStore;
use stepwise_types::error::RepositoryError;

use super::pool::DatabasePool;

/// SQLite-backed implementation of `KvStore`.
pub struct SqliteKvStore {
    pool: DatabasePool,
}

impl SqliteKvStore {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

fn query_error(e: sqlx::Error) -> RepositoryError {
    match e {
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
            RepositoryError::Connection
        }
        other => RepositoryError::Query(other.to_string()),
    }
}

impl KvStore for SqliteKvStore {
    async fn get(&self, owner: &str, key: &str) -> Result<Option<serde_json::Value>, RepositoryError> {
        let row = sqlx::query("SELECT value FROM kv_store WHERE owner = ? AND key = ?")
            .bind(owner)
            .bind(key)
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(query_error)?;

        match row {
            Some(row) => {
                let value_str: String = row.try_get("value").map_err(query_error)?;
                let value = serde_json::from_str(&value_str)
                    .map_err(|e| RepositoryError::Query(format!("invalid JSON value: {e}")))?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    async fn set(&self, owner: &str, key: &str, value: &serde_json::Value) -> Result<(), RepositoryError> {
        let now = Utc::now().to_rfc3339();
        let value_str = serde_json::to_string(value)
            .map_err(|e| RepositoryError::Query(format!("failed to serialize value: {e}")))?;

        sqlx::query(
            r#"INSERT INTO kv_store (owner, key, value, created_at, updated_at)
               VALUES (?, ?, ?, ?, ?)
               ON CONFLICT (owner, key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at"#,
        )
        .bind(owner)
        .bind(key)
        .bind(&value_str)
        .bind(&now)
        .bind(&now)
        .execute(&self.pool.writer)
        .await
        .map_err(query_error)?;

        Ok(())
    }

    async fn delete(&self, owner: &str, key: &str) -> Result<bool, RepositoryError> {
        let result = sqlx::query("DELETE FROM kv_store WHERE owner = ? AND key = ?")
            .bind(owner)
            .bind(key)
            .execute(&self.pool.writer)
            .await
            .map_err(query_error)?;

        Ok(result.rows_affected() > 0)
    }

    async fn list_keys(&self, owner: &str) -> Result<Vec<String>, RepositoryError> {
        let rows = sqlx::query("SELECT key FROM kv_store WHERE owner = ? ORDER BY key")
            .bind(owner)
            .fetch_all(&self.pool.reader)
            .await
            .map_err(query_error)?;

        rows.iter()
            .map(|row| row.try_get::<String, _>("key").map_err(query_error))
            .collect()
    }
}
