//! Database pool with split reader/writer connections in WAL mode.
//!
//! SQLite allows only one writer at a time. `DatabasePool` keeps a
//! multi-connection reader pool for concurrent template lookups and a
//! single-connection writer pool so template writes and statistic updates
//! are serialized at the database as well as in the template store.

use std::path::Path;
use std::str::FromStr;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};

use crate::config::resolve_data_dir;

/// Database file name inside the data directory.
pub const DATABASE_FILE: &str = "stepwise.db";

/// Split read/write pool for SQLite with WAL mode.
///
/// - `reader`: Multi-connection pool (up to 8) for concurrent SELECT queries.
/// - `writer`: Single-connection pool for serialized INSERT/UPDATE/DELETE.
#[derive(Clone)]
pub struct DatabasePool {
    pub reader: SqlitePool,
    pub writer: SqlitePool,
}

impl DatabasePool {
    /// Open (creating if missing) the database at `database_url`.
    ///
    /// Runs migrations on the writer pool before the reader pool is opened.
    pub async fn new(database_url: &str) -> Result<Self, sqlx::Error> {
        let base_opts = SqliteConnectOptions::from_str(database_url)?
            .journal_mode(SqliteJournalMode::Wal)
            .foreign_keys(true)
            .busy_timeout(std::time::Duration::from_secs(5))
            .create_if_missing(true);

        let read_opts = base_opts.clone().read_only(true);

        let writer = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(base_opts)
            .await?;

        sqlx::migrate!("../../migrations").run(&writer).await?;

        let reader = SqlitePoolOptions::new()
            .max_connections(8)
            .connect_with(read_opts)
            .await?;

        tracing::debug!(database_url, "database pool ready");
        Ok(Self { reader, writer })
    }
}

/// SQLite URL for the database file inside `data_dir`.
pub fn database_url(data_dir: &Path) -> String {
    format!("sqlite://{}", data_dir.join(DATABASE_FILE).display())
}

/// Database URL under the resolved data directory
/// (`STEPWISE_DATA_DIR`, else `~/.stepwise`).
pub fn default_database_url() -> String {
    database_url(&resolve_data_dir())
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn pool_in(dir: &tempfile::TempDir, name: &str) -> DatabasePool {
        let url = format!("sqlite://{}?mode=rwc", dir.path().join(name).display());
        DatabasePool::new(&url).await.unwrap()
    }

    #[tokio::test]
    async fn test_pool_creates_kv_table() {
        let dir = tempfile::tempdir().unwrap();
        let pool = pool_in(&dir, "test.db").await;

        let tables: Vec<(String,)> = sqlx::query_as(
            "SELECT name FROM sqlite_master WHERE type='table' AND name NOT LIKE 'sqlite_%' AND name != '_sqlx_migrations' ORDER BY name",
        )
        .fetch_all(&pool.reader)
        .await
        .unwrap();

        let names: Vec<&str> = tables.iter().map(|t| t.0.as_str()).collect();
        assert_eq!(names, vec!["kv_store"]);
    }

    #[tokio::test]
    async fn test_pool_wal_mode() {
        let dir = tempfile::tempdir().unwrap();
        let pool = pool_in(&dir, "test_wal.db").await;

        let result: (String,) = sqlx::query_as("PRAGMA journal_mode")
            .fetch_one(&pool.writer)
            .await
            .unwrap();
        assert_eq!(result.0.to_lowercase(), "wal");
    }

    #[tokio::test]
    async fn test_reopen_keeps_schema() {
        let dir = tempfile::tempdir().unwrap();
        drop(pool_in(&dir, "reopen.db").await);
        let pool = pool_in(&dir, "reopen.db").await;

        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM kv_store")
            .fetch_one(&pool.reader)
            .await
            .unwrap();
        assert_eq!(count.0, 0);
    }

    #[test]
    fn test_database_url() {
        let url = database_url(Path::new("/tmp/stepwise-data"));
        assert_eq!(url, "sqlite:///tmp/stepwise-data/stepwise.db");
        assert!(default_database_url().ends_with(DATABASE_FILE));
    }
}
