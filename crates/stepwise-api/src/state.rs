//! Application state wiring the engine to the SQLite store.
//!
//! The engine is generic over storage, tools and oracle; AppState pins it to
//! the concrete implementations available to the CLI. Without a tool
//! backend configured, the echo registry stands in, which is what `preview`
//! relies on.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use stepwise_core::template::TemplateManager;
use stepwise_core::tool::EchoToolRegistry;
use stepwise_core::workflow::{Engine, NoopOracle};
use stepwise_infra::config::{load_engine_config, resolve_data_dir};
use stepwise_infra::sqlite::pool::{DATABASE_FILE, DatabasePool};
use stepwise_infra::sqlite::SqliteKvStore;

/// Engine pinned to the infra implementations.
pub type ConcreteEngine = Engine<SqliteKvStore, EchoToolRegistry, NoopOracle>;

/// Shared application state for CLI commands.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<ConcreteEngine>,
    pub data_dir: PathBuf,
}

impl AppState {
    /// Initialize from the resolved data directory.
    pub async fn init() -> anyhow::Result<Self> {
        Self::init_in(&resolve_data_dir()).await
    }

    /// Create the data directory if needed, open the database and load
    /// `config.toml`.
    pub async fn init_in(data_dir: &Path) -> anyhow::Result<Self> {
        tokio::fs::create_dir_all(data_dir).await?;

        let db_url = format!(
            "sqlite://{}?mode=rwc",
            data_dir.join(DATABASE_FILE).display()
        );
        let db_pool = DatabasePool::new(&db_url).await?;
        let config = load_engine_config(data_dir).await;

        let manager = Arc::new(TemplateManager::new(Arc::new(SqliteKvStore::new(db_pool))));
        let engine = Engine::new(manager, EchoToolRegistry, NoopOracle, config);

        tracing::debug!(data_dir = %data_dir.display(), "application state ready");
        Ok(Self {
            engine: Arc::new(engine),
            data_dir: data_dir.to_path_buf(),
        })
    }

    pub fn templates(&self) -> &TemplateManager<SqliteKvStore> {
        self.engine.manager()
    }
}
