//! Application state wiring the engine to its durable collaborators.
//!
//! The executor is generic over its repositories; `AppState` pins it to the
//! SQLite stores and the filesystem payload storage under the data directory.
//! Locks live in the same database so separate `batond` processes exclude
//! each other per workflow.

use std::path::PathBuf;
use std::sync::Arc;

use baton_core::workflow::executor::WorkflowExecutor;
use baton_infra::config::{default_data_dir, load_engine_config};
use baton_infra::sqlite::{
    DatabasePool, SqliteExecutionStore, SqliteLockService, SqliteMetadataStore, SqliteWorkQueue,
};
use baton_infra::storage::FsPayloadStorage;

pub type ConcreteExecutor =
    WorkflowExecutor<SqliteExecutionStore, SqliteMetadataStore, SqliteWorkQueue, FsPayloadStorage>;

#[derive(Clone)]
pub struct AppState {
    pub executor: Arc<ConcreteExecutor>,
    pub metadata: Arc<SqliteMetadataStore>,
    pub locks: Arc<SqliteLockService>,
    pub data_dir: PathBuf,
}

impl AppState {
    /// Open (or create) the database under `data_dir` and wire the engine.
    pub async fn init(data_dir: Option<PathBuf>) -> anyhow::Result<Self> {
        let data_dir = data_dir.unwrap_or_else(default_data_dir);
        tokio::fs::create_dir_all(&data_dir).await?;
        let config = load_engine_config(&data_dir).await;

        let pool = DatabasePool::open(&data_dir).await?;

        let store = Arc::new(SqliteExecutionStore::new(pool.clone()));
        let metadata = Arc::new(SqliteMetadataStore::new(pool.clone()));
        let locks = Arc::new(SqliteLockService::new(pool.clone()));
        let queue = Arc::new(SqliteWorkQueue::new(pool));
        let payloads = Arc::new(FsPayloadStorage::new(data_dir.join("payloads")));

        let executor = WorkflowExecutor::new(store, metadata.clone(), queue, payloads, config);
        tracing::debug!(data_dir = %data_dir.display(), "engine initialized");

        Ok(Self {
            executor: Arc::new(executor),
            metadata,
            locks,
            data_dir,
        })
    }
}
