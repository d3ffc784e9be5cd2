//! In-memory collaborators.
//!
//! Process-local implementations of every `baton-core` repository trait.
//! State lives behind `tokio::sync::RwLock` and `dashmap` and is lost on
//! exit; suitable for tests and single-process embedding.

pub mod execution;
pub mod lock;
pub mod metadata;
pub mod payload;
pub mod queue;

pub use execution::InMemoryExecutionStore;
pub use lock::LocalLockService;
pub use metadata::InMemoryMetadataStore;
pub use payload::InMemoryPayloadStorage;
pub use queue::InMemoryWorkQueue;
