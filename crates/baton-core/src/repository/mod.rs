//! Repository trait definitions (ports).
//!
//! These traits define the storage, queue and locking interfaces that the
//! infrastructure layer (baton-infra) implements. The core crate never
//! depends on any specific storage technology.

pub mod execution;
pub mod lock;
pub mod metadata;
pub mod payload;
pub mod queue;

pub use execution::ExecutionStore;
pub use lock::{LockService, LockToken};
pub use metadata::MetadataStore;
pub use payload::PayloadStorage;
pub use queue::WorkQueue;

#[cfg(test)]
pub(crate) mod test_support {
    //! Minimal in-process collaborators for unit tests in this crate.

    use std::collections::HashMap;
    use std::sync::Mutex;

    use baton_types::error::RepositoryError;
    use uuid::Uuid;

    use super::{PayloadStorage, WorkQueue};

    /// Queue without delays or visibility timeouts: every entry is visible.
    #[derive(Default)]
    pub struct FlatQueue {
        pub queues: Mutex<HashMap<String, Vec<Uuid>>>,
    }

    impl FlatQueue {
        pub fn contents(&self, queue: &str) -> Vec<Uuid> {
            self.queues.lock().unwrap().get(queue).cloned().unwrap_or_default()
        }
    }

    impl WorkQueue for FlatQueue {
        async fn push(&self, queue: &str, id: &Uuid, _offset_secs: u64) -> Result<(), RepositoryError> {
            let mut queues = self.queues.lock().unwrap();
            let entries = queues.entry(queue.to_string()).or_default();
            if !entries.contains(id) {
                entries.push(*id);
            }
            Ok(())
        }

        async fn remove(&self, queue: &str, id: &Uuid) -> Result<(), RepositoryError> {
            if let Some(entries) = self.queues.lock().unwrap().get_mut(queue) {
                entries.retain(|e| e != id);
            }
            Ok(())
        }

        async fn exists(&self, queue: &str, id: &Uuid) -> Result<bool, RepositoryError> {
            Ok(self.contents(queue).contains(id))
        }

        async fn set_offset_time(&self, queue: &str, id: &Uuid, _offset_secs: u64) -> Result<bool, RepositoryError> {
            self.exists(queue, id).await
        }

        async fn set_unack_timeout(&self, queue: &str, id: &Uuid, _unack_timeout_ms: u64) -> Result<bool, RepositoryError> {
            self.exists(queue, id).await
        }

        async fn pop(&self, queue: &str, count: usize) -> Result<Vec<Uuid>, RepositoryError> {
            Ok(self.contents(queue).into_iter().take(count).collect())
        }

        async fn ack(&self, queue: &str, id: &Uuid) -> Result<bool, RepositoryError> {
            let present = self.exists(queue, id).await?;
            self.remove(queue, id).await?;
            Ok(present)
        }

        async fn size(&self, queue: &str) -> Result<usize, RepositoryError> {
            Ok(self.contents(queue).len())
        }
    }

    #[derive(Default)]
    pub struct BlobMap {
        pub blobs: Mutex<HashMap<String, Vec<u8>>>,
    }

    impl PayloadStorage for BlobMap {
        async fn upload(&self, path: &str, data: &[u8]) -> Result<(), RepositoryError> {
            self.blobs.lock().unwrap().insert(path.to_string(), data.to_vec());
            Ok(())
        }

        async fn download(&self, path: &str) -> Result<Vec<u8>, RepositoryError> {
            self.blobs
                .lock()
                .unwrap()
                .get(path)
                .cloned()
                .ok_or(RepositoryError::NotFound)
        }
    }
}
