//! In-memory payload storage.

use baton_core::repository::PayloadStorage;
use baton_types::error::RepositoryError;
use dashmap::DashMap;

#[derive(Default)]
pub struct InMemoryPayloadStorage {
    blobs: DashMap<String, Vec<u8>>,
}

impl InMemoryPayloadStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.blobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blobs.is_empty()
    }
}

impl PayloadStorage for InMemoryPayloadStorage {
    async fn upload(&self, path: &str, data: &[u8]) -> Result<(), RepositoryError> {
        self.blobs.insert(path.to_string(), data.to_vec());
        Ok(())
    }

    async fn download(&self, path: &str) -> Result<Vec<u8>, RepositoryError> {
        self.blobs
            .get(path)
            .map(|blob| blob.clone())
            .ok_or(RepositoryError::NotFound)
    }
}
