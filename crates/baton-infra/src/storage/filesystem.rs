//! Local filesystem payload storage.
//!
//! Implements `PayloadStorage` from `baton-core` with blobs stored under a
//! base directory, one file per path:
//!
//! ```text
//! {base_dir}/
//!   task/input/{uuid}.json
//!   task/output/{uuid}.json
//!   workflow/input/{uuid}.json
//!   workflow/output/{uuid}.json
//! ```

use std::path::{Component, Path, PathBuf};

use baton_core::repository::PayloadStorage;
use baton_types::error::RepositoryError;

pub struct FsPayloadStorage {
    base_dir: PathBuf,
}

impl FsPayloadStorage {
    /// Create a store rooted at `base_dir` (conventionally
    /// `{data_dir}/payloads`). The directory is created on first upload.
    pub fn new(base_dir: PathBuf) -> Self {
        Self { base_dir }
    }

    /// Map a storage path to a file below `base_dir`, rejecting absolute
    /// paths and `..` components.
    fn resolve(&self, path: &str) -> Result<PathBuf, RepositoryError> {
        let relative = Path::new(path);
        let safe = relative
            .components()
            .all(|c| matches!(c, Component::Normal(_)));
        if path.is_empty() || !safe {
            return Err(RepositoryError::Query(format!("invalid payload path: {path}")));
        }
        Ok(self.base_dir.join(relative))
    }
}

impl PayloadStorage for FsPayloadStorage {
    async fn upload(&self, path: &str, data: &[u8]) -> Result<(), RepositoryError> {
        let file = self.resolve(path)?;
        if let Some(parent) = file.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| RepositoryError::Query(format!("create {}: {e}", parent.display())))?;
        }
        tokio::fs::write(&file, data)
            .await
            .map_err(|e| RepositoryError::Query(format!("write {}: {e}", file.display())))?;
        tracing::debug!(path = %path, size = data.len(), "payload stored");
        Ok(())
    }

    async fn download(&self, path: &str) -> Result<Vec<u8>, RepositoryError> {
        let file = self.resolve(path)?;
        match tokio::fs::read(&file).await {
            Ok(data) => Ok(data),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(RepositoryError::NotFound),
            Err(e) => Err(RepositoryError::Query(format!("read {}: {e}", file.display()))),
        }
    }
}
