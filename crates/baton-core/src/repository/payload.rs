//! External payload storage trait definition.

use baton_types::error::RepositoryError;

/// Blob store for payloads too large to keep inline.
pub trait PayloadStorage: Send + Sync {
    fn upload(
        &self,
        path: &str,
        data: &[u8],
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    fn download(
        &self,
        path: &str,
    ) -> impl std::future::Future<Output = Result<Vec<u8>, RepositoryError>> + Send;
}
