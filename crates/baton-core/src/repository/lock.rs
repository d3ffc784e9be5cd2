//! Workflow lock trait definition.

use std::time::Duration;

use baton_types::error::RepositoryError;
use uuid::Uuid;

/// Ownership proof handed out by a successful acquisition.
///
/// Only the matching token releases the lock, so a holder whose lease ran
/// out cannot drop a lock someone else has since taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LockToken(Uuid);

impl LockToken {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for LockToken {
    fn default() -> Self {
        Self::new()
    }
}

/// Mutual exclusion per workflow id across background drivers and
/// command-line callers.
///
/// A lock expires after its lease even if never released.
pub trait LockService: Send + Sync {
    /// Try to take the lock, waiting up to `wait`. Returns `None` on timeout.
    fn acquire_lock(
        &self,
        lock_id: &str,
        wait: Duration,
        lease: Duration,
    ) -> impl std::future::Future<Output = Result<Option<LockToken>, RepositoryError>> + Send;

    /// Release the lock if `token` still owns it. A stale token is a no-op.
    fn release_lock(
        &self,
        lock_id: &str,
        token: LockToken,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;
}
