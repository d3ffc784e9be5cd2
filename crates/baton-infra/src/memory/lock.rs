//! Process-local workflow locks with leases.

use std::time::Duration;

use baton_core::repository::{LockService, LockToken};
use baton_types::error::RepositoryError;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::time::Instant;

/// Interval between acquisition attempts while waiting.
const RETRY_INTERVAL: Duration = Duration::from_millis(10);

struct Lease {
    owner: LockToken,
    expires_at: Instant,
}

/// Per-id mutual exclusion inside one process. An expired lease is
/// treated as released.
#[derive(Default)]
pub struct LocalLockService {
    leases: DashMap<String, Lease>,
}

impl LocalLockService {
    pub fn new() -> Self {
        Self::default()
    }

    fn try_acquire(&self, lock_id: &str, lease: Duration) -> Option<LockToken> {
        let now = Instant::now();
        let fresh = Lease {
            owner: LockToken::new(),
            expires_at: now + lease,
        };
        let owner = fresh.owner;
        match self.leases.entry(lock_id.to_string()) {
            Entry::Occupied(mut held) => {
                if held.get().expires_at > now {
                    return None;
                }
                held.insert(fresh);
            }
            Entry::Vacant(free) => {
                free.insert(fresh);
            }
        }
        Some(owner)
    }
}

impl LockService for LocalLockService {
    async fn acquire_lock(
        &self,
        lock_id: &str,
        wait: Duration,
        lease: Duration,
    ) -> Result<Option<LockToken>, RepositoryError> {
        let deadline = Instant::now() + wait;
        loop {
            if let Some(token) = self.try_acquire(lock_id, lease) {
                return Ok(Some(token));
            }
            if Instant::now() >= deadline {
                tracing::debug!(lock_id = %lock_id, "lock acquisition timed out");
                return Ok(None);
            }
            tokio::time::sleep(RETRY_INTERVAL).await;
        }
    }

    async fn release_lock(&self, lock_id: &str, token: LockToken) -> Result<(), RepositoryError> {
        if self.leases.remove_if(lock_id, |_, lease| lease.owner == token).is_none() {
            tracing::debug!(lock_id = %lock_id, "lock no longer held by this owner");
        }
        Ok(())
    }
}
