//! SQLite workflow locks.
//!
//! One row per held lock with its owner token and lease expiry. Every
//! process opening the same database file sees the same rows, so a
//! command-line call and a running daemon serialize on a workflow.

use std::time::Duration;

use baton_core::repository::{LockService, LockToken};
use baton_types::error::RepositoryError;

use super::pool::DatabasePool;
use super::{now_ms, query_err, to_ms};

/// Interval between acquisition attempts while waiting.
const RETRY_INTERVAL: Duration = Duration::from_millis(25);

/// SQLite-backed implementation of `LockService`.
pub struct SqliteLockService {
    pool: DatabasePool,
}

impl SqliteLockService {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }

    /// Insert the lease, or take over a row whose lease has run out.
    async fn try_acquire(&self, lock_id: &str, lease: Duration) -> Result<Option<LockToken>, RepositoryError> {
        let token = LockToken::new();
        let now = now_ms();
        let lease_ms = to_ms(u64::try_from(lease.as_millis()).unwrap_or(u64::MAX));
        let result = sqlx::query(
            r#"INSERT INTO workflow_locks (lock_id, owner, expires_at)
               VALUES (?, ?, ?)
               ON CONFLICT(lock_id) DO UPDATE
                   SET owner = excluded.owner, expires_at = excluded.expires_at
                   WHERE workflow_locks.expires_at <= ?"#,
        )
        .bind(lock_id)
        .bind(token.as_uuid().to_string())
        .bind(now.saturating_add(lease_ms))
        .bind(now)
        .execute(&self.pool.writer)
        .await
        .map_err(query_err)?;
        Ok((result.rows_affected() > 0).then_some(token))
    }
}

impl LockService for SqliteLockService {
    async fn acquire_lock(
        &self,
        lock_id: &str,
        wait: Duration,
        lease: Duration,
    ) -> Result<Option<LockToken>, RepositoryError> {
        let deadline = tokio::time::Instant::now() + wait;
        loop {
            if let Some(token) = self.try_acquire(lock_id, lease).await? {
                return Ok(Some(token));
            }
            if tokio::time::Instant::now() >= deadline {
                tracing::debug!(lock_id = %lock_id, "lock acquisition timed out");
                return Ok(None);
            }
            tokio::time::sleep(RETRY_INTERVAL).await;
        }
    }

    async fn release_lock(&self, lock_id: &str, token: LockToken) -> Result<(), RepositoryError> {
        let result = sqlx::query("DELETE FROM workflow_locks WHERE lock_id = ? AND owner = ?")
            .bind(lock_id)
            .bind(token.as_uuid().to_string())
            .execute(&self.pool.writer)
            .await
            .map_err(query_err)?;
        if result.rows_affected() == 0 {
            tracing::debug!(lock_id = %lock_id, "lock no longer held by this owner");
        }
        Ok(())
    }
}
