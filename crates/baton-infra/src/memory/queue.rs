//! In-memory delay queue.
//!
//! Each entry carries the instant it becomes visible. `pop` hands out
//! visible entries, earliest first, and pushes their visibility out by the
//! unack timeout; `ack` removes them for good.

use std::collections::HashMap;
use std::time::Duration;

use baton_core::repository::WorkQueue;
use baton_types::error::RepositoryError;
use tokio::sync::Mutex;
use tokio::time::Instant;
use uuid::Uuid;

/// Visibility timeout applied to popped entries unless overridden.
pub const DEFAULT_UNACK_TIMEOUT: Duration = Duration::from_secs(60);

pub struct InMemoryWorkQueue {
    queues: Mutex<HashMap<String, HashMap<Uuid, Instant>>>,
    unack_timeout: Duration,
}

impl Default for InMemoryWorkQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryWorkQueue {
    pub fn new() -> Self {
        Self::with_unack_timeout(DEFAULT_UNACK_TIMEOUT)
    }

    pub fn with_unack_timeout(unack_timeout: Duration) -> Self {
        Self {
            queues: Mutex::new(HashMap::new()),
            unack_timeout,
        }
    }

    /// Every id in `queue`, visible or not, earliest deadline first.
    pub async fn ids(&self, queue: &str) -> Vec<Uuid> {
        let queues = self.queues.lock().await;
        let mut entries: Vec<(Uuid, Instant)> = queues
            .get(queue)
            .map(|q| q.iter().map(|(id, at)| (*id, *at)).collect())
            .unwrap_or_default();
        entries.sort_by_key(|(id, at)| (*at, *id));
        entries.into_iter().map(|(id, _)| id).collect()
    }

    async fn reschedule(&self, queue: &str, id: &Uuid, delay: Duration) -> bool {
        let mut queues = self.queues.lock().await;
        match queues.get_mut(queue).and_then(|q| q.get_mut(id)) {
            Some(at) => {
                *at = Instant::now() + delay;
                true
            }
            None => false,
        }
    }
}

impl WorkQueue for InMemoryWorkQueue {
    async fn push(&self, queue: &str, id: &Uuid, offset_secs: u64) -> Result<(), RepositoryError> {
        let deliver_at = Instant::now() + Duration::from_secs(offset_secs);
        self.queues
            .lock()
            .await
            .entry(queue.to_string())
            .or_default()
            .insert(*id, deliver_at);
        Ok(())
    }

    async fn remove(&self, queue: &str, id: &Uuid) -> Result<(), RepositoryError> {
        if let Some(q) = self.queues.lock().await.get_mut(queue) {
            q.remove(id);
        }
        Ok(())
    }

    async fn exists(&self, queue: &str, id: &Uuid) -> Result<bool, RepositoryError> {
        Ok(self
            .queues
            .lock()
            .await
            .get(queue)
            .is_some_and(|q| q.contains_key(id)))
    }

    async fn set_offset_time(&self, queue: &str, id: &Uuid, offset_secs: u64) -> Result<bool, RepositoryError> {
        Ok(self
            .reschedule(queue, id, Duration::from_secs(offset_secs))
            .await)
    }

    async fn set_unack_timeout(
        &self,
        queue: &str,
        id: &Uuid,
        unack_timeout_ms: u64,
    ) -> Result<bool, RepositoryError> {
        Ok(self
            .reschedule(queue, id, Duration::from_millis(unack_timeout_ms))
            .await)
    }

    async fn pop(&self, queue: &str, count: usize) -> Result<Vec<Uuid>, RepositoryError> {
        let mut queues = self.queues.lock().await;
        let Some(q) = queues.get_mut(queue) else {
            return Ok(Vec::new());
        };
        let now = Instant::now();
        let mut visible: Vec<(Uuid, Instant)> = q
            .iter()
            .filter(|(_, at)| **at <= now)
            .map(|(id, at)| (*id, *at))
            .collect();
        visible.sort_by_key(|(id, at)| (*at, *id));
        visible.truncate(count);

        let hidden_until = now + self.unack_timeout;
        for (id, _) in &visible {
            q.insert(*id, hidden_until);
        }
        Ok(visible.into_iter().map(|(id, _)| id).collect())
    }

    async fn ack(&self, queue: &str, id: &Uuid) -> Result<bool, RepositoryError> {
        Ok(self
            .queues
            .lock()
            .await
            .get_mut(queue)
            .is_some_and(|q| q.remove(id).is_some()))
    }

    async fn size(&self, queue: &str) -> Result<usize, RepositoryError> {
        Ok(self.queues.lock().await.get(queue).map_or(0, HashMap::len))
    }
}
