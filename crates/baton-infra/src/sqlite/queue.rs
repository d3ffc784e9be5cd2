//! SQLite delay queue.
//!
//! One row per `(queue_name, message_id)` with the epoch-millisecond instant
//! it becomes visible. Popping pushes `deliver_at` out by the unack timeout
//! inside the same write transaction, so concurrent pops never hand out the
//! same message twice.

use std::time::Duration;

use baton_core::repository::WorkQueue;
use baton_types::error::RepositoryError;
use sqlx::Row;
use uuid::Uuid;

use super::pool::DatabasePool;
use super::{now_ms, parse_uuid, query_err, to_ms};

/// Visibility timeout applied to popped messages unless overridden.
pub const DEFAULT_UNACK_TIMEOUT: Duration = Duration::from_secs(60);

/// SQLite-backed implementation of `WorkQueue`.
pub struct SqliteWorkQueue {
    pool: DatabasePool,
    unack_timeout_ms: i64,
}

impl SqliteWorkQueue {
    pub fn new(pool: DatabasePool) -> Self {
        Self::with_unack_timeout(pool, DEFAULT_UNACK_TIMEOUT)
    }

    pub fn with_unack_timeout(pool: DatabasePool, unack_timeout: Duration) -> Self {
        Self {
            pool,
            unack_timeout_ms: i64::try_from(unack_timeout.as_millis()).unwrap_or(i64::MAX),
        }
    }

    async fn reschedule(&self, queue: &str, id: &Uuid, delay_ms: u64) -> Result<bool, RepositoryError> {
        let result = sqlx::query(
            "UPDATE queue_messages SET deliver_at = ? WHERE queue_name = ? AND message_id = ?",
        )
        .bind(now_ms().saturating_add(to_ms(delay_ms)))
        .bind(queue)
        .bind(id.to_string())
        .execute(&self.pool.writer)
        .await
        .map_err(query_err)?;
        Ok(result.rows_affected() > 0)
    }
}

impl WorkQueue for SqliteWorkQueue {
    async fn push(&self, queue: &str, id: &Uuid, offset_secs: u64) -> Result<(), RepositoryError> {
        let deliver_at = now_ms().saturating_add(to_ms(offset_secs).saturating_mul(1000));
        sqlx::query(
            r#"INSERT INTO queue_messages (queue_name, message_id, deliver_at)
               VALUES (?, ?, ?)
               ON CONFLICT(queue_name, message_id) DO UPDATE SET deliver_at = excluded.deliver_at"#,
        )
        .bind(queue)
        .bind(id.to_string())
        .bind(deliver_at)
        .execute(&self.pool.writer)
        .await
        .map_err(query_err)?;
        Ok(())
    }

    async fn remove(&self, queue: &str, id: &Uuid) -> Result<(), RepositoryError> {
        sqlx::query("DELETE FROM queue_messages WHERE queue_name = ? AND message_id = ?")
            .bind(queue)
            .bind(id.to_string())
            .execute(&self.pool.writer)
            .await
            .map_err(query_err)?;
        Ok(())
    }

    async fn exists(&self, queue: &str, id: &Uuid) -> Result<bool, RepositoryError> {
        let row = sqlx::query("SELECT 1 FROM queue_messages WHERE queue_name = ? AND message_id = ?")
            .bind(queue)
            .bind(id.to_string())
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(query_err)?;
        Ok(row.is_some())
    }

    async fn set_offset_time(&self, queue: &str, id: &Uuid, offset_secs: u64) -> Result<bool, RepositoryError> {
        self.reschedule(queue, id, offset_secs.saturating_mul(1000)).await
    }

    async fn set_unack_timeout(
        &self,
        queue: &str,
        id: &Uuid,
        unack_timeout_ms: u64,
    ) -> Result<bool, RepositoryError> {
        self.reschedule(queue, id, unack_timeout_ms).await
    }

    async fn pop(&self, queue: &str, count: usize) -> Result<Vec<Uuid>, RepositoryError> {
        if count == 0 {
            return Ok(Vec::new());
        }
        let now = now_ms();
        let mut tx = self.pool.writer.begin().await.map_err(query_err)?;
        let rows = sqlx::query(
            r#"SELECT message_id FROM queue_messages
               WHERE queue_name = ? AND deliver_at <= ?
               ORDER BY deliver_at, message_id
               LIMIT ?"#,
        )
        .bind(queue)
        .bind(now)
        .bind(i64::try_from(count).unwrap_or(i64::MAX))
        .fetch_all(&mut *tx)
        .await
        .map_err(query_err)?;

        let hidden_until = now.saturating_add(self.unack_timeout_ms);
        let mut ids = Vec::with_capacity(rows.len());
        for row in &rows {
            let id: String = row.try_get("message_id").map_err(query_err)?;
            sqlx::query("UPDATE queue_messages SET deliver_at = ? WHERE queue_name = ? AND message_id = ?")
                .bind(hidden_until)
                .bind(queue)
                .bind(&id)
                .execute(&mut *tx)
                .await
                .map_err(query_err)?;
            ids.push(parse_uuid(&id)?);
        }
        tx.commit().await.map_err(query_err)?;
        Ok(ids)
    }

    async fn ack(&self, queue: &str, id: &Uuid) -> Result<bool, RepositoryError> {
        let result = sqlx::query("DELETE FROM queue_messages WHERE queue_name = ? AND message_id = ?")
            .bind(queue)
            .bind(id.to_string())
            .execute(&self.pool.writer)
            .await
            .map_err(query_err)?;
        Ok(result.rows_affected() > 0)
    }

    async fn size(&self, queue: &str) -> Result<usize, RepositoryError> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM queue_messages WHERE queue_name = ?")
            .bind(queue)
            .fetch_one(&self.pool.reader)
            .await
            .map_err(query_err)?;
        Ok(usize::try_from(count).unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn queue() -> (tempfile::TempDir, SqliteWorkQueue) {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}?mode=rwc", dir.path().join("queue.db").display());
        let pool = DatabasePool::new(&url).await.unwrap();
        (dir, SqliteWorkQueue::new(pool))
    }

    #[tokio::test]
    async fn test_delayed_message_becomes_visible_on_offset_reset() {
        let (_dir, queue) = queue().await;
        let id = Uuid::now_v7();
        queue.push("encode", &id, 3600).await.unwrap();

        assert!(queue.pop("encode", 10).await.unwrap().is_empty());
        assert!(queue.exists("encode", &id).await.unwrap());
        assert!(queue.set_offset_time("encode", &id, 0).await.unwrap());
        assert_eq!(queue.pop("encode", 10).await.unwrap(), vec![id]);
    }

    #[tokio::test]
    async fn test_pop_hides_until_ack_or_unack_timeout() {
        let (_dir, queue) = queue().await;
        let id = Uuid::now_v7();
        queue.push("_deciderQueue", &id, 0).await.unwrap();

        assert_eq!(queue.pop("_deciderQueue", 5).await.unwrap(), vec![id]);
        assert!(queue.pop("_deciderQueue", 5).await.unwrap().is_empty());

        assert!(queue.set_unack_timeout("_deciderQueue", &id, 0).await.unwrap());
        assert_eq!(queue.pop("_deciderQueue", 5).await.unwrap(), vec![id]);

        assert!(queue.ack("_deciderQueue", &id).await.unwrap());
        assert_eq!(queue.size("_deciderQueue").await.unwrap(), 0);
        assert!(!queue.set_unack_timeout("_deciderQueue", &id, 0).await.unwrap());
    }

    #[tokio::test]
    async fn test_queues_are_independent() {
        let (_dir, queue) = queue().await;
        let id = Uuid::now_v7();
        queue.push("encode", &id, 0).await.unwrap();
        queue.push("gpu:encode", &id, 0).await.unwrap();
        queue.remove("encode", &id).await.unwrap();

        assert_eq!(queue.size("encode").await.unwrap(), 0);
        assert_eq!(queue.size("gpu:encode").await.unwrap(), 1);
    }
}
