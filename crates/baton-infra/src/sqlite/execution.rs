//! SQLite execution store.
//!
//! Workflows and tasks are stored as JSON documents (`data`) with the fields
//! the engine filters on copied into indexed columns. A workflow document
//! never embeds its tasks; they are attached on read, ordered by `seq`.

use baton_core::repository::ExecutionStore;
use baton_types::error::RepositoryError;
use baton_types::queue::queue_name;
use baton_types::task::{PollData, Task, TaskExecLog, TaskStatus};
use baton_types::workflow::Workflow;
use chrono::{DateTime, Duration, Utc};
use sqlx::{Row, Sqlite, Transaction};
use uuid::Uuid;

use super::pool::DatabasePool;
use super::{format_datetime, from_json, parse_datetime, parse_uuid, query_err, to_json};

/// SQLite-backed implementation of `ExecutionStore`.
pub struct SqliteExecutionStore {
    pool: DatabasePool,
}

impl SqliteExecutionStore {
    /// Create a new store backed by the given database pool.
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn workflow_document(workflow: &Workflow) -> Result<String, RepositoryError> {
    let mut copy = workflow.clone();
    copy.tasks.clear();
    to_json(&copy)
}

fn start_ms(task: &Task) -> Option<i64> {
    task.start_time.map(|t| t.timestamp_millis())
}

async fn sync_pending(
    tx: &mut Transaction<'_, Sqlite>,
    workflow: &Workflow,
) -> Result<(), RepositoryError> {
    let query = if workflow.status.is_terminal() {
        "DELETE FROM workflow_pending WHERE workflow_type = ? AND workflow_id = ?"
    } else {
        "INSERT OR IGNORE INTO workflow_pending (workflow_type, workflow_id) VALUES (?, ?)"
    };
    sqlx::query(query)
        .bind(&workflow.workflow_type)
        .bind(workflow.workflow_id.to_string())
        .execute(&mut **tx)
        .await
        .map_err(query_err)?;
    Ok(())
}

async fn upsert_task(tx: &mut Transaction<'_, Sqlite>, task: &Task) -> Result<(), RepositoryError> {
    sqlx::query(
        r#"INSERT INTO tasks
           (task_id, workflow_id, reference_task_name, retry_count, seq, task_def_name, status, start_ms, data)
           VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
           ON CONFLICT(task_id) DO UPDATE SET
             seq = excluded.seq,
             status = excluded.status,
             start_ms = excluded.start_ms,
             data = excluded.data"#,
    )
    .bind(task.task_id.to_string())
    .bind(task.workflow_instance_id.to_string())
    .bind(&task.reference_task_name)
    .bind(i64::from(task.retry_count))
    .bind(i64::from(task.seq))
    .bind(&task.task_def_name)
    .bind(task.status.as_str())
    .bind(start_ms(task))
    .bind(to_json(task)?)
    .execute(&mut **tx)
    .await
    .map_err(query_err)?;
    Ok(())
}

fn task_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Task, RepositoryError> {
    let data: String = row.try_get("data").map_err(query_err)?;
    from_json(&data, "task")
}

// ---------------------------------------------------------------------------
// ExecutionStore impl
// ---------------------------------------------------------------------------

impl ExecutionStore for SqliteExecutionStore {
    async fn get_workflow(
        &self,
        workflow_id: &Uuid,
        include_tasks: bool,
    ) -> Result<Option<Workflow>, RepositoryError> {
        let row = sqlx::query("SELECT data FROM workflows WHERE workflow_id = ?")
            .bind(workflow_id.to_string())
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(query_err)?;
        let Some(row) = row else {
            return Ok(None);
        };
        let data: String = row.try_get("data").map_err(query_err)?;
        let mut workflow: Workflow = from_json(&data, "workflow")?;
        if include_tasks {
            workflow.tasks = self.get_tasks_for_workflow(workflow_id).await?;
        }
        Ok(Some(workflow))
    }

    async fn create_workflow(&self, workflow: &Workflow) -> Result<(), RepositoryError> {
        let mut tx = self.pool.writer.begin().await.map_err(query_err)?;
        sqlx::query(
            r#"INSERT INTO workflows
               (workflow_id, workflow_type, version, status, correlation_id, created_ms, data)
               VALUES (?, ?, ?, ?, ?, ?, ?)
               ON CONFLICT(workflow_id) DO UPDATE SET
                 version = excluded.version,
                 status = excluded.status,
                 correlation_id = excluded.correlation_id,
                 data = excluded.data"#,
        )
        .bind(workflow.workflow_id.to_string())
        .bind(&workflow.workflow_type)
        .bind(i64::from(workflow.version))
        .bind(workflow.status.as_str())
        .bind(&workflow.correlation_id)
        .bind(workflow.create_time.timestamp_millis())
        .bind(workflow_document(workflow)?)
        .execute(&mut *tx)
        .await
        .map_err(query_err)?;
        sync_pending(&mut tx, workflow).await?;
        tx.commit().await.map_err(query_err)?;
        Ok(())
    }

    async fn update_workflow(&self, workflow: &Workflow) -> Result<(), RepositoryError> {
        let mut stored = workflow.clone();
        stored.update_time = Some(Utc::now());

        let mut tx = self.pool.writer.begin().await.map_err(query_err)?;
        let result = sqlx::query(
            "UPDATE workflows SET version = ?, status = ?, correlation_id = ?, data = ? WHERE workflow_id = ?",
        )
        .bind(i64::from(stored.version))
        .bind(stored.status.as_str())
        .bind(&stored.correlation_id)
        .bind(workflow_document(&stored)?)
        .bind(stored.workflow_id.to_string())
        .execute(&mut *tx)
        .await
        .map_err(query_err)?;
        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }
        sync_pending(&mut tx, &stored).await?;
        tx.commit().await.map_err(query_err)?;
        Ok(())
    }

    async fn get_pending_workflows_by_type(
        &self,
        workflow_type: &str,
    ) -> Result<Vec<Uuid>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT workflow_id FROM workflow_pending WHERE workflow_type = ? ORDER BY workflow_id",
        )
        .bind(workflow_type)
        .fetch_all(&self.pool.reader)
        .await
        .map_err(query_err)?;

        let mut ids = Vec::with_capacity(rows.len());
        for row in &rows {
            let id: String = row.try_get("workflow_id").map_err(query_err)?;
            ids.push(parse_uuid(&id)?);
        }
        Ok(ids)
    }

    async fn get_workflows_by_type(
        &self,
        workflow_type: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Workflow>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT data FROM workflows WHERE workflow_type = ? AND created_ms >= ? AND created_ms <= ? ORDER BY created_ms",
        )
        .bind(workflow_type)
        .bind(start.timestamp_millis())
        .bind(end.timestamp_millis())
        .fetch_all(&self.pool.reader)
        .await
        .map_err(query_err)?;

        let mut workflows = Vec::with_capacity(rows.len());
        for row in &rows {
            let data: String = row.try_get("data").map_err(query_err)?;
            workflows.push(from_json(&data, "workflow")?);
        }
        Ok(workflows)
    }

    async fn remove_from_pending_workflow(
        &self,
        workflow_type: &str,
        workflow_id: &Uuid,
    ) -> Result<(), RepositoryError> {
        sqlx::query("DELETE FROM workflow_pending WHERE workflow_type = ? AND workflow_id = ?")
            .bind(workflow_type)
            .bind(workflow_id.to_string())
            .execute(&self.pool.writer)
            .await
            .map_err(query_err)?;
        Ok(())
    }

    async fn get_task(&self, task_id: &Uuid) -> Result<Option<Task>, RepositoryError> {
        let row = sqlx::query("SELECT data FROM tasks WHERE task_id = ?")
            .bind(task_id.to_string())
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(query_err)?;
        row.as_ref().map(task_from_row).transpose()
    }

    async fn create_tasks(&self, tasks: &[Task]) -> Result<Vec<Task>, RepositoryError> {
        let mut tx = self.pool.writer.begin().await.map_err(query_err)?;
        let mut created = Vec::with_capacity(tasks.len());
        for task in tasks {
            let result = sqlx::query(
                r#"INSERT OR IGNORE INTO tasks
                   (task_id, workflow_id, reference_task_name, retry_count, seq, task_def_name, status, start_ms, data)
                   VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
            )
            .bind(task.task_id.to_string())
            .bind(task.workflow_instance_id.to_string())
            .bind(&task.reference_task_name)
            .bind(i64::from(task.retry_count))
            .bind(i64::from(task.seq))
            .bind(&task.task_def_name)
            .bind(task.status.as_str())
            .bind(start_ms(task))
            .bind(to_json(task)?)
            .execute(&mut *tx)
            .await
            .map_err(query_err)?;
            if result.rows_affected() == 1 {
                created.push(task.clone());
            } else {
                tracing::debug!(
                    workflow_id = %task.workflow_instance_id,
                    ref_name = %task.reference_task_name,
                    retry_count = task.retry_count,
                    "task already exists, not creating"
                );
            }
        }
        tx.commit().await.map_err(query_err)?;
        Ok(created)
    }

    async fn update_task(&self, task: &Task) -> Result<(), RepositoryError> {
        let mut tx = self.pool.writer.begin().await.map_err(query_err)?;
        upsert_task(&mut tx, task).await?;
        tx.commit().await.map_err(query_err)?;
        Ok(())
    }

    async fn update_tasks(&self, tasks: &[Task]) -> Result<(), RepositoryError> {
        if tasks.is_empty() {
            return Ok(());
        }
        let mut tx = self.pool.writer.begin().await.map_err(query_err)?;
        for task in tasks {
            upsert_task(&mut tx, task).await?;
        }
        tx.commit().await.map_err(query_err)?;
        Ok(())
    }

    async fn remove_task(&self, task_id: &Uuid) -> Result<(), RepositoryError> {
        sqlx::query("DELETE FROM tasks WHERE task_id = ?")
            .bind(task_id.to_string())
            .execute(&self.pool.writer)
            .await
            .map_err(query_err)?;
        Ok(())
    }

    async fn get_tasks_for_workflow(&self, workflow_id: &Uuid) -> Result<Vec<Task>, RepositoryError> {
        let rows = sqlx::query("SELECT data FROM tasks WHERE workflow_id = ? ORDER BY seq, task_id")
            .bind(workflow_id.to_string())
            .fetch_all(&self.pool.reader)
            .await
            .map_err(query_err)?;
        rows.iter().map(task_from_row).collect()
    }

    async fn exceeds_in_progress_limit(&self, task: &Task) -> Result<bool, RepositoryError> {
        let Some(limit) = task
            .task_definition()
            .and_then(|def| def.concurrent_exec_limit)
            .filter(|limit| *limit > 0)
        else {
            return Ok(false);
        };
        let rows = sqlx::query("SELECT task_id FROM tasks WHERE task_def_name = ? AND status = ?")
            .bind(&task.task_def_name)
            .bind(TaskStatus::InProgress.as_str())
            .fetch_all(&self.pool.reader)
            .await
            .map_err(query_err)?;
        let own_id = task.task_id.to_string();
        let mut in_progress = 0usize;
        for row in &rows {
            let id: String = row.try_get("task_id").map_err(query_err)?;
            if id == own_id {
                return Ok(false);
            }
            in_progress += 1;
        }
        Ok(in_progress >= limit as usize)
    }

    async fn exceeds_rate_limit_per_frequency(&self, task: &Task) -> Result<bool, RepositoryError> {
        let Some(def) = task.task_definition() else {
            return Ok(false);
        };
        let Some(limit) = def.rate_limit_per_frequency.filter(|limit| *limit > 0) else {
            return Ok(false);
        };
        let window_secs = i64::try_from(def.rate_limit_frequency_in_seconds).unwrap_or(i64::MAX);
        let since = (Utc::now() - Duration::seconds(window_secs)).timestamp_millis();
        let (started,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM tasks WHERE task_def_name = ? AND start_ms >= ? AND task_id != ?",
        )
        .bind(&task.task_def_name)
        .bind(since)
        .bind(task.task_id.to_string())
        .fetch_one(&self.pool.reader)
        .await
        .map_err(query_err)?;
        Ok(started >= i64::from(limit))
    }

    async fn add_task_exec_logs(&self, logs: &[TaskExecLog]) -> Result<(), RepositoryError> {
        let mut tx = self.pool.writer.begin().await.map_err(query_err)?;
        for log in logs {
            sqlx::query("INSERT INTO task_exec_logs (task_id, log, created_time) VALUES (?, ?, ?)")
                .bind(log.task_id.to_string())
                .bind(&log.log)
                .bind(format_datetime(&log.created_time))
                .execute(&mut *tx)
                .await
                .map_err(query_err)?;
        }
        tx.commit().await.map_err(query_err)?;
        Ok(())
    }

    async fn get_task_exec_logs(&self, task_id: &Uuid) -> Result<Vec<TaskExecLog>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT task_id, log, created_time FROM task_exec_logs WHERE task_id = ? ORDER BY id",
        )
        .bind(task_id.to_string())
        .fetch_all(&self.pool.reader)
        .await
        .map_err(query_err)?;

        let mut logs = Vec::with_capacity(rows.len());
        for row in &rows {
            let id: String = row.try_get("task_id").map_err(query_err)?;
            let created: String = row.try_get("created_time").map_err(query_err)?;
            logs.push(TaskExecLog {
                task_id: parse_uuid(&id)?,
                log: row.try_get("log").map_err(query_err)?,
                created_time: parse_datetime(&created)?,
            });
        }
        Ok(logs)
    }

    async fn get_poll_data(
        &self,
        task_type: &str,
        domain: Option<&str>,
    ) -> Result<Option<PollData>, RepositoryError> {
        let row = sqlx::query(
            "SELECT queue_name, domain, worker_id, last_poll_time FROM poll_data WHERE queue_name = ?",
        )
        .bind(queue_name(task_type, domain))
        .fetch_optional(&self.pool.reader)
        .await
        .map_err(query_err)?;
        let Some(row) = row else {
            return Ok(None);
        };
        let last_poll: String = row.try_get("last_poll_time").map_err(query_err)?;
        Ok(Some(PollData {
            queue_name: row.try_get("queue_name").map_err(query_err)?,
            domain: row.try_get("domain").map_err(query_err)?,
            worker_id: row.try_get("worker_id").map_err(query_err)?,
            last_poll_time: parse_datetime(&last_poll)?,
        }))
    }

    async fn update_last_poll(
        &self,
        task_type: &str,
        domain: Option<&str>,
        worker_id: Option<&str>,
    ) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"INSERT INTO poll_data (queue_name, domain, worker_id, last_poll_time)
               VALUES (?, ?, ?, ?)
               ON CONFLICT(queue_name) DO UPDATE SET
                 domain = excluded.domain,
                 worker_id = excluded.worker_id,
                 last_poll_time = excluded.last_poll_time"#,
        )
        .bind(queue_name(task_type, domain))
        .bind(domain)
        .bind(worker_id)
        .bind(format_datetime(&Utc::now()))
        .execute(&self.pool.writer)
        .await
        .map_err(query_err)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use baton_types::Payload;
    use baton_types::workflow::WorkflowStatus;
    use serde_json::json;

    async fn store() -> (tempfile::TempDir, SqliteExecutionStore) {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}?mode=rwc", dir.path().join("exec.db").display());
        let pool = DatabasePool::new(&url).await.unwrap();
        (dir, SqliteExecutionStore::new(pool))
    }

    fn task(wf: &Workflow, ref_name: &str, seq: u32) -> Task {
        let mut t = Task::new(
            Uuid::now_v7(),
            wf.workflow_id,
            &wf.workflow_type,
            ref_name,
            "encode",
            TaskStatus::Scheduled,
        );
        t.seq = seq;
        t
    }

    #[tokio::test]
    async fn test_workflow_roundtrip_with_tasks() {
        let (_dir, store) = store().await;
        let mut wf = Workflow::new(Uuid::now_v7(), "media", 1, Payload::new());
        wf.input.insert("file".into(), json!("a.mov"));
        store.create_workflow(&wf).await.unwrap();
        store
            .create_tasks(&[task(&wf, "b_ref", 2), task(&wf, "a_ref", 1)])
            .await
            .unwrap();

        let loaded = store.get_workflow(&wf.workflow_id, true).await.unwrap().unwrap();
        assert_eq!(loaded.input["file"], json!("a.mov"));
        let refs: Vec<&str> = loaded.tasks.iter().map(|t| t.reference_task_name.as_str()).collect();
        assert_eq!(refs, vec!["a_ref", "b_ref"]);
        assert!(store.get_workflow(&Uuid::now_v7(), false).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_pending_index_tracks_status() {
        let (_dir, store) = store().await;
        let mut wf = Workflow::new(Uuid::now_v7(), "media", 1, Payload::new());
        store.create_workflow(&wf).await.unwrap();
        assert_eq!(store.get_pending_workflows_by_type("media").await.unwrap(), vec![wf.workflow_id]);

        wf.set_status(WorkflowStatus::Failed);
        store.update_workflow(&wf).await.unwrap();
        assert!(store.get_pending_workflows_by_type("media").await.unwrap().is_empty());

        wf.set_status(WorkflowStatus::Running);
        store.update_workflow(&wf).await.unwrap();
        assert_eq!(store.get_pending_workflows_by_type("media").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_update_missing_workflow_is_not_found() {
        let (_dir, store) = store().await;
        let wf = Workflow::new(Uuid::now_v7(), "media", 1, Payload::new());
        assert!(matches!(store.update_workflow(&wf).await, Err(RepositoryError::NotFound)));
    }

    #[tokio::test]
    async fn test_create_tasks_ignores_duplicates() {
        let (_dir, store) = store().await;
        let wf = Workflow::new(Uuid::now_v7(), "media", 1, Payload::new());
        store.create_workflow(&wf).await.unwrap();

        let first = store.create_tasks(&[task(&wf, "a_ref", 1)]).await.unwrap();
        assert_eq!(first.len(), 1);
        let again = store.create_tasks(&[task(&wf, "a_ref", 2)]).await.unwrap();
        assert!(again.is_empty());
    }

    #[tokio::test]
    async fn test_update_and_remove_task() {
        let (_dir, store) = store().await;
        let wf = Workflow::new(Uuid::now_v7(), "media", 1, Payload::new());
        store.create_workflow(&wf).await.unwrap();
        let mut t = task(&wf, "a_ref", 1);
        store.create_tasks(std::slice::from_ref(&t)).await.unwrap();

        t.set_status(TaskStatus::Completed);
        t.output.insert("url".into(), json!("s3://out"));
        store.update_task(&t).await.unwrap();
        let loaded = store.get_task(&t.task_id).await.unwrap().unwrap();
        assert_eq!(loaded.status, TaskStatus::Completed);
        assert_eq!(loaded.output["url"], json!("s3://out"));

        store.remove_task(&t.task_id).await.unwrap();
        assert!(store.get_task(&t.task_id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_workflows_by_type_time_range() {
        let (_dir, store) = store().await;
        let wf = Workflow::new(Uuid::now_v7(), "media", 1, Payload::new());
        store.create_workflow(&wf).await.unwrap();

        let hour = Duration::hours(1);
        let around = store
            .get_workflows_by_type("media", wf.create_time - hour, wf.create_time + hour)
            .await
            .unwrap();
        assert_eq!(around.len(), 1);
        let later = store
            .get_workflows_by_type("media", wf.create_time + hour, wf.create_time + hour * 2)
            .await
            .unwrap();
        assert!(later.is_empty());
    }

    #[tokio::test]
    async fn test_exec_logs_and_poll_data() {
        let (_dir, store) = store().await;
        let wf = Workflow::new(Uuid::now_v7(), "media", 1, Payload::new());
        store.create_workflow(&wf).await.unwrap();
        let t = task(&wf, "a_ref", 1);
        store.create_tasks(std::slice::from_ref(&t)).await.unwrap();

        let log = TaskExecLog {
            task_id: t.task_id,
            log: "transcoding".into(),
            created_time: Utc::now(),
        };
        store.add_task_exec_logs(&[log]).await.unwrap();
        let logs = store.get_task_exec_logs(&t.task_id).await.unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].log, "transcoding");

        store.update_last_poll("encode", Some("gpu"), Some("w1")).await.unwrap();
        let poll = store.get_poll_data("encode", Some("gpu")).await.unwrap().unwrap();
        assert_eq!(poll.queue_name, "gpu:encode");
        assert_eq!(poll.worker_id.as_deref(), Some("w1"));
    }
}
