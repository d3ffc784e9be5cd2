//! SQLite metadata store.
//!
//! Workflow definitions are keyed by `(name, version)` and task definitions
//! by name; both are stored as JSON blobs.

use baton_core::repository::MetadataStore;
use baton_types::definition::{TaskDef, WorkflowDef};
use baton_types::error::RepositoryError;
use chrono::Utc;
use sqlx::Row;

use super::pool::DatabasePool;
use super::{format_datetime, from_json, query_err, to_json};

/// SQLite-backed implementation of `MetadataStore`.
pub struct SqliteMetadataStore {
    pool: DatabasePool,
}

impl SqliteMetadataStore {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

fn definition_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<WorkflowDef, RepositoryError> {
    let data: String = row.try_get("definition").map_err(query_err)?;
    from_json(&data, "workflow definition")
}

impl MetadataStore for SqliteMetadataStore {
    async fn get(&self, name: &str, version: u32) -> Result<Option<WorkflowDef>, RepositoryError> {
        let row = sqlx::query("SELECT definition FROM workflow_defs WHERE name = ? AND version = ?")
            .bind(name)
            .bind(i64::from(version))
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(query_err)?;
        row.as_ref().map(definition_from_row).transpose()
    }

    async fn get_latest(&self, name: &str) -> Result<Option<WorkflowDef>, RepositoryError> {
        let row = sqlx::query(
            "SELECT definition FROM workflow_defs WHERE name = ? ORDER BY version DESC LIMIT 1",
        )
        .bind(name)
        .fetch_optional(&self.pool.reader)
        .await
        .map_err(query_err)?;
        row.as_ref().map(definition_from_row).transpose()
    }

    async fn get_task_def(&self, name: &str) -> Result<Option<TaskDef>, RepositoryError> {
        let row = sqlx::query("SELECT definition FROM task_defs WHERE name = ?")
            .bind(name)
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(query_err)?;
        match row {
            Some(row) => {
                let data: String = row.try_get("definition").map_err(query_err)?;
                Ok(Some(from_json(&data, "task definition")?))
            }
            None => Ok(None),
        }
    }

    async fn get_all_task_defs(&self) -> Result<Vec<TaskDef>, RepositoryError> {
        let rows = sqlx::query("SELECT definition FROM task_defs ORDER BY name ASC")
            .fetch_all(&self.pool.reader)
            .await
            .map_err(query_err)?;

        let mut defs = Vec::with_capacity(rows.len());
        for row in &rows {
            let data: String = row.try_get("definition").map_err(query_err)?;
            defs.push(from_json(&data, "task definition")?);
        }
        Ok(defs)
    }

    async fn register_workflow_def(&self, def: &WorkflowDef) -> Result<(), RepositoryError> {
        let now = format_datetime(&Utc::now());
        sqlx::query(
            r#"INSERT INTO workflow_defs (name, version, definition, created_at, updated_at)
               VALUES (?, ?, ?, ?, ?)
               ON CONFLICT(name, version) DO UPDATE SET
                 definition = excluded.definition,
                 updated_at = excluded.updated_at"#,
        )
        .bind(&def.name)
        .bind(i64::from(def.version))
        .bind(to_json(def)?)
        .bind(&now)
        .bind(&now)
        .execute(&self.pool.writer)
        .await
        .map_err(query_err)?;
        tracing::info!(name = %def.name, version = def.version, "workflow definition registered");
        Ok(())
    }

    async fn register_task_def(&self, def: &TaskDef) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"INSERT INTO task_defs (name, definition, updated_at)
               VALUES (?, ?, ?)
               ON CONFLICT(name) DO UPDATE SET
                 definition = excluded.definition,
                 updated_at = excluded.updated_at"#,
        )
        .bind(&def.name)
        .bind(to_json(def)?)
        .bind(format_datetime(&Utc::now()))
        .execute(&self.pool.writer)
        .await
        .map_err(query_err)?;
        tracing::info!(name = %def.name, "task definition registered");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use baton_types::definition::{NodeKind, WorkflowTask};

    async fn store() -> (tempfile::TempDir, SqliteMetadataStore) {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}?mode=rwc", dir.path().join("meta.db").display());
        let pool = DatabasePool::new(&url).await.unwrap();
        (dir, SqliteMetadataStore::new(pool))
    }

    fn def(version: u32) -> WorkflowDef {
        WorkflowDef::new(
            "media",
            version,
            vec![WorkflowTask::new("encode", "encode_ref", NodeKind::Simple)],
        )
    }

    #[tokio::test]
    async fn test_versions_and_latest() {
        let (_dir, store) = store().await;
        store.register_workflow_def(&def(1)).await.unwrap();
        store.register_workflow_def(&def(3)).await.unwrap();

        let latest = store.get_latest("media").await.unwrap().unwrap();
        assert_eq!(latest.version, 3);
        assert_eq!(latest.tasks.len(), 1);
        assert!(store.get("media", 2).await.unwrap().is_none());
        assert!(store.get_latest("unknown").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_register_replaces_same_version() {
        let (_dir, store) = store().await;
        store.register_workflow_def(&def(1)).await.unwrap();
        let mut changed = def(1);
        changed.restartable = false;
        store.register_workflow_def(&changed).await.unwrap();

        assert!(!store.get("media", 1).await.unwrap().unwrap().restartable);
    }

    #[tokio::test]
    async fn test_task_defs() {
        let (_dir, store) = store().await;
        let mut encode = TaskDef::new("encode");
        encode.retry_count = 5;
        store.register_task_def(&encode).await.unwrap();
        store.register_task_def(&TaskDef::new("archive")).await.unwrap();

        let all = store.get_all_task_defs().await.unwrap();
        let names: Vec<&str> = all.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["archive", "encode"]);
        assert_eq!(store.get_task_def("encode").await.unwrap().unwrap().retry_count, 5);
    }
}
