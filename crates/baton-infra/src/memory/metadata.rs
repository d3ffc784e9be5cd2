//! In-memory metadata store.

use std::collections::{BTreeMap, HashMap};

use baton_core::repository::MetadataStore;
use baton_types::definition::{TaskDef, WorkflowDef};
use baton_types::error::RepositoryError;
use tokio::sync::RwLock;

/// Definitions keyed by name, versions kept sorted.
#[derive(Default)]
pub struct InMemoryMetadataStore {
    workflows: RwLock<HashMap<String, BTreeMap<u32, WorkflowDef>>>,
    task_defs: RwLock<HashMap<String, TaskDef>>,
}

impl InMemoryMetadataStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl MetadataStore for InMemoryMetadataStore {
    async fn get(&self, name: &str, version: u32) -> Result<Option<WorkflowDef>, RepositoryError> {
        Ok(self
            .workflows
            .read()
            .await
            .get(name)
            .and_then(|versions| versions.get(&version))
            .cloned())
    }

    async fn get_latest(&self, name: &str) -> Result<Option<WorkflowDef>, RepositoryError> {
        Ok(self
            .workflows
            .read()
            .await
            .get(name)
            .and_then(|versions| versions.values().next_back())
            .cloned())
    }

    async fn get_task_def(&self, name: &str) -> Result<Option<TaskDef>, RepositoryError> {
        Ok(self.task_defs.read().await.get(name).cloned())
    }

    async fn get_all_task_defs(&self) -> Result<Vec<TaskDef>, RepositoryError> {
        let mut defs: Vec<TaskDef> = self.task_defs.read().await.values().cloned().collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(defs)
    }

    async fn register_workflow_def(&self, def: &WorkflowDef) -> Result<(), RepositoryError> {
        self.workflows
            .write()
            .await
            .entry(def.name.clone())
            .or_default()
            .insert(def.version, def.clone());
        tracing::debug!(name = %def.name, version = def.version, "workflow definition registered");
        Ok(())
    }

    async fn register_task_def(&self, def: &TaskDef) -> Result<(), RepositoryError> {
        self.task_defs
            .write()
            .await
            .insert(def.name.clone(), def.clone());
        Ok(())
    }
}
