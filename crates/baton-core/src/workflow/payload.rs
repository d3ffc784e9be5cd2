//! Offloading of oversized payloads to external storage.
//!
//! Inputs and outputs above the configured thresholds are uploaded as JSON
//! and replaced by an empty inline map plus an `external_*_path`. The
//! decider downloads them again before evaluating parameters.

use std::sync::Arc;

use baton_types::Payload;
use baton_types::config::EngineConfig;
use baton_types::error::RepositoryError;
use baton_types::task::Task;
use baton_types::workflow::Workflow;

use crate::repository::PayloadStorage;

/// Which payload of a task or workflow is being stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadKind {
    TaskInput,
    TaskOutput,
    WorkflowInput,
    WorkflowOutput,
}

impl PayloadKind {
    fn dir(self) -> &'static str {
        match self {
            PayloadKind::TaskInput => "task/input",
            PayloadKind::TaskOutput => "task/output",
            PayloadKind::WorkflowInput => "workflow/input",
            PayloadKind::WorkflowOutput => "workflow/output",
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Thresholds {
    task_input_kb: u64,
    task_output_kb: u64,
    workflow_input_kb: u64,
    workflow_output_kb: u64,
}

/// Payload offloading helper bound to one storage backend.
pub struct PayloadUtils<P: PayloadStorage> {
    storage: Arc<P>,
    thresholds: Thresholds,
}

impl<P: PayloadStorage> PayloadUtils<P> {
    pub fn new(storage: Arc<P>, config: &EngineConfig) -> Self {
        Self {
            storage,
            thresholds: Thresholds {
                task_input_kb: config.task_input_payload_threshold_kb,
                task_output_kb: config.task_output_payload_threshold_kb,
                workflow_input_kb: config.workflow_input_payload_threshold_kb,
                workflow_output_kb: config.workflow_output_payload_threshold_kb,
            },
        }
    }

    fn threshold_bytes(&self, kind: PayloadKind) -> u64 {
        let kb = match kind {
            PayloadKind::TaskInput => self.thresholds.task_input_kb,
            PayloadKind::TaskOutput => self.thresholds.task_output_kb,
            PayloadKind::WorkflowInput => self.thresholds.workflow_input_kb,
            PayloadKind::WorkflowOutput => self.thresholds.workflow_output_kb,
        };
        kb.saturating_mul(1024)
    }

    /// Upload `payload` when it exceeds the threshold for `kind`.
    ///
    /// Returns the storage path on upload, `None` when it stays inline.
    async fn offload(
        &self,
        kind: PayloadKind,
        payload: &Payload,
    ) -> Result<Option<String>, RepositoryError> {
        if payload.is_empty() {
            return Ok(None);
        }
        let bytes = serde_json::to_vec(payload).map_err(|e| RepositoryError::Query(e.to_string()))?;
        if (bytes.len() as u64) <= self.threshold_bytes(kind) {
            return Ok(None);
        }
        let path = format!("{}/{}.json", kind.dir(), uuid::Uuid::now_v7());
        self.storage.upload(&path, &bytes).await?;
        tracing::debug!(path = %path, size = bytes.len(), "offloaded oversized payload");
        Ok(Some(path))
    }

    pub async fn download(&self, path: &str) -> Result<Payload, RepositoryError> {
        let bytes = self.storage.download(path).await?;
        serde_json::from_slice(&bytes).map_err(|e| RepositoryError::Query(e.to_string()))
    }

    pub async fn externalize_task_input(&self, task: &mut Task) -> Result<(), RepositoryError> {
        if let Some(path) = self.offload(PayloadKind::TaskInput, &task.input).await? {
            task.input = Payload::new();
            task.external_input_path = Some(path);
        }
        Ok(())
    }

    pub async fn externalize_task_output(&self, task: &mut Task) -> Result<(), RepositoryError> {
        if let Some(path) = self.offload(PayloadKind::TaskOutput, &task.output).await? {
            task.output = Payload::new();
            task.external_output_path = Some(path);
        }
        Ok(())
    }

    pub async fn externalize_workflow_input(&self, workflow: &mut Workflow) -> Result<(), RepositoryError> {
        if let Some(path) = self.offload(PayloadKind::WorkflowInput, &workflow.input).await? {
            workflow.input = Payload::new();
            workflow.external_input_path = Some(path);
        }
        Ok(())
    }

    pub async fn externalize_workflow_output(&self, workflow: &mut Workflow) -> Result<(), RepositoryError> {
        if let Some(path) = self.offload(PayloadKind::WorkflowOutput, &workflow.output).await? {
            workflow.output = Payload::new();
            workflow.external_output_path = Some(path);
        }
        Ok(())
    }

    /// Download a task's offloaded payloads back inline, clearing the paths.
    ///
    /// Used before a system task reads or rewrites its own payloads; the
    /// caller externalizes again before persisting.
    pub async fn populate_task(&self, task: &mut Task) -> Result<(), RepositoryError> {
        if let Some(path) = task.external_input_path.take() {
            task.input = self.download(&path).await?;
        }
        if let Some(path) = task.external_output_path.take() {
            task.output = self.download(&path).await?;
        }
        Ok(())
    }

    /// A copy of `workflow` with every offloaded payload downloaded inline.
    pub async fn populate(&self, workflow: &Workflow) -> Result<Workflow, RepositoryError> {
        let mut populated = workflow.clone();
        if let Some(path) = &workflow.external_input_path {
            populated.input = self.download(path).await?;
        }
        if let Some(path) = &workflow.external_output_path {
            populated.output = self.download(path).await?;
        }
        for task in &mut populated.tasks {
            if let Some(path) = &task.external_input_path {
                task.input = self.download(path).await?;
            }
            if let Some(path) = &task.external_output_path {
                task.output = self.download(path).await?;
            }
        }
        Ok(populated)
    }
}
