//! Shared fixtures: an executor wired to the in-memory collaborators, plus
//! worker-side helpers for polling and reporting results.

#![allow(dead_code)]

use std::sync::Arc;

use baton_core::repository::MetadataStore;
use baton_core::workflow::control::StartWorkflowRequest;
use baton_core::workflow::executor::WorkflowExecutor;
use baton_core::workflow::listener::WorkflowStatusListener;
use baton_infra::memory::{
    InMemoryExecutionStore, InMemoryMetadataStore, InMemoryPayloadStorage, InMemoryWorkQueue,
};
use baton_types::Payload;
use baton_types::config::EngineConfig;
use baton_types::definition::{NodeKind, TaskDef, WorkflowDef, WorkflowTask};
use baton_types::task::{Task, TaskResult, TaskResultStatus};
use baton_types::workflow::Workflow;
use serde_json::Value;
use uuid::Uuid;

pub type Engine = WorkflowExecutor<
    InMemoryExecutionStore,
    InMemoryMetadataStore,
    InMemoryWorkQueue,
    InMemoryPayloadStorage,
>;

pub const WORKER: &str = "worker-1";

pub struct Harness {
    pub executor: Arc<Engine>,
    pub store: Arc<InMemoryExecutionStore>,
    pub metadata: Arc<InMemoryMetadataStore>,
    pub queue: Arc<InMemoryWorkQueue>,
    pub payloads: Arc<InMemoryPayloadStorage>,
}

impl Harness {
    pub async fn new(defs: Vec<WorkflowDef>, task_defs: Vec<TaskDef>) -> Self {
        Self::build(defs, task_defs, EngineConfig::default(), None).await
    }

    pub async fn build(
        defs: Vec<WorkflowDef>,
        task_defs: Vec<TaskDef>,
        config: EngineConfig,
        listener: Option<Arc<dyn WorkflowStatusListener>>,
    ) -> Self {
        let store = Arc::new(InMemoryExecutionStore::new());
        let metadata = Arc::new(InMemoryMetadataStore::new());
        let queue = Arc::new(InMemoryWorkQueue::new());
        let payloads = Arc::new(InMemoryPayloadStorage::new());
        for def in &task_defs {
            metadata.register_task_def(def).await.unwrap();
        }
        for def in &defs {
            metadata.register_workflow_def(def).await.unwrap();
        }
        let mut executor = WorkflowExecutor::new(
            store.clone(),
            metadata.clone(),
            queue.clone(),
            payloads.clone(),
            config,
        );
        if let Some(listener) = listener {
            executor = executor.with_status_listener(listener);
        }
        Self {
            executor: Arc::new(executor),
            store,
            metadata,
            queue,
            payloads,
        }
    }

    pub async fn start(&self, name: &str, input: Value) -> Uuid {
        self.executor
            .start_workflow(StartWorkflowRequest::new(name, payload(input)))
            .await
            .unwrap()
    }

    pub async fn workflow(&self, workflow_id: Uuid) -> Workflow {
        self.executor.get_workflow(workflow_id, true).await.unwrap()
    }

    /// Latest instance of `ref_name`.
    pub async fn task(&self, workflow_id: Uuid, ref_name: &str) -> Task {
        self.workflow(workflow_id)
            .await
            .task_by_ref(ref_name)
            .cloned()
            .unwrap_or_else(|| panic!("no task for {ref_name}"))
    }

    pub async fn refs(&self, workflow_id: Uuid) -> Vec<String> {
        self.workflow(workflow_id)
            .await
            .tasks
            .into_iter()
            .map(|t| t.reference_task_name)
            .collect()
    }

    /// Poll exactly one task of `task_type` as a worker.
    pub async fn poll_one(&self, task_type: &str) -> Task {
        let mut polled = self
            .executor
            .poll(task_type, None, Some(WORKER), 1)
            .await
            .unwrap();
        assert_eq!(polled.len(), 1, "expected one {task_type} task");
        polled.remove(0)
    }

    pub async fn complete(&self, task: &Task, output: Value) {
        let mut result = TaskResult::new(task.workflow_instance_id, task.task_id, TaskResultStatus::Completed);
        result.output = payload(output);
        result.worker_id = Some(WORKER.to_string());
        self.executor.update_task(result).await.unwrap();
    }

    pub async fn fail(&self, task: &Task, reason: &str) {
        let mut result = TaskResult::new(task.workflow_instance_id, task.task_id, TaskResultStatus::Failed);
        result.reason_for_incompletion = Some(reason.to_string());
        self.executor.update_task(result).await.unwrap();
    }
}

pub fn payload(value: Value) -> Payload {
    match value {
        Value::Object(map) => map,
        Value::Null => Payload::new(),
        other => panic!("not an object: {other}"),
    }
}

/// SIMPLE node named after its reference minus the `_ref` suffix.
pub fn simple(ref_name: &str) -> WorkflowTask {
    WorkflowTask::new(ref_name.trim_end_matches("_ref"), ref_name, NodeKind::Simple)
}

pub fn task_def(name: &str, retry_count: u32) -> TaskDef {
    let mut def = TaskDef::new(name);
    def.retry_count = retry_count;
    def.retry_delay_seconds = 0;
    def
}

pub fn linear(name: &str, refs: &[&str]) -> WorkflowDef {
    WorkflowDef::new(name, 1, refs.iter().map(|r| simple(r)).collect())
}
