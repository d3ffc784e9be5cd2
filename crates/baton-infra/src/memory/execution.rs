//! In-memory execution store.

use std::collections::{HashMap, HashSet};

use baton_core::repository::ExecutionStore;
use baton_types::error::RepositoryError;
use baton_types::queue::queue_name;
use baton_types::task::{PollData, Task, TaskExecLog, TaskStatus};
use baton_types::workflow::Workflow;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Default)]
struct State {
    /// Workflows stored without their task list.
    workflows: HashMap<Uuid, Workflow>,
    tasks: HashMap<Uuid, Task>,
    /// Pending (non-terminal) workflow ids per workflow type.
    pending: HashMap<String, HashSet<Uuid>>,
}

impl State {
    fn tasks_of(&self, workflow_id: &Uuid) -> Vec<Task> {
        let mut tasks: Vec<Task> = self
            .tasks
            .values()
            .filter(|t| t.workflow_instance_id == *workflow_id)
            .cloned()
            .collect();
        tasks.sort_by_key(|t| t.seq);
        tasks
    }

    fn sync_pending(&mut self, workflow: &Workflow) {
        let ids = self.pending.entry(workflow.workflow_type.clone()).or_default();
        if workflow.status.is_terminal() {
            ids.remove(&workflow.workflow_id);
        } else {
            ids.insert(workflow.workflow_id);
        }
    }
}

/// Execution store held entirely in process memory.
#[derive(Default)]
pub struct InMemoryExecutionStore {
    state: RwLock<State>,
    logs: DashMap<Uuid, Vec<TaskExecLog>>,
    /// Keyed by queue name (`type` or `domain:type`).
    poll_data: DashMap<String, PollData>,
}

impl InMemoryExecutionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn stripped(workflow: &Workflow) -> Workflow {
    let mut copy = workflow.clone();
    copy.tasks.clear();
    copy
}

impl ExecutionStore for InMemoryExecutionStore {
    async fn get_workflow(
        &self,
        workflow_id: &Uuid,
        include_tasks: bool,
    ) -> Result<Option<Workflow>, RepositoryError> {
        let state = self.state.read().await;
        Ok(state.workflows.get(workflow_id).map(|wf| {
            let mut wf = wf.clone();
            if include_tasks {
                wf.tasks = state.tasks_of(workflow_id);
            }
            wf
        }))
    }

    async fn create_workflow(&self, workflow: &Workflow) -> Result<(), RepositoryError> {
        let mut state = self.state.write().await;
        state.workflows.insert(workflow.workflow_id, stripped(workflow));
        state.sync_pending(workflow);
        Ok(())
    }

    async fn update_workflow(&self, workflow: &Workflow) -> Result<(), RepositoryError> {
        let mut state = self.state.write().await;
        if !state.workflows.contains_key(&workflow.workflow_id) {
            return Err(RepositoryError::NotFound);
        }
        let mut stored = stripped(workflow);
        stored.update_time = Some(Utc::now());
        state.workflows.insert(workflow.workflow_id, stored);
        state.sync_pending(workflow);
        Ok(())
    }

    async fn get_pending_workflows_by_type(
        &self,
        workflow_type: &str,
    ) -> Result<Vec<Uuid>, RepositoryError> {
        let state = self.state.read().await;
        let mut ids: Vec<Uuid> = state
            .pending
            .get(workflow_type)
            .map(|ids| ids.iter().copied().collect())
            .unwrap_or_default();
        ids.sort();
        Ok(ids)
    }

    async fn get_workflows_by_type(
        &self,
        workflow_type: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Workflow>, RepositoryError> {
        let state = self.state.read().await;
        let mut found: Vec<Workflow> = state
            .workflows
            .values()
            .filter(|wf| {
                wf.workflow_type == workflow_type && wf.create_time >= start && wf.create_time <= end
            })
            .cloned()
            .collect();
        found.sort_by_key(|wf| wf.create_time);
        Ok(found)
    }

    async fn remove_from_pending_workflow(
        &self,
        workflow_type: &str,
        workflow_id: &Uuid,
    ) -> Result<(), RepositoryError> {
        let mut state = self.state.write().await;
        if let Some(ids) = state.pending.get_mut(workflow_type) {
            ids.remove(workflow_id);
        }
        Ok(())
    }

    async fn get_task(&self, task_id: &Uuid) -> Result<Option<Task>, RepositoryError> {
        Ok(self.state.read().await.tasks.get(task_id).cloned())
    }

    async fn create_tasks(&self, tasks: &[Task]) -> Result<Vec<Task>, RepositoryError> {
        let mut state = self.state.write().await;
        let mut created = Vec::with_capacity(tasks.len());
        for task in tasks {
            let duplicate = state.tasks.values().any(|t| {
                t.workflow_instance_id == task.workflow_instance_id
                    && t.reference_task_name == task.reference_task_name
                    && t.retry_count == task.retry_count
            });
            if duplicate {
                tracing::debug!(
                    workflow_id = %task.workflow_instance_id,
                    ref_name = %task.reference_task_name,
                    retry_count = task.retry_count,
                    "task already exists, not creating"
                );
                continue;
            }
            state.tasks.insert(task.task_id, task.clone());
            created.push(task.clone());
        }
        Ok(created)
    }

    async fn update_task(&self, task: &Task) -> Result<(), RepositoryError> {
        let mut state = self.state.write().await;
        state.tasks.insert(task.task_id, task.clone());
        Ok(())
    }

    async fn remove_task(&self, task_id: &Uuid) -> Result<(), RepositoryError> {
        self.state.write().await.tasks.remove(task_id);
        self.logs.remove(task_id);
        Ok(())
    }

    async fn get_tasks_for_workflow(&self, workflow_id: &Uuid) -> Result<Vec<Task>, RepositoryError> {
        Ok(self.state.read().await.tasks_of(workflow_id))
    }

    async fn exceeds_in_progress_limit(&self, task: &Task) -> Result<bool, RepositoryError> {
        let Some(limit) = task
            .task_definition()
            .and_then(|def| def.concurrent_exec_limit)
            .filter(|limit| *limit > 0)
        else {
            return Ok(false);
        };
        let state = self.state.read().await;
        let in_progress: Vec<&Task> = state
            .tasks
            .values()
            .filter(|t| t.task_def_name == task.task_def_name && t.status == TaskStatus::InProgress)
            .collect();
        if in_progress.iter().any(|t| t.task_id == task.task_id) {
            return Ok(false);
        }
        let exceeds = in_progress.len() >= limit as usize;
        if exceeds {
            tracing::debug!(
                task_def = %task.task_def_name,
                limit,
                in_progress = in_progress.len(),
                "concurrent execution limit reached"
            );
        }
        Ok(exceeds)
    }

    async fn exceeds_rate_limit_per_frequency(&self, task: &Task) -> Result<bool, RepositoryError> {
        let Some(def) = task.task_definition() else {
            return Ok(false);
        };
        let Some(limit) = def.rate_limit_per_frequency.filter(|limit| *limit > 0) else {
            return Ok(false);
        };
        let window_secs = i64::try_from(def.rate_limit_frequency_in_seconds).unwrap_or(i64::MAX);
        let since = Utc::now() - Duration::seconds(window_secs);
        let state = self.state.read().await;
        let started = state
            .tasks
            .values()
            .filter(|t| {
                t.task_id != task.task_id
                    && t.task_def_name == task.task_def_name
                    && t.start_time.is_some_and(|s| s >= since)
            })
            .count();
        Ok(started >= limit as usize)
    }

    async fn add_task_exec_logs(&self, logs: &[TaskExecLog]) -> Result<(), RepositoryError> {
        for log in logs {
            self.logs.entry(log.task_id).or_default().push(log.clone());
        }
        Ok(())
    }

    async fn get_task_exec_logs(&self, task_id: &Uuid) -> Result<Vec<TaskExecLog>, RepositoryError> {
        Ok(self.logs.get(task_id).map(|l| l.clone()).unwrap_or_default())
    }

    async fn get_poll_data(
        &self,
        task_type: &str,
        domain: Option<&str>,
    ) -> Result<Option<PollData>, RepositoryError> {
        Ok(self
            .poll_data
            .get(&queue_name(task_type, domain))
            .map(|p| p.clone()))
    }

    async fn update_last_poll(
        &self,
        task_type: &str,
        domain: Option<&str>,
        worker_id: Option<&str>,
    ) -> Result<(), RepositoryError> {
        let queue = queue_name(task_type, domain);
        self.poll_data.insert(
            queue.clone(),
            PollData {
                queue_name: queue,
                domain: domain.map(String::from),
                worker_id: worker_id.map(String::from),
                last_poll_time: Utc::now(),
            },
        );
        Ok(())
    }
}
