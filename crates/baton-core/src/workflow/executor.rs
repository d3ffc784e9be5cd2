//! Orchestration loop: drives decisions to durable effect.
//!
//! `WorkflowExecutor` owns every mutating workflow operation. Each one loads
//! fresh state from the execution store, applies its change, and finishes by
//! running `decide` until the instance is stable.
//!
//! # Decide flow
//!
//! 1. Load the instance with its tasks, its definition and the task policy
//!    catalog.
//! 2. Run the [`Decider`]. A terminal signal completes or terminates the
//!    instance; a complete outcome completes it.
//! 3. Assign domains, requeue lost tasks, append new tasks with fresh `seq`
//!    numbers, and execute live synchronous system tasks.
//! 4. Persist updates and the instance, create new tasks, start new
//!    synchronous system tasks inline and queue the rest.
//! 5. Push the instance onto the decider queue for the sweep.
//! 6. Repeat while the pass changed state, up to `max_decide_passes`.
//!
//! Callers must hold the per-workflow lock around every mutating call.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use baton_types::Payload;
use baton_types::config::EngineConfig;
use baton_types::definition::{TaskType, WorkflowDef};
use baton_types::error::{ApplicationError, RepositoryError};
use baton_types::queue::{DECIDER_QUEUE, queue_name};
use baton_types::task::{JOIN, SUB_WORKFLOW, Task, TaskResult, TaskStatus};
use baton_types::workflow::{Workflow, WorkflowStatus};
use chrono::{DateTime, Utc};
use futures_util::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::Instrument;
use uuid::Uuid;

use crate::repository::{ExecutionStore, MetadataStore, PayloadStorage, WorkQueue};

use super::control::{StartWorkflowRequest, WorkflowControl};
use super::decider::{Decider, Decision, TerminalSignal};
use super::listener::{QueueStatusListener, WorkflowStatusListener};
use super::mapper::{TaskDefCatalog, TaskExpander};
use super::parameters;
use super::payload::PayloadUtils;
use super::retry::RetryHandler;
use super::system_task::{SubWorkflowTask, SystemTask, SystemTaskRegistry};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Output key recording the failure workflow id (or its start error).
pub const FAILURE_WORKFLOW_OUTPUT: &str = "conductor.failure_workflow";

/// Domain list entry that routes a task to the undomained queue.
pub const NO_DOMAIN: &str = "NO_DOMAIN";

/// `task_to_domain` key applying to every task type.
const ALL_TASK_TYPES: &str = "*";

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

/// Re-run a finished workflow, from scratch or from one of its tasks.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RerunRequest {
    pub workflow_id: Uuid,
    /// Task to resume from. Tasks of sub-workflows are found as well.
    #[serde(default)]
    pub task_id: Option<Uuid>,
    #[serde(default)]
    pub task_input: Option<Payload>,
    #[serde(default)]
    pub workflow_input: Option<Payload>,
    #[serde(default)]
    pub correlation_id: Option<String>,
}

/// Input and output recorded on a task skipped by request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SkipTaskRequest {
    #[serde(default)]
    pub task_input: Option<Payload>,
    #[serde(default)]
    pub task_output: Option<Payload>,
}

/// Result of a single decide pass.
enum Pass {
    /// The instance completed or terminated.
    Terminal,
    /// State changed; another pass may schedule more work.
    Changed,
    Stable,
}

// ---------------------------------------------------------------------------
// WorkflowExecutor
// ---------------------------------------------------------------------------

/// The orchestration loop.
///
/// Generic over its four storage collaborators; background drivers share it
/// through an `Arc`.
pub struct WorkflowExecutor<E, M, Q, P>
where
    E: ExecutionStore,
    M: MetadataStore,
    Q: WorkQueue,
    P: PayloadStorage,
{
    store: Arc<E>,
    metadata: Arc<M>,
    queue: Arc<Q>,
    payloads: Arc<PayloadUtils<P>>,
    config: EngineConfig,
    expander: Arc<TaskExpander>,
    system_tasks: Arc<SystemTaskRegistry>,
    decider: Decider<Q, P>,
    listener: Arc<dyn WorkflowStatusListener>,
}

impl<E, M, Q, P> WorkflowExecutor<E, M, Q, P>
where
    E: ExecutionStore + 'static,
    M: MetadataStore + 'static,
    Q: WorkQueue + 'static,
    P: PayloadStorage + 'static,
{
    /// Create an executor with the built-in mappers and system tasks and a
    /// listener publishing to `config.status_listener_queue`.
    pub fn new(
        store: Arc<E>,
        metadata: Arc<M>,
        queue: Arc<Q>,
        payload_storage: Arc<P>,
        config: EngineConfig,
    ) -> Self {
        let payloads = Arc::new(PayloadUtils::new(payload_storage, &config));
        let expander = Arc::new(TaskExpander::with_defaults());
        let system_tasks = Arc::new(SystemTaskRegistry::with_defaults());
        let decider = Decider::new(
            queue.clone(),
            payloads.clone(),
            expander.clone(),
            system_tasks.clone(),
        );
        let listener: Arc<dyn WorkflowStatusListener> = Arc::new(QueueStatusListener::new(
            queue.clone(),
            config.status_listener_queue.clone(),
        ));
        Self {
            store,
            metadata,
            queue,
            payloads,
            config,
            expander,
            system_tasks,
            decider,
            listener,
        }
    }

    pub fn with_status_listener(mut self, listener: Arc<dyn WorkflowStatusListener>) -> Self {
        self.listener = listener;
        self
    }

    /// Replace the system task registry, e.g. to add embedder task types.
    pub fn with_system_tasks(mut self, registry: SystemTaskRegistry) -> Self {
        self.system_tasks = Arc::new(registry);
        self.decider = Decider::new(
            self.queue.clone(),
            self.payloads.clone(),
            self.expander.clone(),
            self.system_tasks.clone(),
        );
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn queue(&self) -> &Arc<Q> {
        &self.queue
    }

    pub fn system_tasks(&self) -> &SystemTaskRegistry {
        &self.system_tasks
    }

    // -----------------------------------------------------------------------
    // Loading helpers
    // -----------------------------------------------------------------------

    async fn load(&self, workflow_id: Uuid, include_tasks: bool) -> Result<Workflow, ApplicationError> {
        self.store
            .get_workflow(&workflow_id, include_tasks)
            .await?
            .ok_or_else(|| ApplicationError::NotFound(format!("No such workflow found by id: {workflow_id}")))
    }

    async fn load_def(&self, workflow: &Workflow) -> Result<WorkflowDef, ApplicationError> {
        self.metadata
            .get(&workflow.workflow_type, workflow.version)
            .await?
            .ok_or_else(|| {
                ApplicationError::NotFound(format!(
                    "No such workflow defined. name={}, version={}",
                    workflow.workflow_type, workflow.version
                ))
            })
    }

    async fn catalog(&self) -> Result<TaskDefCatalog, ApplicationError> {
        Ok(TaskDefCatalog::new(self.metadata.get_all_task_defs().await?))
    }

    fn sync_system_task(&self, task_type: &str) -> Option<Arc<dyn SystemTask>> {
        self.system_tasks.get(task_type).filter(|t| !t.is_async())
    }

    /// Replace the queue entry of `task`, delayed by its callback.
    async fn add_to_queue(&self, task: &Task) -> Result<(), RepositoryError> {
        let queue = task.queue_name();
        self.queue.remove(&queue, &task.task_id).await?;
        self.queue
            .push(&queue, &task.task_id, task.callback_after_secs)
            .await?;
        tracing::debug!(
            task_id = %task.task_id,
            queue = %queue,
            callback_after_secs = task.callback_after_secs,
            "task queued"
        );
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Start
    // -----------------------------------------------------------------------

    /// Create a workflow instance and run its first decide.
    pub async fn start_workflow(&self, request: StartWorkflowRequest) -> Result<Uuid, ApplicationError> {
        let def = match request.version {
            Some(version) => self.metadata.get(&request.name, version).await?,
            None => self.metadata.get_latest(&request.name).await?,
        }
        .ok_or_else(|| {
            let version = request
                .version
                .map_or_else(|| "latest".to_string(), |v| v.to_string());
            ApplicationError::NotFound(format!(
                "No such workflow defined. name={}, version={version}",
                request.name
            ))
        })?;

        let catalog = self.catalog().await?;
        let missing: Vec<&str> = def
            .all_nodes()
            .into_iter()
            .filter(|node| node.task_type() == TaskType::Simple && catalog.resolve(node).is_none())
            .map(|node| node.name.as_str())
            .collect();
        if !missing.is_empty() {
            return Err(ApplicationError::InvalidInput(format!(
                "Cannot find the task definitions for the following tasks used in workflow: {missing:?}"
            )));
        }
        if request.input.is_none() && request.external_input_path.is_none() {
            return Err(ApplicationError::InvalidInput(
                "NULL input passed when creating workflow".to_string(),
            ));
        }

        let workflow_id = Uuid::now_v7();
        let mut workflow = Workflow::new(
            workflow_id,
            &def.name,
            def.version,
            request.input.unwrap_or_default(),
        );
        workflow.external_input_path = request.external_input_path;
        workflow.correlation_id = request.correlation_id;
        workflow.parent_workflow_id = request.parent_workflow_id;
        workflow.parent_workflow_task_id = request.parent_workflow_task_id;
        workflow.event = request.event;
        workflow.task_to_domain = request.task_to_domain;
        self.payloads.externalize_workflow_input(&mut workflow).await?;
        self.store.create_workflow(&workflow).await?;
        tracing::info!(
            workflow_id = %workflow_id,
            workflow_type = %def.name,
            version = def.version,
            "workflow started"
        );

        if let Err(e) = self.decide(workflow_id).await {
            tracing::error!(workflow_id = %workflow_id, error = %e, "initial decide failed, leaving it to the sweep");
            self.queue
                .push(DECIDER_QUEUE, &workflow_id, self.config.sweep_frequency_secs)
                .await?;
            return Err(e);
        }
        Ok(workflow_id)
    }

    // -----------------------------------------------------------------------
    // Decide
    // -----------------------------------------------------------------------

    /// Evaluate `workflow_id` until stable. Returns `true` when the instance
    /// completed or terminated.
    pub fn decide(&self, workflow_id: Uuid) -> BoxFuture<'_, Result<bool, ApplicationError>> {
        Box::pin(
            async move {
                for _ in 0..self.config.max_decide_passes {
                    match self.decide_pass(workflow_id).await? {
                        Pass::Terminal => return Ok(true),
                        Pass::Stable => return Ok(false),
                        Pass::Changed => {}
                    }
                }
                tracing::warn!(
                    workflow_id = %workflow_id,
                    max_decide_passes = self.config.max_decide_passes,
                    "decide pass limit reached, deferring to the sweep"
                );
                Ok(false)
            }
            .instrument(tracing::info_span!("decide", workflow_id = %workflow_id)),
        )
    }

    async fn decide_pass(&self, workflow_id: Uuid) -> Result<Pass, ApplicationError> {
        let mut workflow = self.load(workflow_id, true).await?;
        if workflow.status.is_terminal() {
            if !workflow.status.is_successful() {
                self.cancel_non_terminal_tasks(&mut workflow).await?;
            }
            return Ok(Pass::Terminal);
        }
        let def = self.load_def(&workflow).await?;
        let catalog = self.catalog().await?;

        let outcome = match self.decider.decide(&mut workflow, &def, &catalog).await? {
            Decision::Continue(outcome) => outcome,
            Decision::Terminal(signal) => {
                self.handle_terminal_signal(workflow, &def, signal).await?;
                return Ok(Pass::Terminal);
            }
        };

        if outcome.complete {
            self.store.update_tasks(&outcome.tasks_to_update).await?;
            self.complete_workflow(&mut workflow, &def, None).await?;
            return Ok(Pass::Terminal);
        }

        let mut to_schedule = outcome.tasks_to_schedule;
        self.set_task_domains(&mut to_schedule, &workflow).await?;
        for task in &outcome.tasks_to_requeue {
            self.add_to_queue(task).await?;
        }

        // Append new tasks; live tasks are already part of the instance.
        let mut updates = outcome.tasks_to_update;
        let mut new_ids: HashSet<Uuid> = HashSet::new();
        let mut scheduled_ids = Vec::with_capacity(to_schedule.len());
        let mut seq = workflow.max_seq();
        for mut task in to_schedule {
            if workflow.task_by_id(&task.task_id).is_some() {
                scheduled_ids.push(task.task_id);
                continue;
            }
            let duplicate = workflow.tasks.iter().any(|t| {
                t.reference_task_name == task.reference_task_name && t.retry_count == task.retry_count
            });
            if duplicate {
                continue;
            }
            if task.seq == 0 {
                seq += 1;
                task.seq = seq;
            }
            new_ids.insert(task.task_id);
            scheduled_ids.push(task.task_id);
            workflow.tasks.push(task);
        }

        let mut state_changed = false;
        if scheduled_ids
            .iter()
            .any(|id| workflow.task_by_id(id).is_some_and(|t| self.sync_system_task(&t.task_type).is_some()))
        {
            let populated = self.payloads.populate(&workflow).await?;
            for id in &scheduled_ids {
                let Some(idx) = workflow.tasks.iter().position(|t| t.task_id == *id) else {
                    continue;
                };
                if workflow.tasks[idx].status.is_terminal() {
                    continue;
                }
                let Some(system_task) = self.sync_system_task(&workflow.tasks[idx].task_type) else {
                    continue;
                };
                let mut task = workflow.tasks[idx].clone();
                self.payloads.populate_task(&mut task).await?;
                if system_task.execute(&populated, &mut task, self).await? {
                    self.payloads.externalize_task_input(&mut task).await?;
                    self.payloads.externalize_task_output(&mut task).await?;
                    tracing::debug!(
                        workflow_id = %workflow_id,
                        task_id = %task.task_id,
                        ref_name = %task.reference_task_name,
                        status = ?task.status,
                        "system task executed"
                    );
                    if !new_ids.contains(id) {
                        updates.retain(|t| t.task_id != *id);
                        updates.push(task.clone());
                    }
                    workflow.tasks[idx] = task;
                    state_changed = true;
                }
            }
        }

        let new_tasks: Vec<Task> = workflow
            .tasks
            .iter()
            .filter(|t| new_ids.contains(&t.task_id))
            .cloned()
            .collect();
        let touched = !updates.is_empty() || !new_tasks.is_empty();
        if touched {
            self.store.update_tasks(&updates).await?;
            self.store.update_workflow(&workflow).await?;
        }
        if !new_tasks.is_empty() {
            state_changed |= self.schedule_tasks(&mut workflow, new_tasks).await?;
        }
        if touched {
            self.queue
                .push(DECIDER_QUEUE, &workflow_id, self.config.sweep_frequency_secs)
                .await?;
        }

        Ok(if state_changed { Pass::Changed } else { Pass::Stable })
    }

    /// Persist `tasks`, start the synchronous system tasks among them and
    /// queue everything else. Returns `true` when a system task was started.
    async fn schedule_tasks(&self, workflow: &mut Workflow, tasks: Vec<Task>) -> Result<bool, ApplicationError> {
        let created = self.store.create_tasks(&tasks).await?;
        tracing::debug!(
            workflow_id = %workflow.workflow_id,
            created = created.len(),
            requested = tasks.len(),
            "tasks created"
        );
        let mut started = false;
        let mut populated: Option<Workflow> = None;

        for mut task in created {
            let system_task = self.system_tasks.get(&task.task_type);
            if system_task.is_some() && task.start_time.is_none() {
                task.start_time = Some(Utc::now());
            }
            match system_task {
                // Created already terminal (FORK, executed DECISION): its
                // successors still need another pass.
                Some(sync) if !sync.is_async() && task.status.is_terminal() => started = true,
                _ if task.status.is_terminal() => {}
                Some(system_task) if !system_task.is_async() => {
                    if populated.is_none() {
                        populated = Some(self.payloads.populate(workflow).await?);
                    }
                    let Some(snapshot) = populated.as_ref() else {
                        continue;
                    };
                    self.payloads.populate_task(&mut task).await?;
                    if let Err(e) = system_task.start(snapshot, &mut task, self).await {
                        tracing::warn!(
                            workflow_id = %workflow.workflow_id,
                            task_id = %task.task_id,
                            task_type = %task.task_type,
                            error = %e,
                            "unable to start system task"
                        );
                        task.reason_for_incompletion =
                            Some(format!("Unable to start system task: {}, {e}", task.task_type));
                        task.set_status(TaskStatus::Failed);
                    }
                    self.payloads.externalize_task_input(&mut task).await?;
                    self.payloads.externalize_task_output(&mut task).await?;
                    self.store.update_task(&task).await?;
                    if let Some(slot) = workflow.tasks.iter_mut().find(|t| t.task_id == task.task_id) {
                        *slot = task;
                    }
                    started = true;
                }
                _ => self.add_to_queue(&task).await?,
            }
        }
        Ok(started)
    }

    /// Route worker tasks to the first active domain listed for their type.
    ///
    /// A `*` entry applies to every worker task and shadows per-type entries.
    async fn set_task_domains(&self, tasks: &mut [Task], workflow: &Workflow) -> Result<(), RepositoryError> {
        if workflow.task_to_domain.is_empty() {
            return Ok(());
        }
        let all_types = workflow.task_to_domain.get(ALL_TASK_TYPES);
        for task in tasks
            .iter_mut()
            .filter(|t| t.domain.is_none() && !self.system_tasks.contains(&t.task_type))
        {
            let Some(list) = all_types.or_else(|| workflow.task_to_domain.get(&task.task_type)) else {
                continue;
            };
            task.domain = self.active_domain(&task.task_type, list).await?;
        }
        Ok(())
    }

    /// First domain of a comma-separated list polled within the active
    /// window. `None` leaves the task on the undomained queue.
    async fn active_domain(&self, task_type: &str, list: &str) -> Result<Option<String>, RepositoryError> {
        let window_ms = i64::try_from(self.config.active_worker_last_poll_secs)
            .unwrap_or(i64::MAX)
            .saturating_mul(1000);
        let domains = list
            .split(',')
            .map(str::trim)
            .filter(|d| !d.is_empty() && !d.eq_ignore_ascii_case(NO_DOMAIN));
        for domain in domains {
            if let Some(poll) = self.store.get_poll_data(task_type, Some(domain)).await? {
                if (Utc::now() - poll.last_poll_time).num_milliseconds() < window_ms {
                    return Ok(Some(domain.to_string()));
                }
            }
        }
        Ok(None)
    }

    // -----------------------------------------------------------------------
    // Completion and termination
    // -----------------------------------------------------------------------

    async fn handle_terminal_signal(
        &self,
        mut workflow: Workflow,
        def: &WorkflowDef,
        signal: TerminalSignal,
    ) -> Result<(), ApplicationError> {
        if let Some(task) = &signal.task {
            self.store.update_task(task).await?;
            if let Some(slot) = workflow.tasks.iter_mut().find(|t| t.task_id == task.task_id) {
                *slot = task.clone();
            }
        }
        if signal.status == WorkflowStatus::Completed {
            return self
                .complete_workflow(&mut workflow, def, signal.task.as_ref())
                .await;
        }
        tracing::info!(
            workflow_id = %workflow.workflow_id,
            status = %signal.status,
            reason = %signal.reason,
            "workflow ended by decision"
        );
        let failure_workflow = failure_workflow_name(def, &workflow);
        if !workflow.status.is_terminal() {
            workflow.set_status(signal.status);
        }
        self.terminate(&mut workflow, Some(def), &signal.reason, failure_workflow)
            .await
    }

    async fn complete_workflow(
        &self,
        workflow: &mut Workflow,
        def: &WorkflowDef,
        output_task: Option<&Task>,
    ) -> Result<(), ApplicationError> {
        let workflow_id = workflow.workflow_id;
        match workflow.status {
            WorkflowStatus::Completed => {
                self.store
                    .remove_from_pending_workflow(&workflow.workflow_type, &workflow_id)
                    .await?;
                self.queue.remove(DECIDER_QUEUE, &workflow_id).await?;
                tracing::info!(workflow_id = %workflow_id, "workflow already completed");
                return Ok(());
            }
            status if status.is_terminal() => {
                return Err(ApplicationError::Conflict(format!(
                    "Workflow has already been completed.  Current status {status}"
                )));
            }
            _ => {}
        }

        self.decider
            .update_workflow_output(workflow, def, output_task)
            .await?;
        workflow.set_status(WorkflowStatus::Completed);
        workflow.update_time = Some(Utc::now());
        self.store.update_workflow(workflow).await?;
        tracing::info!(workflow_id = %workflow_id, workflow_type = %workflow.workflow_type, "workflow completed");

        if let Some(parent_id) = workflow.parent_workflow_id {
            self.resume_failed_parent(workflow, parent_id).await?;
            if let Err(e) = self.decide(parent_id).await {
                tracing::warn!(workflow_id = %workflow_id, parent_id = %parent_id, error = %e, "parent decide failed");
            }
        }
        self.queue.remove(DECIDER_QUEUE, &workflow_id).await?;
        if let Err(e) = self.listener.on_workflow_completed(workflow).await {
            tracing::warn!(workflow_id = %workflow_id, error = %e, "status listener failed");
        }
        Ok(())
    }

    /// A parent failed by this sub-workflow goes back to RUNNING once the
    /// sub-workflow completes, unless the parent has a failure workflow.
    async fn resume_failed_parent(&self, child: &Workflow, parent_id: Uuid) -> Result<(), ApplicationError> {
        let mut parent = self.load(parent_id, false).await?;
        if parent.status != WorkflowStatus::Failed {
            return Ok(());
        }
        let parent_def = self.load_def(&parent).await?;
        if parent_def.failure_workflow.as_deref().is_some_and(|name| !name.is_empty()) {
            return Ok(());
        }
        let Some(task_id) = child.parent_workflow_task_id else {
            return Ok(());
        };
        let Some(mut task) = self.store.get_task(&task_id).await? else {
            return Ok(());
        };
        if task.status != TaskStatus::Failed {
            return Ok(());
        }
        task.set_status(TaskStatus::InProgress);
        task.end_time = None;
        self.store.update_task(&task).await?;
        parent.set_status(WorkflowStatus::Running);
        parent.end_time = None;
        parent.reason_for_incompletion = None;
        self.store.update_workflow(&parent).await?;
        tracing::info!(workflow_id = %parent_id, "resumed failed parent workflow");
        Ok(())
    }

    /// Terminate a running workflow on request. No failure workflow is
    /// started.
    pub async fn terminate_workflow(&self, workflow_id: Uuid, reason: &str) -> Result<(), ApplicationError> {
        let mut workflow = self.load(workflow_id, true).await?;
        if workflow.status.is_terminal() {
            return Err(ApplicationError::Conflict(format!(
                "Workflow {workflow_id} has ended, status cannot be updated. status={}",
                workflow.status
            )));
        }
        workflow.set_status(WorkflowStatus::Terminated);
        let def = self
            .metadata
            .get(&workflow.workflow_type, workflow.version)
            .await?;
        self.terminate(&mut workflow, def.as_ref(), reason, None).await
    }

    async fn terminate(
        &self,
        workflow: &mut Workflow,
        def: Option<&WorkflowDef>,
        reason: &str,
        failure_workflow: Option<String>,
    ) -> Result<(), ApplicationError> {
        let workflow_id = workflow.workflow_id;
        if !workflow.status.is_terminal() {
            workflow.set_status(WorkflowStatus::Terminated);
        }
        if let Some(def) = def {
            self.decider.update_workflow_output(workflow, def, None).await?;
        }
        workflow.reason_for_incompletion = Some(reason.to_string());
        workflow.update_time = Some(Utc::now());
        self.store.update_workflow(workflow).await?;
        tracing::info!(
            workflow_id = %workflow_id,
            status = %workflow.status,
            reason = %reason,
            "workflow terminated"
        );

        self.cancel_non_terminal_tasks(workflow).await?;

        if let Some(parent_id) = workflow.parent_workflow_id {
            if let Err(e) = self.decide(parent_id).await {
                tracing::warn!(workflow_id = %workflow_id, parent_id = %parent_id, error = %e, "parent decide failed");
            }
        }

        if let Some(name) = failure_workflow {
            let mut input = workflow.input.clone();
            input.insert("workflowId".to_string(), json!(workflow_id.to_string()));
            input.insert("reason".to_string(), json!(reason));
            input.insert("failureStatus".to_string(), json!(workflow.status.as_str()));
            let request = StartWorkflowRequest {
                name: name.clone(),
                input: Some(input),
                correlation_id: Some(workflow_id.to_string()),
                task_to_domain: workflow.task_to_domain.clone(),
                ..StartWorkflowRequest::default()
            };
            let recorded = match self.start_workflow(request).await {
                Ok(failure_id) => {
                    tracing::info!(workflow_id = %workflow_id, failure_workflow_id = %failure_id, "failure workflow started");
                    json!(failure_id.to_string())
                }
                Err(e) => {
                    tracing::warn!(workflow_id = %workflow_id, failure_workflow = %name, error = %e, "failure workflow did not start");
                    json!(format!("Error workflow {name} failed to start.  reason: {e}"))
                }
            };
            workflow.output.insert(FAILURE_WORKFLOW_OUTPUT.to_string(), recorded);
            self.store.update_workflow(workflow).await?;
        }

        self.queue.remove(DECIDER_QUEUE, &workflow_id).await?;
        self.store
            .remove_from_pending_workflow(&workflow.workflow_type, &workflow_id)
            .await?;
        if let Err(e) = self.listener.on_workflow_terminated(workflow).await {
            tracing::warn!(workflow_id = %workflow_id, error = %e, "status listener failed");
        }
        Ok(())
    }

    /// Cancel every running task of an ended workflow and drop all of its
    /// queue entries.
    async fn cancel_non_terminal_tasks(&self, workflow: &mut Workflow) -> Result<(), ApplicationError> {
        let snapshot = workflow.clone();
        for task in workflow.tasks.iter_mut() {
            if !task.status.is_terminal() {
                task.set_status(TaskStatus::Canceled);
                if let Some(system_task) = self.system_tasks.get(&task.task_type) {
                    if let Err(e) = system_task.cancel(&snapshot, task, self).await {
                        tracing::warn!(task_id = %task.task_id, error = %e, "system task cancel failed");
                    }
                }
                self.store.update_task(task).await?;
            }
            self.queue.remove(&task.queue_name(), &task.task_id).await?;
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Task updates
    // -----------------------------------------------------------------------

    /// Apply a worker (or system task) result and decide.
    ///
    /// Results for terminal tasks or terminal workflows only clean up the
    /// queue, so duplicate deliveries are safe.
    pub async fn update_task(&self, result: TaskResult) -> Result<(), ApplicationError> {
        let mut workflow = self.load(result.workflow_instance_id, false).await?;
        let mut task = self
            .store
            .get_task(&result.task_id)
            .await?
            .ok_or_else(|| ApplicationError::NotFound(format!("No such task found by id: {}", result.task_id)))?;
        let queue = task.queue_name();

        if workflow.status.is_terminal() {
            self.queue.remove(&queue, &task.task_id).await?;
            if !task.status.is_terminal() {
                task.set_status(TaskStatus::Completed);
            }
            task.output = result.output;
            task.reason_for_incompletion = result.reason_for_incompletion;
            task.worker_id = result.worker_id;
            self.store.update_task(&task).await?;
            tracing::info!(
                workflow_id = %workflow.workflow_id,
                task_id = %task.task_id,
                status = %workflow.status,
                "workflow already ended, task result recorded"
            );
            return Ok(());
        }
        if task.status.is_terminal() {
            self.queue.remove(&queue, &task.task_id).await?;
            tracing::info!(
                task_id = %task.task_id,
                status = ?task.status,
                "task already ended, result ignored"
            );
            return Ok(());
        }

        let now = Utc::now();
        task.set_status(result.status.into());
        task.output = result.output;
        task.external_output_path = result.external_output_path;
        task.reason_for_incompletion = result.reason_for_incompletion;
        if result.worker_id.is_some() {
            task.worker_id = result.worker_id;
        }
        task.callback_after_secs = result.callback_after_secs;
        task.update_time = Some(now);

        if matches!(task.status, TaskStatus::Failed | TaskStatus::FailedWithTerminalError) {
            workflow
                .failed_reference_task_names
                .insert(task.reference_task_name.clone());
            self.store.update_workflow(&workflow).await?;
        }

        if task.status.is_terminal() {
            self.queue.remove(&queue, &task.task_id).await?;
        } else if self.sync_system_task(&task.task_type).is_none() {
            self.add_to_queue(&task).await?;
        }

        self.payloads.externalize_task_output(&mut task).await?;
        self.store.update_task(&task).await?;
        if !result.logs.is_empty() {
            let logs: Vec<_> = result
                .logs
                .into_iter()
                .map(|mut log| {
                    log.task_id = task.task_id;
                    log
                })
                .collect();
            self.store.add_task_exec_logs(&logs).await?;
        }
        tracing::debug!(
            workflow_id = %workflow.workflow_id,
            task_id = %task.task_id,
            status = ?task.status,
            "task updated"
        );

        self.decide(workflow.workflow_id).await?;
        Ok(())
    }

    /// Run one step of an asynchronous system task. Errors are logged.
    pub async fn execute_system_task(&self, task_type: &str, task_id: Uuid, unack_timeout_secs: u64) {
        if let Err(e) = self
            .try_execute_system_task(task_type, task_id, unack_timeout_secs)
            .await
        {
            tracing::error!(task_id = %task_id, task_type = %task_type, error = %e, "system task execution failed");
        }
    }

    async fn try_execute_system_task(
        &self,
        task_type: &str,
        task_id: Uuid,
        unack_timeout_secs: u64,
    ) -> Result<(), ApplicationError> {
        let system_task = self
            .system_tasks
            .get(task_type)
            .ok_or_else(|| ApplicationError::NotFound(format!("No system task registered for type {task_type}")))?;
        let Some(mut task) = self.store.get_task(&task_id).await? else {
            self.queue.remove(task_type, &task_id).await?;
            return Err(ApplicationError::NotFound(format!("No such task found by id: {task_id}")));
        };
        let queue = task.queue_name();
        if task.status.is_terminal() {
            self.queue.remove(&queue, &task_id).await?;
            return Ok(());
        }

        let workflow = self.load(task.workflow_instance_id, true).await?;
        if workflow.status.is_terminal() {
            task.set_status(TaskStatus::Canceled);
            self.store.update_task(&task).await?;
            self.queue.remove(&queue, &task_id).await?;
            tracing::info!(task_id = %task_id, workflow_id = %workflow.workflow_id, "workflow ended, system task canceled");
            return Ok(());
        }

        if task.status == TaskStatus::Scheduled {
            if self.store.exceeds_in_progress_limit(&task).await? {
                tracing::warn!(task_id = %task_id, task_type = %task_type, "concurrency limit reached, postponing");
                return Ok(());
            }
            if self.store.exceeds_rate_limit_per_frequency(&task).await? {
                tracing::warn!(task_id = %task_id, task_type = %task_type, "rate limit reached, postponing");
                return Ok(());
            }
        }

        self.queue
            .set_unack_timeout(&queue, &task_id, unack_timeout_secs.saturating_mul(1000))
            .await?;
        task.poll_count += 1;
        if task.start_time.is_none() {
            task.start_time = Some(Utc::now());
        }
        self.store.update_task(&task).await?;

        self.payloads.populate_task(&mut task).await?;
        let populated = self.payloads.populate(&workflow).await?;
        match task.status {
            TaskStatus::Scheduled => system_task.start(&populated, &mut task, self).await?,
            TaskStatus::InProgress => {
                system_task.execute(&populated, &mut task, self).await?;
            }
            _ => {}
        }
        if !task.status.is_terminal() {
            task.callback_after_secs = unack_timeout_secs;
        }
        self.update_task(TaskResult::from_task(&task)).await
    }

    /// Hand up to `count` queued tasks of `task_type` to a worker.
    ///
    /// Tasks over their concurrency or rate limit stay hidden until their
    /// unack timeout passes.
    pub async fn poll(
        &self,
        task_type: &str,
        domain: Option<&str>,
        worker_id: Option<&str>,
        count: usize,
    ) -> Result<Vec<Task>, ApplicationError> {
        let queue = queue_name(task_type, domain);
        let ids = self.queue.pop(&queue, count).await?;
        let mut polled = Vec::with_capacity(ids.len());
        for id in ids {
            let Some(mut task) = self.store.get_task(&id).await? else {
                self.queue.remove(&queue, &id).await?;
                continue;
            };
            if task.status.is_terminal() {
                self.queue.remove(&queue, &id).await?;
                continue;
            }
            if self.store.exceeds_in_progress_limit(&task).await?
                || self.store.exceeds_rate_limit_per_frequency(&task).await?
            {
                tracing::debug!(task_id = %id, queue = %queue, "task limit reached, not handing out");
                continue;
            }
            let now = Utc::now();
            task.set_status(TaskStatus::InProgress);
            if task.start_time.is_none() {
                task.start_time = Some(now);
            }
            task.update_time = Some(now);
            task.callback_after_secs = 0;
            task.worker_id = worker_id.map(String::from);
            task.poll_count += 1;
            self.store.update_task(&task).await?;
            self.queue.ack(&queue, &id).await?;
            polled.push(task);
        }
        self.store
            .update_last_poll(task_type, domain, worker_id)
            .await?;
        Ok(polled)
    }

    // -----------------------------------------------------------------------
    // Retry / rewind / rerun
    // -----------------------------------------------------------------------

    /// Reschedule the latest failed, timed out or canceled task of every
    /// reference of a finished workflow.
    pub async fn retry(&self, workflow_id: Uuid) -> Result<(), ApplicationError> {
        let mut workflow = self.load(workflow_id, true).await?;
        if !workflow.status.is_terminal() {
            return Err(ApplicationError::Conflict(format!(
                "Workflow is still running.  status={}",
                workflow.status
            )));
        }
        if workflow.tasks.is_empty() {
            return Err(ApplicationError::Conflict("Workflow has not started yet".to_string()));
        }

        // Latest instance per reference, in seq order.
        let mut latest: BTreeMap<String, usize> = BTreeMap::new();
        let mut order: Vec<usize> = (0..workflow.tasks.len()).collect();
        order.sort_by_key(|&i| workflow.tasks[i].seq);
        for idx in order {
            latest.insert(workflow.tasks[idx].reference_task_name.clone(), idx);
        }

        let mut retriable: Vec<usize> = Vec::new();
        let mut reopened: Vec<usize> = Vec::new();
        for &idx in latest.values() {
            let task = &workflow.tasks[idx];
            match task.status {
                TaskStatus::Canceled if task.task_type == JOIN => reopened.push(idx),
                TaskStatus::Failed
                | TaskStatus::FailedWithTerminalError
                | TaskStatus::TimedOut
                | TaskStatus::Canceled => retriable.push(idx),
                _ => {}
            }
        }
        if retriable.is_empty() {
            return Err(ApplicationError::Conflict(
                "There are no retriable tasks! Use restart if you want to attempt entire workflow execution again."
                    .to_string(),
            ));
        }
        retriable.sort_by_key(|&i| workflow.tasks[i].seq);

        self.update_and_push_parents(&workflow).await?;
        workflow.set_status(WorkflowStatus::Running);
        workflow.end_time = None;
        workflow.reason_for_incompletion = None;
        workflow.failed_reference_task_names.clear();
        self.store.update_workflow(&workflow).await?;
        self.queue
            .push(DECIDER_QUEUE, &workflow_id, self.config.sweep_frequency_secs)
            .await?;

        for idx in reopened {
            let join = &mut workflow.tasks[idx];
            join.set_status(TaskStatus::InProgress);
            join.end_time = None;
            join.executed = false;
        }
        let mut seq = workflow.max_seq();
        let mut rescheduled = Vec::with_capacity(retriable.len());
        for idx in retriable {
            let mut next = RetryHandler::manual_retry(&workflow.tasks[idx]);
            seq += 1;
            next.seq = seq;
            workflow.tasks[idx].retried = true;
            rescheduled.push(next);
        }
        self.store.update_tasks(&workflow.tasks).await?;
        workflow.tasks.extend(rescheduled.iter().cloned());
        tracing::info!(workflow_id = %workflow_id, tasks = rescheduled.len(), "workflow retried");
        self.schedule_tasks(&mut workflow, rescheduled).await?;
        self.decide(workflow_id).await?;
        Ok(())
    }

    /// Restart a finished workflow from its first task.
    ///
    /// With `use_latest_definition` the instance moves to the latest
    /// registered version of its definition.
    pub async fn rewind(&self, workflow_id: Uuid, use_latest_definition: bool) -> Result<(), ApplicationError> {
        let mut workflow = self.load(workflow_id, true).await?;
        if !workflow.status.is_terminal() {
            return Err(ApplicationError::Conflict(format!(
                "Workflow is still running.  status={}",
                workflow.status
            )));
        }
        let def = if use_latest_definition {
            self.metadata
                .get_latest(&workflow.workflow_type)
                .await?
                .ok_or_else(|| ApplicationError::NotFound(format!("No such workflow defined. name={}", workflow.workflow_type)))?
        } else {
            self.load_def(&workflow).await?
        };
        if !def.restartable && workflow.status == WorkflowStatus::Completed {
            return Err(ApplicationError::Conflict(format!(
                "WorkflowId: {workflow_id} is an instance of WorkflowDef: {} and version: {} and is non restartable",
                def.name, def.version
            )));
        }

        for task in &workflow.tasks {
            self.queue.remove(&task.queue_name(), &task.task_id).await?;
            self.store.remove_task(&task.task_id).await?;
        }
        workflow.tasks.clear();
        workflow.version = def.version;
        workflow.reason_for_incompletion = None;
        workflow.failed_reference_task_names.clear();
        workflow.output = Payload::new();
        workflow.external_output_path = None;
        workflow.end_time = None;
        workflow.set_status(WorkflowStatus::Running);
        workflow.update_time = Some(Utc::now());
        self.store.update_workflow(&workflow).await?;
        tracing::info!(workflow_id = %workflow_id, version = def.version, "workflow rewound");
        self.decide(workflow_id).await?;
        Ok(())
    }

    /// Re-run a workflow from scratch or from one of its (or its
    /// sub-workflows') tasks.
    pub async fn rerun(&self, request: RerunRequest) -> Result<Uuid, ApplicationError> {
        let found = self
            .rerun_from(
                request.workflow_id,
                request.task_id,
                request.task_input.clone(),
                request.workflow_input.clone(),
                request.correlation_id.clone(),
            )
            .await?;
        if !found {
            let task = request.task_id.map(|id| id.to_string()).unwrap_or_default();
            return Err(ApplicationError::InvalidInput(format!("Task {task} not found")));
        }
        Ok(request.workflow_id)
    }

    fn rerun_from(
        &self,
        workflow_id: Uuid,
        task_id: Option<Uuid>,
        task_input: Option<Payload>,
        workflow_input: Option<Payload>,
        correlation_id: Option<String>,
    ) -> BoxFuture<'_, Result<bool, ApplicationError>> {
        Box::pin(async move {
            let mut workflow = self.load(workflow_id, true).await?;

            let Some(task_id) = task_id else {
                self.update_and_push_parents(&workflow).await?;
                for task in &workflow.tasks {
                    self.queue.remove(&task.queue_name(), &task.task_id).await?;
                    self.store.remove_task(&task.task_id).await?;
                }
                workflow.tasks.clear();
                workflow.set_status(WorkflowStatus::Running);
                workflow.end_time = None;
                workflow.reason_for_incompletion = None;
                workflow.failed_reference_task_names.clear();
                if correlation_id.is_some() {
                    workflow.correlation_id = correlation_id;
                }
                if let Some(input) = workflow_input {
                    workflow.input = input;
                    workflow.external_input_path = None;
                    self.payloads.externalize_workflow_input(&mut workflow).await?;
                }
                self.queue
                    .push(DECIDER_QUEUE, &workflow_id, self.config.sweep_frequency_secs)
                    .await?;
                self.store.update_workflow(&workflow).await?;
                tracing::info!(workflow_id = %workflow_id, "workflow rerun from start");
                self.decide(workflow_id).await?;
                return Ok(true);
            };

            let Some(position) = workflow.tasks.iter().position(|t| t.task_id == task_id) else {
                // Not ours; try each sub-workflow.
                for child_id in workflow
                    .tasks
                    .iter()
                    .filter(|t| t.task_type == SUB_WORKFLOW)
                    .filter_map(SubWorkflowTask::child_id)
                {
                    if self
                        .rerun_from(child_id, Some(task_id), task_input.clone(), None, None)
                        .await?
                    {
                        return Ok(true);
                    }
                }
                return Ok(false);
            };

            self.update_and_push_parents(&workflow).await?;
            workflow.set_status(WorkflowStatus::Running);
            workflow.end_time = None;
            workflow.reason_for_incompletion = None;
            workflow.failed_reference_task_names.clear();
            self.queue
                .push(DECIDER_QUEUE, &workflow_id, self.config.sweep_frequency_secs)
                .await?;
            self.store.update_workflow(&workflow).await?;

            let target_seq = workflow.tasks[position].seq;
            for task in workflow.tasks.iter().filter(|t| t.seq > target_seq) {
                self.queue.remove(&task.queue_name(), &task.task_id).await?;
                self.store.remove_task(&task.task_id).await?;
            }

            let mut task = workflow.tasks.swap_remove(position);
            task.executed = false;
            task.retried = false;
            task.end_time = None;
            task.update_time = None;
            task.reason_for_incompletion = None;
            task.output = Payload::new();
            task.external_output_path = None;
            if task.task_type == SUB_WORKFLOW {
                task.set_status(TaskStatus::InProgress);
                task.start_time = Some(Utc::now());
            } else {
                task.set_status(TaskStatus::Scheduled);
                task.start_time = None;
                task.scheduled_time = Some(Utc::now());
                if let Some(input) = task_input {
                    task.input = input;
                    task.external_input_path = None;
                    self.payloads.externalize_task_input(&mut task).await?;
                }
                self.add_to_queue(&task).await?;
            }
            self.store.update_task(&task).await?;
            tracing::info!(workflow_id = %workflow_id, task_id = %task_id, "workflow rerun from task");
            self.decide(workflow_id).await?;
            Ok(true)
        })
    }

    /// Put every ancestor of `workflow` back into RUNNING with its
    /// sub-workflow task IN_PROGRESS, so the ancestors resume when this
    /// workflow finishes again.
    async fn update_and_push_parents(&self, workflow: &Workflow) -> Result<(), ApplicationError> {
        let mut current = (workflow.parent_workflow_id, workflow.parent_workflow_task_id);
        while let (Some(parent_id), Some(parent_task_id)) = current {
            let mut parent = self.load(parent_id, false).await?;
            if let Some(mut task) = self.store.get_task(&parent_task_id).await? {
                task.set_status(TaskStatus::InProgress);
                task.end_time = None;
                task.executed = false;
                self.store.update_task(&task).await?;
            }
            parent.set_status(WorkflowStatus::Running);
            parent.end_time = None;
            parent.reason_for_incompletion = None;
            self.store.update_workflow(&parent).await?;
            self.queue
                .push(DECIDER_QUEUE, &parent_id, self.config.sweep_frequency_secs)
                .await?;
            current = (parent.parent_workflow_id, parent.parent_workflow_task_id);
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Pause / resume / skip
    // -----------------------------------------------------------------------

    pub async fn pause_workflow(&self, workflow_id: Uuid) -> Result<(), ApplicationError> {
        let mut workflow = self.load(workflow_id, false).await?;
        if workflow.status.is_terminal() {
            return Err(ApplicationError::Conflict(format!(
                "Workflow id {workflow_id} has ended, status cannot be updated."
            )));
        }
        if workflow.status == WorkflowStatus::Paused {
            return Ok(());
        }
        workflow.set_status(WorkflowStatus::Paused);
        self.store.update_workflow(&workflow).await?;
        tracing::info!(workflow_id = %workflow_id, "workflow paused");
        Ok(())
    }

    pub async fn resume_workflow(&self, workflow_id: Uuid) -> Result<(), ApplicationError> {
        let mut workflow = self.load(workflow_id, false).await?;
        if workflow.status != WorkflowStatus::Paused {
            return Err(ApplicationError::Conflict(format!(
                "The workflow {workflow_id} is not PAUSED so cannot resume. status={}",
                workflow.status
            )));
        }
        workflow.set_status(WorkflowStatus::Running);
        self.store.update_workflow(&workflow).await?;
        tracing::info!(workflow_id = %workflow_id, "workflow resumed");
        self.decide(workflow_id).await?;
        Ok(())
    }

    /// Record a SKIPPED task for a reference that has not run yet.
    pub async fn skip_task_from_workflow(
        &self,
        workflow_id: Uuid,
        ref_name: &str,
        request: SkipTaskRequest,
    ) -> Result<(), ApplicationError> {
        let workflow = self.load(workflow_id, true).await?;
        if workflow.status != WorkflowStatus::Running {
            return Err(ApplicationError::Conflict(format!(
                "The workflow {workflow_id} is not running so the task referenced by {ref_name} cannot be skipped"
            )));
        }
        let def = self.load_def(&workflow).await?;
        let Some(node) = def.node_by_ref(ref_name) else {
            return Err(ApplicationError::InvalidInput(format!(
                "The task referenced by {ref_name} does not exist in the WorkflowDefinition {}",
                workflow.workflow_type
            )));
        };
        if workflow.task_by_ref(ref_name).is_some() {
            return Err(ApplicationError::Conflict(format!(
                "The task referenced {ref_name} has already been processed, cannot be skipped"
            )));
        }

        let mut task = Task::new(
            Uuid::now_v7(),
            workflow_id,
            &workflow.workflow_type,
            ref_name,
            node.runtime_type(),
            TaskStatus::Skipped,
        );
        task.task_def_name = node.name.clone();
        task.correlation_id = workflow.correlation_id.clone();
        task.seq = workflow.max_seq() + 1;
        task.workflow_task = Some(node.clone());
        if let Some(input) = request.task_input {
            task.input = input;
        }
        if let Some(output) = request.task_output {
            task.output = output;
        }
        self.store.create_tasks(std::slice::from_ref(&task)).await?;
        tracing::info!(workflow_id = %workflow_id, ref_name = %ref_name, "task skipped");
        self.decide(workflow_id).await?;
        Ok(())
    }

    /// Make every waiting IN_PROGRESS task visible to workers immediately.
    pub async fn reset_callbacks_for_in_progress_tasks(&self, workflow_id: Uuid) -> Result<(), ApplicationError> {
        let workflow = self.load(workflow_id, true).await?;
        if workflow.status.is_terminal() {
            return Err(ApplicationError::Conflict(format!(
                "Workflow is completed.  status={}",
                workflow.status
            )));
        }
        for mut task in workflow
            .tasks
            .into_iter()
            .filter(|t| t.status == TaskStatus::InProgress && t.callback_after_secs > 0)
        {
            if self
                .queue
                .set_offset_time(&task.queue_name(), &task.task_id, 0)
                .await?
            {
                task.callback_after_secs = 0;
                self.store.update_task(&task).await?;
            }
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    pub async fn get_workflow(&self, workflow_id: Uuid, include_tasks: bool) -> Result<Workflow, ApplicationError> {
        self.load(workflow_id, include_tasks).await
    }

    pub async fn get_task(&self, task_id: Uuid) -> Result<Option<Task>, ApplicationError> {
        Ok(self.store.get_task(&task_id).await?)
    }

    /// The non-terminal task currently running for `ref_name`, if any.
    pub async fn get_pending_task_by_workflow(
        &self,
        ref_name: &str,
        workflow_id: Uuid,
    ) -> Result<Option<Task>, ApplicationError> {
        Ok(self
            .store
            .get_tasks_for_workflow(&workflow_id)
            .await?
            .into_iter()
            .find(|t| !t.status.is_terminal() && t.reference_task_name == ref_name))
    }

    pub async fn get_running_workflow_ids(&self, workflow_type: &str) -> Result<Vec<Uuid>, ApplicationError> {
        Ok(self.store.get_pending_workflows_by_type(workflow_type).await?)
    }

    /// Ids of `workflow_type` instances at `version` created within
    /// `[start, end]`.
    pub async fn get_workflows(
        &self,
        workflow_type: &str,
        version: u32,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Uuid>, ApplicationError> {
        Ok(self
            .store
            .get_workflows_by_type(workflow_type, start, end)
            .await?
            .into_iter()
            .filter(|wf| wf.version == version)
            .map(|wf| wf.workflow_id)
            .collect())
    }
}

/// Failure workflow of `def`, resolving a `${...}` reference against the
/// workflow.
fn failure_workflow_name(def: &WorkflowDef, workflow: &Workflow) -> Option<String> {
    let name = def.failure_workflow.as_deref()?.trim();
    if name.is_empty() {
        return None;
    }
    if !name.starts_with('$') {
        return Some(name.to_string());
    }
    let resolved = parameters::resolve_value(
        &Value::String(name.to_string()),
        &parameters::build_context(workflow),
    );
    resolved
        .as_str()
        .filter(|s| !s.is_empty())
        .map(String::from)
}

// ---------------------------------------------------------------------------
// WorkflowControl
// ---------------------------------------------------------------------------

impl<E, M, Q, P> WorkflowControl for WorkflowExecutor<E, M, Q, P>
where
    E: ExecutionStore + 'static,
    M: MetadataStore + 'static,
    Q: WorkQueue + 'static,
    P: PayloadStorage + 'static,
{
    fn load_workflow(
        &self,
        workflow_id: Uuid,
        include_tasks: bool,
    ) -> BoxFuture<'_, Result<Workflow, ApplicationError>> {
        Box::pin(self.load(workflow_id, include_tasks))
    }

    fn start_workflow(
        &self,
        request: StartWorkflowRequest,
    ) -> BoxFuture<'_, Result<Uuid, ApplicationError>> {
        Box::pin(Self::start_workflow(self, request))
    }

    fn terminate_workflow<'a>(
        &'a self,
        workflow_id: Uuid,
        reason: &'a str,
    ) -> BoxFuture<'a, Result<(), ApplicationError>> {
        Box::pin(Self::terminate_workflow(self, workflow_id, reason))
    }

    fn publish<'a>(
        &'a self,
        queue: &'a str,
        message_id: Uuid,
    ) -> BoxFuture<'a, Result<(), ApplicationError>> {
        Box::pin(async move {
            self.queue.push(queue, &message_id, 0).await?;
            Ok(())
        })
    }
}
