//! Decision engine: the state transition function of a workflow instance.
//!
//! [`Decider::decide`] inspects an instance against its definition and
//! reports which tasks to schedule, update and requeue, whether the
//! instance is complete, or that it must terminate. It mutates the
//! instance's task list in place (timeouts, retry marks, executed flags)
//! but never persists anything; the executor applies the outcome.
//!
//! # Pass structure
//!
//! 1. Paused and terminal instances yield an empty outcome.
//! 2. An instance with no unprocessed tasks schedules the first non-skipped
//!    node of its definition.
//! 3. Every pending task (not retried, not skipped, not executed) is checked
//!    for timeouts, retried when unsuccessful, and expanded into its
//!    successors once terminal.
//! 4. With nothing left to schedule, the completion rule decides whether the
//!    instance is done.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use baton_types::definition::{TaskDef, TimeoutPolicy, WorkflowDef, WorkflowTask};
use baton_types::error::{ApplicationError, RepositoryError};
use baton_types::task::{DECISION, TERMINATE, Task, TaskStatus};
use baton_types::workflow::{Workflow, WorkflowStatus};
use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::mapper::{HAS_CHILDREN, TaskDefCatalog, TaskExpander};
use super::parameters;
use super::payload::PayloadUtils;
use super::retry::{RetryAction, RetryHandler};
use super::system_task::{SystemTaskRegistry, TerminateTask};
use crate::repository::{PayloadStorage, WorkQueue};

// ---------------------------------------------------------------------------
// Outcome types
// ---------------------------------------------------------------------------

/// Work produced by one decide pass.
#[derive(Debug, Clone, Default)]
pub struct DeciderOutcome {
    /// New tasks plus live system tasks to re-offer, in scheduling order.
    pub tasks_to_schedule: Vec<Task>,
    /// Existing tasks whose state changed during the pass.
    pub tasks_to_update: Vec<Task>,
    /// SCHEDULED tasks missing from their work queue.
    pub tasks_to_requeue: Vec<Task>,
    pub complete: bool,
}

/// The instance must leave RUNNING with `status`.
#[derive(Debug, Clone)]
pub struct TerminalSignal {
    pub status: WorkflowStatus,
    pub reason: String,
    /// Task that caused the transition; persisted by the executor.
    pub task: Option<Task>,
}

impl TerminalSignal {
    pub fn new(status: WorkflowStatus, reason: impl Into<String>) -> Self {
        Self {
            status,
            reason: reason.into(),
            task: None,
        }
    }

    pub fn with_task(mut self, task: Task) -> Self {
        self.task = Some(task);
        self
    }
}

/// Result of [`Decider::decide`].
#[derive(Debug, Clone)]
pub enum Decision {
    Continue(DeciderOutcome),
    Terminal(TerminalSignal),
}

/// Early exits from a pass.
enum Halt {
    Terminal(TerminalSignal),
    Backend(ApplicationError),
}

impl From<RepositoryError> for Halt {
    fn from(e: RepositoryError) -> Self {
        Halt::Backend(e.into())
    }
}

// ---------------------------------------------------------------------------
// Schedule set
// ---------------------------------------------------------------------------

/// A scheduled entry: a live task of the instance, or a freshly expanded one.
enum Slot {
    Existing(usize),
    New(Task),
}

/// Insertion-ordered map from reference name to scheduled entry.
///
/// Existing tasks are held by index so later mutations in the same pass
/// are reflected when the set is materialized.
#[derive(Default)]
struct ScheduleSet {
    entries: Vec<(String, Slot)>,
}

impl ScheduleSet {
    fn position(&self, ref_name: &str) -> Option<usize> {
        self.entries.iter().position(|(r, _)| r == ref_name)
    }

    /// Insert or replace, keeping the original position on replace.
    fn put(&mut self, ref_name: String, slot: Slot) {
        match self.position(&ref_name) {
            Some(i) => self.entries[i].1 = slot,
            None => self.entries.push((ref_name, slot)),
        }
    }

    fn put_if_absent(&mut self, ref_name: String, slot: Slot) {
        if self.position(&ref_name).is_none() {
            self.entries.push((ref_name, slot));
        }
    }

    fn materialize(self, workflow: &Workflow, executed: &HashSet<String>) -> Vec<Task> {
        self.entries
            .into_iter()
            .filter(|(ref_name, _)| !executed.contains(ref_name))
            .map(|(_, slot)| match slot {
                Slot::Existing(i) => workflow.tasks[i].clone(),
                Slot::New(task) => task,
            })
            .collect()
    }
}

fn push_unique(indices: &mut Vec<usize>, idx: usize) {
    if !indices.contains(&idx) {
        indices.push(idx);
    }
}

// ---------------------------------------------------------------------------
// Decider
// ---------------------------------------------------------------------------

/// The decision engine.
///
/// Generic over the work queue (consulted for response timeouts and
/// requeues) and the payload store (offloaded payloads are downloaded before
/// expressions are evaluated).
pub struct Decider<Q: WorkQueue, P: PayloadStorage> {
    queue: Arc<Q>,
    payloads: Arc<PayloadUtils<P>>,
    expander: Arc<TaskExpander>,
    system_tasks: Arc<SystemTaskRegistry>,
}

impl<Q: WorkQueue, P: PayloadStorage> Decider<Q, P> {
    pub fn new(
        queue: Arc<Q>,
        payloads: Arc<PayloadUtils<P>>,
        expander: Arc<TaskExpander>,
        system_tasks: Arc<SystemTaskRegistry>,
    ) -> Self {
        Self {
            queue,
            payloads,
            expander,
            system_tasks,
        }
    }

    /// Run one decide pass over `workflow`.
    ///
    /// `workflow` must carry its full task list ordered by `seq`.
    pub async fn decide(
        &self,
        workflow: &mut Workflow,
        def: &WorkflowDef,
        catalog: &TaskDefCatalog,
    ) -> Result<Decision, ApplicationError> {
        match self.evaluate(workflow, def, catalog).await {
            Ok(outcome) => Ok(Decision::Continue(outcome)),
            Err(Halt::Terminal(signal)) => {
                tracing::debug!(
                    workflow_id = %workflow.workflow_id,
                    status = %signal.status,
                    reason = %signal.reason,
                    "decider raised terminal signal"
                );
                Ok(Decision::Terminal(signal))
            }
            Err(Halt::Backend(e)) => Err(e),
        }
    }

    async fn evaluate(
        &self,
        workflow: &mut Workflow,
        def: &WorkflowDef,
        catalog: &TaskDefCatalog,
    ) -> Result<DeciderOutcome, Halt> {
        let mut outcome = DeciderOutcome::default();
        if workflow.status.is_terminal() {
            return Ok(outcome);
        }
        if workflow.status == WorkflowStatus::Paused {
            tracing::debug!(workflow_id = %workflow.workflow_id, "workflow is paused");
            return Ok(outcome);
        }

        let mut schedule = ScheduleSet::default();
        let unprocessed = workflow
            .tasks
            .iter()
            .any(|t| t.status != TaskStatus::Skipped && !t.executed);
        if !unprocessed {
            for task in self.start_tasks(workflow, def, catalog).await? {
                schedule.put(task.reference_task_name.clone(), Slot::New(task));
            }
        }

        let pending: Vec<usize> = workflow
            .tasks
            .iter()
            .enumerate()
            .filter(|(_, t)| !t.retried && t.status != TaskStatus::Skipped && !t.executed)
            .map(|(i, _)| i)
            .collect();
        let mut executed_refs: HashSet<String> = workflow
            .tasks
            .iter()
            .filter(|t| t.executed)
            .map(|t| t.reference_task_name.clone())
            .collect();
        let mut updates: Vec<usize> = Vec::new();
        let mut requeue: Vec<usize> = Vec::new();
        let now = Utc::now();

        for idx in pending {
            let ref_name = workflow.tasks[idx].reference_task_name.clone();
            let task_type = workflow.tasks[idx].task_type.clone();
            let is_system = self.system_tasks.contains(&task_type);
            let is_sync_system = self.is_sync_system(&task_type);

            if is_system && !workflow.tasks[idx].status.is_terminal() {
                schedule.put_if_absent(ref_name.clone(), Slot::Existing(idx));
                executed_refs.remove(&ref_name);
            }

            let node = workflow.tasks[idx]
                .workflow_task
                .clone()
                .or_else(|| def.node_by_ref(&ref_name).cloned());
            let task_def = resolve_task_def(&workflow.tasks[idx], node.as_ref(), catalog);

            match &task_def {
                Some(task_def) => {
                    check_task_timeout(task_def, &mut workflow.tasks[idx], now)?;
                    if !is_sync_system
                        && self
                            .is_response_timed_out(task_def, &workflow.tasks[idx], now)
                            .await?
                    {
                        timeout_task(task_def, &mut workflow.tasks[idx]);
                    }
                }
                None if !is_system => {
                    tracing::warn!(
                        workflow_id = %workflow.workflow_id,
                        ref_name = %ref_name,
                        task_type = %task_type,
                        "no task definition found, skipping timeout checks"
                    );
                }
                None => {}
            }

            if workflow.tasks[idx].status == TaskStatus::Scheduled && !is_sync_system {
                let task = &workflow.tasks[idx];
                if !self.queue.exists(&task.queue_name(), &task.task_id).await? {
                    requeue.push(idx);
                }
            }

            if !workflow.tasks[idx].status.is_successful() {
                let optional = node.as_ref().is_some_and(|n| n.optional);
                match RetryHandler::evaluate(&workflow.tasks[idx], task_def.as_ref(), optional) {
                    RetryAction::Reschedule { delay_secs } => {
                        let retry = self
                            .retry_task(workflow, idx, node.as_ref(), task_def.as_ref(), delay_secs)
                            .await?;
                        tracing::debug!(
                            workflow_id = %workflow.workflow_id,
                            ref_name = %ref_name,
                            retry_count = retry.retry_count,
                            delay_secs,
                            "rescheduling failed task"
                        );
                        workflow.tasks[idx].retried = true;
                        executed_refs.remove(&ref_name);
                        schedule.put(ref_name.clone(), Slot::New(retry));
                        push_unique(&mut updates, idx);
                    }
                    RetryAction::Skip => {
                        workflow.tasks[idx].set_status(TaskStatus::CompletedWithErrors);
                    }
                    RetryAction::FailWorkflow => {
                        let task = &workflow.tasks[idx];
                        let status = if task.status == TaskStatus::TimedOut {
                            WorkflowStatus::TimedOut
                        } else {
                            WorkflowStatus::Failed
                        };
                        let reason = task.reason_for_incompletion.clone().unwrap_or_else(|| {
                            format!("Task {ref_name} finished with status {}", task.status)
                        });
                        return Err(Halt::Terminal(
                            TerminalSignal::new(status, reason).with_task(task.clone()),
                        ));
                    }
                }
            }

            let task = &mut workflow.tasks[idx];
            if !task.executed && !task.retried && task.status.is_terminal() {
                task.executed = true;
                push_unique(&mut updates, idx);

                if task.task_type == TERMINATE && task.status.is_successful() {
                    let status =
                        TerminateTask::requested_status(task).unwrap_or(WorkflowStatus::Failed);
                    let reason = TerminateTask::reason(task, status);
                    return Err(Halt::Terminal(
                        TerminalSignal::new(status, reason).with_task(task.clone()),
                    ));
                }

                let next = self.next_tasks(workflow, def, idx, catalog).await?;
                tracing::debug!(
                    workflow_id = %workflow.workflow_id,
                    ref_name = %ref_name,
                    next = next.len(),
                    "task processed"
                );
                for task in next {
                    schedule.put_if_absent(task.reference_task_name.clone(), Slot::New(task));
                }
            }
        }

        outcome.tasks_to_schedule = schedule.materialize(workflow, &executed_refs);
        if outcome.tasks_to_schedule.is_empty() && is_complete(workflow, def) {
            tracing::debug!(workflow_id = %workflow.workflow_id, "marking workflow complete");
            outcome.complete = true;
        }
        outcome.tasks_to_update = updates.iter().map(|&i| workflow.tasks[i].clone()).collect();
        outcome.tasks_to_requeue = requeue
            .iter()
            .map(|&i| workflow.tasks[i].clone())
            .filter(|t| t.status == TaskStatus::Scheduled && !t.retried)
            .collect();
        Ok(outcome)
    }

    fn is_sync_system(&self, task_type: &str) -> bool {
        self.system_tasks
            .get(task_type)
            .is_some_and(|task| !task.is_async())
    }

    /// Tasks for the first non-skipped node of the definition.
    async fn start_tasks(
        &self,
        workflow: &Workflow,
        def: &WorkflowDef,
        catalog: &TaskDefCatalog,
    ) -> Result<Vec<Task>, Halt> {
        let Some(first) = def.tasks.first() else {
            return Err(Halt::Terminal(TerminalSignal::new(
                WorkflowStatus::Completed,
                "No tasks found to be executed",
            )));
        };
        let mut node = Some(first);
        while let Some(skipped) = node.filter(|n| is_skipped(workflow, &n.task_reference_name)) {
            node = def.next_node(&skipped.task_reference_name);
        }
        match node {
            Some(node) => self.tasks_to_be_scheduled(workflow, def, node, catalog).await,
            None => Ok(Vec::new()),
        }
    }

    /// Successors of the task at `idx`, skipping SKIPPED references.
    async fn next_tasks(
        &self,
        workflow: &Workflow,
        def: &WorkflowDef,
        idx: usize,
        catalog: &TaskDefCatalog,
    ) -> Result<Vec<Task>, Halt> {
        let task = &workflow.tasks[idx];
        // The selected case's head was expanded together with the decision.
        if task.task_type == DECISION && task.input.contains_key(HAS_CHILDREN) {
            return Ok(Vec::new());
        }
        match next_unskipped(workflow, def, &task.reference_task_name) {
            Some(node) => self.tasks_to_be_scheduled(workflow, def, node, catalog).await,
            None => Ok(Vec::new()),
        }
    }

    /// Expand `node` against a populated copy of `workflow`.
    ///
    /// Tasks whose reference is already IN_PROGRESS or terminal in the
    /// instance are dropped, so re-expansion never duplicates live work.
    async fn tasks_to_be_scheduled(
        &self,
        workflow: &Workflow,
        def: &WorkflowDef,
        node: &WorkflowTask,
        catalog: &TaskDefCatalog,
    ) -> Result<Vec<Task>, Halt> {
        let populated = self.payloads.populate(workflow).await?;
        let taken: HashSet<&str> = workflow
            .tasks
            .iter()
            .filter(|t| t.status == TaskStatus::InProgress || t.status.is_terminal())
            .map(|t| t.reference_task_name.as_str())
            .collect();

        let mapped = self
            .expander
            .expand(def, &populated, node, 0, None, catalog)
            .map_err(|e| Halt::Terminal(TerminalSignal::new(WorkflowStatus::Failed, e.to_string())))?;

        let mut tasks = Vec::with_capacity(mapped.len());
        for mut task in mapped
            .into_iter()
            .filter(|t| !taken.contains(t.reference_task_name.as_str()))
        {
            self.payloads.externalize_task_input(&mut task).await?;
            tasks.push(task);
        }
        Ok(tasks)
    }

    /// Next attempt of the task at `idx`, with input re-resolved against the
    /// current instance state.
    async fn retry_task(
        &self,
        workflow: &Workflow,
        idx: usize,
        node: Option<&WorkflowTask>,
        task_def: Option<&TaskDef>,
        delay_secs: u64,
    ) -> Result<Task, Halt> {
        let populated = self.payloads.populate(workflow).await?;
        let mut retry = RetryHandler::rescheduled(&populated.tasks[idx], delay_secs);
        retry.external_input_path = None;
        if let Some(node) = node {
            let resolved = parameters::resolve_task_input(&node.input_parameters, &populated, task_def);
            retry.input.extend(resolved);
        }
        self.payloads.externalize_task_input(&mut retry).await?;
        Ok(retry)
    }

    async fn is_response_timed_out(
        &self,
        task_def: &TaskDef,
        task: &Task,
        now: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        if task.status != TaskStatus::InProgress || task_def.response_timeout_seconds == 0 {
            return Ok(false);
        }
        // Queued means postponed by its worker, not abandoned.
        if self.queue.exists(&task.queue_name(), &task.task_id).await? {
            return Ok(false);
        }
        let Some(last_update) = task.update_time.or(task.start_time).or(task.scheduled_time) else {
            return Ok(false);
        };
        Ok((now - last_update).num_milliseconds() >= secs_to_ms(task_def.response_timeout_seconds))
    }

    /// Set the workflow output from the definition's `output_parameters`,
    /// else from the output of `task` (or the last task), then offload it
    /// when oversized.
    pub async fn update_workflow_output(
        &self,
        workflow: &mut Workflow,
        def: &WorkflowDef,
        task: Option<&Task>,
    ) -> Result<(), RepositoryError> {
        let Some(last) = task.or(workflow.tasks.last()).cloned() else {
            return Ok(());
        };
        let output = if !def.output_parameters.is_empty() {
            let populated = self.payloads.populate(workflow).await?;
            parameters::resolve_payload(&def.output_parameters, &parameters::build_context(&populated))
        } else if let Some(path) = &last.external_output_path {
            self.payloads.download(path).await?
        } else {
            last.output.clone()
        };
        workflow.output = output;
        workflow.external_output_path = None;
        self.payloads.externalize_workflow_output(workflow).await
    }
}

// ---------------------------------------------------------------------------
// Rules
// ---------------------------------------------------------------------------

fn secs_to_ms(secs: u64) -> i64 {
    i64::try_from(secs).unwrap_or(i64::MAX).saturating_mul(1000)
}

/// Policy for a task: its own snapshot, the definition node, then the catalog.
fn resolve_task_def(
    task: &Task,
    node: Option<&WorkflowTask>,
    catalog: &TaskDefCatalog,
) -> Option<TaskDef> {
    task.task_definition()
        .or_else(|| node.and_then(|n| catalog.resolve(n)))
        .or_else(|| catalog.get(&task.task_def_name))
        .cloned()
}

fn is_skipped(workflow: &Workflow, ref_name: &str) -> bool {
    workflow
        .task_by_ref(ref_name)
        .is_some_and(|t| t.status == TaskStatus::Skipped)
}

/// The definition node after `ref_name`, passing over skipped references.
fn next_unskipped<'a>(
    workflow: &Workflow,
    def: &'a WorkflowDef,
    ref_name: &str,
) -> Option<&'a WorkflowTask> {
    let mut node = def.next_node(ref_name);
    while let Some(skipped) = node.filter(|n| is_skipped(workflow, &n.task_reference_name)) {
        node = def.next_node(&skipped.task_reference_name);
    }
    node
}

/// Apply the hard timeout of an IN_PROGRESS task.
///
/// The clock starts at `start_time` plus the task's start delay.
fn check_task_timeout(task_def: &TaskDef, task: &mut Task, now: DateTime<Utc>) -> Result<(), Halt> {
    if task.status != TaskStatus::InProgress || task_def.timeout_seconds == 0 {
        return Ok(());
    }
    let Some(start) = task.start_time else {
        return Ok(());
    };
    let elapsed_ms = (now - start).num_milliseconds() - secs_to_ms(task.start_delay_secs);
    let timeout_ms = secs_to_ms(task_def.timeout_seconds);
    if elapsed_ms < timeout_ms {
        return Ok(());
    }

    let reason = format!(
        "Task timed out after {elapsed_ms} millisecond. Timeout configured as {timeout_ms}"
    );
    match task_def.timeout_policy {
        TimeoutPolicy::AlertOnly => {
            tracing::warn!(
                task_id = %task.task_id,
                ref_name = %task.reference_task_name,
                elapsed_ms,
                "task exceeded its timeout (alert only)"
            );
            Ok(())
        }
        TimeoutPolicy::Retry => {
            task.set_status(TaskStatus::TimedOut);
            task.reason_for_incompletion = Some(reason);
            Ok(())
        }
        TimeoutPolicy::TimeOutWf => {
            task.set_status(TaskStatus::TimedOut);
            task.reason_for_incompletion = Some(reason.clone());
            Err(Halt::Terminal(
                TerminalSignal::new(WorkflowStatus::TimedOut, reason).with_task(task.clone()),
            ))
        }
    }
}

fn timeout_task(task_def: &TaskDef, task: &mut Task) {
    let reason = format!(
        "responseTimeout: {} exceeded for the taskId: {} with Task Status: {}",
        task_def.response_timeout_seconds, task.task_id, task.status
    );
    tracing::debug!(task_id = %task.task_id, "task response timed out");
    task.set_status(TaskStatus::TimedOut);
    task.reason_for_incompletion = Some(reason);
}

/// Completion rule.
///
/// Every top-level node has a successful terminal task, every task is
/// terminal, and no task's successor is missing from the instance.
pub fn is_complete(workflow: &Workflow, def: &WorkflowDef) -> bool {
    if workflow.tasks.is_empty() {
        return false;
    }
    let mut statuses: HashMap<&str, TaskStatus> = HashMap::new();
    for task in &workflow.tasks {
        statuses.insert(task.reference_task_name.as_str(), task.status);
    }

    let all_nodes_done = def.tasks.iter().all(|node| {
        statuses
            .get(node.task_reference_name.as_str())
            .is_some_and(|s| s.is_terminal() && s.is_successful())
    });
    let nothing_pending = statuses.values().all(|s| s.is_terminal());
    let nothing_unscheduled = workflow.tasks.iter().all(|task| {
        next_unskipped(workflow, def, &task.reference_task_name)
            .is_none_or(|next| statuses.contains_key(next.task_reference_name.as_str()))
    });
    all_nodes_done && nothing_pending && nothing_unscheduled
}

/// Task ids of `tasks`, for log fields.
pub fn task_ids(tasks: &[Task]) -> Vec<Uuid> {
    tasks.iter().map(|t| t.task_id).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::test_support::{BlobMap, FlatQueue};
    use crate::workflow::mapper::test_support::{catalog, simple, workflow};
    use baton_types::config::EngineConfig;
    use baton_types::definition::{NodeKind, RetryLogic};
    use baton_types::task::{FORK, JOIN};
    use chrono::Duration;
    use serde_json::json;

    fn decider() -> (Arc<FlatQueue>, Decider<FlatQueue, BlobMap>) {
        let queue = Arc::new(FlatQueue::default());
        let payloads = Arc::new(PayloadUtils::new(
            Arc::new(BlobMap::default()),
            &EngineConfig::default(),
        ));
        let decider = Decider::new(
            queue.clone(),
            payloads,
            Arc::new(TaskExpander::with_defaults()),
            Arc::new(SystemTaskRegistry::with_defaults()),
        );
        (queue, decider)
    }

    fn linear() -> WorkflowDef {
        WorkflowDef::new("media", 1, vec![simple("t0_ref"), simple("t1_ref")])
    }

    async fn outcome(
        decider: &Decider<FlatQueue, BlobMap>,
        wf: &mut Workflow,
        def: &WorkflowDef,
        catalog: &TaskDefCatalog,
    ) -> DeciderOutcome {
        match decider.decide(wf, def, catalog).await.unwrap() {
            Decision::Continue(outcome) => outcome,
            Decision::Terminal(signal) => panic!("unexpected terminal signal: {signal:?}"),
        }
    }

    async fn signal(
        decider: &Decider<FlatQueue, BlobMap>,
        wf: &mut Workflow,
        def: &WorkflowDef,
        catalog: &TaskDefCatalog,
    ) -> TerminalSignal {
        match decider.decide(wf, def, catalog).await.unwrap() {
            Decision::Terminal(signal) => signal,
            Decision::Continue(outcome) => panic!("expected terminal signal, got {outcome:?}"),
        }
    }

    /// Apply scheduled tasks the way the executor does: assign seq, append.
    fn apply(wf: &mut Workflow, mut tasks: Vec<Task>) -> Vec<Uuid> {
        let mut seq = wf.max_seq();
        let mut ids = Vec::new();
        for task in &mut tasks {
            if task.seq == 0 {
                seq += 1;
                task.seq = seq;
            }
            ids.push(task.task_id);
        }
        for task in tasks {
            match wf.tasks.iter_mut().find(|t| t.task_id == task.task_id) {
                Some(existing) => *existing = task,
                None => wf.tasks.push(task),
            }
        }
        ids
    }

    fn finish(wf: &mut Workflow, ref_name: &str, status: TaskStatus) {
        let task = wf
            .tasks
            .iter_mut()
            .rev()
            .find(|t| t.reference_task_name == ref_name)
            .unwrap();
        task.set_status(status);
    }

    #[tokio::test]
    async fn test_linear_workflow_runs_to_completion() {
        let (_queue, decider) = decider();
        let def = linear();
        let catalog = catalog(&["t0", "t1"]);
        let mut wf = workflow(&def);

        let first = outcome(&decider, &mut wf, &def, &catalog).await;
        assert_eq!(first.tasks_to_schedule.len(), 1);
        assert_eq!(first.tasks_to_schedule[0].reference_task_name, "t0_ref");
        assert!(!first.complete);
        apply(&mut wf, first.tasks_to_schedule);

        finish(&mut wf, "t0_ref", TaskStatus::Completed);
        let second = outcome(&decider, &mut wf, &def, &catalog).await;
        assert_eq!(second.tasks_to_schedule.len(), 1);
        assert_eq!(second.tasks_to_schedule[0].reference_task_name, "t1_ref");
        assert_eq!(second.tasks_to_update.len(), 1);
        assert!(second.tasks_to_update[0].executed);
        apply(&mut wf, second.tasks_to_schedule);

        finish(&mut wf, "t1_ref", TaskStatus::Completed);
        let third = outcome(&decider, &mut wf, &def, &catalog).await;
        assert!(third.tasks_to_schedule.is_empty());
        assert!(third.complete);
    }

    #[tokio::test]
    async fn test_unchanged_state_decides_nothing() {
        let (queue, decider) = decider();
        let def = linear();
        let catalog = catalog(&["t0", "t1"]);
        let mut wf = workflow(&def);

        let first = outcome(&decider, &mut wf, &def, &catalog).await;
        let ids = apply(&mut wf, first.tasks_to_schedule);
        queue.push("t0", &ids[0], 0).await.unwrap();

        let again = outcome(&decider, &mut wf, &def, &catalog).await;
        assert!(again.tasks_to_schedule.is_empty());
        assert!(again.tasks_to_update.is_empty());
        assert!(again.tasks_to_requeue.is_empty());
        assert!(!again.complete);
    }

    #[tokio::test]
    async fn test_scheduled_task_missing_from_queue_is_requeued() {
        let (_queue, decider) = decider();
        let def = linear();
        let catalog = catalog(&["t0", "t1"]);
        let mut wf = workflow(&def);

        let first = outcome(&decider, &mut wf, &def, &catalog).await;
        let ids = apply(&mut wf, first.tasks_to_schedule);
        let again = outcome(&decider, &mut wf, &def, &catalog).await;
        assert_eq!(task_ids(&again.tasks_to_requeue), ids);
    }

    #[tokio::test]
    async fn test_fixed_retry_then_fail() {
        let (_queue, decider) = decider();
        let def = WorkflowDef::new("media", 1, vec![simple("t0_ref")]);
        let mut policy = TaskDef::new("t0");
        policy.retry_count = 1;
        policy.retry_delay_seconds = 10;
        policy.retry_logic = RetryLogic::Fixed;
        let catalog = TaskDefCatalog::new(vec![policy]);
        let mut wf = workflow(&def);

        let first = outcome(&decider, &mut wf, &def, &catalog).await;
        let original = apply(&mut wf, first.tasks_to_schedule)[0];
        finish(&mut wf, "t0_ref", TaskStatus::Failed);

        let retried = outcome(&decider, &mut wf, &def, &catalog).await;
        assert_eq!(retried.tasks_to_schedule.len(), 1);
        let clone = &retried.tasks_to_schedule[0];
        assert_eq!(clone.retry_count, 1);
        assert_eq!(clone.start_delay_secs, 10);
        assert_eq!(clone.callback_after_secs, 10);
        assert_eq!(clone.retried_task_id, Some(original));
        assert_eq!(clone.status, TaskStatus::Scheduled);
        assert_eq!(task_ids(&retried.tasks_to_update), vec![original]);
        assert!(retried.tasks_to_update[0].retried);
        apply(&mut wf, retried.tasks_to_schedule);

        finish(&mut wf, "t0_ref", TaskStatus::Failed);
        let failed = signal(&decider, &mut wf, &def, &catalog).await;
        assert_eq!(failed.status, WorkflowStatus::Failed);
        assert_eq!(failed.task.unwrap().retry_count, 1);
    }

    #[tokio::test]
    async fn test_canceled_task_fails_workflow() {
        let (_queue, decider) = decider();
        let def = WorkflowDef::new("media", 1, vec![simple("t0_ref")]);
        let mut policy = TaskDef::new("t0");
        policy.retry_count = 3;
        let catalog = TaskDefCatalog::new(vec![policy]);
        let mut wf = workflow(&def);

        let first = outcome(&decider, &mut wf, &def, &catalog).await;
        apply(&mut wf, first.tasks_to_schedule);
        finish(&mut wf, "t0_ref", TaskStatus::Canceled);

        let failed = signal(&decider, &mut wf, &def, &catalog).await;
        assert_eq!(failed.status, WorkflowStatus::Failed);
        assert_eq!(failed.task.unwrap().status, TaskStatus::Canceled);
    }

    #[tokio::test]
    async fn test_retry_reresolves_input() {
        let (_queue, decider) = decider();
        let mut node = simple("t0_ref");
        node.input_parameters = json!({ "src": "${workflow.input.file}" }).as_object().cloned().unwrap();
        let def = WorkflowDef::new("media", 1, vec![node]);
        let catalog = catalog(&["t0"]);
        let mut wf = workflow(&def);

        let first = outcome(&decider, &mut wf, &def, &catalog).await;
        apply(&mut wf, first.tasks_to_schedule);
        finish(&mut wf, "t0_ref", TaskStatus::Failed);
        wf.input.insert("file".to_string(), json!("b.mp4"));

        let retried = outcome(&decider, &mut wf, &def, &catalog).await;
        assert_eq!(retried.tasks_to_schedule[0].input["src"], json!("b.mp4"));
    }

    #[tokio::test]
    async fn test_optional_task_failure_continues() {
        let (_queue, decider) = decider();
        let mut optional = simple("t0_ref");
        optional.optional = true;
        let def = WorkflowDef::new("media", 1, vec![optional, simple("t1_ref")]);
        let mut policy = TaskDef::new("t0");
        policy.retry_count = 0;
        let catalog = TaskDefCatalog::new(vec![policy, TaskDef::new("t1")]);
        let mut wf = workflow(&def);

        let first = outcome(&decider, &mut wf, &def, &catalog).await;
        apply(&mut wf, first.tasks_to_schedule);
        finish(&mut wf, "t0_ref", TaskStatus::Failed);

        let next = outcome(&decider, &mut wf, &def, &catalog).await;
        assert_eq!(next.tasks_to_update[0].status, TaskStatus::CompletedWithErrors);
        assert_eq!(next.tasks_to_schedule[0].reference_task_name, "t1_ref");
    }

    #[tokio::test]
    async fn test_response_timeout_marks_timed_out() {
        let (_queue, decider) = decider();
        let def = WorkflowDef::new("media", 1, vec![simple("t0_ref")]);
        let mut policy = TaskDef::new("t0");
        policy.response_timeout_seconds = 5;
        policy.retry_count = 1;
        let catalog = TaskDefCatalog::new(vec![policy]);
        let mut wf = workflow(&def);

        let first = outcome(&decider, &mut wf, &def, &catalog).await;
        apply(&mut wf, first.tasks_to_schedule);
        let task = &mut wf.tasks[0];
        task.status = TaskStatus::InProgress;
        task.start_time = Some(Utc::now() - Duration::seconds(10));
        task.update_time = Some(Utc::now() - Duration::seconds(10));

        let next = outcome(&decider, &mut wf, &def, &catalog).await;
        assert_eq!(wf.tasks[0].status, TaskStatus::TimedOut);
        assert!(
            wf.tasks[0]
                .reason_for_incompletion
                .as_deref()
                .unwrap()
                .starts_with("responseTimeout: 5 exceeded")
        );
        assert_eq!(next.tasks_to_schedule[0].retry_count, 1);
    }

    #[tokio::test]
    async fn test_response_timeout_ignored_while_queued() {
        let (queue, decider) = decider();
        let def = WorkflowDef::new("media", 1, vec![simple("t0_ref")]);
        let mut policy = TaskDef::new("t0");
        policy.response_timeout_seconds = 5;
        let catalog = TaskDefCatalog::new(vec![policy]);
        let mut wf = workflow(&def);

        let first = outcome(&decider, &mut wf, &def, &catalog).await;
        let ids = apply(&mut wf, first.tasks_to_schedule);
        queue.push("t0", &ids[0], 30).await.unwrap();
        let task = &mut wf.tasks[0];
        task.status = TaskStatus::InProgress;
        task.update_time = Some(Utc::now() - Duration::seconds(10));

        outcome(&decider, &mut wf, &def, &catalog).await;
        assert_eq!(wf.tasks[0].status, TaskStatus::InProgress);
    }

    #[tokio::test]
    async fn test_time_out_wf_policy_terminates() {
        let (_queue, decider) = decider();
        let def = linear();
        let mut policy = TaskDef::new("t0");
        policy.timeout_seconds = 1;
        policy.timeout_policy = TimeoutPolicy::TimeOutWf;
        let catalog = TaskDefCatalog::new(vec![policy, TaskDef::new("t1")]);
        let mut wf = workflow(&def);

        let first = outcome(&decider, &mut wf, &def, &catalog).await;
        apply(&mut wf, first.tasks_to_schedule);
        wf.tasks[0].status = TaskStatus::InProgress;
        wf.tasks[0].start_time = Some(Utc::now() - Duration::seconds(5));

        let timed_out = signal(&decider, &mut wf, &def, &catalog).await;
        assert_eq!(timed_out.status, WorkflowStatus::TimedOut);
        assert_eq!(timed_out.task.unwrap().status, TaskStatus::TimedOut);
    }

    #[tokio::test]
    async fn test_alert_only_timeout_changes_nothing() {
        let (queue, decider) = decider();
        let def = linear();
        let mut policy = TaskDef::new("t0");
        policy.timeout_seconds = 1;
        policy.timeout_policy = TimeoutPolicy::AlertOnly;
        let catalog = TaskDefCatalog::new(vec![policy, TaskDef::new("t1")]);
        let mut wf = workflow(&def);

        let first = outcome(&decider, &mut wf, &def, &catalog).await;
        let ids = apply(&mut wf, first.tasks_to_schedule);
        queue.push("t0", &ids[0], 0).await.unwrap();
        wf.tasks[0].status = TaskStatus::InProgress;
        wf.tasks[0].start_time = Some(Utc::now() - Duration::seconds(5));

        let next = outcome(&decider, &mut wf, &def, &catalog).await;
        assert_eq!(wf.tasks[0].status, TaskStatus::InProgress);
        assert!(next.tasks_to_update.is_empty());
    }

    #[tokio::test]
    async fn test_paused_and_terminal_workflows_yield_nothing() {
        let (_queue, decider) = decider();
        let def = linear();
        let catalog = catalog(&["t0", "t1"]);
        let mut wf = workflow(&def);
        wf.status = WorkflowStatus::Paused;
        let paused = outcome(&decider, &mut wf, &def, &catalog).await;
        assert!(paused.tasks_to_schedule.is_empty() && !paused.complete);

        wf.status = WorkflowStatus::Failed;
        let failed = outcome(&decider, &mut wf, &def, &catalog).await;
        assert!(failed.tasks_to_schedule.is_empty() && !failed.complete);
    }

    #[tokio::test]
    async fn test_empty_definition_completes() {
        let (_queue, decider) = decider();
        let def = WorkflowDef::new("noop", 1, vec![]);
        let mut wf = workflow(&def);
        let done = signal(&decider, &mut wf, &def, &TaskDefCatalog::default()).await;
        assert_eq!(done.status, WorkflowStatus::Completed);
        assert_eq!(done.reason, "No tasks found to be executed");
    }

    #[tokio::test]
    async fn test_skipped_first_node_starts_with_successor() {
        let (_queue, decider) = decider();
        let def = linear();
        let catalog = catalog(&["t0", "t1"]);
        let mut wf = workflow(&def);
        let mut skipped = Task::new(Uuid::now_v7(), wf.workflow_id, "media", "t0_ref", "t0", TaskStatus::Skipped);
        skipped.seq = 1;
        wf.tasks.push(skipped);

        let first = outcome(&decider, &mut wf, &def, &catalog).await;
        assert_eq!(first.tasks_to_schedule.len(), 1);
        assert_eq!(first.tasks_to_schedule[0].reference_task_name, "t1_ref");
    }

    #[tokio::test]
    async fn test_fork_schedules_branches_then_join() {
        let (_queue, decider) = decider();
        let def = WorkflowDef::new(
            "fanout",
            1,
            vec![
                WorkflowTask::new(
                    "fork",
                    "fork_ref",
                    NodeKind::ForkJoin {
                        fork_tasks: vec![vec![simple("a_ref")], vec![simple("b_ref")]],
                    },
                ),
                WorkflowTask::new(
                    "join",
                    "join_ref",
                    NodeKind::Join {
                        join_on: vec!["a_ref".into(), "b_ref".into()],
                    },
                ),
            ],
        );
        let catalog = catalog(&["a", "b"]);
        let mut wf = workflow(&def);

        let first = outcome(&decider, &mut wf, &def, &catalog).await;
        let refs: Vec<_> = first.tasks_to_schedule.iter().map(|t| t.reference_task_name.as_str()).collect();
        assert_eq!(refs, vec!["fork_ref", "a_ref", "b_ref"]);
        assert_eq!(first.tasks_to_schedule[0].task_type, FORK);
        apply(&mut wf, first.tasks_to_schedule);

        let second = outcome(&decider, &mut wf, &def, &catalog).await;
        assert_eq!(second.tasks_to_schedule.len(), 1);
        assert_eq!(second.tasks_to_schedule[0].task_type, JOIN);
        apply(&mut wf, second.tasks_to_schedule);

        // The join is re-offered while live, never duplicated.
        finish(&mut wf, "a_ref", TaskStatus::Completed);
        let third = outcome(&decider, &mut wf, &def, &catalog).await;
        let joins: Vec<_> = third.tasks_to_schedule.iter().filter(|t| t.task_type == JOIN).collect();
        assert_eq!(joins.len(), 1);
        assert_eq!(joins[0].task_id, wf.task_by_ref("join_ref").unwrap().task_id);
    }

    #[tokio::test]
    async fn test_completed_terminate_task_raises_requested_status() {
        let (_queue, decider) = decider();
        let mut terminate = WorkflowTask::new("terminate", "stop_ref", NodeKind::Terminate);
        terminate.input_parameters = json!({ "termination_status": "failed" }).as_object().cloned().unwrap();
        let def = WorkflowDef::new("media", 1, vec![terminate, simple("t1_ref")]);
        let catalog = catalog(&["t1"]);
        let mut wf = workflow(&def);

        let first = outcome(&decider, &mut wf, &def, &catalog).await;
        apply(&mut wf, first.tasks_to_schedule);
        finish(&mut wf, "stop_ref", TaskStatus::Completed);

        let stop = signal(&decider, &mut wf, &def, &catalog).await;
        assert_eq!(stop.status, WorkflowStatus::Failed);
        assert_eq!(stop.reason, "Workflow is FAILED by TERMINATE task: stop_ref");
    }

    #[tokio::test]
    async fn test_missing_task_def_fails_expansion() {
        let (_queue, decider) = decider();
        let def = linear();
        let mut wf = workflow(&def);
        let failed = signal(&decider, &mut wf, &def, &TaskDefCatalog::default()).await;
        assert_eq!(failed.status, WorkflowStatus::Failed);
        assert!(failed.reason.contains("t0"));
    }

    #[test]
    fn test_completion_requires_successors_scheduled() {
        let def = linear();
        let mut wf = workflow(&def);
        let mut t0 = Task::new(Uuid::now_v7(), wf.workflow_id, "media", "t0_ref", "t0", TaskStatus::Completed);
        t0.seq = 1;
        wf.tasks.push(t0);
        assert!(!is_complete(&wf, &def));

        let mut t1 = Task::new(Uuid::now_v7(), wf.workflow_id, "media", "t1_ref", "t1", TaskStatus::CompletedWithErrors);
        t1.seq = 2;
        wf.tasks.push(t1);
        assert!(is_complete(&wf, &def));

        wf.tasks[1].status = TaskStatus::Failed;
        assert!(!is_complete(&wf, &def));
    }

    #[tokio::test]
    async fn test_workflow_output_prefers_output_parameters() {
        let (_queue, decider) = decider();
        let mut def = linear();
        def.output_parameters = json!({ "url": "${t1_ref.output.url}" }).as_object().cloned().unwrap();
        let mut wf = workflow(&def);
        let mut t1 = Task::new(Uuid::now_v7(), wf.workflow_id, "media", "t1_ref", "t1", TaskStatus::Completed);
        t1.output.insert("url".to_string(), json!("s3://out"));
        t1.output.insert("extra".to_string(), json!(1));
        wf.tasks.push(t1);

        decider.update_workflow_output(&mut wf, &def, None).await.unwrap();
        assert_eq!(wf.output, json!({ "url": "s3://out" }).as_object().cloned().unwrap());

        def.output_parameters.clear();
        decider.update_workflow_output(&mut wf, &def, None).await.unwrap();
        assert_eq!(wf.output["extra"], json!(1));
    }
}
