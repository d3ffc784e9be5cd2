//! Control-flow system tasks: decisions, forks, joins, waits and
//! terminations. All run inline.

use baton_types::error::ApplicationError;
use baton_types::task::{
    DECISION, EXCLUSIVE_JOIN, FORK, JOIN, TERMINATE, Task, TaskStatus, WAIT,
};
use baton_types::workflow::{Workflow, WorkflowStatus};
use futures_util::future::BoxFuture;
use serde_json::Value;

use super::SystemTask;
use crate::workflow::control::WorkflowControl;
use crate::workflow::mapper::{
    DEFAULT_EXCLUSIVE_JOIN_TASK, JOIN_ON, TERMINATION_REASON, TERMINATION_STATUS, WORKFLOW_OUTPUT,
};

fn string_list(task: &Task, key: &str) -> Vec<String> {
    match task.input.get(key) {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|v| v.as_str().map(String::from))
            .collect(),
        _ => Vec::new(),
    }
}

// ---------------------------------------------------------------------------
// Decision / Fork
// ---------------------------------------------------------------------------

/// Completes as soon as it is re-offered; its case was chosen at expansion.
pub struct DecisionTask;

impl SystemTask for DecisionTask {
    fn task_type(&self) -> &'static str {
        DECISION
    }

    fn execute<'a>(
        &'a self,
        _workflow: &'a Workflow,
        task: &'a mut Task,
        _control: &'a dyn WorkflowControl,
    ) -> BoxFuture<'a, Result<bool, ApplicationError>> {
        Box::pin(async move {
            task.set_status(TaskStatus::Completed);
            Ok(true)
        })
    }
}

/// Created COMPLETED by the fork mappers; nothing left to run.
pub struct ForkTask;

impl SystemTask for ForkTask {
    fn task_type(&self) -> &'static str {
        FORK
    }
}

// ---------------------------------------------------------------------------
// Joins
// ---------------------------------------------------------------------------

/// Waits until every joined reference is terminal.
///
/// Completes with each joined task's output keyed by reference, or fails on
/// the first non-optional joined task that did not succeed.
pub struct JoinTask;

impl JoinTask {
    fn evaluate(workflow: &Workflow, task: &mut Task) -> bool {
        let mut all_done = true;
        let mut failures = Vec::new();
        for join_ref in string_list(task, JOIN_ON) {
            let Some(joined) = workflow.task_by_ref(&join_ref) else {
                all_done = false;
                break;
            };
            let optional = joined.workflow_task.as_ref().is_some_and(|n| n.optional);
            let failed = !joined.status.is_successful() && !optional;
            if failed {
                failures.push(joined.reason_for_incompletion.clone().unwrap_or_default());
            }
            task.output
                .insert(join_ref.clone(), Value::Object(joined.output.clone()));
            if !joined.status.is_terminal() {
                all_done = false;
            }
            if failed {
                break;
            }
        }

        if !failures.is_empty() {
            task.reason_for_incompletion = Some(failures.join(" "));
            task.set_status(TaskStatus::Failed);
            return true;
        }
        if all_done {
            task.set_status(TaskStatus::Completed);
            return true;
        }
        false
    }
}

impl SystemTask for JoinTask {
    fn task_type(&self) -> &'static str {
        JOIN
    }

    fn execute<'a>(
        &'a self,
        workflow: &'a Workflow,
        task: &'a mut Task,
        _control: &'a dyn WorkflowControl,
    ) -> BoxFuture<'a, Result<bool, ApplicationError>> {
        Box::pin(async move { Ok(Self::evaluate(workflow, task)) })
    }
}

/// Completes with the output of whichever decision branch ran.
///
/// The first present, non-skipped `join_on` reference decides; when none
/// exists the default references are consulted. With no defaults the join
/// completes immediately.
pub struct ExclusiveJoinTask;

impl ExclusiveJoinTask {
    fn evaluate(workflow: &Workflow, task: &mut Task) -> bool {
        let pick = |refs: Vec<String>| {
            refs.into_iter()
                .filter_map(|r| workflow.task_by_ref(&r))
                .find(|t| t.status != TaskStatus::Skipped)
        };

        let chosen = match pick(string_list(task, JOIN_ON)) {
            Some(t) => Some(t),
            None => {
                let defaults = string_list(task, DEFAULT_EXCLUSIVE_JOIN_TASK);
                if defaults.is_empty() {
                    task.set_status(TaskStatus::Completed);
                    return true;
                }
                pick(defaults)
            }
        };

        let Some(chosen) = chosen else {
            return false;
        };
        if !chosen.status.is_successful() {
            task.reason_for_incompletion = chosen.reason_for_incompletion.clone();
            task.set_status(TaskStatus::Failed);
            return true;
        }
        if chosen.status.is_terminal() {
            task.output = chosen.output.clone();
            task.set_status(TaskStatus::Completed);
            return true;
        }
        false
    }
}

impl SystemTask for ExclusiveJoinTask {
    fn task_type(&self) -> &'static str {
        EXCLUSIVE_JOIN
    }

    fn execute<'a>(
        &'a self,
        workflow: &'a Workflow,
        task: &'a mut Task,
        _control: &'a dyn WorkflowControl,
    ) -> BoxFuture<'a, Result<bool, ApplicationError>> {
        Box::pin(async move { Ok(Self::evaluate(workflow, task)) })
    }
}

// ---------------------------------------------------------------------------
// Wait / Terminate
// ---------------------------------------------------------------------------

/// Stays IN_PROGRESS until an external `update_task` completes it.
pub struct WaitTask;

impl SystemTask for WaitTask {
    fn task_type(&self) -> &'static str {
        WAIT
    }
}

/// Completes on start; the decider then ends the workflow with the
/// requested status.
///
/// Accepted `termination_status` values are `COMPLETED`, `FAILED` and
/// `TERMINATED`. `workflow_output` becomes the task output and thereby the
/// workflow output.
pub struct TerminateTask;

impl TerminateTask {
    /// Workflow status requested by a completed TERMINATE task.
    pub fn requested_status(task: &Task) -> Option<WorkflowStatus> {
        let status = task.input.get(TERMINATION_STATUS)?.as_str()?;
        serde_json::from_value::<WorkflowStatus>(Value::String(status.to_uppercase()))
            .ok()
            .filter(|s| {
                matches!(
                    s,
                    WorkflowStatus::Completed | WorkflowStatus::Failed | WorkflowStatus::Terminated
                )
            })
    }

    /// Reason recorded on the workflow.
    pub fn reason(task: &Task, status: WorkflowStatus) -> String {
        task.input
            .get(TERMINATION_REASON)
            .and_then(Value::as_str)
            .map(String::from)
            .unwrap_or_else(|| {
                format!(
                    "Workflow is {status} by TERMINATE task: {}",
                    task.reference_task_name
                )
            })
    }
}

impl SystemTask for TerminateTask {
    fn task_type(&self) -> &'static str {
        TERMINATE
    }

    fn start<'a>(
        &'a self,
        _workflow: &'a Workflow,
        task: &'a mut Task,
        _control: &'a dyn WorkflowControl,
    ) -> BoxFuture<'a, Result<(), ApplicationError>> {
        Box::pin(async move {
            if Self::requested_status(task).is_none() {
                task.reason_for_incompletion = Some(format!(
                    "'{TERMINATION_STATUS}' must be one of COMPLETED, FAILED or TERMINATED"
                ));
                task.set_status(TaskStatus::Failed);
                return Ok(());
            }
            task.output = match task.input.get(WORKFLOW_OUTPUT) {
                Some(Value::Object(map)) => map.clone(),
                _ => Default::default(),
            };
            task.set_status(TaskStatus::Completed);
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::MockControl;
    use super::*;
    use baton_types::definition::{NodeKind, WorkflowTask};
    use serde_json::json;
    use uuid::Uuid;

    fn task(wf: &Workflow, ref_name: &str, task_type: &str, status: TaskStatus, seq: u32) -> Task {
        let mut t = Task::new(Uuid::now_v7(), wf.workflow_id, "fanout", ref_name, task_type, status);
        t.seq = seq;
        t
    }

    fn join_task(wf: &Workflow, join_on: &[&str]) -> Task {
        let mut t = task(wf, "join_ref", JOIN, TaskStatus::InProgress, 10);
        t.input.insert(JOIN_ON.to_string(), json!(join_on));
        t
    }

    #[tokio::test]
    async fn test_decision_completes_on_execute() {
        let wf = Workflow::new(Uuid::now_v7(), "route", 1, Default::default());
        let mut t = task(&wf, "route_ref", DECISION, TaskStatus::InProgress, 1);
        let changed = DecisionTask.execute(&wf, &mut t, &MockControl::default()).await.unwrap();
        assert!(changed);
        assert_eq!(t.status, TaskStatus::Completed);
    }

    #[tokio::test]
    async fn test_join_waits_for_all_branches() {
        let mut wf = Workflow::new(Uuid::now_v7(), "fanout", 1, Default::default());
        let mut a = task(&wf, "a_ref", "a", TaskStatus::Completed, 2);
        a.output.insert("x".to_string(), json!(1));
        wf.tasks.push(a);
        wf.tasks.push(task(&wf, "b_ref", "b", TaskStatus::InProgress, 3));

        let mut join = join_task(&wf, &["a_ref", "b_ref"]);
        let changed = JoinTask.execute(&wf, &mut join, &MockControl::default()).await.unwrap();
        assert!(!changed);
        assert_eq!(join.status, TaskStatus::InProgress);

        wf.tasks[1].status = TaskStatus::Completed;
        let changed = JoinTask.execute(&wf, &mut join, &MockControl::default()).await.unwrap();
        assert!(changed);
        assert_eq!(join.status, TaskStatus::Completed);
        assert_eq!(join.output["a_ref"], json!({ "x": 1 }));
        assert!(join.output.contains_key("b_ref"));
    }

    #[tokio::test]
    async fn test_join_missing_branch_is_not_done() {
        let mut wf = Workflow::new(Uuid::now_v7(), "fanout", 1, Default::default());
        wf.tasks.push(task(&wf, "a_ref", "a", TaskStatus::Completed, 2));
        let mut join = join_task(&wf, &["a_ref", "b_ref"]);
        assert!(!JoinTask.execute(&wf, &mut join, &MockControl::default()).await.unwrap());
    }

    #[tokio::test]
    async fn test_join_fails_on_failed_branch_unless_optional() {
        let mut wf = Workflow::new(Uuid::now_v7(), "fanout", 1, Default::default());
        let mut a = task(&wf, "a_ref", "a", TaskStatus::Failed, 2);
        a.reason_for_incompletion = Some("disk full".to_string());
        wf.tasks.push(a);
        wf.tasks.push(task(&wf, "b_ref", "b", TaskStatus::Completed, 3));

        let mut join = join_task(&wf, &["a_ref", "b_ref"]);
        assert!(JoinTask.execute(&wf, &mut join, &MockControl::default()).await.unwrap());
        assert_eq!(join.status, TaskStatus::Failed);
        assert_eq!(join.reason_for_incompletion.as_deref(), Some("disk full"));

        let mut node = WorkflowTask::new("a", "a_ref", NodeKind::Simple);
        node.optional = true;
        wf.tasks[0].workflow_task = Some(node);
        let mut join = join_task(&wf, &["a_ref", "b_ref"]);
        assert!(JoinTask.execute(&wf, &mut join, &MockControl::default()).await.unwrap());
        assert_eq!(join.status, TaskStatus::Completed);
    }

    #[tokio::test]
    async fn test_join_sees_latest_retry_attempt() {
        let mut wf = Workflow::new(Uuid::now_v7(), "fanout", 1, Default::default());
        let mut first = task(&wf, "a_ref", "a", TaskStatus::Failed, 2);
        first.retried = true;
        wf.tasks.push(first);
        wf.tasks.push(task(&wf, "a_ref", "a", TaskStatus::Scheduled, 4));
        let mut join = join_task(&wf, &["a_ref"]);
        assert!(!JoinTask.execute(&wf, &mut join, &MockControl::default()).await.unwrap());
        assert_eq!(join.status, TaskStatus::InProgress);
    }

    #[tokio::test]
    async fn test_exclusive_join_takes_branch_output() {
        let mut wf = Workflow::new(Uuid::now_v7(), "route", 1, Default::default());
        let mut hd = task(&wf, "hd_ref", "hd", TaskStatus::Completed, 3);
        hd.output.insert("res".to_string(), json!("1080p"));
        wf.tasks.push(hd);

        let mut xjoin = task(&wf, "xjoin_ref", EXCLUSIVE_JOIN, TaskStatus::InProgress, 4);
        xjoin.input.insert(JOIN_ON.to_string(), json!(["sd_ref", "hd_ref"]));
        assert!(ExclusiveJoinTask.execute(&wf, &mut xjoin, &MockControl::default()).await.unwrap());
        assert_eq!(xjoin.status, TaskStatus::Completed);
        assert_eq!(xjoin.output["res"], json!("1080p"));
    }

    #[tokio::test]
    async fn test_exclusive_join_waits_for_default_branch() {
        let mut wf = Workflow::new(Uuid::now_v7(), "route", 1, Default::default());
        wf.tasks.push(task(&wf, "fallback_ref", "f", TaskStatus::InProgress, 3));
        let mut xjoin = task(&wf, "xjoin_ref", EXCLUSIVE_JOIN, TaskStatus::InProgress, 4);
        xjoin.input.insert(JOIN_ON.to_string(), json!(["hd_ref"]));
        xjoin.input.insert(DEFAULT_EXCLUSIVE_JOIN_TASK.to_string(), json!(["fallback_ref"]));
        assert!(!ExclusiveJoinTask.execute(&wf, &mut xjoin, &MockControl::default()).await.unwrap());

        wf.tasks[0].status = TaskStatus::Failed;
        assert!(ExclusiveJoinTask.execute(&wf, &mut xjoin, &MockControl::default()).await.unwrap());
        assert_eq!(xjoin.status, TaskStatus::Failed);
    }

    #[tokio::test]
    async fn test_wait_never_completes_itself() {
        let wf = Workflow::new(Uuid::now_v7(), "hold", 1, Default::default());
        let mut t = task(&wf, "hold_ref", WAIT, TaskStatus::InProgress, 1);
        assert!(!WaitTask.execute(&wf, &mut t, &MockControl::default()).await.unwrap());
        assert_eq!(t.status, TaskStatus::InProgress);
    }

    #[tokio::test]
    async fn test_terminate_start_copies_output() {
        let wf = Workflow::new(Uuid::now_v7(), "stop", 1, Default::default());
        let mut t = task(&wf, "stop_ref", TERMINATE, TaskStatus::InProgress, 1);
        t.input.insert(TERMINATION_STATUS.to_string(), json!("failed"));
        t.input.insert(WORKFLOW_OUTPUT.to_string(), json!({ "code": 7 }));
        TerminateTask.start(&wf, &mut t, &MockControl::default()).await.unwrap();
        assert_eq!(t.status, TaskStatus::Completed);
        assert_eq!(t.output["code"], json!(7));
        assert_eq!(TerminateTask::requested_status(&t), Some(WorkflowStatus::Failed));
        assert_eq!(
            TerminateTask::reason(&t, WorkflowStatus::Failed),
            "Workflow is FAILED by TERMINATE task: stop_ref"
        );
    }

    #[tokio::test]
    async fn test_terminate_rejects_unknown_status() {
        let wf = Workflow::new(Uuid::now_v7(), "stop", 1, Default::default());
        let mut t = task(&wf, "stop_ref", TERMINATE, TaskStatus::InProgress, 1);
        t.input.insert(TERMINATION_STATUS.to_string(), json!("PAUSED"));
        TerminateTask.start(&wf, &mut t, &MockControl::default()).await.unwrap();
        assert_eq!(t.status, TaskStatus::Failed);
    }
}
