//! Workflow instance types.

use std::collections::{BTreeSet, HashMap};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::Payload;
use crate::task::Task;

/// Lifecycle status of a workflow instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkflowStatus {
    Running,
    Paused,
    Completed,
    Failed,
    Terminated,
    TimedOut,
}

impl WorkflowStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            WorkflowStatus::Completed
                | WorkflowStatus::Failed
                | WorkflowStatus::Terminated
                | WorkflowStatus::TimedOut
        )
    }

    pub fn is_successful(self) -> bool {
        matches!(self, WorkflowStatus::Paused | WorkflowStatus::Completed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            WorkflowStatus::Running => "RUNNING",
            WorkflowStatus::Paused => "PAUSED",
            WorkflowStatus::Completed => "COMPLETED",
            WorkflowStatus::Failed => "FAILED",
            WorkflowStatus::Terminated => "TERMINATED",
            WorkflowStatus::TimedOut => "TIMED_OUT",
        }
    }
}

impl fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A running (or finished) execution of a workflow definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workflow {
    pub workflow_id: Uuid,
    /// Name of the workflow definition.
    pub workflow_type: String,
    pub version: u32,
    pub status: WorkflowStatus,
    /// Task instances ordered by `seq`. Only populated when loaded with tasks.
    #[serde(default)]
    pub tasks: Vec<Task>,
    #[serde(default)]
    pub input: Payload,
    #[serde(default)]
    pub output: Payload,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_input_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_output_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_workflow_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_workflow_task_id: Option<Uuid>,
    /// Per-task-type domain routing; the key `*` applies to every type.
    #[serde(default)]
    pub task_to_domain: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason_for_incompletion: Option<String>,
    #[serde(default)]
    pub failed_reference_task_names: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event: Option<String>,
    pub create_time: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
}

impl Workflow {
    /// Create a new RUNNING instance with no tasks.
    pub fn new(
        workflow_id: Uuid,
        workflow_type: impl Into<String>,
        version: u32,
        input: Payload,
    ) -> Self {
        Self {
            workflow_id,
            workflow_type: workflow_type.into(),
            version,
            status: WorkflowStatus::Running,
            tasks: Vec::new(),
            input,
            output: Payload::new(),
            external_input_path: None,
            external_output_path: None,
            correlation_id: None,
            parent_workflow_id: None,
            parent_workflow_task_id: None,
            task_to_domain: HashMap::new(),
            reason_for_incompletion: None,
            failed_reference_task_names: BTreeSet::new(),
            event: None,
            create_time: Utc::now(),
            update_time: None,
            end_time: None,
        }
    }

    /// Latest task instance carrying the given reference name.
    ///
    /// When a reference has been retried, the most recent instance (highest
    /// `seq`, or the last appended when `seq` is unassigned) wins.
    pub fn task_by_ref(&self, ref_name: &str) -> Option<&Task> {
        self.tasks
            .iter()
            .filter(|t| t.reference_task_name == ref_name)
            .max_by(|a, b| match (a.seq, b.seq) {
                (0, 0) => std::cmp::Ordering::Less,
                (0, _) => std::cmp::Ordering::Greater,
                (_, 0) => std::cmp::Ordering::Less,
                (x, y) => x.cmp(&y),
            })
    }

    pub fn task_by_id(&self, task_id: &Uuid) -> Option<&Task> {
        self.tasks.iter().find(|t| t.task_id == *task_id)
    }

    /// Highest `seq` assigned so far (0 when nothing has been scheduled).
    pub fn max_seq(&self) -> u32 {
        self.tasks.iter().map(|t| t.seq).max().unwrap_or(0)
    }

    /// Set a new status, stamping `end_time` on transition to terminal.
    pub fn set_status(&mut self, status: WorkflowStatus) {
        self.status = status;
        if status.is_terminal() {
            self.end_time = Some(Utc::now());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::TaskStatus;

    fn task(wf: &Workflow, ref_name: &str, seq: u32, status: TaskStatus) -> Task {
        let mut t = Task::new(
            Uuid::now_v7(),
            wf.workflow_id,
            &wf.workflow_type,
            ref_name,
            "encode",
            status,
        );
        t.seq = seq;
        t
    }

    #[test]
    fn test_status_predicates() {
        assert!(!WorkflowStatus::Running.is_terminal());
        assert!(!WorkflowStatus::Paused.is_terminal());
        assert!(WorkflowStatus::Paused.is_successful());
        assert!(WorkflowStatus::Completed.is_terminal());
        assert!(WorkflowStatus::TimedOut.is_terminal());
        assert!(!WorkflowStatus::Terminated.is_successful());
    }

    #[test]
    fn test_task_by_ref_prefers_latest_instance() {
        let mut wf = Workflow::new(Uuid::now_v7(), "media", 1, Payload::new());
        let first = task(&wf, "encode_ref", 1, TaskStatus::Failed);
        let retry = task(&wf, "encode_ref", 2, TaskStatus::Scheduled);
        let retry_id = retry.task_id;
        wf.tasks = vec![first, retry];

        assert_eq!(wf.task_by_ref("encode_ref").unwrap().task_id, retry_id);
        assert!(wf.task_by_ref("missing").is_none());
        assert_eq!(wf.max_seq(), 2);
    }

    #[test]
    fn test_task_by_ref_unassigned_seq_is_newest() {
        let mut wf = Workflow::new(Uuid::now_v7(), "media", 1, Payload::new());
        let first = task(&wf, "encode_ref", 3, TaskStatus::Failed);
        let pending = task(&wf, "encode_ref", 0, TaskStatus::Scheduled);
        let pending_id = pending.task_id;
        wf.tasks = vec![first, pending];

        assert_eq!(wf.task_by_ref("encode_ref").unwrap().task_id, pending_id);
    }
}
