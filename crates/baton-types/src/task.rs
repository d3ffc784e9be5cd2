//! Task instance types.
//!
//! A `Task` is one runtime instance of a definition node inside a workflow
//! instance. Retries and reruns never mutate a task back to life; they create
//! a new instance linked through `retried_task_id`.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::Payload;
use crate::definition::{TaskDef, WorkflowTask};
use crate::queue::queue_name;

// ---------------------------------------------------------------------------
// System task type names
// ---------------------------------------------------------------------------

pub const DECISION: &str = "DECISION";
pub const FORK: &str = "FORK";
pub const JOIN: &str = "JOIN";
pub const EXCLUSIVE_JOIN: &str = "EXCLUSIVE_JOIN";
pub const SUB_WORKFLOW: &str = "SUB_WORKFLOW";
pub const LAMBDA: &str = "LAMBDA";
pub const WAIT: &str = "WAIT";
pub const EVENT: &str = "EVENT";
pub const TERMINATE: &str = "TERMINATE";

/// Control-flow task types that are never retried.
pub const BUILT_IN_TASK_TYPES: [&str; 4] = [DECISION, FORK, JOIN, EXCLUSIVE_JOIN];

/// Returns `true` for control-flow task types that the retry policy skips.
pub fn is_built_in(task_type: &str) -> bool {
    BUILT_IN_TASK_TYPES.contains(&task_type)
}

// ---------------------------------------------------------------------------
// TaskStatus
// ---------------------------------------------------------------------------

/// Lifecycle status of a task instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Scheduled,
    InProgress,
    Completed,
    CompletedWithErrors,
    Canceled,
    Failed,
    FailedWithTerminalError,
    TimedOut,
    Skipped,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, TaskStatus::Scheduled | TaskStatus::InProgress)
    }

    pub fn is_successful(self) -> bool {
        matches!(
            self,
            TaskStatus::Scheduled
                | TaskStatus::InProgress
                | TaskStatus::Completed
                | TaskStatus::CompletedWithErrors
                | TaskStatus::Skipped
        )
    }

    pub fn is_retriable(self) -> bool {
        !matches!(
            self,
            TaskStatus::Canceled | TaskStatus::FailedWithTerminalError | TaskStatus::Skipped
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Scheduled => "SCHEDULED",
            TaskStatus::InProgress => "IN_PROGRESS",
            TaskStatus::Completed => "COMPLETED",
            TaskStatus::CompletedWithErrors => "COMPLETED_WITH_ERRORS",
            TaskStatus::Canceled => "CANCELED",
            TaskStatus::Failed => "FAILED",
            TaskStatus::FailedWithTerminalError => "FAILED_WITH_TERMINAL_ERROR",
            TaskStatus::TimedOut => "TIMED_OUT",
            TaskStatus::Skipped => "SKIPPED",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Task
// ---------------------------------------------------------------------------

/// A runtime task instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub task_id: Uuid,
    pub workflow_instance_id: Uuid,
    /// Name of the owning workflow definition.
    pub workflow_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    pub reference_task_name: String,
    /// Queue-routing type: a system task name, or the task definition name
    /// for worker-executed tasks.
    pub task_type: String,
    pub task_def_name: String,
    pub status: TaskStatus,
    /// Position within the workflow instance; 0 until assigned at scheduling.
    #[serde(default)]
    pub seq: u32,
    #[serde(default)]
    pub retry_count: u32,
    #[serde(default)]
    pub poll_count: u32,
    #[serde(default)]
    pub executed: bool,
    #[serde(default)]
    pub retried: bool,
    #[serde(default)]
    pub callback_after_secs: u64,
    #[serde(default)]
    pub start_delay_secs: u64,
    #[serde(default)]
    pub response_timeout_secs: u64,
    #[serde(default)]
    pub input: Payload,
    #[serde(default)]
    pub output: Payload,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_input_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_output_path: Option<String>,
    /// Snapshot of the definition node this task was expanded from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow_task: Option<WorkflowTask>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retried_task_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worker_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason_for_incompletion: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheduled_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update_time: Option<DateTime<Utc>>,
}

impl Task {
    /// Create a task in the given status with every optional field empty.
    pub fn new(
        task_id: Uuid,
        workflow_instance_id: Uuid,
        workflow_type: impl Into<String>,
        reference_task_name: impl Into<String>,
        task_type: impl Into<String>,
        status: TaskStatus,
    ) -> Self {
        let task_type = task_type.into();
        Self {
            task_id,
            workflow_instance_id,
            workflow_type: workflow_type.into(),
            correlation_id: None,
            reference_task_name: reference_task_name.into(),
            task_def_name: task_type.clone(),
            task_type,
            status,
            seq: 0,
            retry_count: 0,
            poll_count: 0,
            executed: false,
            retried: false,
            callback_after_secs: 0,
            start_delay_secs: 0,
            response_timeout_secs: 0,
            input: Payload::new(),
            output: Payload::new(),
            external_input_path: None,
            external_output_path: None,
            workflow_task: None,
            retried_task_id: None,
            domain: None,
            worker_id: None,
            reason_for_incompletion: None,
            scheduled_time: Some(Utc::now()),
            start_time: None,
            end_time: None,
            update_time: None,
        }
    }

    /// Work queue this task is pushed to.
    pub fn queue_name(&self) -> String {
        queue_name(&self.task_type, self.domain.as_deref())
    }

    /// Policy embedded in the definition node snapshot, if any.
    pub fn task_definition(&self) -> Option<&TaskDef> {
        self.workflow_task
            .as_ref()
            .and_then(|node| node.task_definition.as_ref())
    }

    /// Set a new status, stamping `end_time` on transition to terminal.
    pub fn set_status(&mut self, status: TaskStatus) {
        self.status = status;
        if status.is_terminal() && self.end_time.is_none() {
            self.end_time = Some(Utc::now());
        }
    }
}

// ---------------------------------------------------------------------------
// Worker call-back types
// ---------------------------------------------------------------------------

/// Status a worker may report for a task it polled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskResultStatus {
    InProgress,
    Failed,
    FailedWithTerminalError,
    Completed,
}

impl From<TaskResultStatus> for TaskStatus {
    fn from(status: TaskResultStatus) -> Self {
        match status {
            TaskResultStatus::InProgress => TaskStatus::InProgress,
            TaskResultStatus::Failed => TaskStatus::Failed,
            TaskResultStatus::FailedWithTerminalError => TaskStatus::FailedWithTerminalError,
            TaskResultStatus::Completed => TaskStatus::Completed,
        }
    }
}

/// Result reported by a worker (or a system task) for a single task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskResult {
    pub workflow_instance_id: Uuid,
    pub task_id: Uuid,
    pub status: TaskResultStatus,
    #[serde(default)]
    pub output: Payload,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_output_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason_for_incompletion: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worker_id: Option<String>,
    #[serde(default)]
    pub callback_after_secs: u64,
    #[serde(default)]
    pub logs: Vec<TaskExecLog>,
}

impl TaskResult {
    pub fn new(workflow_instance_id: Uuid, task_id: Uuid, status: TaskResultStatus) -> Self {
        Self {
            workflow_instance_id,
            task_id,
            status,
            output: Payload::new(),
            external_output_path: None,
            reason_for_incompletion: None,
            worker_id: None,
            callback_after_secs: 0,
            logs: Vec::new(),
        }
    }

    /// Snapshot a task's current state as a result, used when system tasks
    /// report through the same path as workers.
    pub fn from_task(task: &Task) -> Self {
        let status = match task.status {
            TaskStatus::Completed => TaskResultStatus::Completed,
            TaskStatus::FailedWithTerminalError => TaskResultStatus::FailedWithTerminalError,
            TaskStatus::Scheduled | TaskStatus::InProgress => TaskResultStatus::InProgress,
            TaskStatus::Failed
            | TaskStatus::TimedOut
            | TaskStatus::Canceled
            | TaskStatus::CompletedWithErrors
            | TaskStatus::Skipped => TaskResultStatus::Failed,
        };
        Self {
            workflow_instance_id: task.workflow_instance_id,
            task_id: task.task_id,
            status,
            output: task.output.clone(),
            external_output_path: task.external_output_path.clone(),
            reason_for_incompletion: task.reason_for_incompletion.clone(),
            worker_id: task.worker_id.clone(),
            callback_after_secs: task.callback_after_secs,
            logs: Vec::new(),
        }
    }
}

/// A log line appended by a worker while executing a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskExecLog {
    pub task_id: Uuid,
    pub log: String,
    pub created_time: DateTime<Utc>,
}

/// Last time a worker polled a queue, used for domain routing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PollData {
    pub queue_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worker_id: Option<String>,
    pub last_poll_time: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_predicates() {
        assert!(!TaskStatus::Scheduled.is_terminal());
        assert!(!TaskStatus::InProgress.is_terminal());
        assert!(TaskStatus::Completed.is_terminal() && TaskStatus::Completed.is_successful());
        assert!(TaskStatus::CompletedWithErrors.is_successful());
        assert!(TaskStatus::Skipped.is_successful());
        assert!(!TaskStatus::Skipped.is_retriable());
        assert!(TaskStatus::Failed.is_retriable() && !TaskStatus::Failed.is_successful());
        assert!(TaskStatus::TimedOut.is_retriable());
        assert!(!TaskStatus::FailedWithTerminalError.is_retriable());
        assert!(!TaskStatus::Canceled.is_retriable());
    }

    #[test]
    fn test_status_serializes_screaming_snake() {
        let json = serde_json::to_string(&TaskStatus::FailedWithTerminalError).unwrap();
        assert_eq!(json, "\"FAILED_WITH_TERMINAL_ERROR\"");
        assert_eq!(TaskStatus::InProgress.to_string(), "IN_PROGRESS");
    }

    #[test]
    fn test_built_in_types() {
        assert!(is_built_in(DECISION));
        assert!(is_built_in(JOIN));
        assert!(!is_built_in(SUB_WORKFLOW));
        assert!(!is_built_in("encode"));
    }

    #[test]
    fn test_set_status_stamps_end_time_once() {
        let mut task = Task::new(
            Uuid::now_v7(),
            Uuid::now_v7(),
            "media",
            "encode_ref",
            "encode",
            TaskStatus::InProgress,
        );
        task.set_status(TaskStatus::InProgress);
        assert!(task.end_time.is_none());

        task.set_status(TaskStatus::Completed);
        let first = task.end_time;
        assert!(first.is_some());
        task.set_status(TaskStatus::Completed);
        assert_eq!(task.end_time, first);
    }

    #[test]
    fn test_queue_name_uses_domain() {
        let mut task = Task::new(
            Uuid::now_v7(),
            Uuid::now_v7(),
            "media",
            "encode_ref",
            "encode",
            TaskStatus::Scheduled,
        );
        assert_eq!(task.queue_name(), "encode");
        task.domain = Some("gpu".to_string());
        assert_eq!(task.queue_name(), "gpu:encode");
    }

    #[test]
    fn test_result_from_task_maps_statuses() {
        let mut task = Task::new(
            Uuid::now_v7(),
            Uuid::now_v7(),
            "media",
            "wait_ref",
            WAIT,
            TaskStatus::InProgress,
        );
        assert_eq!(TaskResult::from_task(&task).status, TaskResultStatus::InProgress);
        task.status = TaskStatus::TimedOut;
        assert_eq!(TaskResult::from_task(&task).status, TaskResultStatus::Failed);
        task.status = TaskStatus::Completed;
        assert_eq!(TaskResult::from_task(&task).status, TaskResultStatus::Completed);
    }
}
