//! Retry policy for failed and timed-out tasks.
//!
//! Stateless: every rule is an associated function over the failed task and
//! its policy. The decider owns input re-resolution and persistence.

use baton_types::definition::{RetryLogic, TaskDef};
use baton_types::task::{Task, TaskStatus, is_built_in};
use chrono::Utc;
use uuid::Uuid;

/// What to do with a task that did not succeed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryAction {
    /// Schedule a new attempt after `delay_secs`.
    Reschedule { delay_secs: u64 },
    /// Give up on the task but let the workflow continue (optional nodes).
    Skip,
    /// Give up on the task and fail the workflow with this status.
    FailWorkflow,
}

/// Stateless retry rules.
pub struct RetryHandler;

impl RetryHandler {
    /// Decide how to handle an unsuccessful task.
    ///
    /// Retries are refused for non-retriable statuses, control-flow task
    /// types, tasks without a policy, and tasks whose attempts are used up.
    pub fn evaluate(task: &Task, task_def: Option<&TaskDef>, optional: bool) -> RetryAction {
        let retriable = task.status.is_retriable() && !is_built_in(&task.task_type);
        match task_def {
            Some(def) if retriable && task.retry_count < def.retry_count => RetryAction::Reschedule {
                delay_secs: Self::backoff_secs(def, task.retry_count),
            },
            _ if optional => RetryAction::Skip,
            _ => RetryAction::FailWorkflow,
        }
    }

    /// Delay before attempt `retry_count + 1`.
    pub fn backoff_secs(def: &TaskDef, retry_count: u32) -> u64 {
        match def.retry_logic {
            RetryLogic::Fixed => def.retry_delay_seconds,
            RetryLogic::ExponentialBackoff => {
                def.retry_delay_seconds.saturating_mul(1 + u64::from(retry_count))
            }
        }
    }

    /// Build the next attempt of `task`, delayed by `delay_secs`.
    ///
    /// The clone keeps the original's routing and input; the caller
    /// re-resolves input afterwards. `seq` is left unassigned.
    pub fn rescheduled(task: &Task, delay_secs: u64) -> Task {
        let mut next = task.clone();
        next.task_id = Uuid::now_v7();
        next.retried_task_id = Some(task.task_id);
        next.status = TaskStatus::Scheduled;
        next.seq = 0;
        next.retry_count = task.retry_count + 1;
        next.poll_count = 0;
        next.executed = false;
        next.retried = false;
        next.start_delay_secs = delay_secs;
        next.callback_after_secs = delay_secs;
        next.output = Default::default();
        next.external_output_path = None;
        next.reason_for_incompletion = None;
        next.worker_id = None;
        next.scheduled_time = Some(Utc::now());
        next.start_time = None;
        next.end_time = None;
        next.update_time = None;
        next
    }

    /// Build the replacement of a task re-driven by an explicit workflow
    /// retry. Unlike [`rescheduled`](Self::rescheduled) there is no delay.
    pub fn manual_retry(task: &Task) -> Task {
        Self::rescheduled(task, 0)
    }
}
