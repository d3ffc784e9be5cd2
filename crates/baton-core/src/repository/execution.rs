//! Execution store trait definition.
//!
//! Persists workflow and task instances, worker poll data and task logs.

use baton_types::error::RepositoryError;
use baton_types::task::{PollData, Task, TaskExecLog};
use baton_types::workflow::Workflow;
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Repository trait for workflow and task instance persistence.
///
/// Implementations keep a "pending" index of non-terminal workflows per
/// workflow type. `create_workflow` upserts and adds to it; `update_workflow`
/// drops instances that reached a terminal status and re-adds instances that
/// are running again (retry, rewind, rerun).
///
/// Uses native async fn in traits (Rust 2024 edition, no async_trait macro).
pub trait ExecutionStore: Send + Sync {
    // -----------------------------------------------------------------------
    // Workflows
    // -----------------------------------------------------------------------

    /// Load a workflow instance. Tasks are attached, ordered by `seq`, only
    /// when `include_tasks` is set.
    fn get_workflow(
        &self,
        workflow_id: &Uuid,
        include_tasks: bool,
    ) -> impl std::future::Future<Output = Result<Option<Workflow>, RepositoryError>> + Send;

    fn create_workflow(
        &self,
        workflow: &Workflow,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Persist workflow-level fields. The `tasks` list is ignored.
    fn update_workflow(
        &self,
        workflow: &Workflow,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Ids of non-terminal workflows of the given type.
    fn get_pending_workflows_by_type(
        &self,
        workflow_type: &str,
    ) -> impl std::future::Future<Output = Result<Vec<Uuid>, RepositoryError>> + Send;

    /// Workflows of the given type created within `[start, end]`, without
    /// tasks.
    fn get_workflows_by_type(
        &self,
        workflow_type: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> impl std::future::Future<Output = Result<Vec<Workflow>, RepositoryError>> + Send;

    fn remove_from_pending_workflow(
        &self,
        workflow_type: &str,
        workflow_id: &Uuid,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    // -----------------------------------------------------------------------
    // Tasks
    // -----------------------------------------------------------------------

    fn get_task(
        &self,
        task_id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Option<Task>, RepositoryError>> + Send;

    /// Insert tasks, skipping any whose `(reference_task_name, retry_count)`
    /// already exists in the same workflow. Returns only the inserted tasks.
    fn create_tasks(
        &self,
        tasks: &[Task],
    ) -> impl std::future::Future<Output = Result<Vec<Task>, RepositoryError>> + Send;

    fn update_task(
        &self,
        task: &Task,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    fn update_tasks(
        &self,
        tasks: &[Task],
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send {
        async move {
            for task in tasks {
                self.update_task(task).await?;
            }
            Ok(())
        }
    }

    fn remove_task(
        &self,
        task_id: &Uuid,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    fn get_tasks_for_workflow(
        &self,
        workflow_id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Vec<Task>, RepositoryError>> + Send;

    /// `true` when starting `task` would exceed its type's concurrency limit.
    fn exceeds_in_progress_limit(
        &self,
        task: &Task,
    ) -> impl std::future::Future<Output = Result<bool, RepositoryError>> + Send;

    /// `true` when starting `task` would exceed its type's rate limit window.
    fn exceeds_rate_limit_per_frequency(
        &self,
        task: &Task,
    ) -> impl std::future::Future<Output = Result<bool, RepositoryError>> + Send;

    fn add_task_exec_logs(
        &self,
        logs: &[TaskExecLog],
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    fn get_task_exec_logs(
        &self,
        task_id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Vec<TaskExecLog>, RepositoryError>> + Send;

    // -----------------------------------------------------------------------
    // Poll data
    // -----------------------------------------------------------------------

    fn get_poll_data(
        &self,
        task_type: &str,
        domain: Option<&str>,
    ) -> impl std::future::Future<Output = Result<Option<PollData>, RepositoryError>> + Send;

    fn update_last_poll(
        &self,
        task_type: &str,
        domain: Option<&str>,
        worker_id: Option<&str>,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;
}
