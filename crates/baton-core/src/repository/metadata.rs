//! Metadata store trait definition.

use baton_types::definition::{TaskDef, WorkflowDef};
use baton_types::error::RepositoryError;

/// Registry of workflow definitions and task policies.
pub trait MetadataStore: Send + Sync {
    /// Exact name and version lookup.
    fn get(
        &self,
        name: &str,
        version: u32,
    ) -> impl std::future::Future<Output = Result<Option<WorkflowDef>, RepositoryError>> + Send;

    /// Highest registered version of `name`.
    fn get_latest(
        &self,
        name: &str,
    ) -> impl std::future::Future<Output = Result<Option<WorkflowDef>, RepositoryError>> + Send;

    fn get_task_def(
        &self,
        name: &str,
    ) -> impl std::future::Future<Output = Result<Option<TaskDef>, RepositoryError>> + Send;

    fn get_all_task_defs(
        &self,
    ) -> impl std::future::Future<Output = Result<Vec<TaskDef>, RepositoryError>> + Send;

    /// Insert or replace by `(name, version)`.
    fn register_workflow_def(
        &self,
        def: &WorkflowDef,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Insert or replace by name.
    fn register_task_def(
        &self,
        def: &TaskDef,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;
}
