//! The engine surface available to system tasks.
//!
//! System tasks start child workflows, inspect them and publish messages.
//! They reach the engine through [`WorkflowControl`], an object-safe trait
//! the orchestration loop implements, so the system task registry does not
//! depend on the loop's storage types.

use std::collections::HashMap;

use baton_types::Payload;
use baton_types::error::ApplicationError;
use baton_types::workflow::Workflow;
use futures_util::future::BoxFuture;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Parameters for starting a workflow instance.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StartWorkflowRequest {
    pub name: String,
    /// Latest registered version when absent.
    #[serde(default)]
    pub version: Option<u32>,
    /// Required unless `external_input_path` is set.
    #[serde(default)]
    pub input: Option<Payload>,
    #[serde(default)]
    pub external_input_path: Option<String>,
    #[serde(default)]
    pub correlation_id: Option<String>,
    #[serde(default)]
    pub parent_workflow_id: Option<Uuid>,
    #[serde(default)]
    pub parent_workflow_task_id: Option<Uuid>,
    #[serde(default)]
    pub event: Option<String>,
    #[serde(default)]
    pub task_to_domain: HashMap<String, String>,
}

impl StartWorkflowRequest {
    pub fn new(name: impl Into<String>, input: Payload) -> Self {
        Self {
            name: name.into(),
            input: Some(input),
            ..Self::default()
        }
    }
}

/// Object-safe handle on the orchestration loop.
pub trait WorkflowControl: Send + Sync {
    fn load_workflow(
        &self,
        workflow_id: Uuid,
        include_tasks: bool,
    ) -> BoxFuture<'_, Result<Workflow, ApplicationError>>;

    fn start_workflow(
        &self,
        request: StartWorkflowRequest,
    ) -> BoxFuture<'_, Result<Uuid, ApplicationError>>;

    fn terminate_workflow<'a>(
        &'a self,
        workflow_id: Uuid,
        reason: &'a str,
    ) -> BoxFuture<'a, Result<(), ApplicationError>>;

    /// Push `message_id` onto `queue`.
    fn publish<'a>(
        &'a self,
        queue: &'a str,
        message_id: Uuid,
    ) -> BoxFuture<'a, Result<(), ApplicationError>>;
}
