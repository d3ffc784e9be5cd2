//! Nodes executed by the engine's built-in system tasks.

use baton_types::definition::NodeKind;
use baton_types::task::{EVENT, LAMBDA, SUB_WORKFLOW, TERMINATE, Task, TaskStatus, WAIT};
use serde_json::{Value, json};

use super::{MapperContext, MapperError, TaskMapper};

pub const SUB_WORKFLOW_NAME: &str = "sub_workflow_name";
pub const SUB_WORKFLOW_VERSION: &str = "sub_workflow_version";
pub const SUB_WORKFLOW_INPUT: &str = "workflow_input";
pub const SUB_WORKFLOW_ID: &str = "sub_workflow_id";
pub const SCRIPT_EXPRESSION: &str = "script_expression";
pub const SINK: &str = "sink";
pub const TERMINATION_STATUS: &str = "termination_status";
pub const TERMINATION_REASON: &str = "termination_reason";
pub const WORKFLOW_OUTPUT: &str = "workflow_output";

fn wrong_kind(ctx: &MapperContext<'_>, expected: &str) -> MapperError {
    MapperError::InvalidDefinition(format!(
        "'{}' is not a {expected} node",
        ctx.node.task_reference_name
    ))
}

/// SUB_WORKFLOW: SCHEDULED, started by the sub-workflow system task.
///
/// The resolved node input becomes the child workflow's input. An unpinned
/// version is resolved to the latest one when the child starts.
pub struct SubWorkflowMapper;

impl TaskMapper for SubWorkflowMapper {
    fn map(&self, ctx: &MapperContext<'_>) -> Result<Vec<Task>, MapperError> {
        let NodeKind::SubWorkflow { sub_workflow_param } = &ctx.node.kind else {
            return Err(wrong_kind(ctx, "sub-workflow"));
        };
        let mut task = ctx.new_task(SUB_WORKFLOW, TaskStatus::Scheduled);
        task.input = serde_json::Map::new();
        task.input
            .insert(SUB_WORKFLOW_NAME.to_string(), json!(sub_workflow_param.name));
        task.input.insert(
            SUB_WORKFLOW_VERSION.to_string(),
            sub_workflow_param.version.map_or(Value::Null, |v| json!(v)),
        );
        task.input.insert(
            SUB_WORKFLOW_INPUT.to_string(),
            Value::Object(ctx.task_input.clone()),
        );
        Ok(vec![task])
    }
}

/// LAMBDA: IN_PROGRESS, evaluated inline when started.
pub struct LambdaMapper;

impl TaskMapper for LambdaMapper {
    fn map(&self, ctx: &MapperContext<'_>) -> Result<Vec<Task>, MapperError> {
        let NodeKind::Lambda { script_expression } = &ctx.node.kind else {
            return Err(wrong_kind(ctx, "lambda"));
        };
        let mut task = ctx.new_task(LAMBDA, TaskStatus::InProgress);
        task.input
            .insert(SCRIPT_EXPRESSION.to_string(), json!(script_expression));
        Ok(vec![task])
    }
}

/// WAIT: IN_PROGRESS until an external update completes it.
pub struct WaitMapper;

impl TaskMapper for WaitMapper {
    fn map(&self, ctx: &MapperContext<'_>) -> Result<Vec<Task>, MapperError> {
        Ok(vec![ctx.new_task(WAIT, TaskStatus::InProgress)])
    }
}

/// EVENT: SCHEDULED on the EVENT queue for the system task coordinator.
pub struct EventMapper;

impl TaskMapper for EventMapper {
    fn map(&self, ctx: &MapperContext<'_>) -> Result<Vec<Task>, MapperError> {
        let NodeKind::Event { sink } = &ctx.node.kind else {
            return Err(wrong_kind(ctx, "event"));
        };
        let mut task = ctx.new_task(EVENT, TaskStatus::Scheduled);
        task.input.insert(SINK.to_string(), json!(sink));
        Ok(vec![task])
    }
}

/// TERMINATE: IN_PROGRESS, completed on start and then ends the workflow.
pub struct TerminateMapper;

impl TaskMapper for TerminateMapper {
    fn map(&self, ctx: &MapperContext<'_>) -> Result<Vec<Task>, MapperError> {
        Ok(vec![ctx.new_task(TERMINATE, TaskStatus::InProgress)])
    }
}
