//! Fork and join nodes.

use baton_types::Payload;
use baton_types::definition::{NodeKind, WorkflowTask};
use baton_types::task::{EXCLUSIVE_JOIN, FORK, JOIN, Task, TaskStatus};
use chrono::Utc;
use serde_json::{Value, json};

use super::{MapperContext, MapperError, TaskMapper};

/// Input key listing the references a join waits on.
pub const JOIN_ON: &str = "join_on";
/// Input key listing fallback references of an exclusive join.
pub const DEFAULT_EXCLUSIVE_JOIN_TASK: &str = "default_exclusive_join_task";
/// Input keys recording what a dynamic fork spawned.
pub const FORKED_TASKS: &str = "forked_tasks";
pub const FORKED_TASK_INPUTS: &str = "forked_task_inputs";

/// The JOIN node that must follow a fork in its sequence.
fn following_join<'a>(ctx: &MapperContext<'a>) -> Result<&'a WorkflowTask, MapperError> {
    match ctx.workflow_def.next_node(&ctx.node.task_reference_name) {
        Some(node) if matches!(node.kind, NodeKind::Join { .. }) => Ok(node),
        _ => Err(MapperError::InvalidDefinition(format!(
            "fork '{}' is not followed by a JOIN",
            ctx.node.task_reference_name
        ))),
    }
}

fn completed_fork(ctx: &MapperContext<'_>) -> Task {
    let mut fork = ctx.new_task(FORK, TaskStatus::Completed);
    let now = Utc::now();
    fork.start_time = Some(now);
    fork.end_time = Some(now);
    fork
}

// ---------------------------------------------------------------------------
// Static fork
// ---------------------------------------------------------------------------

/// Expands a FORK_JOIN node into a COMPLETED fork task plus the first task
/// of every branch.
pub struct ForkJoinMapper;

impl TaskMapper for ForkJoinMapper {
    fn map(&self, ctx: &MapperContext<'_>) -> Result<Vec<Task>, MapperError> {
        let NodeKind::ForkJoin { fork_tasks } = &ctx.node.kind else {
            return Err(MapperError::InvalidDefinition(format!(
                "'{}' is not a fork node",
                ctx.node.task_reference_name
            )));
        };
        following_join(ctx)?;

        let mut tasks = vec![completed_fork(ctx)];
        for branch in fork_tasks {
            if let Some(head) = branch.first() {
                tasks.extend(ctx.expand_child(head)?);
            }
        }
        Ok(tasks)
    }
}

// ---------------------------------------------------------------------------
// Dynamic fork
// ---------------------------------------------------------------------------

/// Expands a FORK_JOIN_DYNAMIC node whose branches are supplied at runtime.
///
/// The node input names a list of branch nodes and a map of per-branch
/// input keyed by reference name. Produces a COMPLETED fork task, one
/// expansion per branch, and the following JOIN task waiting on every
/// branch reference.
pub struct DynamicForkMapper;

impl DynamicForkMapper {
    fn invalid(ctx: &MapperContext<'_>, reason: impl Into<String>) -> MapperError {
        MapperError::InvalidInput {
            task: ctx.node.task_reference_name.clone(),
            reason: reason.into(),
        }
    }
}

impl TaskMapper for DynamicForkMapper {
    fn map(&self, ctx: &MapperContext<'_>) -> Result<Vec<Task>, MapperError> {
        let NodeKind::ForkJoinDynamic {
            dynamic_fork_tasks_param,
            dynamic_fork_tasks_input_param_name,
        } = &ctx.node.kind
        else {
            return Err(MapperError::InvalidDefinition(format!(
                "'{}' is not a dynamic fork node",
                ctx.node.task_reference_name
            )));
        };
        let join_node = following_join(ctx)?;

        let raw_nodes = ctx
            .task_input
            .get(dynamic_fork_tasks_param)
            .cloned()
            .unwrap_or(Value::Null);
        let branches: Vec<WorkflowTask> = serde_json::from_value(raw_nodes).map_err(|e| {
            Self::invalid(ctx, format!("'{dynamic_fork_tasks_param}' is not a list of nodes: {e}"))
        })?;
        let branch_inputs: Payload = match ctx.task_input.get(dynamic_fork_tasks_input_param_name) {
            None | Some(Value::Null) => Payload::new(),
            Some(Value::Object(map)) => map.clone(),
            Some(_) => {
                return Err(Self::invalid(
                    ctx,
                    format!("'{dynamic_fork_tasks_input_param_name}' is not an object"),
                ));
            }
        };

        let refs: Vec<String> = branches.iter().map(|b| b.task_reference_name.clone()).collect();
        let mut fork = completed_fork(ctx);
        fork.input.insert(FORKED_TASKS.to_string(), json!(refs));
        fork.input
            .insert(FORKED_TASK_INPUTS.to_string(), Value::Object(branch_inputs.clone()));

        let mut tasks = vec![fork];
        for branch in &branches {
            let extra = match branch_inputs.get(&branch.task_reference_name) {
                Some(Value::Object(map)) => map.clone(),
                _ => Payload::new(),
            };
            tasks.extend(ctx.expander.expand_with_input(
                ctx.workflow_def,
                ctx.workflow,
                branch,
                ctx.retry_count,
                ctx.task_defs,
                &extra,
            )?);
        }

        let mut join = ctx.expand_child(join_node)?;
        for task in &mut join {
            task.input.insert(JOIN_ON.to_string(), json!(refs));
        }
        tasks.extend(join);
        Ok(tasks)
    }
}

// ---------------------------------------------------------------------------
// Joins
// ---------------------------------------------------------------------------

/// Expands a JOIN node into an IN_PROGRESS join task.
pub struct JoinMapper;

impl TaskMapper for JoinMapper {
    fn map(&self, ctx: &MapperContext<'_>) -> Result<Vec<Task>, MapperError> {
        let NodeKind::Join { join_on } = &ctx.node.kind else {
            return Err(MapperError::InvalidDefinition(format!(
                "'{}' is not a join node",
                ctx.node.task_reference_name
            )));
        };
        let mut join = ctx.new_task(JOIN, TaskStatus::InProgress);
        join.input.insert(JOIN_ON.to_string(), json!(join_on));
        join.start_time = Some(Utc::now());
        Ok(vec![join])
    }
}

/// Expands an EXCLUSIVE_JOIN node into an IN_PROGRESS exclusive join task.
pub struct ExclusiveJoinMapper;

impl TaskMapper for ExclusiveJoinMapper {
    fn map(&self, ctx: &MapperContext<'_>) -> Result<Vec<Task>, MapperError> {
        let NodeKind::ExclusiveJoin {
            join_on,
            default_exclusive_join_task,
        } = &ctx.node.kind
        else {
            return Err(MapperError::InvalidDefinition(format!(
                "'{}' is not an exclusive join node",
                ctx.node.task_reference_name
            )));
        };
        let mut join = ctx.new_task(EXCLUSIVE_JOIN, TaskStatus::InProgress);
        join.input.insert(JOIN_ON.to_string(), json!(join_on));
        join.input.insert(
            DEFAULT_EXCLUSIVE_JOIN_TASK.to_string(),
            json!(default_exclusive_join_task),
        );
        join.start_time = Some(Utc::now());
        Ok(vec![join])
    }
}

#[cfg(test)]
mod tests {
    use super::super::TaskExpander;
    use super::super::test_support::*;
    use super::*;
    use baton_types::definition::WorkflowDef;

    fn join(join_on: &[&str]) -> WorkflowTask {
        WorkflowTask::new(
            "join",
            "join_ref",
            NodeKind::Join {
                join_on: join_on.iter().map(|s| s.to_string()).collect(),
            },
        )
    }

    fn static_def(with_join: bool) -> WorkflowDef {
        let fork = WorkflowTask::new(
            "fork",
            "fork_ref",
            NodeKind::ForkJoin {
                fork_tasks: vec![
                    vec![simple("a1_ref"), simple("a2_ref")],
                    vec![simple("b1_ref")],
                ],
            },
        );
        let mut tasks = vec![fork];
        if with_join {
            tasks.push(join(&["a2_ref", "b1_ref"]));
        }
        WorkflowDef::new("fanout", 1, tasks)
    }

    #[test]
    fn test_static_fork_schedules_branch_heads() {
        let def = static_def(true);
        let wf = workflow(&def);
        let tasks = TaskExpander::with_defaults()
            .expand(&def, &wf, &def.tasks[0], 0, None, &catalog(&["a1", "a2", "b1"]))
            .unwrap();

        let refs: Vec<_> = tasks.iter().map(|t| t.reference_task_name.as_str()).collect();
        assert_eq!(refs, vec!["fork_ref", "a1_ref", "b1_ref"]);
        assert_eq!(tasks[0].task_type, FORK);
        assert_eq!(tasks[0].status, TaskStatus::Completed);
        assert!(tasks[0].end_time.is_some());
        assert_eq!(tasks[1].status, TaskStatus::Scheduled);
    }

    #[test]
    fn test_fork_without_join_is_invalid() {
        let def = static_def(false);
        let wf = workflow(&def);
        let err = TaskExpander::with_defaults()
            .expand(&def, &wf, &def.tasks[0], 0, None, &catalog(&["a1", "a2", "b1"]))
            .unwrap_err();
        assert!(matches!(err, MapperError::InvalidDefinition(_)));
    }

    #[test]
    fn test_dynamic_fork_expands_runtime_branches() {
        let mut fork = WorkflowTask::new(
            "fanout",
            "dyn_ref",
            NodeKind::ForkJoinDynamic {
                dynamic_fork_tasks_param: "nodes".to_string(),
                dynamic_fork_tasks_input_param_name: "inputs".to_string(),
            },
        );
        fork.input_parameters = json!({
            "nodes": [
                { "name": "encode", "task_reference_name": "enc_480", "type": "SIMPLE" },
                { "name": "encode", "task_reference_name": "enc_720", "type": "SIMPLE" }
            ],
            "inputs": { "enc_480": { "height": 480 }, "enc_720": { "height": 720 } }
        })
        .as_object()
        .cloned()
        .unwrap();
        let def = WorkflowDef::new("fanout", 1, vec![fork.clone(), join(&[])]);
        let wf = workflow(&def);

        let tasks = TaskExpander::with_defaults()
            .expand(&def, &wf, &fork, 0, None, &catalog(&["encode"]))
            .unwrap();
        let refs: Vec<_> = tasks.iter().map(|t| t.reference_task_name.as_str()).collect();
        assert_eq!(refs, vec!["dyn_ref", "enc_480", "enc_720", "join_ref"]);
        assert_eq!(tasks[0].input[FORKED_TASKS], json!(["enc_480", "enc_720"]));
        assert_eq!(tasks[1].input["height"], json!(480));
        assert_eq!(tasks[2].input["height"], json!(720));
        assert_eq!(tasks[3].task_type, JOIN);
        assert_eq!(tasks[3].status, TaskStatus::InProgress);
        assert_eq!(tasks[3].input[JOIN_ON], json!(["enc_480", "enc_720"]));
    }

    #[test]
    fn test_dynamic_fork_rejects_malformed_branch_list() {
        let mut fork = WorkflowTask::new(
            "fanout",
            "dyn_ref",
            NodeKind::ForkJoinDynamic {
                dynamic_fork_tasks_param: "nodes".to_string(),
                dynamic_fork_tasks_input_param_name: "inputs".to_string(),
            },
        );
        fork.input_parameters = json!({ "nodes": "not-a-list" }).as_object().cloned().unwrap();
        let def = WorkflowDef::new("fanout", 1, vec![fork.clone(), join(&[])]);
        let wf = workflow(&def);
        let err = TaskExpander::with_defaults()
            .expand(&def, &wf, &fork, 0, None, &catalog(&[]))
            .unwrap_err();
        assert!(matches!(err, MapperError::InvalidInput { .. }));
    }

    #[test]
    fn test_exclusive_join_records_defaults() {
        let node = WorkflowTask::new(
            "xjoin",
            "xjoin_ref",
            NodeKind::ExclusiveJoin {
                join_on: vec!["a_ref".to_string()],
                default_exclusive_join_task: vec!["d_ref".to_string()],
            },
        );
        let def = WorkflowDef::new("route", 1, vec![node.clone()]);
        let wf = workflow(&def);
        let tasks = TaskExpander::with_defaults()
            .expand(&def, &wf, &node, 0, None, &catalog(&[]))
            .unwrap();
        assert_eq!(tasks[0].task_type, EXCLUSIVE_JOIN);
        assert_eq!(tasks[0].input[JOIN_ON], json!(["a_ref"]));
        assert_eq!(tasks[0].input[DEFAULT_EXCLUSIVE_JOIN_TASK], json!(["d_ref"]));
    }
}
