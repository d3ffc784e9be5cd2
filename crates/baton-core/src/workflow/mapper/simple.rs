//! Worker-executed tasks.

use baton_types::task::{Task, TaskStatus};

use super::{MapperContext, MapperError, TaskMapper};

/// Expands a SIMPLE node into one SCHEDULED task routed by its task name.
///
/// A SIMPLE node without a task definition cannot be scheduled.
pub struct SimpleMapper;

impl TaskMapper for SimpleMapper {
    fn map(&self, ctx: &MapperContext<'_>) -> Result<Vec<Task>, MapperError> {
        if ctx.task_def.is_none() {
            return Err(MapperError::MissingTaskDef(ctx.node.name.clone()));
        }
        let mut task = ctx.new_task(&ctx.node.name, TaskStatus::Scheduled);
        task.start_delay_secs = ctx.node.start_delay;
        task.callback_after_secs = ctx.node.start_delay;
        Ok(vec![task])
    }
}

#[cfg(test)]
mod tests {
    use super::super::TaskExpander;
    use super::super::test_support::*;
    use super::*;
    use baton_types::definition::WorkflowDef;

    #[test]
    fn test_simple_task_routing_and_delay() {
        let mut node = simple("encode_ref");
        node.start_delay = 15;
        let def = WorkflowDef::new("media", 1, vec![node.clone()]);
        let wf = workflow(&def);
        let tasks = TaskExpander::with_defaults()
            .expand(&def, &wf, &node, 2, None, &catalog(&["encode"]))
            .unwrap();

        let task = &tasks[0];
        assert_eq!(task.task_type, "encode");
        assert_eq!(task.task_def_name, "encode");
        assert_eq!(task.status, TaskStatus::Scheduled);
        assert_eq!(task.callback_after_secs, 15);
        assert_eq!(task.start_delay_secs, 15);
        assert_eq!(task.retry_count, 2);
        assert_eq!(task.response_timeout_secs, 3600);
        assert_eq!(task.seq, 0);
    }

    #[test]
    fn test_simple_task_requires_definition() {
        let node = simple("encode_ref");
        let def = WorkflowDef::new("media", 1, vec![node.clone()]);
        let wf = workflow(&def);
        let err = TaskExpander::with_defaults()
            .expand(&def, &wf, &node, 0, None, &catalog(&[]))
            .unwrap_err();
        assert!(matches!(err, MapperError::MissingTaskDef(name) if name == "encode"));
    }
}
