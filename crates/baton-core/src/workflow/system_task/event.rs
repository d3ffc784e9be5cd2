//! Publishing to a message queue.

use baton_types::error::ApplicationError;
use baton_types::task::{EVENT, Task, TaskStatus};
use baton_types::workflow::Workflow;
use futures_util::future::BoxFuture;
use serde_json::{Value, json};

use super::SystemTask;
use crate::workflow::control::WorkflowControl;
use crate::workflow::mapper::SINK;

/// Publishes the task id to the queue named by its sink.
///
/// Sinks: `queue` publishes to `<workflow_type>:<task_ref>`, and
/// `queue:<name>` publishes to `<name>`. Consumers load the task to read its
/// input. Runs asynchronously through the system task coordinator.
pub struct EventTask;

impl EventTask {
    pub fn queue_for(sink: &str, workflow: &Workflow, task: &Task) -> Option<String> {
        match sink.split_once(':') {
            None if sink == "queue" => Some(format!(
                "{}:{}",
                workflow.workflow_type, task.reference_task_name
            )),
            Some(("queue", name)) if !name.is_empty() => Some(name.to_string()),
            _ => None,
        }
    }
}

impl SystemTask for EventTask {
    fn task_type(&self) -> &'static str {
        EVENT
    }

    fn is_async(&self) -> bool {
        true
    }

    fn start<'a>(
        &'a self,
        workflow: &'a Workflow,
        task: &'a mut Task,
        control: &'a dyn WorkflowControl,
    ) -> BoxFuture<'a, Result<(), ApplicationError>> {
        Box::pin(async move {
            let sink = task
                .input
                .get(SINK)
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            let Some(queue) = Self::queue_for(&sink, workflow, task) else {
                task.reason_for_incompletion = Some(format!("unsupported event sink '{sink}'"));
                task.set_status(TaskStatus::Failed);
                return Ok(());
            };
            control.publish(&queue, task.task_id).await?;
            task.output.insert("event_produced".to_string(), json!(queue));
            task.output.insert(SINK.to_string(), json!(sink));
            task.set_status(TaskStatus::Completed);
            Ok(())
        })
    }
}
