//! Inline expression evaluation.

use baton_types::error::ApplicationError;
use baton_types::task::{LAMBDA, Task, TaskStatus};
use baton_types::workflow::Workflow;
use futures_util::future::BoxFuture;
use serde_json::Value;

use super::SystemTask;
use crate::workflow::control::WorkflowControl;
use crate::workflow::expression::ExpressionEvaluator;
use crate::workflow::mapper::SCRIPT_EXPRESSION;

/// Evaluates `script_expression` against the task input and completes with
/// `{"result": <value>}`. Evaluation errors fail the task.
pub struct LambdaTask {
    evaluator: ExpressionEvaluator,
}

impl LambdaTask {
    pub fn new() -> Self {
        Self {
            evaluator: ExpressionEvaluator::new(),
        }
    }
}

impl Default for LambdaTask {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemTask for LambdaTask {
    fn task_type(&self) -> &'static str {
        LAMBDA
    }

    fn start<'a>(
        &'a self,
        workflow: &'a Workflow,
        task: &'a mut Task,
        _control: &'a dyn WorkflowControl,
    ) -> BoxFuture<'a, Result<(), ApplicationError>> {
        Box::pin(async move {
            let Some(script) = task.input.get(SCRIPT_EXPRESSION).and_then(Value::as_str) else {
                task.reason_for_incompletion = Some(format!("'{SCRIPT_EXPRESSION}' is missing"));
                task.set_status(TaskStatus::Failed);
                return Ok(());
            };
            match self.evaluator.evaluate_input(script, &task.input) {
                Ok(result) => {
                    task.output.insert("result".to_string(), result);
                    task.set_status(TaskStatus::Completed);
                }
                Err(e) => {
                    tracing::debug!(
                        workflow_id = %workflow.workflow_id,
                        task_id = %task.task_id,
                        error = %e,
                        "lambda evaluation failed"
                    );
                    task.reason_for_incompletion = Some(e.to_string());
                    task.set_status(TaskStatus::Failed);
                }
            }
            Ok(())
        })
    }
}
