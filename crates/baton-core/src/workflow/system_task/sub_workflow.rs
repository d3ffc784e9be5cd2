//! Child workflow execution.

use baton_types::error::ApplicationError;
use baton_types::task::{SUB_WORKFLOW, Task, TaskStatus};
use baton_types::workflow::Workflow;
use futures_util::future::BoxFuture;
use serde_json::{Value, json};
use uuid::Uuid;

use super::SystemTask;
use crate::workflow::control::{StartWorkflowRequest, WorkflowControl};
use crate::workflow::mapper::{
    SUB_WORKFLOW_ID, SUB_WORKFLOW_INPUT, SUB_WORKFLOW_NAME, SUB_WORKFLOW_VERSION,
};

/// Starts a child workflow and mirrors its terminal state.
///
/// The child records this task as its parent, so the child's completion
/// re-drives the parent's decide and [`execute`](SystemTask::execute) picks
/// up the result.
pub struct SubWorkflowTask;

impl SubWorkflowTask {
    /// Child workflow id recorded on a started task.
    pub fn child_id(task: &Task) -> Option<Uuid> {
        task.output
            .get(SUB_WORKFLOW_ID)
            .or_else(|| task.input.get(SUB_WORKFLOW_ID))
            .and_then(Value::as_str)
            .and_then(|s| Uuid::parse_str(s).ok())
    }

    fn request(workflow: &Workflow, task: &Task) -> Option<StartWorkflowRequest> {
        let name = task.input.get(SUB_WORKFLOW_NAME)?.as_str()?.to_string();
        let version = task
            .input
            .get(SUB_WORKFLOW_VERSION)
            .and_then(Value::as_u64)
            .and_then(|v| u32::try_from(v).ok());
        let input = match task.input.get(SUB_WORKFLOW_INPUT) {
            Some(Value::Object(map)) => map.clone(),
            _ => Default::default(),
        };
        Some(StartWorkflowRequest {
            name,
            version,
            input: Some(input),
            correlation_id: workflow.correlation_id.clone(),
            parent_workflow_id: Some(workflow.workflow_id),
            parent_workflow_task_id: Some(task.task_id),
            task_to_domain: workflow.task_to_domain.clone(),
            ..StartWorkflowRequest::default()
        })
    }
}

impl SystemTask for SubWorkflowTask {
    fn task_type(&self) -> &'static str {
        SUB_WORKFLOW
    }

    fn start<'a>(
        &'a self,
        workflow: &'a Workflow,
        task: &'a mut Task,
        control: &'a dyn WorkflowControl,
    ) -> BoxFuture<'a, Result<(), ApplicationError>> {
        Box::pin(async move {
            let Some(request) = Self::request(workflow, task) else {
                task.reason_for_incompletion =
                    Some(format!("'{SUB_WORKFLOW_NAME}' is missing from the task input"));
                task.set_status(TaskStatus::Failed);
                return Ok(());
            };
            let child_name = request.name.clone();
            match control.start_workflow(request).await {
                Ok(child_id) => {
                    tracing::debug!(
                        workflow_id = %workflow.workflow_id,
                        task_id = %task.task_id,
                        child_workflow_id = %child_id,
                        child = %child_name,
                        "started sub-workflow"
                    );
                    task.input
                        .insert(SUB_WORKFLOW_ID.to_string(), json!(child_id.to_string()));
                    task.output
                        .insert(SUB_WORKFLOW_ID.to_string(), json!(child_id.to_string()));
                    task.set_status(TaskStatus::InProgress);
                }
                Err(e) => {
                    tracing::warn!(
                        workflow_id = %workflow.workflow_id,
                        child = %child_name,
                        error = %e,
                        "failed to start sub-workflow"
                    );
                    task.reason_for_incompletion = Some(e.to_string());
                    task.set_status(TaskStatus::Failed);
                }
            }
            Ok(())
        })
    }

    fn execute<'a>(
        &'a self,
        _workflow: &'a Workflow,
        task: &'a mut Task,
        control: &'a dyn WorkflowControl,
    ) -> BoxFuture<'a, Result<bool, ApplicationError>> {
        Box::pin(async move {
            let Some(child_id) = Self::child_id(task) else {
                return Ok(false);
            };
            let child = match control.load_workflow(child_id, false).await {
                Ok(child) => child,
                Err(ApplicationError::NotFound(_)) => {
                    task.reason_for_incompletion =
                        Some(format!("sub-workflow {child_id} no longer exists"));
                    task.set_status(TaskStatus::Failed);
                    return Ok(true);
                }
                Err(e) => return Err(e),
            };
            if !child.status.is_terminal() {
                return Ok(false);
            }

            task.output = child.output.clone();
            task.output
                .insert(SUB_WORKFLOW_ID.to_string(), json!(child_id.to_string()));
            if child.status.is_successful() {
                task.set_status(TaskStatus::Completed);
            } else {
                task.reason_for_incompletion = child.reason_for_incompletion.clone();
                task.set_status(TaskStatus::Failed);
            }
            Ok(true)
        })
    }

    fn cancel<'a>(
        &'a self,
        workflow: &'a Workflow,
        task: &'a mut Task,
        control: &'a dyn WorkflowControl,
    ) -> BoxFuture<'a, Result<(), ApplicationError>> {
        Box::pin(async move {
            let Some(child_id) = Self::child_id(task) else {
                return Ok(());
            };
            let reason = format!(
                "Parent workflow has been terminated with status {}",
                workflow.status
            );
            match control.terminate_workflow(child_id, &reason).await {
                Ok(()) | Err(ApplicationError::Conflict(_) | ApplicationError::NotFound(_)) => Ok(()),
                Err(e) => Err(e),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::MockControl;
    use super::*;
    use baton_types::workflow::WorkflowStatus;

    fn parent() -> Workflow {
        let mut wf = Workflow::new(Uuid::now_v7(), "parent", 1, Default::default());
        wf.correlation_id = Some("corr-9".to_string());
        wf.task_to_domain.insert("*".to_string(), "gpu".to_string());
        wf
    }

    fn sub_task(wf: &Workflow) -> Task {
        let mut t = Task::new(Uuid::now_v7(), wf.workflow_id, "parent", "child_ref", SUB_WORKFLOW, TaskStatus::Scheduled);
        t.input.insert(SUB_WORKFLOW_NAME.to_string(), json!("transcode"));
        t.input.insert(SUB_WORKFLOW_VERSION.to_string(), json!(2));
        t.input.insert(SUB_WORKFLOW_INPUT.to_string(), json!({ "src": "a.mp4" }));
        t
    }

    #[tokio::test]
    async fn test_start_links_child_to_parent() {
        let control = MockControl::default();
        let wf = parent();
        let mut task = sub_task(&wf);
        SubWorkflowTask.start(&wf, &mut task, &control).await.unwrap();

        assert_eq!(task.status, TaskStatus::InProgress);
        let child_id = SubWorkflowTask::child_id(&task).expect("child id recorded");
        let started = control.started.lock().unwrap();
        let request = &started[0];
        assert_eq!(request.name, "transcode");
        assert_eq!(request.version, Some(2));
        assert_eq!(request.parent_workflow_id, Some(wf.workflow_id));
        assert_eq!(request.parent_workflow_task_id, Some(task.task_id));
        assert_eq!(request.correlation_id.as_deref(), Some("corr-9"));
        assert_eq!(request.task_to_domain["*"], "gpu");
        assert_eq!(request.input.as_ref().unwrap()["src"], json!("a.mp4"));
        assert!(control.workflows.lock().unwrap().contains_key(&child_id));
    }

    #[tokio::test]
    async fn test_start_failure_fails_task() {
        let control = MockControl {
            fail_start: Some("transcode".to_string()),
            ..MockControl::default()
        };
        let wf = parent();
        let mut task = sub_task(&wf);
        SubWorkflowTask.start(&wf, &mut task, &control).await.unwrap();
        assert_eq!(task.status, TaskStatus::Failed);
        assert!(task.reason_for_incompletion.unwrap().contains("transcode"));
    }

    #[tokio::test]
    async fn test_execute_mirrors_child_outcome() {
        let control = MockControl::default();
        let wf = parent();
        let mut task = sub_task(&wf);
        SubWorkflowTask.start(&wf, &mut task, &control).await.unwrap();
        let child_id = SubWorkflowTask::child_id(&task).unwrap();

        assert!(!SubWorkflowTask.execute(&wf, &mut task, &control).await.unwrap());

        {
            let mut workflows = control.workflows.lock().unwrap();
            let child = workflows.get_mut(&child_id).unwrap();
            child.set_status(WorkflowStatus::Completed);
            child.output.insert("url".to_string(), json!("s3://out"));
        }
        assert!(SubWorkflowTask.execute(&wf, &mut task, &control).await.unwrap());
        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!(task.output["url"], json!("s3://out"));
        assert_eq!(task.output[SUB_WORKFLOW_ID], json!(child_id.to_string()));
    }

    #[tokio::test]
    async fn test_execute_failed_child_fails_task() {
        let control = MockControl::default();
        let wf = parent();
        let mut task = sub_task(&wf);
        SubWorkflowTask.start(&wf, &mut task, &control).await.unwrap();
        let child_id = SubWorkflowTask::child_id(&task).unwrap();
        {
            let mut workflows = control.workflows.lock().unwrap();
            let child = workflows.get_mut(&child_id).unwrap();
            child.set_status(WorkflowStatus::Failed);
            child.reason_for_incompletion = Some("encoder crashed".to_string());
        }
        assert!(SubWorkflowTask.execute(&wf, &mut task, &control).await.unwrap());
        assert_eq!(task.status, TaskStatus::Failed);
        assert_eq!(task.reason_for_incompletion.as_deref(), Some("encoder crashed"));
    }

    #[tokio::test]
    async fn test_cancel_terminates_child() {
        let control = MockControl::default();
        let mut wf = parent();
        let mut task = sub_task(&wf);
        SubWorkflowTask.start(&wf, &mut task, &control).await.unwrap();
        let child_id = SubWorkflowTask::child_id(&task).unwrap();

        wf.set_status(WorkflowStatus::Terminated);
        SubWorkflowTask.cancel(&wf, &mut task, &control).await.unwrap();
        let terminated = control.terminated.lock().unwrap();
        assert_eq!(terminated[0].0, child_id);
        assert_eq!(
            terminated[0].1,
            "Parent workflow has been terminated with status TERMINATED"
        );
    }
}
