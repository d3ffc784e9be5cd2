//! Workflow status listeners.
//!
//! The executor notifies a listener after a workflow completes or is
//! terminated. Listener failures are logged by the caller and never undo the
//! transition.

use std::sync::Arc;

use baton_types::error::ApplicationError;
use baton_types::workflow::Workflow;
use futures_util::future::BoxFuture;

use crate::repository::WorkQueue;

/// Receives terminal workflow transitions.
pub trait WorkflowStatusListener: Send + Sync {
    fn on_workflow_completed<'a>(
        &'a self,
        workflow: &'a Workflow,
    ) -> BoxFuture<'a, Result<(), ApplicationError>>;

    fn on_workflow_terminated<'a>(
        &'a self,
        workflow: &'a Workflow,
    ) -> BoxFuture<'a, Result<(), ApplicationError>>;
}

/// Ignores every transition.
pub struct NoopStatusListener;

impl WorkflowStatusListener for NoopStatusListener {
    fn on_workflow_completed<'a>(
        &'a self,
        _workflow: &'a Workflow,
    ) -> BoxFuture<'a, Result<(), ApplicationError>> {
        Box::pin(async { Ok(()) })
    }

    fn on_workflow_terminated<'a>(
        &'a self,
        _workflow: &'a Workflow,
    ) -> BoxFuture<'a, Result<(), ApplicationError>> {
        Box::pin(async { Ok(()) })
    }
}

/// Pushes the workflow id onto a status queue for external consumers.
pub struct QueueStatusListener<Q: WorkQueue> {
    queue: Arc<Q>,
    queue_name: String,
}

impl<Q: WorkQueue> QueueStatusListener<Q> {
    pub fn new(queue: Arc<Q>, queue_name: impl Into<String>) -> Self {
        Self {
            queue,
            queue_name: queue_name.into(),
        }
    }

    async fn notify(&self, workflow: &Workflow) -> Result<(), ApplicationError> {
        self.queue
            .push(&self.queue_name, &workflow.workflow_id, 0)
            .await?;
        tracing::debug!(
            workflow_id = %workflow.workflow_id,
            status = %workflow.status,
            queue = %self.queue_name,
            "published workflow status"
        );
        Ok(())
    }
}

impl<Q: WorkQueue> WorkflowStatusListener for QueueStatusListener<Q> {
    fn on_workflow_completed<'a>(
        &'a self,
        workflow: &'a Workflow,
    ) -> BoxFuture<'a, Result<(), ApplicationError>> {
        Box::pin(self.notify(workflow))
    }

    fn on_workflow_terminated<'a>(
        &'a self,
        workflow: &'a Workflow,
    ) -> BoxFuture<'a, Result<(), ApplicationError>> {
        Box::pin(self.notify(workflow))
    }
}
