//! Asynchronous system task coordinator.
//!
//! Polls the queue of every asynchronous system task type and runs each
//! popped task through the executor under its workflow's lock.

use std::sync::Arc;
use std::time::Duration;

use baton_types::error::ApplicationError;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::repository::{ExecutionStore, LockService, MetadataStore, PayloadStorage, WorkQueue};

use super::executor::WorkflowExecutor;

pub struct SystemTaskCoordinator<E, M, Q, P, L>
where
    E: ExecutionStore,
    M: MetadataStore,
    Q: WorkQueue,
    P: PayloadStorage,
    L: LockService,
{
    executor: Arc<WorkflowExecutor<E, M, Q, P>>,
    locks: Arc<L>,
}

impl<E, M, Q, P, L> SystemTaskCoordinator<E, M, Q, P, L>
where
    E: ExecutionStore + 'static,
    M: MetadataStore + 'static,
    Q: WorkQueue + 'static,
    P: PayloadStorage + 'static,
    L: LockService + 'static,
{
    pub fn new(executor: Arc<WorkflowExecutor<E, M, Q, P>>, locks: Arc<L>) -> Self {
        Self { executor, locks }
    }

    pub async fn run(&self, cancel: CancellationToken) {
        let idle = Duration::from_millis(self.executor.config().system_task_poll_interval_ms.max(1));
        tracing::info!(
            task_types = ?self.executor.system_tasks().async_task_types(),
            "system task coordinator started"
        );
        loop {
            if cancel.is_cancelled() {
                break;
            }
            let handled = match self.poll_once().await {
                Ok(n) => n,
                Err(e) => {
                    tracing::error!(error = %e, "system task poll failed");
                    0
                }
            };
            if handled == 0 {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(idle) => {}
                }
            }
        }
        tracing::info!("system task coordinator stopped");
    }

    /// Pop and execute one batch per asynchronous task type. Returns the
    /// number of tasks popped.
    pub async fn poll_once(&self) -> Result<usize, ApplicationError> {
        let count = self.executor.config().system_task_poll_count;
        let mut handled = 0;
        for task_type in self.executor.system_tasks().async_task_types() {
            let ids = self.executor.queue().pop(task_type, count).await?;
            handled += ids.len();
            for task_id in ids {
                if let Err(e) = self.execute(task_type, task_id).await {
                    tracing::warn!(task_id = %task_id, task_type = %task_type, error = %e, "system task dispatch failed");
                }
            }
        }
        Ok(handled)
    }

    async fn execute(&self, task_type: &str, task_id: Uuid) -> Result<(), ApplicationError> {
        let config = self.executor.config();
        let Some(task) = self.executor.get_task(task_id).await? else {
            self.executor.queue().remove(task_type, &task_id).await?;
            tracing::warn!(task_id = %task_id, task_type = %task_type, "queued system task no longer exists");
            return Ok(());
        };

        let lock_id = task.workflow_instance_id.to_string();
        let token = self
            .locks
            .acquire_lock(
                &lock_id,
                Duration::from_millis(config.lock_timeout_ms),
                Duration::from_millis(config.lock_lease_ms),
            )
            .await?;
        let Some(token) = token else {
            // Popped but not acked: visible again after the unack timeout.
            tracing::debug!(task_id = %task_id, workflow_id = %lock_id, "workflow locked, system task deferred");
            return Ok(());
        };
        self.executor
            .execute_system_task(task_type, task_id, config.system_task_unack_timeout_secs)
            .await;
        self.locks.release_lock(&lock_id, token).await?;
        Ok(())
    }
}
