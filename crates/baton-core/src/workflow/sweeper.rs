//! Workflow sweeper.
//!
//! Drains the decider queue: every running workflow sits there with a delay
//! of one sweep interval, so an instance whose decide was lost (crash, lock
//! contention, missed callback) is re-evaluated within that interval.

use std::sync::Arc;
use std::time::Duration;

use baton_types::error::ApplicationError;
use baton_types::queue::DECIDER_QUEUE;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::repository::{ExecutionStore, LockService, MetadataStore, PayloadStorage, WorkQueue};

use super::executor::WorkflowExecutor;

pub struct Sweeper<E, M, Q, P, L>
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

impl<E, M, Q, P, L> Sweeper<E, M, Q, P, L>
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

    /// Sweep until `cancel` fires, idling one sweep interval between empty
    /// batches.
    pub async fn run(&self, cancel: CancellationToken) {
        let idle = Duration::from_secs(self.executor.config().sweep_frequency_secs.max(1));
        tracing::info!(interval_secs = idle.as_secs(), "workflow sweeper started");
        loop {
            if cancel.is_cancelled() {
                break;
            }
            let swept = match self.sweep_once().await {
                Ok(n) => n,
                Err(e) => {
                    tracing::error!(error = %e, "sweep failed");
                    0
                }
            };
            if swept == 0 {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(idle) => {}
                }
            }
        }
        tracing::info!("workflow sweeper stopped");
    }

    /// Pop one batch from the decider queue and decide each workflow.
    /// Returns the number of ids popped.
    pub async fn sweep_once(&self) -> Result<usize, ApplicationError> {
        let config = self.executor.config();
        let ids = self
            .executor
            .queue()
            .pop(DECIDER_QUEUE, config.sweeper_batch_size)
            .await?;
        for id in &ids {
            if let Err(e) = self.sweep(*id).await {
                tracing::warn!(workflow_id = %id, error = %e, "sweep of workflow failed");
            }
        }
        Ok(ids.len())
    }

    async fn sweep(&self, workflow_id: Uuid) -> Result<(), ApplicationError> {
        let config = self.executor.config();
        let queue = self.executor.queue();
        let retry_after_ms = config.sweep_frequency_secs.saturating_mul(1000);
        let lock_id = workflow_id.to_string();

        let token = self
            .locks
            .acquire_lock(
                &lock_id,
                Duration::from_millis(config.lock_timeout_ms),
                Duration::from_millis(config.lock_lease_ms),
            )
            .await?;
        let Some(token) = token else {
            tracing::debug!(workflow_id = %workflow_id, "workflow locked elsewhere, sweeping later");
            queue
                .set_unack_timeout(DECIDER_QUEUE, &workflow_id, retry_after_ms)
                .await?;
            return Ok(());
        };

        let outcome = self.executor.decide(workflow_id).await;
        let result = match outcome {
            Ok(true) => queue.ack(DECIDER_QUEUE, &workflow_id).await.map(|_| ()),
            Ok(false) => queue
                .set_unack_timeout(DECIDER_QUEUE, &workflow_id, retry_after_ms)
                .await
                .map(|_| ()),
            Err(ApplicationError::NotFound(msg)) => {
                tracing::warn!(workflow_id = %workflow_id, reason = %msg, "dropping unknown workflow from the decider queue");
                queue.remove(DECIDER_QUEUE, &workflow_id).await
            }
            Err(e) => {
                tracing::error!(workflow_id = %workflow_id, error = %e, "sweep decide failed");
                queue
                    .set_unack_timeout(DECIDER_QUEUE, &workflow_id, retry_after_ms)
                    .await
                    .map(|_| ())
            }
        };
        self.locks.release_lock(&lock_id, token).await?;
        Ok(result?)
    }
}
