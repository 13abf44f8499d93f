use crate::engine::processor::ItemProcessor;
use crate::engine::queue::{work_unit, QueueError, WorkQueue};
use crate::traits::{BatchStore, StoreError};
use std::sync::Arc;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument};
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum EnqueueError {
    #[error("Failed to load pending items: {0}")]
    Store(#[from] StoreError),
    #[error("Failed to enqueue work: {0}")]
    Queue(#[from] QueueError),
}

/// Turns a batch's `Pending` items into work units on the queue.
pub struct BatchEnqueuer {
    store: Arc<dyn BatchStore>,
    queue: Arc<WorkQueue>,
    processor: Arc<ItemProcessor>,
}

impl BatchEnqueuer {
    pub fn new(
        store: Arc<dyn BatchStore>,
        queue: Arc<WorkQueue>,
        processor: Arc<ItemProcessor>,
    ) -> Self {
        Self {
            store,
            queue,
            processor,
        }
    }

    /// Enqueues one unit per item still `Pending`, returning how many were queued.
    ///
    /// Calling this twice before the items are claimed queues them twice;
    /// the second unit per item finds it claimed and does nothing.
    #[instrument(skip(self, cancel))]
    pub async fn enqueue_batch(
        &self,
        batch_id: Uuid,
        cancel: &CancellationToken,
    ) -> Result<usize, EnqueueError> {
        let item_ids = self.store.session().pending_item_ids(batch_id).await?;

        for &item_id in &item_ids {
            let processor = self.processor.clone();
            let unit = work_unit(move |work_cancel| async move {
                if let Err(e) = processor.process(item_id, work_cancel).await {
                    error!(%item_id, error = %e, "Item could not be processed");
                }
            });
            self.queue.enqueue(unit, cancel).await?;
        }

        info!(count = item_ids.len(), "Batch enqueued");
        Ok(item_ids.len())
    }

    /// Runs [`enqueue_batch`](Self::enqueue_batch) as its own task.
    pub fn spawn_enqueue(
        self: &Arc<Self>,
        batch_id: Uuid,
        cancel: CancellationToken,
    ) -> JoinHandle<Result<usize, EnqueueError>> {
        let enqueuer = self.clone();
        tokio::spawn(async move {
            let result = enqueuer.enqueue_batch(batch_id, &cancel).await;
            if let Err(e) = &result {
                error!(%batch_id, error = %e, "Batch enqueue failed");
            }
            result
        })
    }
}
