//! Batch execution engine.
//!
//! Components, leaves first:
//! - [`queue::WorkQueue`]: bounded FIFO of deferred work units
//! - [`processor::ItemProcessor`]: runs the lookup for one item and records it
//! - [`dispatcher::Dispatcher`]: the single worker loop draining the queue
//!   under the process-wide [`ConcurrencyLimiter`]
//! - [`enqueuer::BatchEnqueuer`]: feeds a batch's pending items to the queue
//! - [`estimator::estimate`]: processed count and ETA for a batch snapshot

pub mod dispatcher;
pub mod enqueuer;
pub mod estimator;
pub mod processor;
pub mod queue;

pub use dispatcher::{DispatchSnapshot, Dispatcher, DispatcherHandle};
pub use enqueuer::{BatchEnqueuer, EnqueueError};
pub use estimator::{estimate, Progress};
pub use processor::{ItemProcessor, ProcessReport};
pub use queue::{work_unit, QueueError, WorkQueue, WorkUnit};

use crate::config::EngineConfig;
use crate::executor::ConcurrencyLimiter;
use crate::traits::{BatchStore, GeoLookup};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// A running engine: queue, limiter and dispatcher wired together.
///
/// Must be started inside a Tokio runtime.
pub struct BatchEngine {
    queue: Arc<WorkQueue>,
    enqueuer: Arc<BatchEnqueuer>,
    dispatcher: DispatcherHandle,
    shutdown: CancellationToken,
}

impl BatchEngine {
    pub fn start(
        config: &EngineConfig,
        store: Arc<dyn BatchStore>,
        lookup: Arc<dyn GeoLookup>,
    ) -> Self {
        let queue = Arc::new(WorkQueue::new(config.queue_capacity));
        let limiter = Arc::new(ConcurrencyLimiter::new(config.max_concurrency));
        let processor =
            Arc::new(ItemProcessor::new(store.clone(), lookup).with_timeout(config.lookup_timeout()));
        let enqueuer = Arc::new(BatchEnqueuer::new(store, queue.clone(), processor));

        let shutdown = CancellationToken::new();
        let dispatcher = Dispatcher::new(queue.clone(), limiter).spawn(shutdown.clone());

        Self {
            queue,
            enqueuer,
            dispatcher,
            shutdown,
        }
    }

    pub fn enqueuer(&self) -> Arc<BatchEnqueuer> {
        self.enqueuer.clone()
    }

    /// Fires on shutdown; pass it to enqueue tasks so they stop waiting on a full queue.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Work units waiting in the queue.
    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    pub fn in_flight(&self) -> usize {
        self.dispatcher.in_flight()
    }

    pub fn stats(&self) -> DispatchSnapshot {
        self.dispatcher.stats()
    }

    /// Stops accepting and dispatching work, then waits for running items.
    /// Units still queued are dropped; their items remain `Pending`.
    pub async fn shutdown(self) -> DispatchSnapshot {
        self.shutdown.cancel();
        self.queue.close();
        let stats = self.dispatcher.shutdown().await;
        info!(
            dispatched = stats.dispatched,
            completed = stats.completed,
            panicked = stats.panicked,
            "Engine stopped"
        );
        stats
    }
}
