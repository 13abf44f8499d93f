//! Long-running worker loop that drains the [`WorkQueue`] under the
//! [`ConcurrencyLimiter`].
//!
//! The loop only waits on two things: the next unit and a free permit. Each
//! unit runs as its own task holding its permit, so a slow or failing unit
//! never blocks dequeuing beyond the concurrency cap.

use crate::engine::queue::{QueueError, WorkQueue};
use crate::executor::ConcurrencyLimiter;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{error, info, instrument, warn};

/// Counters updated by the loop and its spawned units.
#[derive(Debug, Default)]
pub struct DispatchStats {
    dispatched: AtomicU64,
    completed: AtomicU64,
    panicked: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchSnapshot {
    /// Units handed a permit and launched
    pub dispatched: u64,
    /// Units that ran to completion
    pub completed: u64,
    /// Units that panicked; their permit was still returned
    pub panicked: u64,
}

impl DispatchStats {
    pub fn snapshot(&self) -> DispatchSnapshot {
        DispatchSnapshot {
            dispatched: self.dispatched.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            panicked: self.panicked.load(Ordering::Relaxed),
        }
    }
}

pub struct Dispatcher {
    queue: Arc<WorkQueue>,
    limiter: Arc<ConcurrencyLimiter>,
    stats: Arc<DispatchStats>,
    tracker: TaskTracker,
    /// Handed to every unit. Independent of the shutdown signal so that
    /// in-flight units run to completion by default.
    work_cancel: CancellationToken,
}

impl Dispatcher {
    pub fn new(queue: Arc<WorkQueue>, limiter: Arc<ConcurrencyLimiter>) -> Self {
        Self {
            queue,
            limiter,
            stats: Arc::new(DispatchStats::default()),
            tracker: TaskTracker::new(),
            work_cancel: CancellationToken::new(),
        }
    }

    /// Starts the loop on the runtime. The loop stops when `shutdown` fires.
    pub fn spawn(self, shutdown: CancellationToken) -> DispatcherHandle {
        let tracker = self.tracker.clone();
        let stats = self.stats.clone();
        let work_cancel = self.work_cancel.clone();
        let join = tokio::spawn(self.run(shutdown.clone()));

        DispatcherHandle {
            join,
            tracker,
            stats,
            shutdown,
            work_cancel,
        }
    }

    #[instrument(name = "dispatcher", skip_all)]
    pub async fn run(self, shutdown: CancellationToken) {
        info!(
            queue_capacity = self.queue.capacity(),
            max_concurrency = self.limiter.capacity(),
            "Dispatcher started"
        );

        loop {
            let unit = match self.queue.dequeue(&shutdown).await {
                Ok(unit) => unit,
                Err(QueueError::Cancelled) => break,
                Err(QueueError::Closed) => {
                    info!("Work queue closed");
                    break;
                }
            };

            let permit = match self.limiter.acquire(&shutdown).await {
                Ok(permit) => permit,
                Err(e) => {
                    warn!(error = %e, "Stopped while waiting for a permit; dequeued unit not run");
                    break;
                }
            };

            self.stats.dispatched.fetch_add(1, Ordering::Relaxed);
            let stats = self.stats.clone();
            let work_cancel = self.work_cancel.clone();

            self.tracker.spawn(async move {
                let _permit = permit;
                let outcome = AssertUnwindSafe(async move { unit(work_cancel).await })
                    .catch_unwind()
                    .await;

                match outcome {
                    Ok(()) => {
                        stats.completed.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(_) => {
                        stats.panicked.fetch_add(1, Ordering::Relaxed);
                        error!("Work unit panicked");
                    }
                }
            });
        }

        info!(in_flight = self.tracker.len(), "Dispatcher stopped");
    }
}

/// Owner's view of a running [`Dispatcher`].
pub struct DispatcherHandle {
    join: JoinHandle<()>,
    tracker: TaskTracker,
    stats: Arc<DispatchStats>,
    shutdown: CancellationToken,
    work_cancel: CancellationToken,
}

impl DispatcherHandle {
    pub fn stats(&self) -> DispatchSnapshot {
        self.stats.snapshot()
    }

    /// Units launched and not yet finished.
    pub fn in_flight(&self) -> usize {
        self.tracker.len()
    }

    pub fn is_running(&self) -> bool {
        !self.join.is_finished()
    }

    /// Stops the loop, then waits for units already launched to finish.
    pub async fn shutdown(self) -> DispatchSnapshot {
        self.shutdown.cancel();
        if let Err(e) = self.join.await {
            error!(error = %e, "Dispatcher task failed");
        }

        self.tracker.close();
        self.tracker.wait().await;
        self.stats.snapshot()
    }

    /// Like [`shutdown`](Self::shutdown), but also signals in-flight units.
    pub async fn abort(self) -> DispatchSnapshot {
        self.work_cancel.cancel();
        self.shutdown().await
    }
}
