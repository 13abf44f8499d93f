//! Bounded FIFO of deferred work units.
//!
//! Producers suspend in [`WorkQueue::enqueue`] while the queue is full, so
//! work is never dropped; the single consumer suspends in
//! [`WorkQueue::dequeue`] while it is empty.

use futures::future::BoxFuture;
use futures::FutureExt;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

pub const DEFAULT_QUEUE_CAPACITY: usize = 1000;

/// Deferred action: receives a cancellation signal when it is run.
pub type WorkUnit = Box<dyn FnOnce(CancellationToken) -> BoxFuture<'static, ()> + Send + 'static>;

/// Boxes an async closure into a [`WorkUnit`].
pub fn work_unit<F, Fut>(f: F) -> WorkUnit
where
    F: FnOnce(CancellationToken) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    Box::new(move |cancel| f(cancel).boxed())
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum QueueError {
    #[error("Queue operation cancelled")]
    Cancelled,
    #[error("Queue closed")]
    Closed,
}

pub struct WorkQueue {
    sender: Mutex<Option<mpsc::Sender<WorkUnit>>>,
    receiver: tokio::sync::Mutex<mpsc::Receiver<WorkUnit>>,
    /// Units sent and not yet received; survives `close`.
    queued: AtomicUsize,
    capacity: usize,
}

impl WorkQueue {
    pub fn new(capacity: usize) -> Self {
        let (sender, receiver) = mpsc::channel(capacity);
        Self {
            sender: Mutex::new(Some(sender)),
            receiver: tokio::sync::Mutex::new(receiver),
            queued: AtomicUsize::new(0),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of units waiting to be dequeued, including those still
    /// buffered after [`close`](Self::close).
    pub fn len(&self) -> usize {
        self.queued.load(Ordering::SeqCst)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn sender(&self) -> Result<mpsc::Sender<WorkUnit>, QueueError> {
        self.sender
            .lock()
            .map_err(|_| QueueError::Closed)?
            .clone()
            .ok_or(QueueError::Closed)
    }

    /// Appends a unit, waiting for free capacity if the queue is full.
    pub async fn enqueue(
        &self,
        unit: WorkUnit,
        cancel: &CancellationToken,
    ) -> Result<(), QueueError> {
        let sender = self.sender()?;

        let slot = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(QueueError::Cancelled),
            slot = sender.reserve() => slot.map_err(|_| QueueError::Closed)?,
        };

        // Counted before the unit becomes visible to the consumer.
        self.queued.fetch_add(1, Ordering::SeqCst);
        slot.send(unit);
        Ok(())
    }

    /// Takes the oldest unit, waiting until one is available.
    ///
    /// After [`close`](Self::close), units already queued are still handed
    /// out; `Closed` is returned once the queue is drained.
    pub async fn dequeue(&self, cancel: &CancellationToken) -> Result<WorkUnit, QueueError> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(QueueError::Cancelled),
            unit = async { self.receiver.lock().await.recv().await } => {
                let unit = unit.ok_or(QueueError::Closed)?;
                self.queued.fetch_sub(1, Ordering::SeqCst);
                Ok(unit)
            }
        }
    }

    /// Rejects further enqueues.
    pub fn close(&self) {
        if let Ok(mut sender) = self.sender.lock() {
            sender.take();
        }
    }
}

impl Default for WorkQueue {
    fn default() -> Self {
        Self::new(DEFAULT_QUEUE_CAPACITY)
    }
}
