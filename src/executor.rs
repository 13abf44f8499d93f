use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

pub const DEFAULT_MAX_CONCURRENCY: usize = 5;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum LimiterError {
    #[error("Permit acquisition cancelled")]
    Cancelled,
    #[error("Limiter closed")]
    Closed,
}

/// Process-wide pool of execution permits.
///
/// A permit is released when the returned [`OwnedSemaphorePermit`] is
/// dropped, so a task that finishes, fails or panics always gives it back.
#[derive(Debug)]
pub struct ConcurrencyLimiter {
    semaphore: Arc<Semaphore>,
    capacity: usize,
}

impl ConcurrencyLimiter {
    pub fn new(capacity: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Permits not currently held by a running task.
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    #[instrument(level = "debug", skip(self, cancel))]
    pub async fn acquire(
        &self,
        cancel: &CancellationToken,
    ) -> Result<OwnedSemaphorePermit, LimiterError> {
        let permit = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(LimiterError::Cancelled),
            permit = self.semaphore.clone().acquire_owned() => {
                permit.map_err(|_| LimiterError::Closed)?
            }
        };

        debug!(available = self.available(), "Permit acquired");
        Ok(permit)
    }

    /// Stops handing out permits; pending and future acquires fail with `Closed`.
    pub fn close(&self) {
        self.semaphore.close();
    }
}

impl Default for ConcurrencyLimiter {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_CONCURRENCY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_acquire_until_exhausted() {
        let limiter = ConcurrencyLimiter::new(2);
        let cancel = CancellationToken::new();

        let first = limiter.acquire(&cancel).await.unwrap();
        let _second = limiter.acquire(&cancel).await.unwrap();
        assert_eq!(limiter.available(), 0);

        // A third acquire must wait until a permit is dropped.
        let blocked =
            tokio::time::timeout(Duration::from_millis(50), limiter.acquire(&cancel)).await;
        assert!(blocked.is_err());

        drop(first);
        let third = tokio::time::timeout(Duration::from_secs(1), limiter.acquire(&cancel)).await;
        assert!(third.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_cancelled_while_waiting() {
        let limiter = Arc::new(ConcurrencyLimiter::new(1));
        let cancel = CancellationToken::new();
        let _held = limiter.acquire(&cancel).await.unwrap();

        let waiter = {
            let limiter = limiter.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { limiter.acquire(&cancel).await.map(|_| ()) })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        cancel.cancel();

        assert_eq!(waiter.await.unwrap(), Err(LimiterError::Cancelled));
    }

    #[tokio::test]
    async fn test_closed_limiter_rejects() {
        let limiter = ConcurrencyLimiter::default();
        assert_eq!(limiter.capacity(), DEFAULT_MAX_CONCURRENCY);

        limiter.close();
        let result = limiter.acquire(&CancellationToken::new()).await;
        assert_eq!(result.err(), Some(LimiterError::Closed));
    }
}
