//! Executes one work unit: claims the item, performs the lookup and records
//! the outcome.
//!
//! Lookup failures of any kind, a panicking lookup included, become the
//! item's `Failed` state. Only storage errors are
//! returned to the caller, since they leave nothing to record the outcome in.

use crate::model::{GeoLocation, ItemCompletion, ItemOutcome, ItemStatus};
use crate::traits::{BatchStore, GeoLookup, LookupError, StoreError};
use chrono::Utc;
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

pub const DEFAULT_LOOKUP_TIMEOUT: Duration = Duration::from_secs(10);

/// What happened to the item when the processor ran.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessReport {
    /// The item had already left `Pending`; nothing was done.
    Skipped,
    Finished { status: ItemStatus, duration_ms: u64 },
}

pub struct ItemProcessor {
    store: Arc<dyn BatchStore>,
    lookup: Arc<dyn GeoLookup>,
    lookup_timeout: Duration,
}

impl ItemProcessor {
    pub fn new(store: Arc<dyn BatchStore>, lookup: Arc<dyn GeoLookup>) -> Self {
        Self {
            store,
            lookup,
            lookup_timeout: DEFAULT_LOOKUP_TIMEOUT,
        }
    }

    /// Sets the upper bound for a single lookup.
    pub fn with_timeout(mut self, lookup_timeout: Duration) -> Self {
        self.lookup_timeout = lookup_timeout;
        self
    }

    #[instrument(skip(self, cancel), fields(provider = self.lookup.provider()))]
    pub async fn process(
        &self,
        item_id: Uuid,
        cancel: CancellationToken,
    ) -> Result<ProcessReport, StoreError> {
        // Each invocation works through its own session.
        let mut session = self.store.session();

        let item = match session.claim_item(item_id, Utc::now()).await? {
            Some(item) => item,
            None => {
                debug!("Item already claimed, skipping");
                return Ok(ProcessReport::Skipped);
            }
        };

        let started = Instant::now();
        let outcome = match self.lookup_with_limits(&item.address, &cancel).await {
            Ok(geo) => ItemOutcome::Located(geo),
            Err(e) => {
                warn!(address = %item.address, error = %e, "Lookup failed");
                ItemOutcome::Failed(e.to_string())
            }
        };
        let duration_ms = started.elapsed().as_millis() as u64;

        let status = outcome.status();
        session
            .complete_item(
                item_id,
                ItemCompletion {
                    outcome,
                    completed_at: Utc::now(),
                    duration_ms,
                },
            )
            .await?;

        info!(
            batch_id = %item.batch_id,
            status = %status,
            duration_ms,
            "Item processed"
        );
        Ok(ProcessReport::Finished {
            status,
            duration_ms,
        })
    }

    async fn lookup_with_limits(
        &self,
        address: &str,
        cancel: &CancellationToken,
    ) -> Result<GeoLocation, LookupError> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(LookupError::Cancelled),
            result = timeout(
                self.lookup_timeout,
                AssertUnwindSafe(self.lookup.lookup(address)).catch_unwind(),
            ) => {
                match result.map_err(|_| LookupError::Timeout(self.lookup_timeout.as_millis() as u64))? {
                    Ok(lookup) => lookup,
                    Err(payload) => Err(LookupError::Panicked(panic_message(payload.as_ref()))),
                }
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Batch, BatchItem};
    use crate::store::MemoryStore;
    use crate::test_support::{FailingLookup, PanickingLookup, SlowLookup, StaticLookup};

    async fn seeded(store: &MemoryStore, address: &str) -> (Uuid, Uuid) {
        let batch = Batch::new(1);
        let item = BatchItem::pending(batch.id, address);
        let ids = (batch.id, item.id);
        store
            .session()
            .create_batch(batch, vec![item])
            .await
            .unwrap();
        ids
    }

    async fn reload(store: &MemoryStore, batch_id: Uuid) -> BatchItem {
        let mut items = store.session().load_items(batch_id).await.unwrap();
        items.remove(0)
    }

    #[tokio::test]
    async fn test_success_records_geo_fields() {
        let store = MemoryStore::new();
        let (batch_id, item_id) = seeded(&store, "8.8.8.8").await;
        let processor = ItemProcessor::new(Arc::new(store.clone()), Arc::new(StaticLookup));

        let report = processor
            .process(item_id, CancellationToken::new())
            .await
            .unwrap();
        assert!(matches!(
            report,
            ProcessReport::Finished {
                status: ItemStatus::Done,
                ..
            }
        ));

        let item = reload(&store, batch_id).await;
        assert_eq!(item.status, ItemStatus::Done);
        assert_eq!(item.country_code.as_deref(), Some("US"));
        assert!(item.error.is_none());
        assert!(item.started_at.is_some());
        assert!(item.completed_at.is_some());
        assert!(item.duration_ms.is_some());
    }

    #[tokio::test]
    async fn test_failure_is_recorded_not_returned() {
        let store = MemoryStore::new();
        let (batch_id, item_id) = seeded(&store, "1.1.1.1").await;
        let processor = ItemProcessor::new(Arc::new(store.clone()), Arc::new(FailingLookup));

        let report = processor.process(item_id, CancellationToken::new()).await;
        assert!(report.is_ok());

        let item = reload(&store, batch_id).await;
        assert_eq!(item.status, ItemStatus::Failed);
        assert!(item.error.as_deref().unwrap_or_default().contains("503"));
        assert!(item.country_code.is_none());
        assert!(item.latitude.is_none());
        assert!(item.duration_ms.is_some());
    }

    #[tokio::test]
    async fn test_timeout_fails_item() {
        let store = MemoryStore::new();
        let (batch_id, item_id) = seeded(&store, "1.1.1.1").await;
        let processor = ItemProcessor::new(
            Arc::new(store.clone()),
            Arc::new(SlowLookup(Duration::from_secs(5))),
        )
        .with_timeout(Duration::from_millis(20));

        processor
            .process(item_id, CancellationToken::new())
            .await
            .unwrap();

        let item = reload(&store, batch_id).await;
        assert_eq!(item.status, ItemStatus::Failed);
        assert!(item.error.unwrap().contains("timed out"));
    }

    #[tokio::test]
    async fn test_cancellation_fails_item() {
        let store = MemoryStore::new();
        let (batch_id, item_id) = seeded(&store, "1.1.1.1").await;
        let processor = ItemProcessor::new(
            Arc::new(store.clone()),
            Arc::new(SlowLookup(Duration::from_secs(5))),
        );
        let cancel = CancellationToken::new();
        cancel.cancel();

        processor.process(item_id, cancel).await.unwrap();

        let item = reload(&store, batch_id).await;
        assert_eq!(item.status, ItemStatus::Failed);
        assert_eq!(item.error.as_deref(), Some("Lookup cancelled"));
    }

    #[tokio::test]
    async fn test_panicking_lookup_fails_item() {
        let store = MemoryStore::new();
        let (batch_id, item_id) = seeded(&store, "9.9.9.9").await;
        let processor = ItemProcessor::new(Arc::new(store.clone()), Arc::new(PanickingLookup));

        let report = processor
            .process(item_id, CancellationToken::new())
            .await
            .unwrap();
        assert!(matches!(
            report,
            ProcessReport::Finished {
                status: ItemStatus::Failed,
                ..
            }
        ));

        let item = reload(&store, batch_id).await;
        assert_eq!(item.status, ItemStatus::Failed);
        assert_eq!(
            item.error.as_deref(),
            Some("Lookup panicked: geo service exploded")
        );
        assert!(item.duration_ms.is_some());
        assert!(item.completed_at.is_some());
    }

    #[tokio::test]
    async fn test_second_run_is_skipped() {
        let store = MemoryStore::new();
        let (batch_id, item_id) = seeded(&store, "8.8.8.8").await;
        let processor = ItemProcessor::new(Arc::new(store.clone()), Arc::new(StaticLookup));

        processor
            .process(item_id, CancellationToken::new())
            .await
            .unwrap();
        let again = processor
            .process(item_id, CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(again, ProcessReport::Skipped);
        assert_eq!(reload(&store, batch_id).await.status, ItemStatus::Done);
    }

    #[tokio::test]
    async fn test_unknown_item_is_a_store_error() {
        let store = MemoryStore::new();
        let processor = ItemProcessor::new(Arc::new(store), Arc::new(StaticLookup));

        let result = processor
            .process(Uuid::new_v4(), CancellationToken::new())
            .await;
        assert!(matches!(result, Err(StoreError::ItemNotFound(_))));
    }
}
