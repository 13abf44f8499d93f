//! Submission and status operations over the engine.
//!
//! Transport-agnostic: an HTTP layer maps [`ServiceError`] variants to
//! response codes (validation -> 400, not found -> 404, lookup -> 503).

use crate::engine::{estimate, BatchEnqueuer, EnqueueError};
use crate::model::{
    Batch, BatchItem, BatchStatusReport, GeoLocation, ItemReport, SubmitReceipt,
};
use crate::traits::{BatchStore, GeoLookup, LookupError, StoreError};
use std::net::IpAddr;
use std::sync::Arc;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument};
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Provide at least one IP.")]
    EmptyRequest,
    #[error("No valid IPs.")]
    NoValidAddresses,
    #[error("Invalid IP address format: {0}")]
    InvalidAddress(String),
    #[error("Batch not found: {0}")]
    NotFound(Uuid),
    #[error("Storage error: {0}")]
    Store(#[from] StoreError),
    #[error("Lookup unavailable: {0}")]
    Lookup(#[from] LookupError),
}

/// Trims and parses `raw`; `None` when it is blank or not an IP address.
pub fn normalize_address(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    trimmed.parse::<IpAddr>().ok().map(|_| trimmed.to_string())
}

/// A submitted batch plus the task feeding it to the queue.
pub struct Submission {
    pub receipt: SubmitReceipt,
    pub enqueue: JoinHandle<Result<usize, EnqueueError>>,
}

pub struct BatchService {
    store: Arc<dyn BatchStore>,
    lookup: Arc<dyn GeoLookup>,
    enqueuer: Arc<BatchEnqueuer>,
    cancel: CancellationToken,
    public_base_url: String,
}

impl BatchService {
    pub fn new(
        store: Arc<dyn BatchStore>,
        lookup: Arc<dyn GeoLookup>,
        enqueuer: Arc<BatchEnqueuer>,
        public_base_url: impl Into<String>,
    ) -> Self {
        Self {
            store,
            lookup,
            enqueuer,
            cancel: CancellationToken::new(),
            public_base_url: public_base_url.into(),
        }
    }

    /// Token handed to enqueue tasks; cancelling it stops them waiting on a full queue.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn status_url(&self, batch_id: Uuid) -> String {
        format!(
            "{}/api/geoip/batch/{}/status",
            self.public_base_url.trim_end_matches('/'),
            batch_id
        )
    }

    /// Validates the addresses, persists the batch with one `Pending` item per
    /// valid address and starts enqueueing it in the background.
    ///
    /// Nothing is persisted when validation fails.
    #[instrument(skip_all, fields(submitted = addresses.len()))]
    pub async fn submit(&self, addresses: &[String]) -> Result<Submission, ServiceError> {
        if addresses.is_empty() {
            return Err(ServiceError::EmptyRequest);
        }

        let valid: Vec<String> = addresses
            .iter()
            .filter_map(|raw| normalize_address(raw))
            .collect();
        if valid.is_empty() {
            return Err(ServiceError::NoValidAddresses);
        }

        let batch = Batch::new(valid.len());
        let batch_id = batch.id;
        let items = valid
            .into_iter()
            .map(|address| BatchItem::pending(batch_id, address))
            .collect();

        self.store.session().create_batch(batch, items).await?;
        let enqueue = self.enqueuer.spawn_enqueue(batch_id, self.cancel.clone());

        info!(%batch_id, "Batch created");
        Ok(Submission {
            receipt: SubmitReceipt {
                batch_id,
                status_url: self.status_url(batch_id),
            },
            enqueue,
        })
    }

    #[instrument(skip(self))]
    pub async fn status(&self, batch_id: Uuid) -> Result<BatchStatusReport, ServiceError> {
        let mut session = self.store.session();
        let batch = session
            .load_batch(batch_id)
            .await?
            .ok_or(ServiceError::NotFound(batch_id))?;
        let items = session.load_items(batch_id).await?;

        let progress = estimate(&batch, &items);

        Ok(BatchStatusReport {
            batch_id: batch.id,
            progress: format!("{}/{}", progress.processed, batch.total),
            processed: progress.processed,
            total: batch.total,
            eta_seconds: progress.eta_seconds,
            status: batch.status,
            items: items.iter().map(ItemReport::from).collect(),
        })
    }

    /// Direct lookup of a single address, outside any batch.
    #[instrument(skip(self))]
    pub async fn lookup(&self, address: &str) -> Result<GeoLocation, ServiceError> {
        if address.trim().is_empty() {
            return Err(ServiceError::InvalidAddress("IP is required".to_string()));
        }
        let address =
            normalize_address(address).ok_or_else(|| ServiceError::InvalidAddress(address.to_string()))?;

        Ok(self.lookup.lookup(&address).await?)
    }
}
