use crate::model::{Batch, BatchItem, GeoLocation, ItemCompletion};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum LookupError {
    #[error("Lookup request failed: {0}")]
    Http(String),
    #[error("Lookup service returned status {0}")]
    Status(u16),
    #[error("Malformed lookup response: {0}")]
    Malformed(String),
    #[error("Lookup timed out after {0}ms")]
    Timeout(u64),
    #[error("Lookup cancelled")]
    Cancelled,
    #[error("Lookup panicked: {0}")]
    Panicked(String),
}

impl From<reqwest::Error> for LookupError {
    fn from(err: reqwest::Error) -> Self {
        if let Some(status) = err.status() {
            LookupError::Status(status.as_u16())
        } else if err.is_decode() {
            LookupError::Malformed(err.to_string())
        } else {
            LookupError::Http(err.to_string())
        }
    }
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Batch not found: {0}")]
    BatchNotFound(Uuid),
    #[error("Item not found: {0}")]
    ItemNotFound(Uuid),
    #[error("Conflicting write: {0}")]
    Conflict(String),
    #[error("Storage backend error: {0}")]
    Backend(String),
}

/// External geolocation capability: given an address, return its location or fail.
#[async_trait]
pub trait GeoLookup: Send + Sync {
    /// Short identifier used in log fields (e.g. "freegeoip").
    fn provider(&self) -> &str;

    async fn lookup(&self, address: &str) -> Result<GeoLocation, LookupError>;
}

/// Persistent state for batches and their items.
///
/// Every concurrent task opens its own [`StoreSession`]; sessions are never
/// shared between tasks.
pub trait BatchStore: Send + Sync {
    fn session(&self) -> Box<dyn StoreSession>;
}

#[async_trait]
pub trait StoreSession: Send {
    /// Persists a batch together with all of its items, atomically.
    async fn create_batch(&mut self, batch: Batch, items: Vec<BatchItem>)
        -> Result<(), StoreError>;

    async fn load_batch(&mut self, batch_id: Uuid) -> Result<Option<Batch>, StoreError>;

    /// Items of a batch in submission order.
    async fn load_items(&mut self, batch_id: Uuid) -> Result<Vec<BatchItem>, StoreError>;

    /// Ids of the batch's items that are still `Pending`, in submission order.
    async fn pending_item_ids(&mut self, batch_id: Uuid) -> Result<Vec<Uuid>, StoreError>;

    /// Moves an item from `Pending` to `InProgress`.
    ///
    /// Returns `Ok(None)` when the item has already left `Pending`, which
    /// makes a second claim on the same item a no-op.
    async fn claim_item(
        &mut self,
        item_id: Uuid,
        started_at: DateTime<Utc>,
    ) -> Result<Option<BatchItem>, StoreError>;

    /// Records the terminal outcome of an `InProgress` item.
    async fn complete_item(
        &mut self,
        item_id: Uuid,
        completion: ItemCompletion,
    ) -> Result<BatchItem, StoreError>;
}
