//! In-process [`BatchStore`] backed by shared tables.
//!
//! Each [`MemorySession`] is an independent handle onto the tables; every
//! operation takes the table lock for exactly one write, so concurrent item
//! updates never interleave within a row.

use crate::model::{Batch, BatchItem, ItemCompletion, ItemStatus};
use crate::traits::{BatchStore, StoreError, StoreSession};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Debug, Default)]
struct Tables {
    batches: HashMap<Uuid, Batch>,
    items: HashMap<Uuid, BatchItem>,
    /// Item ids per batch, in submission order.
    batch_items: HashMap<Uuid, Vec<Uuid>>,
}

#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    tables: Arc<RwLock<Tables>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl BatchStore for MemoryStore {
    fn session(&self) -> Box<dyn StoreSession> {
        Box::new(MemorySession {
            tables: self.tables.clone(),
        })
    }
}

pub struct MemorySession {
    tables: Arc<RwLock<Tables>>,
}

#[async_trait]
impl StoreSession for MemorySession {
    async fn create_batch(
        &mut self,
        batch: Batch,
        items: Vec<BatchItem>,
    ) -> Result<(), StoreError> {
        if items.len() != batch.total {
            return Err(StoreError::Conflict(format!(
                "batch {} declares {} items but {} were supplied",
                batch.id,
                batch.total,
                items.len()
            )));
        }
        if let Some(stray) = items.iter().find(|item| item.batch_id != batch.id) {
            return Err(StoreError::Conflict(format!(
                "item {} belongs to batch {}",
                stray.id, stray.batch_id
            )));
        }

        let mut tables = self.tables.write().await;
        if tables.batches.contains_key(&batch.id) {
            return Err(StoreError::Conflict(format!("batch {} already exists", batch.id)));
        }

        let ids: Vec<Uuid> = items.iter().map(|item| item.id).collect();
        for item in items {
            tables.items.insert(item.id, item);
        }
        tables.batch_items.insert(batch.id, ids);
        tables.batches.insert(batch.id, batch);
        Ok(())
    }

    async fn load_batch(&mut self, batch_id: Uuid) -> Result<Option<Batch>, StoreError> {
        Ok(self.tables.read().await.batches.get(&batch_id).cloned())
    }

    async fn load_items(&mut self, batch_id: Uuid) -> Result<Vec<BatchItem>, StoreError> {
        let tables = self.tables.read().await;
        let ids = tables
            .batch_items
            .get(&batch_id)
            .ok_or(StoreError::BatchNotFound(batch_id))?;

        Ok(ids
            .iter()
            .filter_map(|id| tables.items.get(id).cloned())
            .collect())
    }

    async fn pending_item_ids(&mut self, batch_id: Uuid) -> Result<Vec<Uuid>, StoreError> {
        let tables = self.tables.read().await;
        let ids = tables
            .batch_items
            .get(&batch_id)
            .ok_or(StoreError::BatchNotFound(batch_id))?;

        Ok(ids
            .iter()
            .filter(|id| {
                tables
                    .items
                    .get(*id)
                    .is_some_and(|item| item.status == ItemStatus::Pending)
            })
            .copied()
            .collect())
    }

    async fn claim_item(
        &mut self,
        item_id: Uuid,
        started_at: DateTime<Utc>,
    ) -> Result<Option<BatchItem>, StoreError> {
        let mut tables = self.tables.write().await;
        let item = tables
            .items
            .get_mut(&item_id)
            .ok_or(StoreError::ItemNotFound(item_id))?;

        if item.status != ItemStatus::Pending {
            return Ok(None);
        }

        item.status = ItemStatus::InProgress;
        item.started_at = Some(started_at);
        Ok(Some(item.clone()))
    }

    async fn complete_item(
        &mut self,
        item_id: Uuid,
        completion: ItemCompletion,
    ) -> Result<BatchItem, StoreError> {
        let mut tables = self.tables.write().await;
        let item = tables
            .items
            .get_mut(&item_id)
            .ok_or(StoreError::ItemNotFound(item_id))?;

        if item.status != ItemStatus::InProgress {
            return Err(StoreError::Conflict(format!(
                "item {} is {}, expected InProgress",
                item_id, item.status
            )));
        }

        item.apply_completion(&completion);
        Ok(item.clone())
    }
}
