use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Label written on every batch at creation time.
pub const BATCH_STATUS_QUEUED: &str = "Queued";

/// Lifecycle of a single item. Transitions only move forward:
/// `Pending -> InProgress -> {Done | Failed}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ItemStatus {
    Pending,
    InProgress,
    Done,
    Failed,
}

impl ItemStatus {
    /// `Done` and `Failed` admit no further transition.
    pub fn is_terminal(self) -> bool {
        matches!(self, ItemStatus::Done | ItemStatus::Failed)
    }
}

impl fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ItemStatus::Pending => "Pending",
            ItemStatus::InProgress => "InProgress",
            ItemStatus::Done => "Done",
            ItemStatus::Failed => "Failed",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeoLocation {
    pub ip: String,
    pub country_code: String,
    pub country_name: String,
    pub time_zone: String,
    pub latitude: f64,
    pub longitude: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Batch {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    /// Number of items submitted; fixed at creation.
    pub total: usize,
    pub status: String,
}

impl Batch {
    pub fn new(total: usize) -> Self {
        Self {
            id: Uuid::new_v4(),
            created_at: Utc::now(),
            total,
            status: BATCH_STATUS_QUEUED.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchItem {
    pub id: Uuid,
    pub batch_id: Uuid,
    pub address: String,
    pub status: ItemStatus,

    // Geo data, filled only on Done
    pub country_code: Option<String>,
    pub country_name: Option<String>,
    pub time_zone: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,

    // Diagnostics
    pub error: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<u64>,
}

impl BatchItem {
    pub fn pending(batch_id: Uuid, address: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            batch_id,
            address: address.into(),
            status: ItemStatus::Pending,
            country_code: None,
            country_name: None,
            time_zone: None,
            latitude: None,
            longitude: None,
            error: None,
            started_at: None,
            completed_at: None,
            duration_ms: None,
        }
    }

    /// Applies a terminal outcome. Geo fields and `error` are mutually
    /// exclusive, so each branch clears the other side.
    pub fn apply_completion(&mut self, completion: &ItemCompletion) {
        match &completion.outcome {
            ItemOutcome::Located(geo) => {
                self.status = ItemStatus::Done;
                self.country_code = Some(geo.country_code.clone());
                self.country_name = Some(geo.country_name.clone());
                self.time_zone = Some(geo.time_zone.clone());
                self.latitude = Some(geo.latitude);
                self.longitude = Some(geo.longitude);
                self.error = None;
            }
            ItemOutcome::Failed(message) => {
                self.status = ItemStatus::Failed;
                self.country_code = None;
                self.country_name = None;
                self.time_zone = None;
                self.latitude = None;
                self.longitude = None;
                self.error = Some(message.clone());
            }
        }
        self.completed_at = Some(completion.completed_at);
        self.duration_ms = Some(completion.duration_ms);
    }
}

/// Result of one lookup, as recorded on the item.
#[derive(Debug, Clone, PartialEq)]
pub enum ItemOutcome {
    Located(GeoLocation),
    Failed(String),
}

impl ItemOutcome {
    pub fn status(&self) -> ItemStatus {
        match self {
            ItemOutcome::Located(_) => ItemStatus::Done,
            ItemOutcome::Failed(_) => ItemStatus::Failed,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ItemCompletion {
    pub outcome: ItemOutcome,
    pub completed_at: DateTime<Utc>,
    pub duration_ms: u64,
}

/// Returned by a successful submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitReceipt {
    pub batch_id: Uuid,
    pub status_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchStatusReport {
    pub batch_id: Uuid,
    /// `"processed/total"`, e.g. `"20/100"`
    pub progress: String,
    pub processed: usize,
    pub total: usize,
    /// `None` while no item has a recorded duration yet.
    pub eta_seconds: Option<u64>,
    pub status: String,
    pub items: Vec<ItemReport>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemReport {
    pub address: String,
    pub status: ItemStatus,
    pub country_code: Option<String>,
    pub country_name: Option<String>,
    pub time_zone: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub error: Option<String>,
    pub duration_ms: Option<u64>,
}

impl From<&BatchItem> for ItemReport {
    fn from(item: &BatchItem) -> Self {
        Self {
            address: item.address.clone(),
            status: item.status,
            country_code: item.country_code.clone(),
            country_name: item.country_name.clone(),
            time_zone: item.time_zone.clone(),
            latitude: item.latitude,
            longitude: item.longitude,
            error: item.error.clone(),
            duration_ms: item.duration_ms,
        }
    }
}
