use crate::model::{Batch, BatchItem};

/// Snapshot of a batch's progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    /// Items in a terminal state
    pub processed: usize,
    /// `total - processed`, never negative
    pub remaining: usize,
    /// `None` while no processed item has a recorded duration
    pub eta_seconds: Option<u64>,
}

/// Computes processed count and estimated seconds to completion.
///
/// Pure: the same batch and items always yield the same [`Progress`].
pub fn estimate(batch: &Batch, items: &[BatchItem]) -> Progress {
    let processed: Vec<&BatchItem> = items
        .iter()
        .filter(|item| item.status.is_terminal())
        .collect();
    let remaining = batch.total.saturating_sub(processed.len());

    let durations: Vec<u64> = processed.iter().filter_map(|item| item.duration_ms).collect();

    let eta_seconds = if remaining == 0 {
        Some(0)
    } else if durations.is_empty() {
        None
    } else {
        let avg_ms = durations.iter().sum::<u64>() as f64 / durations.len() as f64;
        Some(eta_from_average(avg_ms, remaining))
    };

    Progress {
        processed: processed.len(),
        remaining,
        eta_seconds,
    }
}

fn eta_from_average(avg_ms: f64, remaining: usize) -> u64 {
    let eta_ms = avg_ms.ceil() as u64 * remaining as u64;
    let seconds = eta_ms.div_ceil(1000);

    // Outstanding work never reports zero seconds.
    if avg_ms > 0.0 {
        seconds.max(1)
    } else {
        seconds
    }
}
