pub mod queue;
pub mod reconciler;
pub mod writer;

use serde::Serialize;
use uuid::Uuid;

use crate::backend::BackendError;

pub use queue::{DeadLetter, PendingEntry, PendingQueue};

/// Options controlling a reconciliation pass.
#[derive(Debug, Clone)]
pub struct SyncOptions {
    /// Move entries rejected with a permanent error (4xx other than 408/429)
    /// to the dead-letter list instead of retrying them on every pass.
    pub dead_letter_permanent: bool,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            dead_letter_permanent: true,
        }
    }
}

/// Report returned after a reconciliation pass completes.
#[derive(Debug, Clone, Serialize)]
pub struct SyncReport {
    pub status: SyncStatus,
    pub entries_total: usize,
    pub items_synced: u64,
    pub items_failed: u64,
    pub items_dead_lettered: u64,
    pub error: Option<String>,
}

impl SyncReport {
    /// Create a SyncReport with the appropriate status derived from counts.
    pub fn from_counts(
        entries_total: usize,
        items_synced: u64,
        items_failed: u64,
        items_dead_lettered: u64,
    ) -> Self {
        let not_delivered = items_failed + items_dead_lettered;
        let status = if not_delivered == 0 {
            SyncStatus::Success
        } else if items_synced > 0 {
            SyncStatus::PartialFailure
        } else {
            SyncStatus::Failed
        };
        let error = match (items_failed, items_dead_lettered) {
            (0, 0) => None,
            (f, 0) => Some(format!("{f} items failed")),
            (0, d) => Some(format!("{d} items dead-lettered")),
            (f, d) => Some(format!("{f} items failed, {d} items dead-lettered")),
        };
        Self {
            status,
            entries_total,
            items_synced,
            items_failed,
            items_dead_lettered,
            error,
        }
    }

    /// Report for a pass that found nothing to deliver.
    pub fn idle() -> Self {
        Self::from_counts(0, 0, 0, 0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum SyncStatus {
    Success,
    PartialFailure,
    Failed,
}

/// Callbacks for observing a reconciliation pass. All methods default to no-ops.
pub trait SyncProgress: Send + Sync {
    fn on_pass_start(&self, _total: usize) {}

    fn on_entry_start(&self, _id: Uuid, _index: usize, _total: usize) {}

    fn on_entry_synced(&self, _id: Uuid) {}

    fn on_entry_failed(&self, _id: Uuid, _error: &BackendError) {}

    fn on_entry_dead_lettered(&self, _id: Uuid, _error: &BackendError) {}

    fn on_pass_complete(&self, _report: &SyncReport) {}
}

/// Progress reporter that ignores every event.
pub struct NoopProgress;

impl SyncProgress for NoopProgress {}
