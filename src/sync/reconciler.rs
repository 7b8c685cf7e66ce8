use chrono::Utc;

use crate::backend::RemoteBackend;
use crate::sync::queue::{DeadLetter, PendingEntry, PendingQueue};
use crate::sync::{SyncOptions, SyncProgress, SyncReport};

/// Replay every queued entry against the backend, one at a time.
///
/// Each entry's outcome is independent. Delivered entries (and, when
/// enabled, permanently rejected ones) leave the queue in a single batch at
/// the end of the pass; everything else stays queued in its original order.
/// An entry rewritten while the pass was running stays queued.
/// The pass itself never fails: the outcome is in the report.
pub async fn sync_pending(
    queue: &PendingQueue,
    backend: &dyn RemoteBackend,
    options: &SyncOptions,
    progress: &dyn SyncProgress,
) -> SyncReport {
    let entries = queue.entries().await;
    if entries.is_empty() {
        log::debug!("Pending queue empty, nothing to sync");
        return SyncReport::idle();
    }

    let total = entries.len();
    log::info!("Syncing {total} pending records");
    progress.on_pass_start(total);

    let mut settled: Vec<PendingEntry> = Vec::new();
    let mut dead: Vec<DeadLetter> = Vec::new();
    let mut items_synced: u64 = 0;
    let mut items_failed: u64 = 0;

    for (i, entry) in entries.into_iter().enumerate() {
        progress.on_entry_start(entry.id, i, total);

        match backend.upsert(&entry.payload).await {
            Ok(_) => {
                log::debug!("Delivered queued {} {}", entry.record_kind, entry.id);
                progress.on_entry_synced(entry.id);
                settled.push(entry);
                items_synced += 1;
            }
            Err(e) if options.dead_letter_permanent && e.is_permanent() => {
                progress.on_entry_dead_lettered(entry.id, &e);
                dead.push(DeadLetter {
                    entry: entry.clone(),
                    error: e.to_string(),
                    failed_at: Utc::now(),
                });
                settled.push(entry);
            }
            Err(e) => {
                log::warn!(
                    "Replay of {} {} failed, keeping it queued: {e}",
                    entry.record_kind,
                    entry.id
                );
                progress.on_entry_failed(entry.id, &e);
                items_failed += 1;
            }
        }
    }

    let items_dead_lettered = dead.len() as u64;
    queue.record_dead_letters(dead).await;
    queue.remove_settled(&settled).await;

    let report = SyncReport::from_counts(total, items_synced, items_failed, items_dead_lettered);
    log::info!(
        "Sync pass finished: {} synced, {} still pending, {} dead-lettered",
        report.items_synced,
        report.items_failed,
        report.items_dead_lettered
    );
    progress.on_pass_complete(&report);
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::fake::FakeBackend;
    use crate::backend::BackendError;
    use crate::record::{DiaperType, FeedingType, RecordDraft, SleepType};
    use crate::record::{Record, RecordDetails, RecordKind};
    use crate::storage::Database;
    use crate::sync::{NoopProgress, SyncStatus};
    use async_trait::async_trait;
    use std::sync::Arc;
    use std::sync::Mutex;
    use uuid::Uuid;

    fn entry(n: u128) -> PendingEntry {
        let draft = match n % 3 {
            0 => RecordDraft::feeding("baby1", "mom", FeedingType::Pumped, Utc::now()),
            1 => RecordDraft::sleep("baby1", "mom", SleepType::Night, Utc::now()),
            _ => RecordDraft::diaper("baby1", "mom", DiaperType::Both, Utc::now()),
        };
        PendingEntry::new(draft.finalize(Uuid::from_u128(n), Utc::now()).unwrap(), Utc::now())
    }

    async fn queue_with(db: &Database, ns: &[u128]) -> PendingQueue {
        let queue = PendingQueue::new(Arc::new(db.clone()));
        for &n in ns {
            queue.append(entry(n)).await;
        }
        queue
    }

    fn transient() -> BackendError {
        BackendError::Status {
            status: 500,
            message: "upstream down".into(),
        }
    }

    fn permanent() -> BackendError {
        BackendError::Status {
            status: 400,
            message: "violates foreign key constraint".into(),
        }
    }

    #[tokio::test]
    async fn test_empty_queue_makes_no_calls() {
        let db = Database::open_memory().await.unwrap();
        let queue = queue_with(&db, &[]).await;
        let backend = FakeBackend::new();

        let report = sync_pending(&queue, &backend, &SyncOptions::default(), &NoopProgress).await;
        assert_eq!(backend.calls(), 0);
        assert_eq!(report.entries_total, 0);
        assert_eq!(report.status, SyncStatus::Success);
    }

    #[tokio::test]
    async fn test_partial_pass_keeps_failures_in_order() {
        let db = Database::open_memory().await.unwrap();
        let queue = queue_with(&db, &[1, 2, 3, 4, 5]).await;
        let before = queue.entries().await;
        let backend = FakeBackend::new();
        backend.fail_id(Uuid::from_u128(2), transient());
        backend.fail_id(Uuid::from_u128(4), BackendError::Timeout);

        let report = sync_pending(&queue, &backend, &SyncOptions::default(), &NoopProgress).await;
        assert_eq!(backend.calls(), 5);
        assert_eq!(report.items_synced, 3);
        assert_eq!(report.items_failed, 2);
        assert_eq!(report.status, SyncStatus::PartialFailure);

        let persisted = PendingQueue::new(Arc::new(db)).load_all().await;
        let ids: Vec<Uuid> = persisted.iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![Uuid::from_u128(2), Uuid::from_u128(4)]);
        // Failed entries are left exactly as queued.
        assert_eq!(persisted[0], before[1]);
        assert_eq!(persisted[1], before[3]);
    }

    #[tokio::test]
    async fn test_fail_then_succeed_empties_queue() {
        let db = Database::open_memory().await.unwrap();
        let queue = queue_with(&db, &[3]).await;
        let backend = FakeBackend::new();
        backend.set_offline(true);

        let first = sync_pending(&queue, &backend, &SyncOptions::default(), &NoopProgress).await;
        assert_eq!(first.status, SyncStatus::Failed);
        assert_eq!(queue.len().await, 1);

        backend.set_offline(false);
        let second = sync_pending(&queue, &backend, &SyncOptions::default(), &NoopProgress).await;
        assert_eq!(second.status, SyncStatus::Success);
        assert!(queue.is_empty().await);
        assert!(backend.row(Uuid::from_u128(3)).is_some());
        assert!(PendingQueue::new(Arc::new(db)).load_all().await.is_empty());
    }

    #[tokio::test]
    async fn test_replaying_delivered_entry_does_not_duplicate() {
        let db = Database::open_memory().await.unwrap();
        let queue = queue_with(&db, &[1]).await;
        let backend = FakeBackend::new();

        // Row already reached the server before the entry was cleared.
        backend.upsert(&entry(1).payload).await.unwrap();
        sync_pending(&queue, &backend, &SyncOptions::default(), &NoopProgress).await;

        assert_eq!(backend.row_count(), 1);
        assert!(queue.is_empty().await);
    }

    #[tokio::test]
    async fn test_permanent_failure_is_dead_lettered() {
        let db = Database::open_memory().await.unwrap();
        let queue = queue_with(&db, &[1, 2]).await;
        let backend = FakeBackend::new();
        backend.fail_id(Uuid::from_u128(1), permanent());

        let report = sync_pending(&queue, &backend, &SyncOptions::default(), &NoopProgress).await;
        assert_eq!(report.items_synced, 1);
        assert_eq!(report.items_dead_lettered, 1);
        assert!(queue.is_empty().await);

        let reopened = PendingQueue::new(Arc::new(db));
        let dead = reopened.dead_letters().await;
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].entry.id, Uuid::from_u128(1));
        assert!(dead[0].error.contains("400"));
    }

    #[tokio::test]
    async fn test_permanent_failure_retried_when_dead_lettering_off() {
        let db = Database::open_memory().await.unwrap();
        let queue = queue_with(&db, &[1]).await;
        let backend = FakeBackend::new();
        backend.fail_id(Uuid::from_u128(1), permanent());
        let options = SyncOptions {
            dead_letter_permanent: false,
        };

        let report = sync_pending(&queue, &backend, &options, &NoopProgress).await;
        assert_eq!(report.items_failed, 1);
        assert_eq!(queue.len().await, 1);
        assert!(queue.dead_letters().await.is_empty());
    }

    #[derive(Default)]
    struct RecordingProgress {
        events: Mutex<Vec<String>>,
    }

    impl SyncProgress for RecordingProgress {
        fn on_pass_start(&self, total: usize) {
            self.events.lock().unwrap().push(format!("start {total}"));
        }

        fn on_entry_synced(&self, id: Uuid) {
            self.events.lock().unwrap().push(format!("ok {}", id.as_u128()));
        }

        fn on_entry_failed(&self, id: Uuid, _error: &BackendError) {
            self.events.lock().unwrap().push(format!("fail {}", id.as_u128()));
        }

        fn on_pass_complete(&self, report: &SyncReport) {
            self.events
                .lock()
                .unwrap()
                .push(format!("done {}", report.items_synced));
        }
    }

    #[tokio::test]
    async fn test_progress_events() {
        let db = Database::open_memory().await.unwrap();
        let queue = queue_with(&db, &[1, 2]).await;
        let backend = FakeBackend::new();
        backend.fail_id(Uuid::from_u128(2), transient());
        let progress = RecordingProgress::default();

        sync_pending(&queue, &backend, &SyncOptions::default(), &progress).await;
        assert_eq!(
            *progress.events.lock().unwrap(),
            vec!["start 2", "ok 1", "fail 2", "done 1"]
        );
    }

    /// Backend that lets a writer replace the queued entry while its older
    /// payload is in flight.
    struct RewriteDuringUpsert {
        queue: Arc<PendingQueue>,
        rewrite: Mutex<Option<PendingEntry>>,
        inner: FakeBackend,
    }

    #[async_trait]
    impl RemoteBackend for RewriteDuringUpsert {
        async fn upsert(&self, record: &Record) -> Result<Record, BackendError> {
            let rewrite = self.rewrite.lock().unwrap().take();
            if let Some(newer) = rewrite {
                self.queue.append(newer).await;
            }
            self.inner.upsert(record).await
        }

        async fn delete(&self, kind: RecordKind, id: Uuid) -> Result<(), BackendError> {
            self.inner.delete(kind, id).await
        }
    }

    #[tokio::test]
    async fn test_entry_rewritten_mid_pass_stays_queued() {
        let db = Database::open_memory().await.unwrap();
        let queue = Arc::new(queue_with(&db, &[3]).await);

        let mut newer = entry(3);
        if let RecordDetails::Feeding(d) = &mut newer.payload.details {
            d.amount_ml = Some(120);
        }
        let backend = RewriteDuringUpsert {
            queue: Arc::clone(&queue),
            rewrite: Mutex::new(Some(newer.clone())),
            inner: FakeBackend::new(),
        };

        let report = sync_pending(&queue, &backend, &SyncOptions::default(), &NoopProgress).await;
        assert_eq!(report.items_synced, 1);
        let persisted = PendingQueue::new(Arc::new(db.clone())).load_all().await;
        assert_eq!(persisted, vec![newer.clone()]);

        // The next pass delivers the rewrite.
        sync_pending(&queue, &backend, &SyncOptions::default(), &NoopProgress).await;
        assert!(queue.is_empty().await);
        assert_eq!(backend.inner.row(newer.id), Some(newer.payload));
    }
}
