pub mod backend;
pub mod config;
pub mod error;
pub mod record;
pub mod storage;
pub mod sync;
pub mod timer;

use std::sync::Arc;

use uuid::Uuid;

pub use backend::{BackendError, OfflineBackend, RemoteBackend, RestBackend};
pub use config::{BackendConfig, Settings};
pub use error::{Error, Result};
pub use record::{
    DiaperType, FeedingType, IdGenerator, Record, RecordDetails, RecordDraft, RecordKind,
    RecordStore, SleepType, UuidV4,
};
pub use storage::{Database, KeyValueStore};
pub use sync::{
    DeadLetter, NoopProgress, PendingEntry, SyncOptions, SyncProgress, SyncReport, SyncStatus,
};
pub use timer::{Clock, StoppedTimer, SystemClock, TimerKind, TimerState, TimerStatus};

use sync::{reconciler, writer, PendingQueue};
use timer::ActiveTimer;

/// Offline-first logging context. Construct one at app start and keep it for
/// the life of the process.
pub struct CareLog {
    records: RecordStore,
    queue: PendingQueue,
    backend: Arc<dyn RemoteBackend>,
    ids: Arc<dyn IdGenerator>,
    timer: ActiveTimer,
}

impl CareLog {
    pub fn new(store: Arc<dyn KeyValueStore>, backend: Arc<dyn RemoteBackend>) -> Self {
        Self::with_parts(store, backend, Arc::new(UuidV4), Arc::new(SystemClock))
    }

    pub fn with_parts(
        store: Arc<dyn KeyValueStore>,
        backend: Arc<dyn RemoteBackend>,
        ids: Arc<dyn IdGenerator>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            records: RecordStore::new(),
            queue: PendingQueue::new(Arc::clone(&store)),
            backend,
            ids,
            timer: ActiveTimer::new(store, clock),
        }
    }

    /// Build a context over `db`, talking to the backend configured there
    /// (or in the environment). Without one, every write is queued.
    pub async fn open(db: Database) -> Result<Self> {
        let backend: Arc<dyn RemoteBackend> = match BackendConfig::load(&db).await? {
            Some(config) => {
                log::debug!("Using backend at {}", config.url);
                Arc::new(RestBackend::new(&config)?)
            }
            None => {
                log::info!("No backend configured; records will be queued locally");
                Arc::new(OfflineBackend)
            }
        };
        Ok(Self::new(Arc::new(db), backend))
    }

    /// Local record state.
    pub fn records(&self) -> &RecordStore {
        &self.records
    }

    // ── Lifecycle ──────────────────────────────────────────────────

    /// Load the persisted queue and timer without contacting the backend.
    /// Calling it again on a live context keeps queued entries that never
    /// reached storage.
    pub async fn load(&self) {
        let pending = self.queue.load_all().await;
        if !pending.is_empty() {
            log::info!("Loaded {} pending records", pending.len());
        }
        if let Some(status) = self.timer.restore().await {
            log::debug!("Active timer: {} at {}s", status.kind, status.elapsed_seconds);
        }
    }

    /// Load persisted state, then run one sync pass.
    pub async fn start(&self, options: &SyncOptions, progress: &dyn SyncProgress) -> SyncReport {
        self.load().await;
        self.sync_pending(options, progress).await
    }

    /// App came back to the foreground: refresh the timer and sync.
    pub async fn on_foreground(
        &self,
        options: &SyncOptions,
        progress: &dyn SyncProgress,
    ) -> SyncReport {
        self.timer.refresh();
        self.sync_pending(options, progress).await
    }

    pub async fn on_connectivity_restored(
        &self,
        options: &SyncOptions,
        progress: &dyn SyncProgress,
    ) -> SyncReport {
        log::debug!("Connectivity restored");
        self.sync_pending(options, progress).await
    }

    // ── Records ────────────────────────────────────────────────────

    /// Save a record locally and try to deliver it. A remote failure yields
    /// `Error::DeliveryPending`; the record is kept and queued either way.
    pub async fn write(&self, draft: RecordDraft) -> Result<Record> {
        writer::write_record(
            draft,
            self.ids.as_ref(),
            &self.records,
            &self.queue,
            self.backend.as_ref(),
        )
        .await
    }

    /// Delete a record remotely, then locally. Any queued delivery of the
    /// same id is dropped so a later sync does not bring it back.
    pub async fn delete_record(&self, kind: RecordKind, id: Uuid) -> Result<()> {
        self.backend.delete(kind, id).await?;
        let local = self.records.remove(kind, id);
        let queued = self.queue.discard(id).await;
        log::info!("Deleted {kind} {id} (local: {local}, queued: {queued})");
        Ok(())
    }

    // ── Sync ───────────────────────────────────────────────────────

    pub async fn sync_pending(
        &self,
        options: &SyncOptions,
        progress: &dyn SyncProgress,
    ) -> SyncReport {
        reconciler::sync_pending(&self.queue, self.backend.as_ref(), options, progress).await
    }

    pub async fn pending(&self) -> Vec<PendingEntry> {
        self.queue.entries().await
    }

    pub async fn dead_letters(&self) -> Vec<DeadLetter> {
        self.queue.dead_letters().await
    }

    /// Move dead letters back to the pending queue; an empty `ids` moves all.
    pub async fn requeue_dead_letters(&self, ids: &[Uuid]) -> usize {
        self.queue.requeue_dead_letters(ids).await
    }

    // ── Timer ──────────────────────────────────────────────────────

    pub async fn start_timer(&self, kind: TimerKind) -> Result<TimerStatus> {
        self.timer.start(kind).await
    }

    pub async fn pause_timer(&self) -> Result<TimerStatus> {
        self.timer.pause().await
    }

    pub async fn resume_timer(&self) -> Result<TimerStatus> {
        self.timer.resume().await
    }

    pub async fn stop_timer(&self) -> Option<StoppedTimer> {
        self.timer.stop().await
    }

    pub async fn reset_timer(&self) {
        self.timer.reset().await
    }

    pub async fn timer_status(&self) -> Option<TimerStatus> {
        self.timer.status().await
    }

    pub fn subscribe_timer(&self) -> tokio::sync::watch::Receiver<u64> {
        self.timer.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::fake::FakeBackend;
    use crate::record::identity::SequentialIds;
    use crate::timer::ManualClock;
    use chrono::{TimeZone, Utc};

    struct Setup {
        db: Database,
        backend: Arc<FakeBackend>,
        clock: Arc<ManualClock>,
    }

    impl Setup {
        async fn new() -> Self {
            Self {
                db: Database::open_memory().await.unwrap(),
                backend: Arc::new(FakeBackend::new()),
                clock: Arc::new(ManualClock::new(
                    Utc.with_ymd_and_hms(2025, 3, 1, 3, 0, 0).unwrap(),
                )),
            }
        }

        /// A fresh context over the same storage, as after a restart.
        fn context(&self) -> CareLog {
            CareLog::with_parts(
                Arc::new(self.db.clone()),
                self.backend.clone(),
                Arc::new(SequentialIds::default()),
                self.clock.clone(),
            )
        }
    }

    fn bottle() -> RecordDraft {
        RecordDraft::feeding("baby1", "mom", FeedingType::Formula, Utc::now()).with_amount_ml(120)
    }

    #[tokio::test]
    async fn test_offline_write_delivered_after_restart() {
        let setup = Setup::new().await;
        setup.backend.set_offline(true);

        let log = setup.context();
        let err = log.write(bottle()).await.unwrap_err();
        let Error::DeliveryPending { id, .. } = err else {
            panic!("expected DeliveryPending, got {err:?}");
        };
        assert!(log.records().get(id).is_some());
        drop(log);

        setup.backend.set_offline(false);
        let log = setup.context();
        let report = log.start(&SyncOptions::default(), &NoopProgress).await;
        assert_eq!(report.items_synced, 1);
        assert!(log.pending().await.is_empty());

        let row = setup.backend.row(id).unwrap();
        match row.details {
            RecordDetails::Feeding(d) => assert_eq!(d.amount_ml, Some(120)),
            other => panic!("expected feeding, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_connectivity_restored_drains_queue() {
        let setup = Setup::new().await;
        let log = setup.context();
        setup.backend.set_offline(true);

        for _ in 0..3 {
            assert!(log.write(bottle()).await.is_err());
        }
        assert_eq!(log.pending().await.len(), 3);
        assert_eq!(log.records().list(RecordKind::Feeding).len(), 3);

        let report = log
            .on_connectivity_restored(&SyncOptions::default(), &NoopProgress)
            .await;
        assert_eq!(report.status, SyncStatus::Failed);
        assert_eq!(log.pending().await.len(), 3);

        setup.backend.set_offline(false);
        let report = log.on_foreground(&SyncOptions::default(), &NoopProgress).await;
        assert_eq!(report.status, SyncStatus::Success);
        assert!(log.pending().await.is_empty());
        assert_eq!(setup.backend.row_count(), 3);
    }

    #[tokio::test]
    async fn test_idle_start_makes_no_calls() {
        let setup = Setup::new().await;
        let log = setup.context();

        let report = log.start(&SyncOptions::default(), &NoopProgress).await;
        assert_eq!(report.entries_total, 0);
        assert_eq!(setup.backend.calls(), 0);
    }

    #[tokio::test]
    async fn test_delete_drops_pending_delivery() {
        let setup = Setup::new().await;
        let log = setup.context();
        setup.backend.set_offline(true);
        let Err(Error::DeliveryPending { id, .. }) = log.write(bottle()).await else {
            panic!("expected DeliveryPending");
        };

        // Deletes need the backend.
        assert!(matches!(
            log.delete_record(RecordKind::Feeding, id).await,
            Err(Error::Backend(_))
        ));
        assert!(log.records().get(id).is_some());

        setup.backend.set_offline(false);
        log.delete_record(RecordKind::Feeding, id).await.unwrap();
        assert!(log.records().get(id).is_none());
        assert!(log.pending().await.is_empty());
        assert!(setup.backend.was_deleted(id));

        log.sync_pending(&SyncOptions::default(), &NoopProgress).await;
        assert!(setup.backend.row(id).is_none());
    }

    #[tokio::test]
    async fn test_dead_letter_and_requeue() {
        let setup = Setup::new().await;
        let log = setup.context();
        let rejected = BackendError::Status {
            status: 422,
            message: "invalid input value for enum feeding_type".into(),
        };
        setup.backend.set_offline(true);
        let Err(Error::DeliveryPending { id, .. }) = log.write(bottle()).await else {
            panic!("expected DeliveryPending");
        };

        setup.backend.set_offline(false);
        setup.backend.fail_id(id, rejected);
        let report = log.sync_pending(&SyncOptions::default(), &NoopProgress).await;
        assert_eq!(report.items_dead_lettered, 1);
        assert!(log.pending().await.is_empty());
        assert_eq!(log.dead_letters().await[0].entry.id, id);

        setup.backend.clear_failures();
        assert_eq!(log.requeue_dead_letters(&[id]).await, 1);
        let report = log.sync_pending(&SyncOptions::default(), &NoopProgress).await;
        assert_eq!(report.items_synced, 1);
        assert!(log.dead_letters().await.is_empty());
    }

    #[tokio::test]
    async fn test_timer_restored_by_new_context() {
        let setup = Setup::new().await;
        let log = setup.context();
        log.start_timer(TimerKind::Sleep {
            sleep_type: SleepType::Night,
        })
        .await
        .unwrap();
        setup.clock.advance_secs(1800);
        drop(log);

        setup.clock.advance_secs(1800);
        let log = setup.context();
        log.start(&SyncOptions::default(), &NoopProgress).await;
        let status = log.timer_status().await.unwrap();
        assert_eq!(status.state, TimerState::Running);
        assert_eq!(status.elapsed_seconds, 3600);

        let stopped = log.stop_timer().await.unwrap();
        let record = log
            .write(stopped.into_draft("baby1", "dad"))
            .await
            .unwrap();
        assert_eq!(record.kind(), RecordKind::Sleep);
        match record.details {
            RecordDetails::Sleep(d) => assert_eq!(d.duration_seconds, Some(3600)),
            other => panic!("expected sleep, got {other:?}"),
        }
        assert!(log.timer_status().await.is_none());
    }
}
