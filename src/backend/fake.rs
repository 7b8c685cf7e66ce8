use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use uuid::Uuid;

use super::{BackendError, RemoteBackend};
use crate::record::{Record, RecordKind};

/// In-memory backend with upsert-by-id semantics and scriptable failures.
#[derive(Default)]
pub(crate) struct FakeBackend {
    rows: Mutex<HashMap<Uuid, Record>>,
    scripted: Mutex<VecDeque<BackendError>>,
    failing_ids: Mutex<HashMap<Uuid, BackendError>>,
    deleted: Mutex<HashSet<Uuid>>,
    offline: AtomicBool,
    calls: AtomicUsize,
}

impl FakeBackend {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Fail the next call with `error`; queued errors are consumed in order.
    pub(crate) fn fail_next(&self, error: BackendError) {
        self.scripted.lock().unwrap().push_back(error);
    }

    /// Fail every upsert of `id` with `error` until cleared.
    pub(crate) fn fail_id(&self, id: Uuid, error: BackendError) {
        self.failing_ids.lock().unwrap().insert(id, error);
    }

    pub(crate) fn clear_failures(&self) {
        self.scripted.lock().unwrap().clear();
        self.failing_ids.lock().unwrap().clear();
    }

    pub(crate) fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub(crate) fn row(&self, id: Uuid) -> Option<Record> {
        self.rows.lock().unwrap().get(&id).cloned()
    }

    pub(crate) fn row_count(&self) -> usize {
        self.rows.lock().unwrap().len()
    }

    pub(crate) fn was_deleted(&self, id: Uuid) -> bool {
        self.deleted.lock().unwrap().contains(&id)
    }

    fn check(&self, id: Uuid) -> Result<(), BackendError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.offline.load(Ordering::SeqCst) {
            return Err(BackendError::Network("connection refused".into()));
        }
        if let Some(e) = self.scripted.lock().unwrap().pop_front() {
            return Err(e);
        }
        if let Some(e) = self.failing_ids.lock().unwrap().get(&id) {
            return Err(e.clone());
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteBackend for FakeBackend {
    async fn upsert(&self, record: &Record) -> Result<Record, BackendError> {
        self.check(record.id)?;
        self.rows
            .lock()
            .unwrap()
            .insert(record.id, record.clone());
        Ok(record.clone())
    }

    async fn delete(&self, _kind: RecordKind, id: Uuid) -> Result<(), BackendError> {
        self.check(id)?;
        self.rows.lock().unwrap().remove(&id);
        self.deleted.lock().unwrap().insert(id);
        Ok(())
    }
}
