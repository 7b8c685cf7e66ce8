use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::sync::{MappedMutexGuard, Mutex, MutexGuard};
use uuid::Uuid;

use crate::record::{Record, RecordKind};
use crate::storage::KeyValueStore;

/// Storage key holding the pending queue as one JSON array.
pub const PENDING_KEY: &str = "pending_records";
/// Storage key holding entries the backend permanently rejected.
pub const DEAD_LETTER_KEY: &str = "failed_records";

/// A record whose remote delivery has not succeeded yet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingEntry {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub record_kind: RecordKind,
    #[serde(rename = "data")]
    pub payload: Record,
    #[serde(rename = "createdAt")]
    pub queued_at: DateTime<Utc>,
}

impl PendingEntry {
    pub fn new(record: Record, queued_at: DateTime<Utc>) -> Self {
        Self {
            id: record.id,
            record_kind: record.kind(),
            payload: record,
            queued_at,
        }
    }
}

/// A pending entry the backend rejected with a permanent error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadLetter {
    pub entry: PendingEntry,
    pub error: String,
    pub failed_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct QueueState {
    pending: Vec<PendingEntry>,
    dead: Vec<DeadLetter>,
}

/// Ordered, persisted list of records awaiting remote delivery.
///
/// The whole list is stored as a single blob and rewritten on every change.
/// An in-memory mirror behind an async mutex serializes those
/// load-modify-store cycles, so concurrent callers cannot drop each other's
/// updates. Persistence failures are logged and otherwise ignored: the mirror
/// keeps the intended state and the next successful write catches up.
pub struct PendingQueue {
    store: Arc<dyn KeyValueStore>,
    state: Mutex<Option<QueueState>>,
}

impl PendingQueue {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            store,
            state: Mutex::new(None),
        }
    }

    async fn state(&self) -> MappedMutexGuard<'_, QueueState> {
        let mut guard = self.state.lock().await;
        if guard.is_none() {
            *guard = Some(self.read_state().await);
        }
        MutexGuard::map(guard, |s| s.get_or_insert_with(QueueState::default))
    }

    async fn read_state(&self) -> QueueState {
        QueueState {
            pending: self.read_list(PENDING_KEY).await,
            dead: self.read_list(DEAD_LETTER_KEY).await,
        }
    }

    async fn read_list<T: DeserializeOwned>(&self, key: &str) -> Vec<T> {
        let raw = match self.store.get_string(key).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return Vec::new(),
            Err(e) => {
                log::warn!("Failed to load {key}, treating as empty: {e}");
                return Vec::new();
            }
        };
        match serde_json::from_str(&raw) {
            Ok(list) => list,
            Err(e) => {
                log::warn!("Discarding unreadable {key} blob: {e}");
                Vec::new()
            }
        }
    }

    async fn write_list<T: Serialize>(&self, key: &str, list: &[T]) {
        let raw = match serde_json::to_string(list) {
            Ok(raw) => raw,
            Err(e) => {
                log::warn!("Failed to serialize {key}: {e}");
                return;
            }
        };
        if let Err(e) = self.store.set(key, &raw).await {
            log::warn!("Failed to persist {key}: {e}");
        }
    }

    /// Add `entry` to the end of the queue. An entry already queued under the
    /// same id is replaced where it stands.
    pub async fn append(&self, entry: PendingEntry) {
        let mut state = self.state().await;
        match state.pending.iter_mut().find(|e| e.id == entry.id) {
            Some(existing) => {
                log::debug!("Replacing queued entry {}", entry.id);
                *existing = entry;
            }
            None => {
                log::info!("Queued {} {} for later delivery", entry.record_kind, entry.id);
                state.pending.push(entry);
            }
        }
        self.write_list(PENDING_KEY, &state.pending).await;
    }

    /// Re-read both lists from storage and return the pending entries in
    /// queue order.
    ///
    /// On a queue that is already loaded, entries the mirror holds but
    /// storage lacks (an earlier persist failed) are kept and written back,
    /// and the mirror's payload wins for ids present in both. An entry whose
    /// removal failed to persist may come back; replaying it is harmless.
    pub async fn load_all(&self) -> Vec<PendingEntry> {
        let mut guard = self.state.lock().await;
        let loaded = self.read_state().await;
        let state = match guard.take() {
            None => loaded,
            Some(current) => {
                let (pending, pending_changed) =
                    merge_unsaved(loaded.pending, current.pending, |e| e.id);
                let (dead, dead_changed) =
                    merge_unsaved(loaded.dead, current.dead, |d| d.entry.id);
                if pending_changed {
                    log::info!("Re-persisting pending entries missing from storage");
                    self.write_list(PENDING_KEY, &pending).await;
                }
                if dead_changed {
                    self.write_list(DEAD_LETTER_KEY, &dead).await;
                }
                QueueState { pending, dead }
            }
        };
        let pending = state.pending.clone();
        *guard = Some(state);
        pending
    }

    /// Pending entries in queue order, loading from storage on first use.
    pub async fn entries(&self) -> Vec<PendingEntry> {
        self.state().await.pending.clone()
    }

    pub async fn len(&self) -> usize {
        self.state().await.pending.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn contains(&self, id: Uuid) -> bool {
        self.state().await.pending.iter().any(|e| e.id == id)
    }

    /// Drop every entry whose id is in `ids`, keeping the rest in order.
    /// Returns how many entries were removed.
    pub async fn remove_by_ids(&self, ids: &[Uuid]) -> usize {
        if ids.is_empty() {
            return 0;
        }
        let remove: HashSet<&Uuid> = ids.iter().collect();
        let mut state = self.state().await;
        let before = state.pending.len();
        state.pending.retain(|e| !remove.contains(&e.id));
        let removed = before - state.pending.len();
        if removed > 0 {
            self.write_list(PENDING_KEY, &state.pending).await;
        }
        removed
    }

    /// Drop the given entries, but only where the queue still holds exactly
    /// that entry. An entry replaced under the same id since it was read is
    /// kept for the next pass. Returns how many entries were removed.
    pub async fn remove_settled(&self, settled: &[PendingEntry]) -> usize {
        if settled.is_empty() {
            return 0;
        }
        let mut state = self.state().await;
        let before = state.pending.len();
        state.pending.retain(|e| !settled.contains(e));
        let removed = before - state.pending.len();
        if removed < settled.len() {
            log::debug!(
                "{} settled entries were replaced during the pass and stay queued",
                settled.len() - removed
            );
        }
        if removed > 0 {
            self.write_list(PENDING_KEY, &state.pending).await;
        }
        removed
    }

    /// Record entries as dead letters. Callers remove them from the pending
    /// list afterwards, so a crash in between leaves a duplicate, not a loss.
    pub async fn record_dead_letters(&self, letters: Vec<DeadLetter>) {
        if letters.is_empty() {
            return;
        }
        let mut state = self.state().await;
        for letter in letters {
            log::error!(
                "Dead-lettering {} {}: {}",
                letter.entry.record_kind,
                letter.entry.id,
                letter.error
            );
            state.dead.retain(|d| d.entry.id != letter.entry.id);
            state.dead.push(letter);
        }
        self.write_list(DEAD_LETTER_KEY, &state.dead).await;
    }

    pub async fn dead_letters(&self) -> Vec<DeadLetter> {
        self.state().await.dead.clone()
    }

    /// Move dead letters back onto the pending queue. An empty `ids` requeues
    /// every dead letter. Returns how many were moved.
    pub async fn requeue_dead_letters(&self, ids: &[Uuid]) -> usize {
        let wanted: HashSet<&Uuid> = ids.iter().collect();
        let mut state = self.state().await;

        let (moved, kept): (Vec<DeadLetter>, Vec<DeadLetter>) = std::mem::take(&mut state.dead)
            .into_iter()
            .partition(|d| wanted.is_empty() || wanted.contains(&d.entry.id));
        state.dead = kept;
        if moved.is_empty() {
            return 0;
        }

        let count = moved.len();
        for letter in moved {
            let entry = letter.entry;
            match state.pending.iter_mut().find(|e| e.id == entry.id) {
                Some(existing) => *existing = entry,
                None => state.pending.push(entry),
            }
        }
        log::info!("Requeued {count} dead-lettered entries");
        self.write_list(PENDING_KEY, &state.pending).await;
        self.write_list(DEAD_LETTER_KEY, &state.dead).await;
        count
    }

    /// Forget `id` in both lists, e.g. after the record was deleted.
    pub async fn discard(&self, id: Uuid) -> bool {
        let mut state = self.state().await;
        let pending_before = state.pending.len();
        let dead_before = state.dead.len();
        state.pending.retain(|e| e.id != id);
        state.dead.retain(|d| d.entry.id != id);

        let mut changed = false;
        if state.pending.len() != pending_before {
            self.write_list(PENDING_KEY, &state.pending).await;
            changed = true;
        }
        if state.dead.len() != dead_before {
            self.write_list(DEAD_LETTER_KEY, &state.dead).await;
            changed = true;
        }
        changed
    }
}

/// Overlay `mirror` on `stored`: mirror entries replace stored ones with the
/// same id and unknown ones are appended. Reports whether anything changed.
fn merge_unsaved<T: PartialEq>(
    mut stored: Vec<T>,
    mirror: Vec<T>,
    id: impl Fn(&T) -> Uuid,
) -> (Vec<T>, bool) {
    let mut changed = false;
    for item in mirror {
        match stored.iter_mut().find(|s| id(s) == id(&item)) {
            Some(existing) => {
                if *existing != item {
                    *existing = item;
                    changed = true;
                }
            }
            None => {
                stored.push(item);
                changed = true;
            }
        }
    }
    (stored, changed)
}
