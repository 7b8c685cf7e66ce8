use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::NaiveDate;
use uuid::Uuid;

use super::{Record, RecordKind};

/// In-memory record collections, one per kind, newest first.
///
/// Updates are synchronous so the writer can apply its optimistic update
/// before the first network suspension point.
#[derive(Debug, Default)]
pub struct RecordStore {
    inner: Mutex<Collections>,
}

#[derive(Debug, Default)]
struct Collections {
    feedings: Vec<Record>,
    sleeps: Vec<Record>,
    diapers: Vec<Record>,
}

impl Collections {
    fn of_kind(&mut self, kind: RecordKind) -> &mut Vec<Record> {
        match kind {
            RecordKind::Feeding => &mut self.feedings,
            RecordKind::Sleep => &mut self.sleeps,
            RecordKind::Diaper => &mut self.diapers,
        }
    }

    fn all(&self) -> impl Iterator<Item = &Record> {
        self.feedings
            .iter()
            .chain(self.sleeps.iter())
            .chain(self.diapers.iter())
    }
}

impl RecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Collections> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Prepend `record` to its collection, replacing any record with the same id.
    pub fn merge(&self, record: Record) {
        let mut inner = self.lock();
        let records = inner.of_kind(record.kind());
        records.retain(|r| r.id != record.id);
        records.insert(0, record);
    }

    /// Remove the record with `id` from the `kind` collection.
    pub fn remove(&self, kind: RecordKind, id: Uuid) -> bool {
        let mut inner = self.lock();
        let records = inner.of_kind(kind);
        let before = records.len();
        records.retain(|r| r.id != id);
        records.len() != before
    }

    pub fn list(&self, kind: RecordKind) -> Vec<Record> {
        self.lock().of_kind(kind).clone()
    }

    pub fn get(&self, id: Uuid) -> Option<Record> {
        self.lock().all().find(|r| r.id == id).cloned()
    }

    pub fn len(&self) -> usize {
        let inner = self.lock();
        inner.feedings.len() + inner.sleeps.len() + inner.diapers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All records whose start (or occurrence) falls on `date` in UTC, newest first.
    pub fn timeline_for_date(&self, date: NaiveDate) -> Vec<Record> {
        let inner = self.lock();
        let mut records: Vec<Record> = inner
            .all()
            .filter(|r| r.started_at().date_naive() == date)
            .cloned()
            .collect();
        records.sort_by(|a, b| b.started_at().cmp(&a.started_at()));
        records
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{DiaperType, FeedingType, RecordDraft, SleepType};
    use chrono::{DateTime, TimeZone, Utc};

    fn at(day: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, day, h, 0, 0).unwrap()
    }

    fn record(n: u128, draft: RecordDraft) -> Record {
        draft.finalize(Uuid::from_u128(n), Utc::now()).unwrap()
    }

    #[test]
    fn test_merge_prepends_and_replaces() {
        let store = RecordStore::new();
        let first = record(1, RecordDraft::feeding("b", "u", FeedingType::Formula, at(1, 8)));
        let second = record(2, RecordDraft::feeding("b", "u", FeedingType::Pumped, at(1, 11)));
        store.merge(first.clone());
        store.merge(second.clone());

        let ids: Vec<Uuid> = store.list(RecordKind::Feeding).iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![second.id, first.id]);

        let updated = record(
            1,
            RecordDraft::feeding("b", "u", FeedingType::Formula, at(1, 8)).with_amount_ml(90),
        );
        store.merge(updated.clone());
        let feedings = store.list(RecordKind::Feeding);
        assert_eq!(feedings.len(), 2);
        assert_eq!(feedings[0], updated);
    }

    #[test]
    fn test_kinds_are_separate() {
        let store = RecordStore::new();
        store.merge(record(1, RecordDraft::sleep("b", "u", SleepType::Nap, at(1, 13))));
        store.merge(record(2, RecordDraft::diaper("b", "u", DiaperType::Wet, at(1, 14))));

        assert_eq!(store.list(RecordKind::Sleep).len(), 1);
        assert_eq!(store.list(RecordKind::Diaper).len(), 1);
        assert!(store.list(RecordKind::Feeding).is_empty());
        assert_eq!(store.len(), 2);
        assert!(store.get(Uuid::from_u128(2)).is_some());
    }

    #[test]
    fn test_remove() {
        let store = RecordStore::new();
        store.merge(record(1, RecordDraft::diaper("b", "u", DiaperType::Dirty, at(1, 9))));

        assert!(!store.remove(RecordKind::Feeding, Uuid::from_u128(1)));
        assert!(store.remove(RecordKind::Diaper, Uuid::from_u128(1)));
        assert!(store.is_empty());
    }

    #[test]
    fn test_timeline_for_date() {
        let store = RecordStore::new();
        store.merge(record(1, RecordDraft::feeding("b", "u", FeedingType::Formula, at(1, 8))));
        store.merge(record(2, RecordDraft::diaper("b", "u", DiaperType::Wet, at(1, 10))));
        store.merge(record(3, RecordDraft::sleep("b", "u", SleepType::Night, at(2, 1))));
        store.merge(record(4, RecordDraft::sleep("b", "u", SleepType::Nap, at(1, 9))));

        let day = NaiveDate::from_ymd_opt(2025, 3, 1).unwrap();
        let ids: Vec<Uuid> = store.timeline_for_date(day).iter().map(|r| r.id).collect();
        assert_eq!(
            ids,
            vec![Uuid::from_u128(2), Uuid::from_u128(4), Uuid::from_u128(1)]
        );
    }
}
