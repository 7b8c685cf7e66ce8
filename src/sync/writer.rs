use chrono::Utc;

use crate::backend::RemoteBackend;
use crate::error::{Error, Result};
use crate::record::{IdGenerator, Record, RecordDraft, RecordStore};
use crate::sync::queue::{PendingEntry, PendingQueue};

/// Write one record: assign its identity, update local state, then try the
/// remote upsert.
///
/// Local state is updated before the first suspension point and is never
/// rolled back. When the upsert fails the record is queued under the same id
/// and `Error::DeliveryPending` is returned; the record is still safe.
pub async fn write_record(
    draft: RecordDraft,
    ids: &dyn IdGenerator,
    records: &RecordStore,
    queue: &PendingQueue,
    backend: &dyn RemoteBackend,
) -> Result<Record> {
    let id = draft.id.unwrap_or_else(|| ids.generate());
    let record = draft.finalize(id, Utc::now())?;

    records.merge(record.clone());

    match backend.upsert(&record).await {
        Ok(stored) => {
            // An older payload still queued under this id would overwrite
            // this one on the next sync pass.
            if queue.remove_by_ids(&[record.id]).await > 0 {
                log::debug!("Dropped superseded queued entry {}", record.id);
            }
            if stored.id != record.id {
                log::warn!(
                    "Backend returned row {} for {}; keeping local copy",
                    stored.id,
                    record.id
                );
                return Ok(record);
            }
            log::debug!("Delivered {} {}", stored.kind(), stored.id);
            records.merge(stored.clone());
            Ok(stored)
        }
        Err(e) => {
            log::warn!("Remote write of {} {id} failed, queueing: {e}", record.kind());
            queue.append(PendingEntry::new(record, Utc::now())).await;
            Err(Error::DeliveryPending { id, source: e })
        }
    }
}
