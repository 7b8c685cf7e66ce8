//! Remote data backend the sync core delivers records to.
//!
//! The core only relies on one property of the backend: an upsert keyed by
//! the record id overwrites any earlier row with that id instead of adding a
//! second one.

pub mod error;
#[cfg(test)]
pub(crate) mod fake;
pub mod rest;

use async_trait::async_trait;
use uuid::Uuid;

use crate::record::{Record, RecordKind};

pub use error::BackendError;
pub use rest::RestBackend;

#[async_trait]
pub trait RemoteBackend: Send + Sync {
    /// Insert or overwrite the row with `record.id`, returning the stored row.
    async fn upsert(&self, record: &Record) -> Result<Record, BackendError>;

    async fn delete(&self, kind: RecordKind, id: Uuid) -> Result<(), BackendError>;
}

/// Backend used while no remote is configured. Every call fails with a
/// transient error, so writes are queued and delivered once one is set up.
#[derive(Debug, Clone, Copy, Default)]
pub struct OfflineBackend;

#[async_trait]
impl RemoteBackend for OfflineBackend {
    async fn upsert(&self, _record: &Record) -> Result<Record, BackendError> {
        Err(BackendError::NotConfigured)
    }

    async fn delete(&self, _kind: RecordKind, _id: Uuid) -> Result<(), BackendError> {
        Err(BackendError::NotConfigured)
    }
}
