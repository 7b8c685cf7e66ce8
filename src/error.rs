use std::fmt;
use thiserror::Error;
use uuid::Uuid;

use crate::backend::BackendError;

#[derive(Debug, Error)]
pub enum Error {
    /// The record is stored locally and queued; the remote write failed.
    #[error("Saved locally, remote delivery pending for {id}: {source}")]
    DeliveryPending {
        id: Uuid,
        #[source]
        source: BackendError,
    },

    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Migration error: {0}")]
    Migration(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid record: {0}")]
    InvalidRecord(String),

    #[error("Timer error: {0}")]
    Timer(String),
}

impl From<rusqlite::Error> for Error {
    fn from(e: rusqlite::Error) -> Self {
        Error::Database(e.to_string())
    }
}

impl From<rusqlite_migration::Error> for Error {
    fn from(e: rusqlite_migration::Error) -> Self {
        Error::Migration(e.to_string())
    }
}

impl<E: fmt::Display> From<tokio_rusqlite::Error<E>> for Error {
    fn from(e: tokio_rusqlite::Error<E>) -> Self {
        Error::Database(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
