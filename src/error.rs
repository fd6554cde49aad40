//! Error taxonomy for the ingestion engine.
//!
//! Errors fall into four groups which decide how far they travel:
//! - per-object failures (`Http`, `Transport`, `Decode`, `Timeout`) are
//!   absorbed by the bounded fetcher and only logged,
//! - anything else raised while fetching or persisting a batch fails the
//!   batch and is retried by the batch coordinator,
//! - `RetriesExhausted` aborts the run,
//! - `Listing` aborts the run before any write happens.

use std::time::Duration;

use thiserror::Error;

use crate::domain::ObjectId;

pub type IngestResult<T> = Result<T, IngestError>;

#[derive(Error, Debug)]
pub enum IngestError {
    #[error("Listing endpoint {endpoint} failed: {message}")]
    Listing { endpoint: String, message: String },

    #[error("HTTP error {status} for object {id}")]
    Http { id: ObjectId, status: u16 },

    #[error("Transport error for object {id}: {message}")]
    Transport { id: ObjectId, message: String },

    #[error("Malformed body for object {id}: {message}")]
    Decode { id: ObjectId, message: String },

    #[error("Request for object {id} timed out after {timeout:?}")]
    Timeout { id: ObjectId, timeout: Duration },

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Checkpoint log error: {0}")]
    Checkpoint(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Task error: {0}")]
    Task(String),

    #[error("Batch {batch} (offset {offset}) failed {attempts} consecutive times")]
    RetriesExhausted {
        batch: usize,
        offset: usize,
        attempts: u32,
        #[source]
        source: Box<IngestError>,
    },
}

impl IngestError {
    /// True for failures that only concern a single remote object.
    pub const fn is_per_object(&self) -> bool {
        matches!(
            self,
            Self::Http { .. } | Self::Transport { .. } | Self::Decode { .. } | Self::Timeout { .. }
        )
    }

    /// The error that started an exhausted retry sequence, or `self`.
    pub fn root_cause(&self) -> &Self {
        match self {
            Self::RetriesExhausted { source, .. } => source.root_cause(),
            other => other,
        }
    }
}

impl From<sqlx::Error> for IngestError {
    fn from(e: sqlx::Error) -> Self {
        Self::Storage(e.to_string())
    }
}
