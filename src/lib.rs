//! Collection Sync - incremental synchronization of a museum collection API
//!
//! Each run reconciles the remote identifier lists against the local table,
//! soft-deletes withdrawn objects, purges updated ones and re-fetches the
//! insert queue in fixed-size, retried batches under a bounded number of
//! in-flight requests.

// Module declarations
pub mod domain;
pub mod error;
pub mod infrastructure;
pub mod ingest;

#[cfg(test)]
pub(crate) mod test_utils;

pub use error::{IngestError, IngestResult};
pub use ingest::{CatalogIngester, IngestReport, IngestSettings, PlannedRun};
