//! # Ingestion engine
//!
//! Drives one incremental synchronization run:
//! reconcile → soft-delete → purge → fetch-and-insert (batched, retried) → checkpoint.
//!
//! - `bounded_fetcher`: concurrency-limited, paced object fetches for one batch
//! - `batch_retry`: per-batch state machine with whole-batch retry
//! - `reconciliation_sink`: applies plan decisions and fetched records to storage
//! - `orchestrator`: sequences a complete run

pub mod batch_retry;
pub mod bounded_fetcher;
pub mod orchestrator;
pub mod reconciliation_sink;

pub use batch_retry::{
    BatchCursor, BatchOutput, BatchReport, BatchRetryCoordinator, BatchRunSummary, BatchState,
    BatchWork, RetryPolicy,
};
pub use bounded_fetcher::{BoundedFetcher, FetchOutcome, FetchSettings};
pub use orchestrator::{CatalogIngester, IngestReport, IngestSettings, PlannedRun};
pub use reconciliation_sink::{FetchAndPersist, InsertOutcome, ReconciliationSink};
