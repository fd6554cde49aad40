//! Domain module - identifiers, records, action plans and batches
//!
//! Everything here is pure: no I/O, no async. The ingestion layer
//! (`crate::ingest`) wires these values to the network and the store.

pub mod action_plan;
pub mod batch;
pub mod record;

pub use action_plan::ActionPlan;
pub use batch::{Batch, partition};
pub use record::{CatalogRecord, RecordPayload, ScalarValue};

/// Identifier of a remote catalog object.
pub type ObjectId = i64;
