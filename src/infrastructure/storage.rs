//! Storage seam used by the reconciliation sink.
//!
//! The engine only needs five operations from a relational store; any
//! backend implementing [`CatalogStore`] can be plugged into a run.

use std::collections::BTreeSet;

use async_trait::async_trait;

use crate::domain::{CatalogRecord, ObjectId};
use crate::error::IngestResult;

/// Table coordinates for one ingestion target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableRef {
    pub name: String,
    pub id_column: String,
    pub active_column: String,
}

impl TableRef {
    pub fn new(name: &str, id_column: &str, active_column: &str) -> Self {
        Self {
            name: name.to_string(),
            id_column: id_column.to_string(),
            active_column: active_column.to_string(),
        }
    }
}

#[async_trait]
pub trait CatalogStore: Send + Sync {
    async fn table_exists(&self, table: &TableRef) -> IngestResult<bool>;

    /// All identifiers currently stored, active or not.
    async fn distinct_identifiers(&self, table: &TableRef) -> IngestResult<BTreeSet<ObjectId>>;

    /// Hard-deletes the rows; returns the number removed.
    async fn delete_rows(&self, table: &TableRef, ids: &[ObjectId]) -> IngestResult<u64>;

    /// Flips the active flag to 0; returns the number of rows touched.
    async fn set_inactive(&self, table: &TableRef, ids: &[ObjectId]) -> IngestResult<u64>;

    /// Writes the records stamped active.
    ///
    /// Must be idempotent per identifier: writing a record whose id is
    /// already stored replaces the row instead of duplicating it.
    async fn append_records(&self, table: &TableRef, records: &[CatalogRecord]) -> IngestResult<u64>;
}
