//! Applies reconciliation decisions and fetched records to storage.

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use super::batch_retry::{BatchOutput, BatchWork};
use super::bounded_fetcher::BoundedFetcher;
use crate::domain::{Batch, CatalogRecord, ObjectId, RecordPayload};
use crate::error::{IngestError, IngestResult};
use crate::infrastructure::storage::{CatalogStore, TableRef};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InsertOutcome {
    pub written: u64,
    /// Payloads without a usable identifier
    pub dropped: usize,
}

#[derive(Clone)]
pub struct ReconciliationSink {
    store: Arc<dyn CatalogStore>,
    table: TableRef,
}

impl ReconciliationSink {
    pub fn new(store: Arc<dyn CatalogStore>, table: TableRef) -> Self {
        Self { store, table }
    }

    pub const fn table(&self) -> &TableRef {
        &self.table
    }

    /// Marks `ids` inactive. No store call when the set is empty.
    pub async fn soft_delete(&self, ids: &BTreeSet<ObjectId>) -> IngestResult<u64> {
        if ids.is_empty() {
            return Ok(0);
        }
        let ids: Vec<ObjectId> = ids.iter().copied().collect();
        let touched = self.store.set_inactive(&self.table, &ids).await?;
        info!("🗑️ Soft-deleted {} objects no longer in the collection", touched);
        Ok(touched)
    }

    /// Removes the stored rows of `ids` so they can be re-inserted fresh.
    pub async fn purge(&self, ids: &BTreeSet<ObjectId>) -> IngestResult<u64> {
        if ids.is_empty() {
            return Ok(0);
        }
        let ids: Vec<ObjectId> = ids.iter().copied().collect();
        let removed = self.store.delete_rows(&self.table, &ids).await?;
        info!("Removed {} updated objects ahead of re-insert", removed);
        Ok(removed)
    }

    /// Writes one batch of fetched bodies, stamped active.
    pub async fn insert_batch(&self, payloads: Vec<RecordPayload>) -> IngestResult<InsertOutcome> {
        let total = payloads.len();
        let records: Vec<CatalogRecord> = payloads
            .iter()
            .filter_map(|payload| CatalogRecord::from_payload(&self.table.id_column, payload))
            .collect();

        let dropped = total - records.len();
        if dropped > 0 {
            warn!(
                "⚠️ Dropping {} objects without a usable '{}' field",
                dropped, self.table.id_column
            );
        }

        if records.is_empty() {
            debug!("Nothing to write for this batch");
            return Ok(InsertOutcome { written: 0, dropped });
        }

        let written = self.store.append_records(&self.table, &records).await?;
        debug!("Wrote {} rows into {}", written, self.table.name);
        Ok(InsertOutcome { written, dropped })
    }
}

/// Batch work of a run: bounded fetch followed by a persistence task.
pub struct FetchAndPersist {
    fetcher: Arc<BoundedFetcher>,
    sink: ReconciliationSink,
}

impl FetchAndPersist {
    pub fn new(fetcher: Arc<BoundedFetcher>, sink: ReconciliationSink) -> Self {
        Self { fetcher, sink }
    }
}

#[async_trait]
impl BatchWork for FetchAndPersist {
    async fn process(&self, batch: &Batch) -> IngestResult<BatchOutput> {
        let fetched = self.fetcher.fetch_batch(batch).await?;
        let skipped = fetched.skipped();

        let sink = self.sink.clone();
        let records = fetched.records;
        let outcome = tokio::spawn(async move { sink.insert_batch(records).await })
            .await
            .map_err(|e| IngestError::Task(format!("Persist task for batch {} failed: {}", batch.number, e)))??;

        Ok(BatchOutput {
            persisted: outcome.written,
            skipped: skipped + outcome.dropped,
        })
    }
}
