//! # Run Orchestrator
//!
//! Sequences one incremental synchronization run:
//!
//! 1. resolve the checkpoint date (last completion, else today minus the
//!    fallback window),
//! 2. list every remote identifier and those updated since the checkpoint,
//! 3. read the stored identifiers,
//! 4. reconcile into an [`ActionPlan`] and record the starting event,
//! 5. soft-delete, then purge updated rows,
//! 6. fetch and insert the queue batch by batch,
//! 7. record completion, which advances the checkpoint.
//!
//! Any error before step 7 leaves the checkpoint where it was, so the next
//! run recomputes a plan that covers the gap.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{NaiveDate, TimeDelta, Utc};
use serde::Serialize;
use tracing::{Instrument, info, info_span};
use uuid::Uuid;

use super::batch_retry::{BatchRetryCoordinator, BatchRunSummary, RetryPolicy};
use super::bounded_fetcher::{BoundedFetcher, FetchSettings};
use super::reconciliation_sink::{FetchAndPersist, ReconciliationSink};
use crate::domain::{ActionPlan, ObjectId};
use crate::error::IngestResult;
use crate::infrastructure::checkpoint_log::CheckpointLog;
use crate::infrastructure::collection_api::CatalogSource;
use crate::infrastructure::config::{IngestConfig, defaults};
use crate::infrastructure::storage::{CatalogStore, TableRef};

#[derive(Debug, Clone)]
pub struct IngestSettings {
    pub table: TableRef,
    pub batch_size: usize,
    pub fetch: FetchSettings,
    pub retry: RetryPolicy,
    /// Look-back window when no run ever completed
    pub checkpoint_fallback_days: i64,
}

impl IngestSettings {
    pub fn from_ingest_config(config: &IngestConfig) -> Self {
        Self {
            table: config.table(),
            batch_size: config.batch_size,
            fetch: FetchSettings::from_ingest_config(config),
            retry: RetryPolicy::from_ingest_config(config),
            checkpoint_fallback_days: defaults::CHECKPOINT_FALLBACK_DAYS,
        }
    }
}

/// Plan computed from one snapshot, before anything is written.
#[derive(Debug, Clone, Serialize)]
pub struct PlannedRun {
    pub since: NaiveDate,
    pub plan: ActionPlan,
}

#[derive(Debug, Clone, Serialize)]
pub struct IngestReport {
    pub run_id: Uuid,
    pub since: NaiveDate,
    pub queued: usize,
    pub new_objects: usize,
    pub updated: usize,
    pub deleted: usize,
    pub soft_deleted_rows: u64,
    pub purged_rows: u64,
    pub batches: BatchRunSummary,
}

impl IngestReport {
    pub fn persisted(&self) -> u64 {
        self.batches.persisted()
    }

    pub fn skipped(&self) -> usize {
        self.batches.skipped()
    }
}

pub struct CatalogIngester {
    source: Arc<dyn CatalogSource>,
    store: Arc<dyn CatalogStore>,
    checkpoint: Arc<dyn CheckpointLog>,
    settings: IngestSettings,
}

impl CatalogIngester {
    pub fn new(
        source: Arc<dyn CatalogSource>,
        store: Arc<dyn CatalogStore>,
        checkpoint: Arc<dyn CheckpointLog>,
        settings: IngestSettings,
    ) -> Self {
        Self {
            source,
            store,
            checkpoint,
            settings,
        }
    }

    pub const fn settings(&self) -> &IngestSettings {
        &self.settings
    }

    /// Date used for the updated-since listing.
    pub async fn checkpoint_date(&self) -> IngestResult<NaiveDate> {
        match self.checkpoint.last_completed_date().await? {
            Some(date) => {
                info!("Last completed ingest: {}", date);
                Ok(date)
            }
            None => {
                let fallback = Utc::now().date_naive() - TimeDelta::days(self.settings.checkpoint_fallback_days);
                info!("No completed ingest on record, looking back to {}", fallback);
                Ok(fallback)
            }
        }
    }

    /// Computes the action plan without touching storage or the checkpoint.
    pub async fn plan(&self) -> IngestResult<PlannedRun> {
        let since = self.checkpoint_date().await?;

        let (remote_all, remote_updated) = tokio::try_join!(
            self.source.list_object_ids(None),
            self.source.list_object_ids(Some(since)),
        )?;
        let remote_all: BTreeSet<ObjectId> = remote_all.into_iter().collect();
        let remote_updated: BTreeSet<ObjectId> = remote_updated.into_iter().collect();
        info!(
            "Collection lists {} objects, {} updated since {}",
            remote_all.len(),
            remote_updated.len(),
            since
        );

        let local = self.stored_identifiers().await?;
        info!("Store holds {} objects", local.len());

        Ok(PlannedRun {
            since,
            plan: ActionPlan::reconcile(&remote_all, &remote_updated, &local),
        })
    }

    async fn stored_identifiers(&self) -> IngestResult<BTreeSet<ObjectId>> {
        let table = &self.settings.table;
        if self.store.table_exists(table).await? {
            self.store.distinct_identifiers(table).await
        } else {
            info!("Table {} does not exist yet, treating store as empty", table.name);
            Ok(BTreeSet::new())
        }
    }

    /// Runs a complete ingest.
    pub async fn run(&self) -> IngestResult<IngestReport> {
        let run_id = Uuid::new_v4();
        self.run_inner(run_id)
            .instrument(info_span!("ingest", %run_id))
            .await
    }

    async fn run_inner(&self, run_id: Uuid) -> IngestResult<IngestReport> {
        let PlannedRun { since, plan } = self.plan().await?;
        if plan.is_noop() {
            info!("Store is already in sync with the collection");
        }

        info!("Objects queued: {}", plan.to_insert.len());
        info!("New objects: {}", plan.new_objects());
        info!("Updated objects: {}", plan.to_update.len());
        info!("Deleted objects: {}", plan.to_delete.len());
        self.checkpoint
            .record_event(&format!(
                "Starting ingest with {} objects to insert, {} to update, {} to delete",
                plan.new_objects(),
                plan.to_update.len(),
                plan.to_delete.len()
            ))
            .await?;

        let sink = ReconciliationSink::new(Arc::clone(&self.store), self.settings.table.clone());
        let soft_deleted_rows = sink.soft_delete(&plan.to_delete).await?;
        let purged_rows = sink.purge(&plan.to_update).await?;

        let queue = plan.insert_queue();
        let batches = if queue.is_empty() {
            info!("Nothing to fetch");
            BatchRunSummary::default()
        } else {
            let fetcher = Arc::new(BoundedFetcher::new(
                Arc::clone(&self.source),
                self.settings.fetch.clone(),
            ));
            let work = FetchAndPersist::new(fetcher, sink);
            BatchRetryCoordinator::new(self.settings.batch_size, self.settings.retry.clone())
                .drive(&queue, &work)
                .await?
        };

        self.checkpoint.record_completion().await?;
        info!(
            "🎉 Ingest complete: {} rows written, {} objects skipped",
            batches.persisted(),
            batches.skipped()
        );

        Ok(IngestReport {
            run_id,
            since,
            queued: queue.len(),
            new_objects: plan.new_objects(),
            updated: plan.to_update.len(),
            deleted: plan.to_delete.len(),
            soft_deleted_rows,
            purged_rows,
            batches,
        })
    }
}
