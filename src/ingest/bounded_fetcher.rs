//! # Bounded Fetcher
//!
//! Fetches every object of one batch with at most N requests in flight.
//!
//! A single semaphore is shared by every batch of the run; a permit is taken
//! *before* a request task is spawned and released when the task finishes,
//! so the ceiling holds no matter how large the batch is. Issuance is
//! additionally paced to one request per `1/N` seconds with a governor rate
//! limiter. Results are collected in completion order.
//!
//! A failing object (transport error, non-2xx, malformed body, timeout) is
//! logged and skipped; it never fails the batch.

use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::domain::{Batch, ObjectId, RecordPayload};
use crate::error::{IngestError, IngestResult};
use crate::infrastructure::collection_api::CatalogSource;
use crate::infrastructure::config::IngestConfig;

#[derive(Debug, Clone)]
pub struct FetchSettings {
    /// Hard ceiling on simultaneously outstanding requests
    pub concurrency: usize,
    /// Per-request timeout; an expired request counts as a skipped object
    pub request_timeout: Duration,
    /// Space request issuance by `1/concurrency` seconds
    pub pacing: bool,
    /// Progress line every N issued / completed requests
    pub progress_every: usize,
}

impl Default for FetchSettings {
    fn default() -> Self {
        Self::from_ingest_config(&IngestConfig::default())
    }
}

impl FetchSettings {
    pub fn from_ingest_config(config: &IngestConfig) -> Self {
        Self {
            concurrency: config.fetch_concurrency,
            request_timeout: config.request_timeout(),
            pacing: config.pacing_enabled,
            progress_every: config.progress_every,
        }
    }

    /// Minimum delay between two request issues, when pacing is on.
    pub fn pacing_interval(&self) -> Option<Duration> {
        let concurrency = u32::try_from(self.concurrency.max(1)).unwrap_or(u32::MAX);
        self.pacing.then(|| Duration::from_secs(1) / concurrency)
    }
}

/// Result of fetching one batch.
#[derive(Debug, Default)]
pub struct FetchOutcome {
    /// Successfully decoded bodies, in completion order
    pub records: Vec<RecordPayload>,
    /// Objects whose fetch failed and were skipped
    pub failed: Vec<ObjectId>,
    /// Request tasks that panicked (object unknown)
    pub lost: usize,
}

impl FetchOutcome {
    pub fn skipped(&self) -> usize {
        self.failed.len() + self.lost
    }
}

pub struct BoundedFetcher {
    source: Arc<dyn CatalogSource>,
    gate: Arc<Semaphore>,
    pacer: Option<DefaultDirectRateLimiter>,
    settings: FetchSettings,
}

impl BoundedFetcher {
    pub fn new(source: Arc<dyn CatalogSource>, settings: FetchSettings) -> Self {
        let pacer = settings
            .pacing_interval()
            .and_then(Quota::with_period)
            .map(|quota| RateLimiter::direct(quota.allow_burst(NonZeroU32::MIN)));

        Self {
            source,
            gate: Arc::new(Semaphore::new(settings.concurrency.max(1))),
            pacer,
            settings,
        }
    }

    pub const fn settings(&self) -> &FetchSettings {
        &self.settings
    }

    /// Fetches every object of `batch`.
    ///
    /// Only fails when the concurrency gate itself is unusable; object-level
    /// failures are reported in [`FetchOutcome::failed`].
    pub async fn fetch_batch(&self, batch: &Batch) -> IngestResult<FetchOutcome> {
        let total = batch.len();
        let every = self.settings.progress_every.max(1);
        info!("🚀 Starting batch {} ({} objects)", batch.number, total);

        let mut tasks = JoinSet::new();
        for (issued, &id) in batch.ids.iter().enumerate() {
            if let Some(pacer) = &self.pacer {
                pacer.until_ready().await;
            }

            let permit = Arc::clone(&self.gate)
                .acquire_owned()
                .await
                .map_err(|e| IngestError::Task(format!("Concurrency gate closed: {}", e)))?;

            let source = Arc::clone(&self.source);
            let timeout = self.settings.request_timeout;
            tasks.spawn(async move {
                let result = match tokio::time::timeout(timeout, source.fetch_object(id)).await {
                    Ok(result) => result,
                    Err(_) => Err(IngestError::Timeout { id, timeout }),
                };
                drop(permit);
                (id, result)
            });

            if (issued + 1) % every == 0 {
                info!("Added {} of {} API calls in batch {}", issued + 1, total, batch.number);
            }
        }

        let mut outcome = FetchOutcome::default();
        let mut completed = 0;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((_, Ok(payload))) => outcome.records.push(payload),
                Ok((id, Err(e))) => {
                    if e.is_per_object() {
                        warn!("⚠️ Skipping object {}: {}", id, e);
                    } else {
                        error!("Skipping object {} after unexpected error: {}", id, e);
                    }
                    outcome.failed.push(id);
                }
                Err(e) => {
                    warn!("⚠️ Request task failed in batch {}: {}", batch.number, e);
                    outcome.lost += 1;
                }
            }

            completed += 1;
            if completed % every == 0 {
                info!("Completed {} of {} API calls in batch {}", completed, total, batch.number);
            }
        }

        debug!(
            "Batch {} fetched: {} ok, {} skipped",
            batch.number,
            outcome.records.len(),
            outcome.skipped()
        );
        Ok(outcome)
    }
}
