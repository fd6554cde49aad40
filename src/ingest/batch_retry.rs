//! # Batch Retry Coordinator
//!
//! Processes the insert queue batch by batch, strictly in order. Each batch
//! moves through an explicit state machine:
//!
//! ```text
//! Pending -> Fetching{1} -> Succeeded
//!                        -> Failed{1} -> Fetching{2} -> ... -> Exhausted
//! ```
//!
//! Any error out of fetching *or* persisting fails the whole batch, which is
//! then retried from the same offset. The failure counter resets after every
//! successful batch; the same batch failing `max_consecutive_failures` times
//! aborts the run with the original error.

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::domain::batch::batch_count;
use crate::domain::{Batch, ObjectId};
use crate::error::{IngestError, IngestResult};
use crate::infrastructure::config::IngestConfig;

/// One unit of batch work: fetch the batch and persist what came back.
#[async_trait]
pub trait BatchWork: Send + Sync {
    async fn process(&self, batch: &Batch) -> IngestResult<BatchOutput>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatchOutput {
    /// Rows written to storage
    pub persisted: u64,
    /// Objects skipped (failed fetch or unusable body)
    pub skipped: usize,
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Consecutive failures of one batch before giving up
    pub max_consecutive_failures: u32,
    /// Pause before re-running a failed batch
    pub retry_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_consecutive_failures: 3,
            retry_delay: Duration::ZERO,
        }
    }
}

impl RetryPolicy {
    pub fn from_ingest_config(config: &IngestConfig) -> Self {
        Self {
            max_consecutive_failures: config.max_batch_failures,
            retry_delay: config.batch_retry_delay(),
        }
    }

    pub const fn is_exhausted(&self, consecutive_failures: u32) -> bool {
        consecutive_failures >= self.max_consecutive_failures
    }
}

/// Lifecycle of a single batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchState {
    Pending,
    Fetching { attempt: u32 },
    Failed { attempt: u32 },
    Succeeded { attempts: u32 },
    Exhausted { attempts: u32 },
}

impl BatchState {
    /// Next attempt to run, from `Pending` or `Failed`.
    pub const fn begin_attempt(self) -> Self {
        match self {
            Self::Pending => Self::Fetching { attempt: 1 },
            Self::Failed { attempt } => Self::Fetching { attempt: attempt + 1 },
            other => other,
        }
    }

    pub const fn on_success(self) -> Self {
        match self {
            Self::Fetching { attempt } => Self::Succeeded { attempts: attempt },
            other => other,
        }
    }

    /// `exhausted` is the policy's verdict on the cursor's failure count.
    pub const fn on_failure(self, exhausted: bool) -> Self {
        match self {
            Self::Fetching { attempt } if exhausted => Self::Exhausted { attempts: attempt },
            Self::Fetching { attempt } => Self::Failed { attempt },
            other => other,
        }
    }

    /// Attempts started so far.
    pub const fn attempts(self) -> u32 {
        match self {
            Self::Pending => 0,
            Self::Fetching { attempt } | Self::Failed { attempt } => attempt,
            Self::Succeeded { attempts } | Self::Exhausted { attempts } => attempts,
        }
    }
}

/// Position in the insert queue plus the consecutive-failure counter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchCursor {
    pub offset: usize,
    pub consecutive_failures: u32,
}

impl BatchCursor {
    pub fn advance(&mut self, batch_len: usize) {
        self.offset += batch_len;
        self.consecutive_failures = 0;
    }

    pub fn record_failure(&mut self) {
        self.consecutive_failures += 1;
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchReport {
    pub number: usize,
    pub offset: usize,
    pub size: usize,
    pub attempts: u32,
    pub output: BatchOutput,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchRunSummary {
    pub batches: Vec<BatchReport>,
}

impl BatchRunSummary {
    pub fn persisted(&self) -> u64 {
        self.batches.iter().map(|b| b.output.persisted).sum()
    }

    pub fn skipped(&self) -> usize {
        self.batches.iter().map(|b| b.output.skipped).sum()
    }

    pub fn retries(&self) -> u32 {
        self.batches.iter().map(|b| b.attempts - 1).sum()
    }
}

pub struct BatchRetryCoordinator {
    batch_size: usize,
    policy: RetryPolicy,
}

impl BatchRetryCoordinator {
    pub fn new(batch_size: usize, policy: RetryPolicy) -> Self {
        Self {
            batch_size: batch_size.max(1),
            policy,
        }
    }

    pub const fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Runs `work` over `queue` until every batch succeeded or one is exhausted.
    pub async fn drive<W>(&self, queue: &[ObjectId], work: &W) -> IngestResult<BatchRunSummary>
    where
        W: BatchWork + ?Sized,
    {
        info!("Starting ingest...");
        info!("Total objects to ingest: {}", queue.len());
        info!("Batch size: {}", self.batch_size);
        info!("Batches needed: {}", batch_count(queue.len(), self.batch_size));

        let mut cursor = BatchCursor::default();
        let mut summary = BatchRunSummary::default();

        while let Some(batch) = Batch::at(queue, cursor.offset, self.batch_size) {
            let report = self.drive_batch(&batch, &mut cursor, queue.len(), work).await?;
            summary.batches.push(report);
        }

        info!("✅ Finished ingest.");
        Ok(summary)
    }

    async fn drive_batch<W>(
        &self,
        batch: &Batch,
        cursor: &mut BatchCursor,
        total: usize,
        work: &W,
    ) -> IngestResult<BatchReport>
    where
        W: BatchWork + ?Sized,
    {
        let mut state = BatchState::Pending;

        loop {
            state = state.begin_attempt();
            debug!("Batch {} at offset {}: {:?}", batch.number, batch.offset, state);

            match work.process(batch).await {
                Ok(output) => {
                    state = state.on_success();
                    cursor.advance(batch.len());
                    info!("Ingested {} of {} objects", cursor.offset, total);
                    return Ok(BatchReport {
                        number: batch.number,
                        offset: batch.offset,
                        size: batch.len(),
                        attempts: state.attempts(),
                        output,
                    });
                }
                Err(e) => {
                    cursor.record_failure();
                    state = state.on_failure(self.policy.is_exhausted(cursor.consecutive_failures));

                    if let BatchState::Exhausted { attempts } = state {
                        error!(
                            "❌ Batch {} failed {} times in a row, giving up at offset {}: {}",
                            batch.number, attempts, cursor.offset, e
                        );
                        return Err(IngestError::RetriesExhausted {
                            batch: batch.number,
                            offset: cursor.offset,
                            attempts,
                            source: Box::new(e),
                        });
                    }

                    warn!("Failed to ingest batch {}: {}. Trying again.", batch.number, e);
                    if !self.policy.retry_delay.is_zero() {
                        tokio::time::sleep(self.policy.retry_delay).await;
                    }
                }
            }
        }
    }
}
