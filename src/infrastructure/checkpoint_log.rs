//! Append-only ingest event log that doubles as the run checkpoint.
//!
//! Each event is one line: `<RFC 3339 timestamp> <LEVEL> <message>`.
//! The checkpoint is the date of the most recent completion event.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::error::{IngestError, IngestResult};

/// Message that marks a successfully completed run.
pub const COMPLETION_EVENT: &str = "Ingest complete";

#[async_trait]
pub trait CheckpointLog: Send + Sync {
    /// Date of the last completed run, if any run ever completed.
    async fn last_completed_date(&self) -> IngestResult<Option<NaiveDate>>;

    async fn record_event(&self, message: &str) -> IngestResult<()>;

    /// Records the completion event, which advances the checkpoint.
    async fn record_completion(&self) -> IngestResult<()> {
        self.record_event(COMPLETION_EVENT).await
    }
}

pub struct FileCheckpointLog {
    path: PathBuf,
}

impl FileCheckpointLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn format_line(at: DateTime<Utc>, message: &str) -> String {
        // keep one event per line
        let message = message.replace(['\r', '\n'], " ");
        format!("{} INFO {}\n", at.to_rfc3339(), message)
    }

    fn completion_date(line: &str) -> Option<NaiveDate> {
        let (timestamp, rest) = line.split_once(' ')?;
        let (_level, message) = rest.split_once(' ')?;
        if !message.trim_end().starts_with(COMPLETION_EVENT) {
            return None;
        }
        DateTime::parse_from_rfc3339(timestamp)
            .ok()
            .map(|at| at.with_timezone(&Utc).date_naive())
    }
}

#[async_trait]
impl CheckpointLog for FileCheckpointLog {
    async fn last_completed_date(&self) -> IngestResult<Option<NaiveDate>> {
        let contents = match fs::read_to_string(&self.path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(IngestError::Checkpoint(format!(
                    "Failed to read {}: {}",
                    self.path.display(),
                    e
                )));
            }
        };

        Ok(contents.lines().rev().find_map(Self::completion_date))
    }

    async fn record_event(&self, message: &str) -> IngestResult<()> {
        let io_err = |e: std::io::Error| {
            IngestError::Checkpoint(format!("Failed to append to {}: {}", self.path.display(), e))
        };

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).await.map_err(io_err)?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(io_err)?;
        file.write_all(Self::format_line(Utc::now(), message).as_bytes())
            .await
            .map_err(io_err)?;
        file.flush().await.map_err(io_err)?;

        debug!("Recorded ingest event: {}", message);
        Ok(())
    }
}
