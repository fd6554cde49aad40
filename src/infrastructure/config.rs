//! Configuration infrastructure
//!
//! Settings are layered with the `config` crate:
//! 1. compiled-in defaults (`defaults` module)
//! 2. an optional TOML file
//! 3. `COLLECTION_SYNC_*` environment variables
//!
//! CLI flags are applied on top by the binary.

#![allow(clippy::uninlined_format_args)]

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::infrastructure::storage::TableRef;

/// Environment variable prefix, e.g. `COLLECTION_SYNC_BATCH_SIZE`.
pub const ENV_PREFIX: &str = "COLLECTION_SYNC";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to load configuration: {source}")]
    Load {
        #[from]
        source: config::ConfigError,
    },

    #[error("Configuration validation failed: {message}")]
    Validation { message: String },
}

/// Complete ingestion configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    /// Base URL of the collection API (no trailing slash)
    pub api_base_url: String,

    /// sqlx connection string, e.g. `sqlite://data/collection.db`
    pub database_url: String,

    /// Target table for raw catalog objects
    pub table_name: String,

    /// Identifier column; also the identifier field of remote payloads
    pub primary_key: String,

    /// Soft-delete flag column
    pub active_column: String,

    /// Objects per insert batch
    pub batch_size: usize,

    /// Hard ceiling on in-flight object requests
    pub fetch_concurrency: usize,

    /// Emit a progress line every N requests
    pub progress_every: usize,

    /// Per-request timeout in seconds
    pub request_timeout_seconds: u64,

    /// Pace request issuance to one per `1/fetch_concurrency` seconds
    pub pacing_enabled: bool,

    /// Consecutive failures of one batch before the run aborts
    pub max_batch_failures: u32,

    /// Delay between attempts of a failed batch in milliseconds
    pub batch_retry_delay_ms: u64,

    /// Append-only event log that also holds the checkpoint
    pub checkpoint_file: PathBuf,

    /// Log level: "error", "warn", "info", "debug", "trace"
    pub log_level: String,

    /// Emit JSON formatted logs on stdout
    pub log_json: bool,

    /// Also write logs to a daily file in this directory
    pub log_dir: Option<PathBuf>,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            api_base_url: defaults::API_BASE_URL.to_string(),
            database_url: defaults::DATABASE_URL.to_string(),
            table_name: defaults::TABLE_NAME.to_string(),
            primary_key: defaults::PRIMARY_KEY.to_string(),
            active_column: defaults::ACTIVE_COLUMN.to_string(),
            batch_size: defaults::BATCH_SIZE,
            fetch_concurrency: defaults::FETCH_CONCURRENCY,
            progress_every: defaults::PROGRESS_EVERY,
            request_timeout_seconds: defaults::REQUEST_TIMEOUT_SECONDS,
            pacing_enabled: defaults::PACING_ENABLED,
            max_batch_failures: defaults::MAX_BATCH_FAILURES,
            batch_retry_delay_ms: defaults::BATCH_RETRY_DELAY_MS,
            checkpoint_file: PathBuf::from(defaults::CHECKPOINT_FILE),
            log_level: defaults::LOG_LEVEL.to_string(),
            log_json: false,
            log_dir: None,
        }
    }
}

impl IngestConfig {
    /// Loads defaults, then `path` (if given), then the environment.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder =
            config::Config::builder().add_source(config::Config::try_from(&Self::default())?);

        if let Some(path) = path {
            info!("📁 Loading configuration file: {:?}", path);
            builder = builder.add_source(config::File::from(path).required(true));
        }

        let settings = builder
            .add_source(config::Environment::with_prefix(ENV_PREFIX).try_parsing(true))
            .build()?;

        let config: Self = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Rejects values the engine cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |message: String| Err(ConfigError::Validation { message });

        if self.batch_size == 0 {
            return invalid("batch_size must be greater than 0".to_string());
        }
        if self.fetch_concurrency == 0 {
            return invalid("fetch_concurrency must be greater than 0".to_string());
        }
        if self.progress_every == 0 {
            return invalid("progress_every must be greater than 0".to_string());
        }
        if self.request_timeout_seconds == 0 {
            return invalid("request_timeout_seconds must be greater than 0".to_string());
        }
        if self.max_batch_failures == 0 {
            return invalid("max_batch_failures must be greater than 0".to_string());
        }
        if url::Url::parse(&self.api_base_url).is_err() {
            return invalid(format!("api_base_url is not a valid URL: {}", self.api_base_url));
        }
        for (name, value) in [
            ("table_name", &self.table_name),
            ("primary_key", &self.primary_key),
            ("active_column", &self.active_column),
        ] {
            if !is_plain_identifier(value) {
                return invalid(format!("{} must be a plain SQL identifier, got {:?}", name, value));
            }
        }
        if self.primary_key == self.active_column {
            return invalid("primary_key and active_column must differ".to_string());
        }

        Ok(())
    }

    pub fn table(&self) -> TableRef {
        TableRef::new(&self.table_name, &self.primary_key, &self.active_column)
    }

    pub const fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }

    pub const fn batch_retry_delay(&self) -> Duration {
        Duration::from_millis(self.batch_retry_delay_ms)
    }
}

/// ASCII letters, digits and underscores, not starting with a digit.
fn is_plain_identifier(value: &str) -> bool {
    let mut chars = value.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Default configuration values
pub mod defaults {
    /// Public collection API root
    pub const API_BASE_URL: &str = "https://collectionapi.metmuseum.org/public/collection/v1";

    /// Default database location
    pub const DATABASE_URL: &str = "sqlite://data/collection.db";

    /// Default raw object table
    pub const TABLE_NAME: &str = "met_objects";

    /// Identifier field of collection objects
    pub const PRIMARY_KEY: &str = "objectID";

    /// Soft-delete flag column
    pub const ACTIVE_COLUMN: &str = "isActive";

    /// Default insert batch size
    pub const BATCH_SIZE: usize = 1000;

    /// Default in-flight request ceiling
    pub const FETCH_CONCURRENCY: usize = 70;

    /// Default progress-log granularity
    pub const PROGRESS_EVERY: usize = 100;

    /// Default request timeout in seconds
    pub const REQUEST_TIMEOUT_SECONDS: u64 = 30;

    /// Issuance pacing on by default
    pub const PACING_ENABLED: bool = true;

    /// Consecutive failures of the same batch before aborting
    pub const MAX_BATCH_FAILURES: u32 = 3;

    /// No delay between batch attempts by default
    pub const BATCH_RETRY_DELAY_MS: u64 = 0;

    /// Default checkpoint/event log
    pub const CHECKPOINT_FILE: &str = "logs/ingest.log";

    /// Default log level
    pub const LOG_LEVEL: &str = "info";

    /// Days to look back when no completed run has been recorded
    pub const CHECKPOINT_FALLBACK_DAYS: i64 = 7;
}
