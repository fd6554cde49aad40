//! Logging system configuration and initialization
//!
//! This module provides the logging setup for ingest runs:
//! - Console output (plain or JSON) carrying the progress lines
//! - Optional daily-rolling file output through a non-blocking writer
//! - `RUST_LOG` override with dependency noise suppressed by default

#![allow(clippy::uninlined_format_args)]

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Result, anyhow};
use chrono::Local;
use lazy_static::lazy_static;
use tracing_appender::{non_blocking, rolling};
use tracing_subscriber::{
    EnvFilter, Layer, Registry,
    fmt::{self, time::FormatTime},
    layer::{Layered, SubscriberExt},
    util::SubscriberInitExt,
};

use crate::infrastructure::config::IngestConfig;

/// File name prefix of the rolling log
const LOG_FILE_PREFIX: &str = "collection-sync.log";

// Global guard to keep the log file writer alive
lazy_static! {
    static ref LOG_GUARDS: Mutex<Vec<tracing_appender::non_blocking::WorkerGuard>> = Mutex::new(Vec::new());
}

type FilteredRegistry = Layered<EnvFilter, Registry>;
type BoxedLayer = Box<dyn Layer<FilteredRegistry> + Send + Sync>;

/// Logging configuration settings
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Log level: "error", "warn", "info", "debug", "trace"
    pub level: String,
    /// Enable JSON formatted console logs
    pub json_format: bool,
    /// Directory for the rolling log file; no file output when `None`
    pub log_dir: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: crate::infrastructure::config::defaults::LOG_LEVEL.to_string(),
            json_format: false,
            log_dir: None,
        }
    }
}

impl LoggingConfig {
    pub fn from_ingest_config(config: &IngestConfig) -> Self {
        Self {
            level: config.log_level.clone(),
            json_format: config.log_json,
            log_dir: config.log_dir.clone(),
        }
    }
}

/// Local wall-clock timestamps with millisecond precision
struct LocalTimeFormatter;

impl FormatTime for LocalTimeFormatter {
    fn format_time(&self, w: &mut fmt::format::Writer<'_>) -> std::fmt::Result {
        write!(w, "{}", Local::now().format("%Y-%m-%d %H:%M:%S%.3f"))
    }
}

/// Initialize the logging system with default configuration
pub fn init_logging() -> Result<()> {
    init_logging_with_config(&LoggingConfig::default())
}

/// Builds the filter used when `RUST_LOG` is not set.
///
/// SQL statements, HTTP connection chatter and runtime internals are only
/// shown when the requested level is `trace`.
pub fn default_filter(level: &str) -> Result<EnvFilter> {
    let mut filter = EnvFilter::try_new(level).map_err(|e| anyhow!("Invalid log level '{}': {}", level, e))?;

    if !level.to_lowercase().contains("trace") {
        for directive in [
            "sqlx::query=warn",
            "sqlx::sqlite=warn",
            "reqwest=info",
            "hyper=warn",
            "hyper_util=warn",
            "h2=warn",
            "rustls=warn",
            "tokio=info",
            "runtime=warn",
        ] {
            filter = filter.add_directive(directive.parse().map_err(|e| anyhow!("Bad directive {}: {}", directive, e))?);
        }
    }

    Ok(filter)
}

/// Initialize logging with custom configuration
///
/// You can override the filtering using the RUST_LOG environment variable:
/// ```bash
/// # Show SQL statements issued by the store
/// RUST_LOG="info,sqlx::query=debug" collection-sync run
///
/// # Show per-request HTTP details
/// RUST_LOG="debug,reqwest=debug,hyper=debug" collection-sync run
/// ```
pub fn init_logging_with_config(config: &LoggingConfig) -> Result<()> {
    let env_filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => default_filter(&config.level)?,
    };

    let mut layers: Vec<BoxedLayer> = Vec::new();

    // Console layer carries the human-readable progress lines
    if config.json_format {
        layers.push(
            fmt::Layer::new()
                .json()
                .with_writer(std::io::stdout)
                .with_timer(LocalTimeFormatter)
                .with_target(true)
                .boxed(),
        );
    } else {
        layers.push(
            fmt::Layer::new()
                .with_writer(std::io::stdout)
                .with_timer(LocalTimeFormatter)
                .with_target(false)
                .boxed(),
        );
    }

    if let Some(log_dir) = &config.log_dir {
        layers.push(file_layer(log_dir)?);
    }

    Registry::default()
        .with(env_filter)
        .with(layers)
        .try_init()
        .map_err(|e| anyhow!("Failed to initialize logging: {}", e))?;

    Ok(())
}

/// File layer with minimal formatting (time + level + message only)
fn file_layer(log_dir: &Path) -> Result<BoxedLayer> {
    std::fs::create_dir_all(log_dir)
        .map_err(|e| anyhow!("Failed to create log directory {:?}: {}", log_dir, e))?;

    let (file_writer, file_guard) = non_blocking(rolling::daily(log_dir, LOG_FILE_PREFIX));

    // Store the guard globally to prevent it from being dropped
    if let Ok(mut guards) = LOG_GUARDS.lock() {
        guards.push(file_guard);
    }

    Ok(fmt::Layer::new()
        .with_writer(file_writer)
        .with_timer(LocalTimeFormatter)
        .with_target(false)
        .with_ansi(false)
        .boxed())
}

/// Flushes buffered file output; call before the process exits.
pub fn flush_logs() {
    if let Ok(mut guards) = LOG_GUARDS.lock() {
        guards.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_filter_accepts_levels() {
        assert!(default_filter("info").is_ok());
        assert!(default_filter("trace").is_ok());
        assert!(default_filter("collection_sync_lib=debug,warn").is_ok());
    }

    #[test]
    fn config_follows_ingest_settings() {
        let ingest = IngestConfig {
            log_level: "debug".to_string(),
            log_json: true,
            log_dir: Some(PathBuf::from("logs")),
            ..IngestConfig::default()
        };
        let config = LoggingConfig::from_ingest_config(&ingest);
        assert_eq!(config.level, "debug");
        assert!(config.json_format);
        assert_eq!(config.log_dir, Some(PathBuf::from("logs")));
    }
}
