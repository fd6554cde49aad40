//! Infrastructure layer: configuration, logging, the collection API client,
//! the relational store and the checkpoint log.

pub mod checkpoint_log;
pub mod collection_api;
pub mod config; // Layered configuration and defaults
pub mod database_connection;
pub mod logging;
pub mod sqlite_store;
pub mod storage;

// Re-export commonly used items
pub use checkpoint_log::{CheckpointLog, FileCheckpointLog};
pub use collection_api::{CatalogSource, CollectionApiClient, HttpClientConfig};
pub use config::{ConfigError, IngestConfig};
pub use database_connection::DatabaseConnection;
pub use logging::{LoggingConfig, flush_logs, init_logging, init_logging_with_config};
pub use sqlite_store::SqliteCatalogStore;
pub use storage::{CatalogStore, TableRef};
