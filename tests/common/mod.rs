//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use std::collections::{BTreeSet, HashSet};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::NaiveDate;
use serde_json::json;
use tempfile::TempDir;

use collection_sync_lib::domain::{CatalogRecord, ObjectId, RecordPayload};
use collection_sync_lib::infrastructure::{
    CatalogSource, CatalogStore, FileCheckpointLog, SqliteCatalogStore, TableRef,
};
use collection_sync_lib::ingest::{FetchSettings, RetryPolicy};
use collection_sync_lib::{IngestError, IngestResult, IngestSettings};

pub fn table() -> TableRef {
    TableRef::new("met_objects", "objectID", "isActive")
}

pub fn settings(batch_size: usize) -> IngestSettings {
    IngestSettings {
        table: table(),
        batch_size,
        fetch: FetchSettings {
            concurrency: 8,
            request_timeout: std::time::Duration::from_secs(5),
            pacing: false,
            progress_every: 100,
        },
        retry: RetryPolicy::default(),
        checkpoint_fallback_days: 7,
    }
}

pub fn object(id: ObjectId) -> RecordPayload {
    match json!({
        "objectID": id,
        "title": format!("Object {id}"),
        "isHighlight": id % 2 == 0,
        "objectBeginDate": 1700 + id,
        "constituents": [{"name": "Unknown"}],
    }) {
        serde_json::Value::Object(map) => map,
        _ => unreachable!(),
    }
}

/// Remote collection with fixed listings and per-object failures.
#[derive(Default)]
pub struct FakeCollection {
    pub all: Vec<ObjectId>,
    pub updated: Vec<ObjectId>,
    pub broken: HashSet<ObjectId>,
    pub listing_down: bool,
    pub requests: AtomicUsize,
}

impl FakeCollection {
    pub fn new(all: impl IntoIterator<Item = ObjectId>, updated: impl IntoIterator<Item = ObjectId>) -> Self {
        Self {
            all: all.into_iter().collect(),
            updated: updated.into_iter().collect(),
            ..Self::default()
        }
    }
}

#[async_trait]
impl CatalogSource for FakeCollection {
    async fn list_object_ids(&self, since: Option<NaiveDate>) -> IngestResult<Vec<ObjectId>> {
        if self.listing_down {
            return Err(IngestError::Listing {
                endpoint: "/objects".to_string(),
                message: "503 Service Unavailable".to_string(),
            });
        }
        Ok(if since.is_some() { self.updated.clone() } else { self.all.clone() })
    }

    async fn fetch_object(&self, id: ObjectId) -> IngestResult<RecordPayload> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        if self.broken.contains(&id) {
            return Err(IngestError::Decode {
                id,
                message: "EOF while parsing an object".to_string(),
            });
        }
        Ok(object(id))
    }
}

/// Wraps the SQLite store, recording calls and failing appends on demand.
///
/// A failing append first commits half of its records, then errors.
pub struct InstrumentedStore {
    pub inner: SqliteCatalogStore,
    pub calls: Mutex<Vec<String>>,
    pub failing_appends: AtomicU32,
}

impl InstrumentedStore {
    pub fn new(inner: SqliteCatalogStore) -> Self {
        Self {
            inner,
            calls: Mutex::new(Vec::new()),
            failing_appends: AtomicU32::new(0),
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl CatalogStore for InstrumentedStore {
    async fn table_exists(&self, table: &TableRef) -> IngestResult<bool> {
        self.inner.table_exists(table).await
    }

    async fn distinct_identifiers(&self, table: &TableRef) -> IngestResult<BTreeSet<ObjectId>> {
        self.inner.distinct_identifiers(table).await
    }

    async fn delete_rows(&self, table: &TableRef, ids: &[ObjectId]) -> IngestResult<u64> {
        self.calls.lock().unwrap().push(format!("delete {ids:?}"));
        self.inner.delete_rows(table, ids).await
    }

    async fn set_inactive(&self, table: &TableRef, ids: &[ObjectId]) -> IngestResult<u64> {
        self.calls.lock().unwrap().push(format!("set_inactive {ids:?}"));
        self.inner.set_inactive(table, ids).await
    }

    async fn append_records(&self, table: &TableRef, records: &[CatalogRecord]) -> IngestResult<u64> {
        let mut ids: Vec<ObjectId> = records.iter().map(|r| r.id).collect();
        ids.sort_unstable();
        self.calls.lock().unwrap().push(format!("append {ids:?}"));

        let failing = self
            .failing_appends
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            let mut partial = records.to_vec();
            partial.sort_by_key(|r| r.id);
            partial.truncate(records.len() / 2);
            self.inner.append_records(table, &partial).await?;
            return Err(IngestError::Storage("database is locked".to_string()));
        }
        self.inner.append_records(table, records).await
    }
}

pub struct Workspace {
    pub dir: TempDir,
    pub store: SqliteCatalogStore,
    pub checkpoint: FileCheckpointLog,
}

impl Workspace {
    pub async fn new() -> Self {
        let dir = tempfile::tempdir().expect("temp dir");
        let url = format!("sqlite://{}", dir.path().join("collection.db").display());
        let store = SqliteCatalogStore::connect(&url).await.expect("open store");
        let checkpoint = FileCheckpointLog::new(dir.path().join("logs").join("ingest.log"));
        Self { dir, store, checkpoint }
    }

    pub async fn rows(&self) -> Vec<(i64, i64)> {
        sqlx::query_as::<_, (i64, i64)>(r#"SELECT "objectID", "isActive" FROM "met_objects" ORDER BY 1"#)
            .fetch_all(self.store.pool())
            .await
            .expect("read rows")
    }

    pub fn checkpoint_text(&self) -> String {
        std::fs::read_to_string(self.checkpoint.path()).unwrap_or_default()
    }
}
