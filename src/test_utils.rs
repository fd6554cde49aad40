//! Test utilities for the ingestion engine
//!
//! Scripted collaborators that stand in for the remote API, the store and the
//! checkpoint log, with enough instrumentation to assert call order and
//! concurrency.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use serde_json::json;

use crate::domain::{CatalogRecord, ObjectId, RecordPayload};
use crate::error::{IngestError, IngestResult};
use crate::infrastructure::checkpoint_log::{COMPLETION_EVENT, CheckpointLog};
use crate::infrastructure::collection_api::CatalogSource;
use crate::infrastructure::storage::{CatalogStore, TableRef};

/// Body the scripted source returns for `id`.
pub fn payload_for(id: ObjectId) -> RecordPayload {
    match json!({
        "objectID": id,
        "title": format!("Object {id}"),
        "objectBeginDate": 1800 + id,
        "additionalImages": ["front.jpg"],
    }) {
        serde_json::Value::Object(map) => map,
        _ => unreachable!(),
    }
}

/// Decrements the in-flight counter even when the request future is dropped.
struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[derive(Default)]
pub struct ScriptedSource {
    remote: Vec<ObjectId>,
    updated: Vec<ObjectId>,
    failing: HashSet<ObjectId>,
    malformed: HashSet<ObjectId>,
    missing_id: HashSet<ObjectId>,
    listing_fails: bool,
    latency: Duration,
    pub requests: AtomicUsize,
    pub in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
    pub listed_since: Mutex<Vec<Option<NaiveDate>>>,
}

impl ScriptedSource {
    pub fn new(remote: impl IntoIterator<Item = ObjectId>) -> Self {
        Self {
            remote: remote.into_iter().collect(),
            ..Self::default()
        }
    }

    pub fn with_updated(mut self, updated: impl IntoIterator<Item = ObjectId>) -> Self {
        self.updated = updated.into_iter().collect();
        self
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// `id` answers with HTTP 500.
    pub fn failing(mut self, id: ObjectId) -> Self {
        self.failing.insert(id);
        self
    }

    /// `id` answers with a body that does not decode.
    pub fn malformed(mut self, id: ObjectId) -> Self {
        self.malformed.insert(id);
        self
    }

    /// `id` answers with an object that lacks its identifier field.
    pub fn missing_id(mut self, id: ObjectId) -> Self {
        self.missing_id.insert(id);
        self
    }

    pub fn listing_fails(mut self) -> Self {
        self.listing_fails = true;
        self
    }
}

#[async_trait]
impl CatalogSource for ScriptedSource {
    async fn list_object_ids(&self, since: Option<NaiveDate>) -> IngestResult<Vec<ObjectId>> {
        if self.listing_fails {
            return Err(IngestError::Listing {
                endpoint: "/objects".to_string(),
                message: "connection refused".to_string(),
            });
        }
        self.listed_since.lock().expect("lock").push(since);
        Ok(if since.is_some() {
            self.updated.clone()
        } else {
            self.remote.clone()
        })
    }

    async fn fetch_object(&self, id: ObjectId) -> IngestResult<RecordPayload> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        let _guard = InFlight(&self.in_flight);
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        if self.latency.is_zero() {
            tokio::task::yield_now().await;
        } else {
            tokio::time::sleep(self.latency).await;
        }

        if self.failing.contains(&id) {
            return Err(IngestError::Http { id, status: 500 });
        }
        if self.malformed.contains(&id) {
            return Err(IngestError::Decode {
                id,
                message: "expected value at line 1 column 1".to_string(),
            });
        }
        let mut body = payload_for(id);
        if self.missing_id.contains(&id) {
            body.remove("objectID");
        }
        Ok(body)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreCall {
    SetInactive(Vec<ObjectId>),
    DeleteRows(Vec<ObjectId>),
    Append(Vec<ObjectId>),
}

/// In-memory store with call recording and injectable append failures.
#[derive(Default)]
pub struct MemoryStore {
    /// id -> (record, active)
    pub rows: Mutex<BTreeMap<ObjectId, (Option<CatalogRecord>, bool)>>,
    pub calls: Mutex<Vec<StoreCall>>,
    /// Appends that will write half their records and then fail
    pub failing_appends: AtomicU32,
    /// Total rows ever inserted, duplicates included
    pub inserts: AtomicUsize,
    table_created: Mutex<bool>,
}

impl MemoryStore {
    /// A store whose table already holds `ids`, all active.
    pub fn with_rows(ids: impl IntoIterator<Item = ObjectId>) -> Self {
        let store = Self::default();
        {
            let mut rows = store.rows.lock().expect("lock");
            for id in ids {
                rows.insert(id, (None, true));
            }
        }
        *store.table_created.lock().expect("lock") = true;
        store
    }

    pub fn fail_next_appends(self, n: u32) -> Self {
        self.failing_appends.store(n, Ordering::SeqCst);
        self
    }

    pub fn calls(&self) -> Vec<StoreCall> {
        self.calls.lock().expect("lock").clone()
    }

    pub fn active_ids(&self) -> BTreeSet<ObjectId> {
        self.rows
            .lock()
            .expect("lock")
            .iter()
            .filter(|(_, (_, active))| *active)
            .map(|(id, _)| *id)
            .collect()
    }

    pub fn inactive_ids(&self) -> BTreeSet<ObjectId> {
        self.rows
            .lock()
            .expect("lock")
            .iter()
            .filter(|(_, (_, active))| !*active)
            .map(|(id, _)| *id)
            .collect()
    }
}

#[async_trait]
impl CatalogStore for MemoryStore {
    async fn table_exists(&self, _table: &TableRef) -> IngestResult<bool> {
        Ok(*self.table_created.lock().expect("lock"))
    }

    async fn distinct_identifiers(&self, _table: &TableRef) -> IngestResult<BTreeSet<ObjectId>> {
        Ok(self.rows.lock().expect("lock").keys().copied().collect())
    }

    async fn delete_rows(&self, _table: &TableRef, ids: &[ObjectId]) -> IngestResult<u64> {
        self.calls.lock().expect("lock").push(StoreCall::DeleteRows(ids.to_vec()));
        let mut rows = self.rows.lock().expect("lock");
        Ok(ids.iter().filter(|id| rows.remove(id).is_some()).count() as u64)
    }

    async fn set_inactive(&self, _table: &TableRef, ids: &[ObjectId]) -> IngestResult<u64> {
        self.calls.lock().expect("lock").push(StoreCall::SetInactive(ids.to_vec()));
        let mut rows = self.rows.lock().expect("lock");
        let mut touched = 0;
        for id in ids {
            if let Some((_, active)) = rows.get_mut(id) {
                *active = false;
                touched += 1;
            }
        }
        Ok(touched)
    }

    async fn append_records(&self, _table: &TableRef, records: &[CatalogRecord]) -> IngestResult<u64> {
        let mut ids: Vec<ObjectId> = records.iter().map(|r| r.id).collect();
        ids.sort_unstable();
        self.calls.lock().expect("lock").push(StoreCall::Append(ids));
        *self.table_created.lock().expect("lock") = true;

        let failing = self
            .failing_appends
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();

        let mut rows = self.rows.lock().expect("lock");
        let limit = if failing { records.len() / 2 } else { records.len() };
        for record in &records[..limit] {
            rows.insert(record.id, (Some(record.clone()), true));
            self.inserts.fetch_add(1, Ordering::SeqCst);
        }

        if failing {
            return Err(IngestError::Storage("connection reset during write".to_string()));
        }
        Ok(limit as u64)
    }
}

/// Checkpoint log kept in memory.
#[derive(Default)]
pub struct MemoryCheckpoint {
    pub last_completed: Option<NaiveDate>,
    pub events: Mutex<Vec<String>>,
}

impl MemoryCheckpoint {
    pub fn completed_on(date: NaiveDate) -> Self {
        Self {
            last_completed: Some(date),
            ..Self::default()
        }
    }

    pub fn events(&self) -> Vec<String> {
        self.events.lock().expect("lock").clone()
    }

    pub fn completed(&self) -> bool {
        self.events().iter().any(|e| e == COMPLETION_EVENT)
    }
}

#[async_trait]
impl CheckpointLog for MemoryCheckpoint {
    async fn last_completed_date(&self) -> IngestResult<Option<NaiveDate>> {
        Ok(self.last_completed)
    }

    async fn record_event(&self, message: &str) -> IngestResult<()> {
        self.events.lock().expect("lock").push(message.to_string());
        Ok(())
    }
}
