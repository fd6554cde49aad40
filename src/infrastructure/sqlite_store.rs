//! SQLite implementation of [`CatalogStore`].
//!
//! The raw table is created on first write with the identifier as
//! `INTEGER PRIMARY KEY` and an active flag defaulting to 1. Attribute
//! columns are added as new scalar attributes show up; nested values never
//! reach this layer.
//!
//! Every operation takes its own connection or transaction from the pool and
//! gives it back on drop, so nothing is held across network latency.

use std::collections::{BTreeSet, HashSet};

use async_trait::async_trait;
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool, Transaction};
use tracing::{debug, info};

use crate::domain::{CatalogRecord, ObjectId, ScalarValue};
use crate::error::IngestResult;
use crate::infrastructure::database_connection::DatabaseConnection;
use crate::infrastructure::storage::{CatalogStore, TableRef};

/// Identifiers bound per `IN (...)` clause; stays under SQLite's variable limit.
const ID_CHUNK: usize = 500;

#[derive(Clone)]
pub struct SqliteCatalogStore {
    pool: SqlitePool,
}

impl SqliteCatalogStore {
    pub const fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str) -> IngestResult<Self> {
        let connection = DatabaseConnection::new(database_url).await?;
        Ok(Self::new(connection.into_pool()))
    }

    pub const fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn ensure_table(tx: &mut Transaction<'_, Sqlite>, table: &TableRef) -> IngestResult<()> {
        let sql = format!(
            "CREATE TABLE IF NOT EXISTS {} ({} INTEGER PRIMARY KEY, {} INTEGER NOT NULL DEFAULT 1)",
            quote_ident(&table.name),
            quote_ident(&table.id_column),
            quote_ident(&table.active_column),
        );
        sqlx::query(&sql).execute(&mut **tx).await?;
        Ok(())
    }

    /// Lower-cased column names; SQLite compares column names case-insensitively.
    async fn existing_columns(
        tx: &mut Transaction<'_, Sqlite>,
        table: &TableRef,
    ) -> IngestResult<HashSet<String>> {
        let sql = format!("PRAGMA table_info({})", quote_ident(&table.name));
        let rows = sqlx::query(&sql).fetch_all(&mut **tx).await?;
        rows.iter()
            .map(|row| {
                row.try_get::<String, _>("name")
                    .map(|name| name.to_lowercase())
                    .map_err(Into::into)
            })
            .collect()
    }

    /// Adds a column for every non-null attribute the table does not know yet.
    async fn evolve_columns(
        tx: &mut Transaction<'_, Sqlite>,
        table: &TableRef,
        records: &[CatalogRecord],
    ) -> IngestResult<HashSet<String>> {
        let mut columns = Self::existing_columns(tx, table).await?;

        for (key, value) in records.iter().flat_map(|r| r.attributes.iter()) {
            let folded = key.to_lowercase();
            if columns.contains(&folded) {
                continue;
            }
            let Some(affinity) = value.sql_affinity() else {
                continue;
            };
            let sql = format!(
                "ALTER TABLE {} ADD COLUMN {} {}",
                quote_ident(&table.name),
                quote_ident(key),
                affinity
            );
            sqlx::query(&sql).execute(&mut **tx).await?;
            debug!("Added column {} {} to {}", key, affinity, table.name);
            columns.insert(folded);
        }

        Ok(columns)
    }

    async fn delete_in_tx(
        tx: &mut Transaction<'_, Sqlite>,
        table: &TableRef,
        ids: &[ObjectId],
    ) -> IngestResult<u64> {
        let mut affected = 0;
        for chunk in ids.chunks(ID_CHUNK) {
            let mut qb = QueryBuilder::<Sqlite>::new(format!(
                "DELETE FROM {} WHERE {} IN (",
                quote_ident(&table.name),
                quote_ident(&table.id_column)
            ));
            push_id_list(&mut qb, chunk);
            affected += qb.build().execute(&mut **tx).await?.rows_affected();
        }
        Ok(affected)
    }

    async fn insert_record(
        tx: &mut Transaction<'_, Sqlite>,
        table: &TableRef,
        columns: &HashSet<String>,
        record: &CatalogRecord,
    ) -> IngestResult<()> {
        let active_folded = table.active_column.to_lowercase();
        let attributes: Vec<(&String, &ScalarValue)> = record
            .attributes
            .iter()
            .filter(|(key, _)| {
                let folded = key.to_lowercase();
                folded != active_folded && columns.contains(&folded)
            })
            .collect();

        let mut qb = QueryBuilder::<Sqlite>::new(format!(
            "INSERT INTO {} ({}, {}",
            quote_ident(&table.name),
            quote_ident(&table.id_column),
            quote_ident(&table.active_column)
        ));
        for (key, _) in &attributes {
            qb.push(", ").push(quote_ident(key));
        }
        qb.push(") VALUES (");
        {
            let mut values = qb.separated(", ");
            values.push_bind(record.id);
            values.push_bind(1_i64);
            for (_, value) in &attributes {
                match value {
                    ScalarValue::Null => values.push_bind(None::<String>),
                    ScalarValue::Boolean(b) => values.push_bind(i64::from(*b)),
                    ScalarValue::Integer(i) => values.push_bind(*i),
                    ScalarValue::Float(x) => values.push_bind(*x),
                    ScalarValue::Text(s) => values.push_bind(s.clone()),
                };
            }
        }
        qb.push(")");

        qb.build().execute(&mut **tx).await?;
        Ok(())
    }
}

#[async_trait]
impl CatalogStore for SqliteCatalogStore {
    async fn table_exists(&self, table: &TableRef) -> IngestResult<bool> {
        let row = sqlx::query("SELECT name FROM sqlite_master WHERE type = 'table' AND name = ?")
            .bind(&table.name)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    async fn distinct_identifiers(&self, table: &TableRef) -> IngestResult<BTreeSet<ObjectId>> {
        let sql = format!(
            "SELECT DISTINCT {} FROM {}",
            quote_ident(&table.id_column),
            quote_ident(&table.name)
        );
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;
        let mut ids = BTreeSet::new();
        for row in rows {
            if let Some(id) = row.try_get::<Option<i64>, _>(0)? {
                ids.insert(id);
            }
        }
        Ok(ids)
    }

    async fn delete_rows(&self, table: &TableRef, ids: &[ObjectId]) -> IngestResult<u64> {
        if ids.is_empty() {
            return Ok(0);
        }
        let mut tx = self.pool.begin().await?;
        let affected = Self::delete_in_tx(&mut tx, table, ids).await?;
        tx.commit().await?;

        info!("🗑️ Deleted {} rows from {}", affected, table.name);
        Ok(affected)
    }

    async fn set_inactive(&self, table: &TableRef, ids: &[ObjectId]) -> IngestResult<u64> {
        if ids.is_empty() {
            return Ok(0);
        }
        let mut tx = self.pool.begin().await?;
        let mut affected = 0;
        for chunk in ids.chunks(ID_CHUNK) {
            let mut qb = QueryBuilder::<Sqlite>::new(format!(
                "UPDATE {} SET {} = 0 WHERE {} IN (",
                quote_ident(&table.name),
                quote_ident(&table.active_column),
                quote_ident(&table.id_column)
            ));
            push_id_list(&mut qb, chunk);
            affected += qb.build().execute(&mut *tx).await?.rows_affected();
        }
        tx.commit().await?;

        info!("💤 Set {} rows in {} to inactive", affected, table.name);
        Ok(affected)
    }

    async fn append_records(&self, table: &TableRef, records: &[CatalogRecord]) -> IngestResult<u64> {
        if records.is_empty() {
            return Ok(0);
        }

        let mut tx = self.pool.begin().await?;
        Self::ensure_table(&mut tx, table).await?;
        let columns = Self::evolve_columns(&mut tx, table, records).await?;

        // Clear the batch's ids first so a retried batch replaces its own rows
        let ids: Vec<ObjectId> = records.iter().map(|r| r.id).collect();
        Self::delete_in_tx(&mut tx, table, &ids).await?;

        let mut written = 0_u64;
        let mut seen = HashSet::with_capacity(records.len());
        for record in records {
            // duplicates within one batch keep the first body
            if !seen.insert(record.id) {
                continue;
            }
            Self::insert_record(&mut tx, table, &columns, record).await?;
            written += 1;
        }
        tx.commit().await?;

        info!("💾 Wrote {} rows to {}", written, table.name);
        Ok(written)
    }
}

fn push_id_list(qb: &mut QueryBuilder<'_, Sqlite>, ids: &[ObjectId]) {
    let mut list = qb.separated(", ");
    for id in ids {
        list.push_bind(*id);
    }
    qb.push(")");
}

/// Double-quotes an SQL identifier, escaping embedded quotes.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}
