//! StateStore: redb-backed persistence for pipeline process state.
//!
//! Everything the pipeline would otherwise keep only in memory: read
//! cursors, category codes, the fitted model, and the anomaly and
//! remediation journals. The store supports both on-disk and in-memory
//! backends (the latter for testing).

use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::error::{StateError, StateResult};
use crate::tables::*;
use crate::types::*;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

/// Thread-safe state store backed by redb.
#[derive(Clone, Debug)]
pub struct StateStore {
    db: Arc<Database>,
}

impl StateStore {
    /// Open (or create) a persistent state store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "state store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory state store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory state store opened");
        Ok(store)
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        // Opening a table in a write transaction creates it if absent.
        txn.open_table(CURSORS).map_err(map_err!(Table))?;
        txn.open_table(CATEGORIES).map_err(map_err!(Table))?;
        txn.open_table(MODELS).map_err(map_err!(Table))?;
        txn.open_table(ANOMALIES).map_err(map_err!(Table))?;
        txn.open_table(REMEDIATIONS).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    fn put_json<T: Serialize + ?Sized>(
        &self,
        table_def: TableDefinition<'static, &'static str, &'static [u8]>,
        key: &str,
        value: &T,
    ) -> StateResult<()> {
        let value = serde_json::to_vec(value).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(table_def).map_err(map_err!(Table))?;
            table
                .insert(key, value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    fn get_json<T: DeserializeOwned>(
        &self,
        table_def: TableDefinition<'static, &'static str, &'static [u8]>,
        key: &str,
    ) -> StateResult<Option<T>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(table_def).map_err(map_err!(Table))?;
        match table.get(key).map_err(map_err!(Read))? {
            Some(guard) => {
                let value: T =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    /// Newest-first scan of an event-keyed table.
    fn list_recent<T: DeserializeOwned>(
        &self,
        table_def: TableDefinition<'static, &'static str, &'static [u8]>,
        limit: usize,
    ) -> StateResult<Vec<T>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(table_def).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))?.rev() {
            if results.len() >= limit {
                break;
            }
            let (_, value) = entry.map_err(map_err!(Read))?;
            let item: T = serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            results.push(item);
        }
        Ok(results)
    }

    // ── Cursors ────────────────────────────────────────────────────

    /// Persist a reader's cursor.
    pub fn put_cursor(&self, reader: &str, cursor: &DateTime<Utc>) -> StateResult<()> {
        self.put_json(CURSORS, reader, cursor)?;
        debug!(%reader, %cursor, "cursor stored");
        Ok(())
    }

    /// Get a reader's cursor, if one was ever stored.
    pub fn get_cursor(&self, reader: &str) -> StateResult<Option<DateTime<Utc>>> {
        self.get_json(CURSORS, reader)
    }

    // ── Categories ─────────────────────────────────────────────────

    /// Record the code assigned to a category value. Codes are append-only:
    /// an existing entry is never overwritten.
    pub fn put_category(&self, kind: &str, value: &str, code: i64) -> StateResult<bool> {
        let key = format!("{kind}/{value}");
        let encoded = serde_json::to_vec(&code).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let inserted;
        {
            let mut table = txn.open_table(CATEGORIES).map_err(map_err!(Table))?;
            inserted = table.get(key.as_str()).map_err(map_err!(Read))?.is_none();
            if inserted {
                table
                    .insert(key.as_str(), encoded.as_slice())
                    .map_err(map_err!(Write))?;
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(inserted)
    }

    /// All `(value, code)` pairs recorded for a category kind.
    pub fn list_categories(&self, kind: &str) -> StateResult<Vec<(String, i64)>> {
        let prefix = format!("{kind}/");
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(CATEGORIES).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (key, value) = entry.map_err(map_err!(Read))?;
            if let Some(name) = key.value().strip_prefix(&prefix) {
                let code: i64 =
                    serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
                results.push((name.to_string(), code));
            }
        }
        Ok(results)
    }

    // ── Models ─────────────────────────────────────────────────────

    /// Store a model snapshot under `name`, replacing any previous one.
    pub fn put_model<T: Serialize>(&self, name: &str, model: &T) -> StateResult<()> {
        self.put_json(MODELS, name, model)?;
        debug!(%name, "model snapshot stored");
        Ok(())
    }

    pub fn get_model<T: DeserializeOwned>(&self, name: &str) -> StateResult<Option<T>> {
        self.get_json(MODELS, name)
    }

    // ── Anomalies ──────────────────────────────────────────────────

    /// Journal a detected anomaly. Re-journaling the same event overwrites
    /// its entry instead of duplicating it.
    pub fn record_anomaly<T: Serialize>(
        &self,
        timestamp: &DateTime<Utc>,
        service: &str,
        message: &str,
        anomaly: &T,
    ) -> StateResult<String> {
        let key = event_key(timestamp, service, message);
        self.put_json(ANOMALIES, &key, anomaly)?;
        Ok(key)
    }

    /// Most recent anomalies first.
    pub fn list_anomalies<T: DeserializeOwned>(&self, limit: usize) -> StateResult<Vec<T>> {
        self.list_recent(ANOMALIES, limit)
    }

    // ── Remediations ───────────────────────────────────────────────

    pub fn put_remediation(&self, entry: &RemediationEntry) -> StateResult<String> {
        let key = entry.table_key();
        self.put_json(REMEDIATIONS, &key, entry)?;
        debug!(%key, status = ?entry.status, "remediation stored");
        Ok(key)
    }

    pub fn get_remediation(&self, key: &str) -> StateResult<Option<RemediationEntry>> {
        self.get_json(REMEDIATIONS, key)
    }

    /// Most recent remediations first.
    pub fn list_remediations(&self, limit: usize) -> StateResult<Vec<RemediationEntry>> {
        self.list_recent(REMEDIATIONS, limit)
    }

    /// Update the status of a remediation entry. Returns true if it existed.
    pub fn mark_remediation(&self, key: &str, status: RemediationStatus) -> StateResult<bool> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed;
        {
            let mut table = txn.open_table(REMEDIATIONS).map_err(map_err!(Table))?;
            let current = table
                .get(key)
                .map_err(map_err!(Read))?
                .map(|guard| guard.value().to_vec());
            existed = current.is_some();
            if let Some(bytes) = current {
                let mut entry: RemediationEntry =
                    serde_json::from_slice(&bytes).map_err(map_err!(Deserialize))?;
                entry.status = status;
                let value = serde_json::to_vec(&entry).map_err(map_err!(Serialize))?;
                table
                    .insert(key, value.as_slice())
                    .map_err(map_err!(Write))?;
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%key, ?status, existed, "remediation status updated");
        Ok(existed)
    }
}
