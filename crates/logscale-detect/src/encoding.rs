//! Category → integer code tables for `level` and `service`.

use std::collections::{BTreeSet, HashMap};

use tracing::{debug, warn};

use logscale_core::LogRecord;
use logscale_state::{StateResult, StateStore};

/// Code for a record that carries no value for the category.
pub const MISSING_CODE: i64 = -1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CategoryKind {
    Level,
    Service,
}

impl CategoryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CategoryKind::Level => "level",
            CategoryKind::Service => "service",
        }
    }

    fn value<'r>(&self, record: &'r LogRecord) -> Option<&'r str> {
        match self {
            CategoryKind::Level => record.level.as_deref(),
            CategoryKind::Service => record.service.as_deref(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncodingMode {
    /// Codes are re-derived for every batch from the sorted distinct
    /// values. The same category may get different codes in different
    /// batches.
    PerBatch,
    /// Codes are assigned once, in first-seen order, and never change.
    Stable,
}

/// Assigns integer codes to category values.
pub struct CategoryEncoder {
    mode: EncodingMode,
    tables: HashMap<CategoryKind, HashMap<String, i64>>,
    /// Backing store for `Stable` mode.
    store: Option<StateStore>,
}

impl CategoryEncoder {
    pub fn per_batch() -> Self {
        Self {
            mode: EncodingMode::PerBatch,
            tables: HashMap::new(),
            store: None,
        }
    }

    /// Stable codes kept in memory only.
    pub fn stable() -> Self {
        Self {
            mode: EncodingMode::Stable,
            tables: HashMap::new(),
            store: None,
        }
    }

    /// Stable codes loaded from, and appended to, the state store.
    pub fn stable_with_store(store: StateStore) -> StateResult<Self> {
        let mut encoder = Self::stable();
        for kind in [CategoryKind::Level, CategoryKind::Service] {
            let table: HashMap<String, i64> =
                store.list_categories(kind.as_str())?.into_iter().collect();
            debug!(kind = kind.as_str(), codes = table.len(), "category table loaded");
            encoder.tables.insert(kind, table);
        }
        encoder.store = Some(store);
        Ok(encoder)
    }

    /// Prepare codes for every value in `records`.
    pub fn observe(&mut self, records: &[LogRecord]) {
        for kind in [CategoryKind::Level, CategoryKind::Service] {
            match self.mode {
                EncodingMode::PerBatch => {
                    let distinct: BTreeSet<&str> =
                        records.iter().filter_map(|r| kind.value(r)).collect();
                    let table = distinct
                        .into_iter()
                        .enumerate()
                        .map(|(code, value)| (value.to_string(), code as i64))
                        .collect();
                    self.tables.insert(kind, table);
                }
                EncodingMode::Stable => {
                    for record in records {
                        if let Some(value) = kind.value(record) {
                            self.assign(kind, value);
                        }
                    }
                }
            }
        }
    }

    fn assign(&mut self, kind: CategoryKind, value: &str) {
        let table = self.tables.entry(kind).or_default();
        if table.contains_key(value) {
            return;
        }
        let code = table.values().max().map_or(0, |max| max + 1);
        table.insert(value.to_string(), code);
        debug!(kind = kind.as_str(), %value, code, "new category code");

        if let Some(store) = &self.store
            && let Err(e) = store.put_category(kind.as_str(), value, code)
        {
            warn!(kind = kind.as_str(), %value, error = %e, "failed to persist category code");
        }
    }

    /// Code for a record's value; `MISSING_CODE` for absent or unseen values.
    pub fn code(&self, kind: CategoryKind, record: &LogRecord) -> i64 {
        kind.value(record)
            .and_then(|value| self.tables.get(&kind)?.get(value).copied())
            .unwrap_or(MISSING_CODE)
    }
}
