//! LogReader: recent-window and incremental reads across all sources.

use std::path::PathBuf;

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use tracing::{debug, error, warn};
use walkdir::WalkDir;

use logscale_core::LogRecord;
use logscale_core::config::LogsConfig;
use logscale_state::{StateResult, StateStore};

use crate::source::{SourceBatch, read_source};

/// Cursor key in the state store.
const CURSOR_KEY: &str = "logs";

/// Reader over a directory of append-only log sources.
///
/// Holds the incremental read cursor. The cursor is monotonically
/// non-decreasing and only moves when a read is committed. Callers that
/// peek and commit separately serialize their own cycles.
pub struct LogReader {
    dir: PathBuf,
    extension: String,
    cursor: Mutex<Option<DateTime<Utc>>>,
    /// When set, the cursor is restored from and written back to this store.
    store: Option<StateStore>,
}

impl LogReader {
    pub fn new(dir: impl Into<PathBuf>, extension: &str) -> Self {
        Self {
            dir: dir.into(),
            extension: extension.trim_start_matches('.').to_string(),
            cursor: Mutex::new(None),
            store: None,
        }
    }

    pub fn from_config(config: &LogsConfig) -> Self {
        Self::new(config.dir.clone(), &config.extension)
    }

    /// Persist the cursor in `store`, restoring any previously saved value.
    pub fn with_cursor_store(mut self, store: StateStore) -> StateResult<Self> {
        let restored = store.get_cursor(CURSOR_KEY)?;
        if let Some(cursor) = restored {
            debug!(%cursor, "read cursor restored");
        }
        *self.cursor.get_mut() = restored;
        self.store = Some(store);
        Ok(self)
    }

    /// Current cursor; `None` before the first successful `read_new`.
    pub fn cursor(&self) -> Option<DateTime<Utc>> {
        *self.cursor.lock()
    }

    /// Log sources currently present, in file-name order.
    pub fn sources(&self) -> Vec<PathBuf> {
        WalkDir::new(&self.dir)
            .min_depth(1)
            .max_depth(1)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|entry| match entry {
                Ok(entry) => Some(entry),
                Err(e) => {
                    warn!(dir = ?self.dir, error = %e, "cannot list log directory");
                    None
                }
            })
            .filter(|entry| entry.file_type().is_file())
            .map(|entry| entry.into_path())
            .filter(|path| {
                path.extension()
                    .is_some_and(|ext| ext.eq_ignore_ascii_case(self.extension.as_str()))
            })
            .collect()
    }

    /// Parse every readable source. Unreadable or empty sources are skipped.
    fn load_sources(&self) -> Vec<(PathBuf, SourceBatch)> {
        let mut loaded = Vec::new();
        for path in self.sources() {
            match read_source(&path) {
                Ok(batch) => {
                    if batch.dropped > 0 {
                        debug!(?path, dropped = batch.dropped, "malformed rows dropped");
                    }
                    if batch.records.is_empty() {
                        debug!(?path, "skipping empty source");
                        continue;
                    }
                    loaded.push((path, batch));
                }
                Err(e) => warn!(?path, error = %e, "skipping unreadable log source"),
            }
        }
        loaded
    }

    /// All records newer than `minutes` before each source's own latest entry.
    ///
    /// The window is computed per source, so sources that stopped writing
    /// long ago still contribute their final stretch. Output order across
    /// sources is unspecified.
    pub fn recent_window(&self, minutes: u64) -> Vec<LogRecord> {
        let window = i64::try_from(minutes)
            .ok()
            .and_then(Duration::try_minutes)
            .unwrap_or(Duration::MAX);
        let mut recent = Vec::new();
        for (path, batch) in self.load_sources() {
            let Some(latest) = batch.max_timestamp() else {
                continue;
            };
            // A window reaching past the representable range covers everything.
            let cutoff = latest
                .checked_sub_signed(window)
                .unwrap_or(DateTime::<Utc>::MIN_UTC);
            let before = recent.len();
            recent.extend(batch.records.into_iter().filter(|r| r.timestamp > cutoff));
            debug!(?path, %cutoff, records = recent.len() - before, "recent window read");
        }
        recent
    }

    /// All records strictly newer than the cursor, across every source.
    ///
    /// Equivalent to [`peek_new`](Self::peek_new) followed by committing
    /// the returned cursor.
    pub fn read_new(&self) -> Vec<LogRecord> {
        let read = self.peek_new();
        if let Err(e) = self.commit(&read) {
            error!(error = %e, "failed to persist read cursor");
        }
        read.records
    }

    /// Records strictly newer than the cursor, without moving it.
    ///
    /// On the very first call the cursor starts at the earliest timestamp
    /// seen, so the earliest entry itself is never returned. Rows sharing
    /// the cursor's exact timestamp that arrive after the cursor moved are
    /// dropped as well. Both are known, accepted losses of the strict
    /// `timestamp > cursor` rule that keeps reads free of duplicates.
    ///
    /// Until [`commit`](Self::commit) is called with the result, the same
    /// rows are returned again.
    pub fn peek_new(&self) -> PendingRead {
        let cursor = *self.cursor.lock();
        let sources = self.load_sources();

        let start = match cursor {
            Some(c) => c,
            None => match sources.iter().filter_map(|(_, b)| b.min_timestamp()).min() {
                Some(earliest) => earliest,
                None => {
                    return PendingRead {
                        records: Vec::new(),
                        next_cursor: None,
                    };
                }
            },
        };

        let records: Vec<LogRecord> = sources
            .into_iter()
            .flat_map(|(_, batch)| batch.records)
            .filter(|r| r.timestamp > start)
            .collect();

        let next = records.iter().map(|r| r.timestamp).max().unwrap_or(start);
        debug!(records = records.len(), cursor = %start, next = %next, "incremental read");
        PendingRead {
            records,
            next_cursor: Some(next),
        }
    }

    /// Advance the cursor past `read`.
    ///
    /// The cursor never moves backwards. The in-memory cursor is advanced
    /// even when persisting it fails; the error is returned.
    pub fn commit(&self, read: &PendingRead) -> StateResult<()> {
        let Some(next) = read.next_cursor else {
            return Ok(());
        };
        let mut cursor = self.cursor.lock();
        if cursor.is_some_and(|c| c >= next) {
            return Ok(());
        }
        if cursor.is_none() {
            debug!(cursor = %next, "read cursor initialized");
        }
        *cursor = Some(next);
        if let Some(store) = &self.store {
            store.put_cursor(CURSOR_KEY, &next)?;
        }
        Ok(())
    }
}

/// Rows returned by [`LogReader::peek_new`] and the cursor that consumes them.
#[derive(Debug, Clone, Default)]
pub struct PendingRead {
    pub records: Vec<LogRecord>,
    next_cursor: Option<DateTime<Utc>>,
}

impl PendingRead {
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Cursor value after [`LogReader::commit`].
    pub fn next_cursor(&self) -> Option<DateTime<Utc>> {
        self.next_cursor
    }
}
