//! Parsing of a single CSV log source.

use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDateTime, Utc};
use thiserror::Error;
use tracing::debug;

use logscale_core::{LogRecord, Measurement};

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("csv error in {path}: {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
    #[error("{0} has no timestamp column")]
    MissingTimestampColumn(PathBuf),
}

/// Rows parsed from one source plus the number of rows dropped as malformed.
#[derive(Debug, Default)]
pub struct SourceBatch {
    pub records: Vec<LogRecord>,
    pub dropped: usize,
}

impl SourceBatch {
    pub fn max_timestamp(&self) -> Option<DateTime<Utc>> {
        self.records.iter().map(|r| r.timestamp).max()
    }

    pub fn min_timestamp(&self) -> Option<DateTime<Utc>> {
        self.records.iter().map(|r| r.timestamp).min()
    }
}

/// Naive formats accepted after RFC 3339; they are read as UTC.
const NAIVE_FORMATS: [&str; 2] = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];

/// Parse a log timestamp. Accepts RFC 3339 (`2024-02-15T08:00:05Z`,
/// offsets, fractional seconds), `YYYY-mm-dd HH:MM:SS+00:00`, and naive
/// date-times which are taken to be UTC.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f%:z") {
        return Some(dt.with_timezone(&Utc));
    }
    NAIVE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .map(|naive| naive.and_utc())
}

/// Read every well-formed row of a CSV source.
///
/// A row is dropped when the CSV layer rejects it, when it has more cells
/// than the header, or when its timestamp does not parse.
pub fn read_source(path: &Path) -> Result<SourceBatch, IngestError> {
    let csv_err = |source| IngestError::Csv {
        path: path.to_path_buf(),
        source,
    };

    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(csv_err)?;
    let headers = reader.headers().map_err(csv_err)?.clone();
    if !headers.iter().any(|h| h == "timestamp") {
        return Err(IngestError::MissingTimestampColumn(path.to_path_buf()));
    }

    let mut batch = SourceBatch::default();
    for (row_no, result) in reader.records().enumerate() {
        let row = match result {
            Ok(row) => row,
            Err(e) => {
                debug!(?path, row = row_no + 1, error = %e, "dropping unreadable row");
                batch.dropped += 1;
                continue;
            }
        };
        if row.len() > headers.len() {
            debug!(?path, row = row_no + 1, "dropping row with extra cells");
            batch.dropped += 1;
            continue;
        }
        match parse_row(&headers, &row) {
            Some(record) => batch.records.push(record),
            None => {
                debug!(?path, row = row_no + 1, "dropping row with bad timestamp");
                batch.dropped += 1;
            }
        }
    }
    Ok(batch)
}

fn parse_row(headers: &csv::StringRecord, row: &csv::StringRecord) -> Option<LogRecord> {
    let mut timestamp = None;
    let mut record = LogRecord {
        timestamp: DateTime::<Utc>::MIN_UTC,
        level: None,
        service: None,
        message: None,
        cpu_usage: None,
        memory_usage: None,
        response_time: None,
        execution_time: None,
        extra: Default::default(),
    };

    for (name, cell) in headers.iter().zip(row.iter()) {
        let text = || (!cell.is_empty()).then(|| cell.to_string());
        match name {
            "timestamp" => timestamp = parse_timestamp(cell),
            "level" => record.level = text(),
            "service" => record.service = text(),
            "message" => record.message = text(),
            "cpu_usage" => record.cpu_usage = Measurement::from_cell(cell),
            "memory_usage" => record.memory_usage = Measurement::from_cell(cell),
            "response_time" => record.response_time = Measurement::from_cell(cell),
            "execution_time" => record.execution_time = Measurement::from_cell(cell),
            other => {
                if !cell.is_empty() {
                    record.extra.insert(other.to_string(), cell.to_string());
                }
            }
        }
    }

    record.timestamp = timestamp?;
    Some(record)
}
