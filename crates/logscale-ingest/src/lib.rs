//! logscale-ingest: reads append-only log sources.
//!
//! A log source is a CSV file in the configured directory with at least a
//! `timestamp` column. New files are picked up on the next read.
//!
//! # Query modes
//!
//! ```text
//! recent_window(m)  per source: cutoff = max(timestamp) - m
//!                   return rows with timestamp > cutoff
//!
//! read_new()        first call: cursor = min(timestamp) over all sources
//!                   return rows with timestamp > cursor (all sources)
//!                   cursor = max(timestamp) of the rows returned
//!
//! peek_new()        same rows as read_new(), cursor untouched
//! commit(read)      cursor = max(cursor, read's max timestamp)
//! ```
//!
//! Malformed rows are dropped individually; a source that cannot be read
//! at all is skipped without failing the call.

pub mod reader;
pub mod source;

pub use reader::{LogReader, PendingRead};
pub use source::{IngestError, SourceBatch, parse_timestamp, read_source};
