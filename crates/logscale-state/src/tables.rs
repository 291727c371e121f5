//! redb table definitions for the Logscale state store.
//!
//! Each table uses `&str` keys and `&[u8]` values (JSON-serialized).

use redb::TableDefinition;

/// Read cursors keyed by reader name.
pub const CURSORS: TableDefinition<&str, &[u8]> = TableDefinition::new("cursors");

/// Category codes keyed by `{kind}/{value}`.
pub const CATEGORIES: TableDefinition<&str, &[u8]> = TableDefinition::new("categories");

/// Fitted model snapshots keyed by model name.
pub const MODELS: TableDefinition<&str, &[u8]> = TableDefinition::new("models");

/// Detected anomalies keyed by `{timestamp}:{service}:{fingerprint}`.
pub const ANOMALIES: TableDefinition<&str, &[u8]> = TableDefinition::new("anomalies");

/// Remediation history, same key scheme as `ANOMALIES`.
pub const REMEDIATIONS: TableDefinition<&str, &[u8]> = TableDefinition::new("remediations");
