//! Shared types used across Logscale crates.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Columns every log batch must carry.
pub const REQUIRED_FIELDS: [&str; 4] = ["timestamp", "level", "service", "message"];

/// Names of the optional measurement columns, in feature order.
pub const MEASUREMENT_FIELDS: [&str; 4] =
    ["cpu_usage", "memory_usage", "response_time", "execution_time"];

/// A raw measurement as it appeared in the log source.
///
/// Sources are inconsistent: the same column may hold `95`, `"95%"`,
/// `"120ms"` or free text. Normalization happens in the feature extractor,
/// never here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Measurement {
    Number(f64),
    Text(String),
}

impl Measurement {
    /// Classify a raw cell. Empty cells are absent; cells that parse as a
    /// bare number become `Number`, everything else is kept as `Text`.
    pub fn from_cell(cell: &str) -> Option<Self> {
        let trimmed = cell.trim();
        if trimmed.is_empty() {
            return None;
        }
        match trimmed.parse::<f64>() {
            Ok(v) => Some(Measurement::Number(v)),
            Err(_) => Some(Measurement::Text(trimmed.to_string())),
        }
    }
}

impl From<f64> for Measurement {
    fn from(v: f64) -> Self {
        Measurement::Number(v)
    }
}

impl From<&str> for Measurement {
    fn from(s: &str) -> Self {
        Measurement::Text(s.to_string())
    }
}

/// One observed log event.
///
/// `level`, `service` and `message` are optional per row: a source may
/// leave a cell empty. A batch in which no row carries one of them is a
/// schema error, raised by the feature extractor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogRecord {
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu_usage: Option<Measurement>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_usage: Option<Measurement>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_time: Option<Measurement>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_time: Option<Measurement>,
    /// Any other non-empty columns (client_ip, error_code, ...).
    #[serde(flatten)]
    pub extra: BTreeMap<String, String>,
}

impl LogRecord {
    /// Build a record with the four required fields and no measurements.
    pub fn new(timestamp: DateTime<Utc>, level: &str, service: &str, message: &str) -> Self {
        Self {
            timestamp,
            level: Some(level.to_string()),
            service: Some(service.to_string()),
            message: Some(message.to_string()),
            cpu_usage: None,
            memory_usage: None,
            response_time: None,
            execution_time: None,
            extra: BTreeMap::new(),
        }
    }

    pub fn with_cpu(mut self, value: impl Into<Measurement>) -> Self {
        self.cpu_usage = Some(value.into());
        self
    }

    pub fn with_memory(mut self, value: impl Into<Measurement>) -> Self {
        self.memory_usage = Some(value.into());
        self
    }

    pub fn with_response_time(mut self, value: impl Into<Measurement>) -> Self {
        self.response_time = Some(value.into());
        self
    }

    pub fn with_execution_time(mut self, value: impl Into<Measurement>) -> Self {
        self.execution_time = Some(value.into());
        self
    }

    /// Measurement by column name.
    pub fn measurement(&self, field: &str) -> Option<&Measurement> {
        match field {
            "cpu_usage" => self.cpu_usage.as_ref(),
            "memory_usage" => self.memory_usage.as_ref(),
            "response_time" => self.response_time.as_ref(),
            "execution_time" => self.execution_time.as_ref(),
            _ => None,
        }
    }

    /// Whether the row carries a value for the named column.
    ///
    /// `timestamp` is always present; unknown names are looked up among the
    /// extra columns.
    pub fn has_field(&self, field: &str) -> bool {
        match field {
            "timestamp" => true,
            "level" => self.level.is_some(),
            "service" => self.service.is_some(),
            "message" => self.message.is_some(),
            _ => self.measurement(field).is_some() || self.extra.contains_key(field),
        }
    }

    /// Service name, or `"unknown"` when the row carried none.
    pub fn service_name(&self) -> &str {
        self.service.as_deref().unwrap_or("unknown")
    }
}
