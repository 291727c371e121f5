//! Feature extraction: `LogRecord` → fixed-width numeric vector.
//!
//! Layout (order is part of the contract):
//!
//! | # | name             | source                                       |
//! |---|------------------|----------------------------------------------|
//! | 0 | `level_code`     | category code of `level` (-1 if absent)      |
//! | 1 | `service_code`   | category code of `service` (-1 if absent)    |
//! | 2 | `cpu_usage`      | normalized measurement                       |
//! | 3 | `memory_usage`   | normalized measurement                       |
//! | 4 | `response_time`  | normalized measurement                       |
//! | 5 | `execution_time` | normalized measurement                       |
//! | 6 | `has_error`      | 1 if level ∈ {ERROR, CRITICAL, WARNING}      |
//! | 7 | `is_blocked`     | 1 if message contains "blocked" (any case)   |
//!
//! Absent or unparseable measurements normalize to 0. This loses the
//! distinction between "zero" and "unknown"; downstream code relies on
//! every field being a finite number.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::warn;

use logscale_core::{LogRecord, MEASUREMENT_FIELDS, Measurement, REQUIRED_FIELDS};

use crate::encoding::{CategoryEncoder, CategoryKind};
use crate::error::DetectError;

pub const FEATURE_COUNT: usize = 8;

pub const FEATURE_NAMES: [&str; FEATURE_COUNT] = [
    "level_code",
    "service_code",
    "cpu_usage",
    "memory_usage",
    "response_time",
    "execution_time",
    "has_error",
    "is_blocked",
];

/// Levels that set `has_error`.
pub const ERROR_LEVELS: [&str; 3] = ["ERROR", "CRITICAL", "WARNING"];

/// Unit suffixes stripped before numeric extraction.
const UNIT_SUFFIXES: [&str; 2] = ["%", "ms"];

static NUMBER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d+(?:\.\d+)?").expect("numeric token pattern is valid"));

/// The numeric form of one log record.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct FeatureVector {
    pub level_code: f64,
    pub service_code: f64,
    pub cpu_usage: f64,
    pub memory_usage: f64,
    pub response_time: f64,
    pub execution_time: f64,
    pub has_error: f64,
    pub is_blocked: f64,
}

impl FeatureVector {
    pub fn to_array(&self) -> [f64; FEATURE_COUNT] {
        [
            self.level_code,
            self.service_code,
            self.cpu_usage,
            self.memory_usage,
            self.response_time,
            self.execution_time,
            self.has_error,
            self.is_blocked,
        ]
    }

    /// Feature by name.
    pub fn get(&self, name: &str) -> Option<f64> {
        let index = FEATURE_NAMES.iter().position(|n| *n == name)?;
        Some(self.to_array()[index])
    }

    /// `(name, value)` pairs in layout order.
    pub fn named(&self) -> Vec<(&'static str, f64)> {
        FEATURE_NAMES.into_iter().zip(self.to_array()).collect()
    }
}

/// Vectors for one batch, index-aligned with the input records.
#[derive(Debug, Clone, Default)]
pub struct FeatureBatch {
    pub vectors: Vec<FeatureVector>,
    /// Measurements that were present but degraded to 0.
    pub degraded: usize,
}

/// Normalize a raw measurement to a plain number.
///
/// Returns the value and whether a present input had to be degraded to 0.
pub fn normalize(value: Option<&Measurement>) -> (f64, bool) {
    match value {
        None => (0.0, false),
        Some(Measurement::Number(v)) if v.is_finite() => (*v, false),
        Some(Measurement::Number(_)) => (0.0, true),
        Some(Measurement::Text(text)) => {
            let mut stripped = text.trim();
            for suffix in UNIT_SUFFIXES {
                stripped = stripped.trim_end_matches(suffix).trim_end();
            }
            if stripped.is_empty() {
                return (0.0, !text.trim().is_empty());
            }
            match NUMBER
                .find(stripped)
                .and_then(|m| m.as_str().parse::<f64>().ok())
                .filter(|v| v.is_finite())
            {
                Some(v) => (v, false),
                None => (0.0, true),
            }
        }
    }
}

/// Extract one vector per record, in input order.
///
/// Fails only if a required column is absent from the entire batch. Per-row
/// problems never fail the batch: missing categories encode as -1 and bad
/// measurements degrade to 0 with a warning.
pub fn extract(
    records: &[LogRecord],
    encoder: &mut CategoryEncoder,
) -> Result<FeatureBatch, DetectError> {
    if records.is_empty() {
        return Ok(FeatureBatch::default());
    }
    check_schema(records)?;
    encoder.observe(records);

    let mut batch = FeatureBatch {
        vectors: Vec::with_capacity(records.len()),
        degraded: 0,
    };
    for record in records {
        let measure = |field: &str| {
            let (value, degraded) = normalize(record.measurement(field));
            if degraded {
                batch.degraded += 1;
                warn!(
                    field,
                    raw = ?record.measurement(field),
                    service = record.service_name(),
                    "unparseable measurement normalized to 0"
                );
            }
            value
        };
        let [cpu_usage, memory_usage, response_time, execution_time] =
            MEASUREMENT_FIELDS.map(measure);

        let vector = FeatureVector {
            level_code: encoder.code(CategoryKind::Level, record) as f64,
            service_code: encoder.code(CategoryKind::Service, record) as f64,
            cpu_usage,
            memory_usage,
            response_time,
            execution_time,
            has_error: flag(
                record
                    .level
                    .as_deref()
                    .is_some_and(|level| ERROR_LEVELS.contains(&level)),
            ),
            is_blocked: flag(
                record
                    .message
                    .as_deref()
                    .is_some_and(|msg| msg.to_lowercase().contains("blocked")),
            ),
        };
        batch.vectors.push(vector);
    }
    Ok(batch)
}

fn check_schema(records: &[LogRecord]) -> Result<(), DetectError> {
    let missing: Vec<String> = REQUIRED_FIELDS
        .iter()
        .filter(|field| records.iter().all(|r| !r.has_field(field)))
        .map(|field| field.to_string())
        .collect();
    if missing.is_empty() {
        Ok(())
    } else {
        Err(DetectError::Schema { missing })
    }
}

fn flag(set: bool) -> f64 {
    if set { 1.0 } else { 0.0 }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn rec(level: &str, service: &str, message: &str) -> LogRecord {
        let ts = Utc.with_ymd_and_hms(2024, 2, 15, 8, 0, 0).unwrap();
        LogRecord::new(ts, level, service, message)
    }

    #[test]
    fn normalize_forms() {
        assert_eq!(normalize(None), (0.0, false));
        assert_eq!(normalize(Some(&Measurement::Number(95.0))), (95.0, false));
        assert_eq!(normalize(Some(&Measurement::Number(f64::NAN))), (0.0, true));
        assert_eq!(normalize(Some(&"10%".into())), (10.0, false));
        assert_eq!(normalize(Some(&"50ms".into())), (50.0, false));
        assert_eq!(normalize(Some(&"1200.5 ms".into())), (1200.5, false));
        assert_eq!(normalize(Some(&"took 42 units".into())), (42.0, false));
        assert_eq!(normalize(Some(&"abc%".into())), (0.0, true));
        assert_eq!(normalize(Some(&"n/a".into())), (0.0, true));
        assert_eq!(normalize(Some(&"%".into())), (0.0, true));
        assert_eq!(normalize(Some(&"".into())), (0.0, false));
    }

    #[test]
    fn scenario_database_row() {
        let mut enc = CategoryEncoder::per_batch();
        let records = vec![
            rec("CRITICAL", "database", "Query FAILED")
                .with_cpu(95.0)
                .with_memory("10%")
                .with_response_time("50ms"),
        ];
        let batch = extract(&records, &mut enc).unwrap();
        let v = batch.vectors[0];
        assert_eq!(v.cpu_usage, 95.0);
        assert_eq!(v.memory_usage, 10.0);
        assert_eq!(v.response_time, 50.0);
        assert_eq!(v.execution_time, 0.0);
        assert_eq!(v.has_error, 1.0);
        assert_eq!(v.is_blocked, 0.0);
        assert_eq!(batch.degraded, 0);
    }

    #[test]
    fn malformed_memory_degrades_but_row_survives() {
        let mut enc = CategoryEncoder::per_batch();
        let records = vec![
            rec("WARNING", "auth-service", "ok").with_memory("abc%"),
            rec("INFO", "auth-service", "ok"),
        ];
        let batch = extract(&records, &mut enc).unwrap();
        assert_eq!(batch.vectors.len(), 2);
        assert_eq!(batch.vectors[0].memory_usage, 0.0);
        assert_eq!(batch.vectors[0].has_error, 1.0);
        assert_eq!(batch.vectors[1].has_error, 0.0);
        assert_eq!(batch.degraded, 1);
    }

    #[test]
    fn blocked_keyword_is_case_insensitive() {
        let mut enc = CategoryEncoder::per_batch();
        let records = vec![
            rec("INFO", "auth-service", "Request BLOCKED by firewall"),
            rec("INFO", "auth-service", "User login: alice"),
        ];
        let batch = extract(&records, &mut enc).unwrap();
        assert_eq!(batch.vectors[0].is_blocked, 1.0);
        assert_eq!(batch.vectors[1].is_blocked, 0.0);
    }

    #[test]
    fn vectors_are_fixed_width_and_finite() {
        let mut enc = CategoryEncoder::stable();
        let mut odd = rec("DEBUG", "x", "y");
        odd.level = None;
        odd.cpu_usage = Some(Measurement::Number(f64::INFINITY));
        odd.execution_time = Some("9999999".into());
        let records = vec![odd, rec("INFO", "web-server", "GET / OK - 200")];

        let batch = extract(&records, &mut enc).unwrap();
        assert_eq!(batch.vectors.len(), records.len());
        for v in &batch.vectors {
            let values = v.to_array();
            assert_eq!(values.len(), FEATURE_COUNT);
            assert!(values.iter().all(|x| x.is_finite()));
        }
        assert_eq!(batch.vectors[0].level_code, -1.0);
    }

    #[test]
    fn schema_error_when_column_absent_from_batch() {
        let mut enc = CategoryEncoder::per_batch();
        let mut a = rec("INFO", "db", "m");
        let mut b = rec("INFO", "db", "m");
        a.service = None;
        b.service = None;
        a.message = None;
        b.message = None;

        let err = extract(&[a, b], &mut enc).unwrap_err();
        assert_eq!(
            err,
            DetectError::Schema {
                missing: vec!["service".to_string(), "message".to_string()]
            }
        );
        assert_eq!(err.to_string(), "missing required columns: service, message");
    }

    #[test]
    fn empty_batch_is_empty() {
        let mut enc = CategoryEncoder::per_batch();
        assert!(extract(&[], &mut enc).unwrap().vectors.is_empty());
    }

    #[test]
    fn named_follows_layout() {
        let v = FeatureVector {
            cpu_usage: 3.0,
            ..Default::default()
        };
        let named = v.named();
        assert_eq!(named[2], ("cpu_usage", 3.0));
        assert_eq!(v.get("cpu_usage"), Some(3.0));
        assert_eq!(v.get("nope"), None);

        let json = serde_json::to_value(v).unwrap();
        assert_eq!(json["cpu_usage"], 3.0);
    }
}
