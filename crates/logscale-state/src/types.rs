//! Domain types persisted by the Logscale state stores.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

// ── Scaling ───────────────────────────────────────────────────────

/// Instance count for one service.
///
/// Invariant: `1 <= instances <= max_instances`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceScalingState {
    pub instances: u32,
    pub max_instances: u32,
}

impl ServiceScalingState {
    /// Initial state for a service: one instance.
    pub fn initial(max_instances: u32) -> Self {
        Self {
            instances: 1,
            max_instances: max_instances.max(1),
        }
    }

    /// Whether another instance may be added.
    pub fn has_headroom(&self) -> bool {
        self.instances < self.max_instances
    }

    /// Force the invariant. Returns true if anything changed.
    pub fn clamp(&mut self) -> bool {
        let before = *self;
        self.max_instances = self.max_instances.max(1);
        self.instances = self.instances.clamp(1, self.max_instances);
        before != *self
    }
}

/// The whole scaling state document.
///
/// `version` is bumped on every committed write and is the token used for
/// optimistic concurrency. Files written without it read as version 0.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ScalingState {
    #[serde(default)]
    pub version: u64,
    pub services: BTreeMap<String, ServiceScalingState>,
}

impl ScalingState {
    /// Build the default document from `(service, max_instances)` pairs.
    pub fn defaults<'a>(limits: impl IntoIterator<Item = (&'a str, u32)>) -> Self {
        Self {
            version: 0,
            services: limits
                .into_iter()
                .map(|(name, max)| (name.to_string(), ServiceScalingState::initial(max)))
                .collect(),
        }
    }
}

// ── Remediation ───────────────────────────────────────────────────

/// Lifecycle of a remediation suggestion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemediationStatus {
    Pending,
    Applied,
    Dismissed,
    Failed,
}

/// One remediation suggestion (or failed attempt) for an anomaly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemediationEntry {
    pub anomaly_timestamp: DateTime<Utc>,
    pub service: String,
    pub message: String,
    /// Suggested action text; `None` when the remediator failed.
    pub suggestion: Option<String>,
    pub error: Option<String>,
    pub status: RemediationStatus,
    pub created_at: DateTime<Utc>,
}

impl RemediationEntry {
    /// Build the composite key for the remediations table.
    pub fn table_key(&self) -> String {
        event_key(&self.anomaly_timestamp, &self.service, &self.message)
    }
}

/// Composite key for event-keyed tables: `{timestamp}:{service}:{fingerprint}`.
///
/// The timestamp is fixed-width so keys sort chronologically; the
/// fingerprint (first 16 hex chars of SHA-256 over the message) keeps
/// distinct events at the same instant apart while making re-journaling
/// of the same event idempotent.
pub fn event_key(timestamp: &DateTime<Utc>, service: &str, message: &str) -> String {
    let digest = Sha256::digest(message.as_bytes());
    let fingerprint = hex::encode(&digest[..8]);
    format!(
        "{}:{}:{}",
        timestamp.format("%Y-%m-%dT%H:%M:%S%.6fZ"),
        service,
        fingerprint
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn clamp_restores_invariant() {
        let mut s = ServiceScalingState {
            instances: 9,
            max_instances: 3,
        };
        assert!(s.clamp());
        assert_eq!(s.instances, 3);

        let mut s = ServiceScalingState {
            instances: 0,
            max_instances: 0,
        };
        assert!(s.clamp());
        assert_eq!(s, ServiceScalingState::initial(1));

        let mut ok = ServiceScalingState::initial(3);
        assert!(!ok.clamp());
    }

    #[test]
    fn legacy_document_without_version() {
        let json = r#"{"services": {"database": {"instances": 2, "max_instances": 3}}}"#;
        let state: ScalingState = serde_json::from_str(json).unwrap();
        assert_eq!(state.version, 0);
        assert_eq!(state.services["database"].instances, 2);
    }

    #[test]
    fn event_keys_sort_by_time() {
        let a = Utc.with_ymd_and_hms(2024, 2, 15, 8, 0, 5).unwrap();
        let b = Utc.with_ymd_and_hms(2024, 2, 15, 10, 0, 0).unwrap();
        assert!(event_key(&a, "db", "x") < event_key(&b, "db", "x"));
        assert_eq!(event_key(&a, "db", "x"), event_key(&a, "db", "x"));
        assert_ne!(event_key(&a, "db", "x"), event_key(&a, "db", "y"));
    }
}
