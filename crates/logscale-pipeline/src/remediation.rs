//! Remediation collaborators.
//!
//! A [`Remediator`] turns an anomaly into suggested operator action. It may
//! be slow or fail; the pipeline bounds it with a timeout and records the
//! outcome either way.

use std::fmt::Write;

use logscale_autoscale::Thresholds;
use logscale_detect::AnomalyRecord;

pub type BoxFuture<'a> =
    std::pin::Pin<Box<dyn std::future::Future<Output = anyhow::Result<String>> + Send + 'a>>;

/// Produces a remediation suggestion for one anomaly.
pub trait Remediator: Send + Sync {
    fn suggest<'a>(&'a self, anomaly: &'a AnomalyRecord) -> BoxFuture<'a>;
}

/// Built-in remediator: a static runbook keyed on which limits the anomaly
/// breached. Deterministic and offline.
#[derive(Debug, Clone, Default)]
pub struct RunbookRemediator {
    thresholds: Thresholds,
}

impl RunbookRemediator {
    pub fn new(thresholds: Thresholds) -> Self {
        Self { thresholds }
    }

    pub fn runbook(&self, anomaly: &AnomalyRecord) -> String {
        let f = &anomaly.anomaly_features;
        let service = anomaly.service();
        let mut steps = Vec::new();

        if f.cpu_usage > self.thresholds.cpu {
            steps.push(format!(
                "CPU at {}% (limit {}%): profile the hottest handlers of {service} and confirm the added instance is taking traffic.",
                f.cpu_usage, self.thresholds.cpu
            ));
        }
        if f.memory_usage > self.thresholds.memory {
            steps.push(format!(
                "Memory at {}% (limit {}%): capture a heap profile of {service} and check for unbounded caches or leaked connections.",
                f.memory_usage, self.thresholds.memory
            ));
        }
        if f.response_time > self.thresholds.response_time {
            steps.push(format!(
                "Response time {}ms (limit {}ms): inspect slow queries and downstream latency for {service}; tighten client timeouts.",
                f.response_time, self.thresholds.response_time
            ));
        }
        if f.is_blocked > 0.0 {
            steps.push(format!(
                "Requests were blocked: review firewall, rate-limit and auth rules in front of {service}."
            ));
        }
        if steps.is_empty() {
            steps.push(format!(
                "No resource limit breached: review recent {} logs of {service} around the anomaly timestamp.",
                anomaly.record.level.as_deref().unwrap_or("unknown-level")
            ));
        }

        let mut text = format!(
            "Anomaly in {service} at {} (score {:.3}): {}\n",
            anomaly.record.timestamp.to_rfc3339(),
            anomaly.anomaly_score,
            anomaly.record.message.as_deref().unwrap_or("")
        );
        for (i, step) in steps.iter().enumerate() {
            let _ = writeln!(text, "{}. {step}", i + 1);
        }
        text
    }
}

impl Remediator for RunbookRemediator {
    fn suggest<'a>(&'a self, anomaly: &'a AnomalyRecord) -> BoxFuture<'a> {
        let text = self.runbook(anomaly);
        Box::pin(async move { Ok::<_, anyhow::Error>(text) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use logscale_core::LogRecord;
    use logscale_detect::FeatureVector;

    fn anomaly(features: FeatureVector, message: &str) -> AnomalyRecord {
        let ts = Utc.with_ymd_and_hms(2024, 2, 15, 8, 0, 0).unwrap();
        AnomalyRecord {
            record: LogRecord::new(ts, "ERROR", "database", message),
            anomaly_score: 0.71,
            anomaly_features: features,
        }
    }

    #[test]
    fn lists_one_step_per_breach() {
        let remediator = RunbookRemediator::default();
        let text = remediator.runbook(&anomaly(
            FeatureVector {
                cpu_usage: 95.0,
                response_time: 1500.0,
                ..Default::default()
            },
            "Query FAILED",
        ));

        assert!(text.starts_with("Anomaly in database at 2024-02-15T08:00:00+00:00"));
        assert!(text.contains("1. CPU at 95%"));
        assert!(text.contains("2. Response time 1500ms"));
        assert!(!text.contains("Memory"));
    }

    #[test]
    fn blocked_requests_get_their_own_step() {
        let text = RunbookRemediator::default().runbook(&anomaly(
            FeatureVector {
                is_blocked: 1.0,
                ..Default::default()
            },
            "Request BLOCKED by WAF",
        ));
        assert!(text.contains("1. Requests were blocked"));
    }

    #[test]
    fn falls_back_to_log_review() {
        let text = RunbookRemediator::default()
            .runbook(&anomaly(FeatureVector::default(), "odd"));
        assert!(text.contains("1. No resource limit breached: review recent ERROR logs"));
    }

    #[tokio::test]
    async fn suggest_is_the_runbook() {
        let remediator = RunbookRemediator::default();
        let a = anomaly(FeatureVector::default(), "odd");
        assert_eq!(remediator.suggest(&a).await.unwrap(), remediator.runbook(&a));
    }
}
