//! Anomaly records: a log record, its features and its score in one value.

use serde::{Deserialize, Serialize};
use tracing::warn;

use logscale_core::LogRecord;

use crate::features::FeatureVector;
use crate::scorer::Score;

/// A log record the scorer labeled as an outlier.
///
/// Serializes flat: every original log field at the top level plus
/// `anomaly_score` and `anomaly_features`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalyRecord {
    #[serde(flatten)]
    pub record: LogRecord,
    pub anomaly_score: f64,
    pub anomaly_features: FeatureVector,
}

impl AnomalyRecord {
    pub fn service(&self) -> &str {
        self.record.service_name()
    }
}

/// Keep the outliers. The three inputs are index-aligned; if their
/// lengths disagree only the common prefix is considered.
pub fn build(
    records: &[LogRecord],
    vectors: &[FeatureVector],
    scores: &[Score],
) -> Vec<AnomalyRecord> {
    if records.len() != vectors.len() || records.len() != scores.len() {
        warn!(
            records = records.len(),
            vectors = vectors.len(),
            scores = scores.len(),
            "misaligned detection inputs"
        );
    }

    records
        .iter()
        .zip(vectors)
        .zip(scores)
        .filter(|(_, score)| score.is_outlier)
        .map(|((record, vector), score)| AnomalyRecord {
            record: record.clone(),
            anomaly_score: score.score,
            anomaly_features: *vector,
        })
        .collect()
}
