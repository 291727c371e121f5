//! AnomalyScorer: the stateful, bootstrap-fitted outlier model.
//!
//! The fitted forest sits behind an `RwLock<Option<Arc<_>>>`. Fitting
//! builds a complete new forest off-lock and swaps it in atomically, so a
//! concurrent `score_and_label` either sees the old model or the new one,
//! never a partial update. A scoring call holds on to the `Arc` it started
//! with for the whole batch.

use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{info, warn};

use logscale_core::config::DetectorConfig;

use crate::error::DetectError;
use crate::features::FeatureVector;
use crate::forest::{ForestParams, IsolationForest, Sample};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScorerState {
    Unfitted,
    Fitted,
}

/// Score and label for one vector.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Score {
    /// Higher is more abnormal.
    pub score: f64,
    pub is_outlier: bool,
}

pub struct AnomalyScorer {
    params: ForestParams,
    model: RwLock<Option<Arc<IsolationForest>>>,
}

impl AnomalyScorer {
    pub fn new(params: ForestParams) -> Self {
        Self {
            params,
            model: RwLock::new(None),
        }
    }

    pub fn from_config(config: &DetectorConfig) -> Self {
        Self::new(ForestParams {
            trees: config.trees,
            max_samples: config.max_samples,
            contamination: config.contamination,
            seed: config.seed,
        })
    }

    /// Start `Fitted` with a previously snapshotted model.
    pub fn with_model(self, model: IsolationForest) -> Self {
        *self.model.write() = Some(Arc::new(model));
        self
    }

    pub fn params(&self) -> ForestParams {
        self.params
    }

    pub fn state(&self) -> ScorerState {
        match *self.model.read() {
            Some(_) => ScorerState::Fitted,
            None => ScorerState::Unfitted,
        }
    }

    /// The current model, if fitted.
    pub fn model(&self) -> Option<Arc<IsolationForest>> {
        self.model.read().clone()
    }

    /// Train a new baseline on `vectors` and swap it in.
    ///
    /// On failure the scorer is left `Unfitted` and the error is returned
    /// to the caller.
    pub fn fit(&self, vectors: &[FeatureVector]) -> Result<Arc<IsolationForest>, DetectError> {
        let samples: Vec<Sample> = vectors.iter().map(FeatureVector::to_array).collect();
        match IsolationForest::fit(&samples, self.params) {
            Ok(forest) => {
                let forest = Arc::new(forest);
                *self.model.write() = Some(Arc::clone(&forest));
                info!(samples = samples.len(), threshold = forest.threshold(), "anomaly model fitted");
                Ok(forest)
            }
            Err(e) => {
                *self.model.write() = None;
                warn!(samples = samples.len(), error = %e, "anomaly model fit failed");
                Err(e)
            }
        }
    }

    /// Score every vector, index-aligned with the input.
    ///
    /// An unfitted scorer first fits on this very batch (bootstrap). If that
    /// fit fails the result is empty.
    pub fn score_and_label(&self, vectors: &[FeatureVector]) -> Vec<Score> {
        if vectors.is_empty() {
            return Vec::new();
        }

        let model = match self.model() {
            Some(model) => model,
            None => {
                info!(samples = vectors.len(), "scorer unfitted; bootstrap fit on scored batch");
                match self.fit(vectors) {
                    Ok(model) => model,
                    Err(_) => return Vec::new(),
                }
            }
        };

        vectors
            .iter()
            .map(|v| {
                let score = model.score(&v.to_array());
                Score {
                    score,
                    is_outlier: model.is_outlier(score),
                }
            })
            .collect()
    }
}
