//! Seeded isolation forest.
//!
//! Each tree is grown on a random subsample by repeatedly picking a random
//! feature (among those that still vary) and a random split value between
//! that feature's min and max, until a point is isolated or the depth limit
//! `ceil(log2(sample_size))` is hit. Outliers isolate quickly, so a short
//! average path means an abnormal point.
//!
//! ```text
//! score(x)  = 2 ^ ( -mean_tree_depth(x) / c(sample_size) )      ∈ (0, 1]
//! threshold = percentile(training scores, 100 * (1 - contamination))
//! outlier   = score(x) > threshold
//! ```
//!
//! Higher scores are more abnormal. Given the same data, seed and
//! parameters, fitting is fully deterministic.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::DetectError;
use crate::features::FEATURE_COUNT;

const EULER_GAMMA: f64 = 0.577_215_664_901_532_9;

pub type Sample = [f64; FEATURE_COUNT];

/// Hyperparameters for fitting.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ForestParams {
    pub trees: usize,
    pub max_samples: usize,
    pub contamination: f64,
    pub seed: u64,
}

impl Default for ForestParams {
    fn default() -> Self {
        Self {
            trees: 100,
            max_samples: 256,
            contamination: 0.1,
            seed: 42,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
enum Node {
    Leaf {
        size: usize,
    },
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
}

/// One tree, stored as an arena with the root at index 0.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct IsolationTree {
    nodes: Vec<Node>,
}

impl IsolationTree {
    fn grow(data: &[Sample], indices: Vec<usize>, depth_limit: usize, rng: &mut StdRng) -> Self {
        let mut tree = Self { nodes: Vec::new() };
        tree.grow_node(data, indices, 0, depth_limit, rng);
        tree
    }

    fn grow_node(
        &mut self,
        data: &[Sample],
        indices: Vec<usize>,
        depth: usize,
        depth_limit: usize,
        rng: &mut StdRng,
    ) -> usize {
        let slot = self.nodes.len();
        self.nodes.push(Node::Leaf {
            size: indices.len(),
        });
        if depth >= depth_limit || indices.len() <= 1 {
            return slot;
        }

        // Only features that still vary inside this node can split it.
        let candidates: Vec<(usize, f64, f64)> = (0..FEATURE_COUNT)
            .filter_map(|feature| {
                let (lo, hi) = indices
                    .iter()
                    .map(|&i| data[i][feature])
                    .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
                        (lo.min(v), hi.max(v))
                    });
                (hi > lo).then_some((feature, lo, hi))
            })
            .collect();
        if candidates.is_empty() {
            return slot;
        }

        let (feature, lo, hi) = candidates[rng.gen_range(0..candidates.len())];
        // `hi - lo` can overflow, so interpolate instead of `gen_range(lo..hi)`.
        let t: f64 = rng.r#gen();
        let threshold = lo * (1.0 - t) + hi * t;
        let (left, right): (Vec<usize>, Vec<usize>) = indices
            .into_iter()
            .partition(|&i| data[i][feature] <= threshold);

        let left = self.grow_node(data, left, depth + 1, depth_limit, rng);
        let right = self.grow_node(data, right, depth + 1, depth_limit, rng);
        self.nodes[slot] = Node::Split {
            feature,
            threshold,
            left,
            right,
        };
        slot
    }

    /// Depth at which `x` lands, adjusted for the unresolved leaf population.
    fn path_length(&self, x: &Sample) -> f64 {
        let mut index = 0;
        let mut depth = 0.0;
        loop {
            match &self.nodes[index] {
                Node::Leaf { size } => return depth + average_path_length(*size),
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    index = if x[*feature] <= *threshold { *left } else { *right };
                    depth += 1.0;
                }
            }
        }
    }
}

/// Average path length of an unsuccessful BST search over `n` points.
fn average_path_length(n: usize) -> f64 {
    match n {
        0 | 1 => 0.0,
        2 => 1.0,
        _ => {
            let n = n as f64;
            2.0 * ((n - 1.0).ln() + EULER_GAMMA) - 2.0 * (n - 1.0) / n
        }
    }
}

/// Linear-interpolated percentile, `q` in [0, 1]. `sorted` must be non-empty.
fn percentile(sorted: &[f64], q: f64) -> f64 {
    let rank = q.clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    sorted[lo] + (sorted[hi] - sorted[lo]) * (rank - lo as f64)
}

/// A fitted forest plus its decision threshold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IsolationForest {
    params: ForestParams,
    sample_size: usize,
    threshold: f64,
    trees: Vec<IsolationTree>,
}

impl IsolationForest {
    /// Fit on `data`. Needs at least two samples, all finite.
    pub fn fit(data: &[Sample], params: ForestParams) -> Result<Self, DetectError> {
        if data.len() < 2 {
            return Err(DetectError::ModelFit(format!(
                "need at least 2 samples, got {}",
                data.len()
            )));
        }
        if let Some(row) = data.iter().position(|s| s.iter().any(|v| !v.is_finite())) {
            return Err(DetectError::ModelFit(format!("non-finite value in sample {row}")));
        }
        if params.trees == 0 || params.max_samples < 2 {
            return Err(DetectError::ModelFit(format!(
                "invalid parameters: trees={}, max_samples={}",
                params.trees, params.max_samples
            )));
        }
        if !(params.contamination > 0.0 && params.contamination <= 0.5) {
            return Err(DetectError::ModelFit(format!(
                "contamination must be in (0, 0.5], got {}",
                params.contamination
            )));
        }

        let sample_size = params.max_samples.min(data.len());
        let depth_limit = (sample_size as f64).log2().ceil() as usize;
        let mut rng = StdRng::seed_from_u64(params.seed);

        let trees = (0..params.trees)
            .map(|_| {
                let indices = rand::seq::index::sample(&mut rng, data.len(), sample_size).into_vec();
                IsolationTree::grow(data, indices, depth_limit, &mut rng)
            })
            .collect();

        let mut forest = Self {
            params,
            sample_size,
            threshold: 0.0,
            trees,
        };

        let mut training: Vec<f64> = data.iter().map(|x| forest.score(x)).collect();
        training.sort_by(f64::total_cmp);
        forest.threshold = percentile(&training, 1.0 - params.contamination);

        debug!(
            samples = data.len(),
            sample_size,
            trees = params.trees,
            threshold = forest.threshold,
            "isolation forest fitted"
        );
        Ok(forest)
    }

    /// Abnormality score in (0, 1]; higher is more abnormal.
    pub fn score(&self, x: &Sample) -> f64 {
        let mean_depth =
            self.trees.iter().map(|t| t.path_length(x)).sum::<f64>() / self.trees.len() as f64;
        2f64.powf(-mean_depth / average_path_length(self.sample_size))
    }

    pub fn is_outlier(&self, score: f64) -> bool {
        score > self.threshold
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn params(&self) -> &ForestParams {
        &self.params
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cluster_with_outlier() -> Vec<Sample> {
        let mut data: Vec<Sample> = (0..40)
            .map(|i| {
                let jitter = (i % 5) as f64;
                [0.0, 1.0, 20.0 + jitter, 30.0 + jitter, 100.0 + jitter, 0.0, 0.0, 0.0]
            })
            .collect();
        data.push([3.0, 2.0, 99.0, 95.0, 4000.0, 1500.0, 1.0, 1.0]);
        data
    }

    #[test]
    fn average_path_length_values() {
        assert_eq!(average_path_length(0), 0.0);
        assert_eq!(average_path_length(1), 0.0);
        assert_eq!(average_path_length(2), 1.0);
        let c256 = average_path_length(256);
        assert!((c256 - 10.244).abs() < 0.01, "c(256) = {c256}");
    }

    #[test]
    fn percentile_interpolates() {
        let v = [1.0, 2.0, 3.0, 4.0, 5.0];
        assert_eq!(percentile(&v, 0.0), 1.0);
        assert_eq!(percentile(&v, 1.0), 5.0);
        assert_eq!(percentile(&v, 0.5), 3.0);
        assert!((percentile(&v, 0.9) - 4.6).abs() < 1e-12);
    }

    #[test]
    fn flags_the_obvious_outlier() {
        let data = cluster_with_outlier();
        let forest = IsolationForest::fit(&data, ForestParams::default()).unwrap();

        let outlier = data.last().unwrap();
        let normal = &data[0];
        let s_out = forest.score(outlier);
        let s_norm = forest.score(normal);
        assert!(s_out > s_norm, "outlier {s_out} vs normal {s_norm}");
        assert!(forest.is_outlier(s_out));
        assert!(!forest.is_outlier(s_norm));
    }

    #[test]
    fn fitting_is_deterministic() {
        let data = cluster_with_outlier();
        let a = IsolationForest::fit(&data, ForestParams::default()).unwrap();
        let b = IsolationForest::fit(&data, ForestParams::default()).unwrap();
        assert_eq!(a, b);

        let other_seed = ForestParams {
            seed: 7,
            ..ForestParams::default()
        };
        let c = IsolationForest::fit(&data, other_seed).unwrap();
        assert_ne!(a, c);
    }

    #[test]
    fn constant_data_has_no_outliers() {
        let data = vec![[1.0; FEATURE_COUNT]; 10];
        let forest = IsolationForest::fit(&data, ForestParams::default()).unwrap();
        assert!(data.iter().all(|x| !forest.is_outlier(forest.score(x))));
    }

    #[test]
    fn degenerate_input_fails() {
        assert!(IsolationForest::fit(&[], ForestParams::default()).is_err());
        assert!(IsolationForest::fit(&[[0.0; FEATURE_COUNT]], ForestParams::default()).is_err());

        let mut data = vec![[0.0; FEATURE_COUNT]; 3];
        data[1][2] = f64::NAN;
        assert!(matches!(
            IsolationForest::fit(&data, ForestParams::default()),
            Err(DetectError::ModelFit(_))
        ));
    }

    #[test]
    fn snapshot_round_trips() {
        let data = cluster_with_outlier();
        let forest = IsolationForest::fit(&data, ForestParams::default()).unwrap();
        let json = serde_json::to_vec(&forest).unwrap();
        let back: IsolationForest = serde_json::from_slice(&json).unwrap();
        assert!((back.score(&data[3]) - forest.score(&data[3])).abs() < 1e-9);
        assert!((back.threshold() - forest.threshold()).abs() < 1e-9);
        assert_eq!(back.params(), forest.params());
    }
}
