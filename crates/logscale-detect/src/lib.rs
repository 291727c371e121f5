//! logscale-detect: turns log records into scored anomaly records.
//!
//! # Stages
//!
//! ```text
//! LogRecord[] ──extract()──▶ FeatureVector[] ──score_and_label()──▶ Score[]
//!      │                           │                                 │
//!      └───────────────────────────┴────────────build()──────────────┘
//!                                                  ▼
//!                                          AnomalyRecord[] (outliers only)
//! ```
//!
//! The scorer is an isolation forest with a fixed seed and contamination
//! rate. It starts `Unfitted`; the first batch it is asked to score is also
//! the batch it is fitted on (bootstrap fit). That batch is therefore judged
//! against its own notion of normal.

pub mod encoding;
pub mod error;
pub mod features;
pub mod forest;
pub mod record;
pub mod scorer;

pub use encoding::{CategoryEncoder, CategoryKind, EncodingMode};
pub use error::DetectError;
pub use features::{FEATURE_COUNT, FEATURE_NAMES, FeatureBatch, FeatureVector, extract};
pub use forest::{ForestParams, IsolationForest};
pub use record::{AnomalyRecord, build};
pub use scorer::{AnomalyScorer, Score, ScorerState};
