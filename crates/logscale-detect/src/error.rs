//! Error types for the detection stages.

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum DetectError {
    /// Required columns absent from the whole batch. Fatal to that call.
    #[error("missing required columns: {}", .missing.join(", "))]
    Schema { missing: Vec<String> },

    /// The model could not be trained. The scorer stays unfitted.
    #[error("model fit failed: {0}")]
    ModelFit(String),
}
