//! logscale-autoscale: anomaly-driven instance scaling.
//!
//! Evaluates batches of `AnomalyRecord`s against fixed resource thresholds
//! and raises the instance count of the affected services, one step per
//! qualifying anomaly, never past the configured ceiling.
//!
//! # Decision rule
//!
//! ```text
//! for anomaly in batch:
//!     service known?                                  else skip
//!     cpu > 80 || memory > 80 || response_time > 1000 else skip
//!     instances < max_instances?                      else skip
//!     instances += 1  → ScalingAction { scale_up, from, to }
//! ```
//!
//! The whole batch is applied to one loaded copy of the scaling state and
//! committed as a single versioned write. A write conflict reloads and
//! re-evaluates the batch; after `max_retries` the conflict is returned to
//! the caller. There is no scale-down path: `reset` is the only way
//! instance counts decrease.

pub mod engine;
pub mod error;

pub use engine::{ActionKind, ScalingAction, ScalingEngine, ServiceStatus, Thresholds};
pub use error::AutoscaleError;
