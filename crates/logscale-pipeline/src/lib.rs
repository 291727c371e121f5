//! logscale-pipeline: the ingestion-to-decision path, end to end.
//!
//! One [`Pipeline`] owns every stage and the process state they share:
//!
//! ```text
//! LogReader::peek_new ─▶ extract ─▶ score_and_label ─▶ build ─▶ ScalingEngine::evaluate
//!                                                        │              │
//!                                              anomaly journal     scaling state file
//!                                                        │
//!                                                        └─▶ Remediator (spawned, after commit)
//! ```
//!
//! The read cursor is committed only after the scaling decisions are, so a
//! failed cycle is retried with the same logs. Scaling decisions are
//! committed before any remediation is requested.
//! Remediation runs in a background task with a timeout; its outcome is
//! recorded in the remediation history and never feeds back into scaling.

pub mod pipeline;
pub mod remediation;

pub use pipeline::{AnalysisReport, Pipeline};
pub use remediation::{BoxFuture, Remediator, RunbookRemediator};
