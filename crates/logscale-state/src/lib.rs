//! logscale-state: durable state for the Logscale pipeline.
//!
//! Two stores live here:
//!
//! - [`StateStore`], backed by [redb](https://docs.rs/redb), holds the
//!   pipeline's process state: the incremental read cursor, the
//!   append-only category code table, the fitted model snapshot, the
//!   anomaly journal and the remediation history. Values are
//!   JSON-serialized into `&[u8]` columns.
//! - [`ScalingStateFile`] holds per-service instance counts as a
//!   human-readable JSON document that operators may inspect and edit
//!   between runs. Every write is version-stamped; a commit against a
//!   stale version fails with [`StateError::Conflict`].
//!
//! `StateStore` is `Clone` + `Send` + `Sync` (backed by `Arc<Database>`)
//! and can be shared across async tasks.

pub mod error;
pub mod scaling_file;
pub mod store;
pub mod tables;
pub mod types;

pub use error::{StateError, StateResult};
pub use scaling_file::ScalingStateFile;
pub use store::StateStore;
pub use types::*;
