use logscale_state::StateError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AutoscaleError {
    /// Every attempt lost the race for the scaling state.
    #[error("scaling state write conflict persisted after {attempts} attempts")]
    Conflict { attempts: u32 },

    #[error(transparent)]
    State(#[from] StateError),
}
