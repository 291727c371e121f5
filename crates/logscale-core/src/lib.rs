pub mod config;
pub mod types;

pub use config::LogscaleConfig;
pub use types::*;
