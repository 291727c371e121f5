//! logscale.toml configuration parser.
//!
//! Every section is optional. A missing file is not an error for the
//! daemon; it falls back to `LogscaleConfig::default()`.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("detector.contamination must be in (0, 0.5], got {0}")]
    Contamination(f64),
    #[error("detector.trees must be at least 1")]
    NoTrees,
    #[error("detector.max_samples must be at least 2, got {0}")]
    MaxSamples(usize),
    #[error("scaling.services is empty")]
    NoServices,
    #[error("duplicate service in scaling.services: {0}")]
    DuplicateService(String),
    #[error("service {0} has max_instances = 0")]
    ZeroMaxInstances(String),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogscaleConfig {
    pub logs: LogsConfig,
    pub detector: DetectorConfig,
    pub scaling: ScalingConfig,
    pub state: StateConfig,
    pub daemon: DaemonConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogsConfig {
    pub dir: PathBuf,
    pub extension: String,
}

impl Default for LogsConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("./logs"),
            extension: "csv".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    /// Expected fraction of outliers in the training population.
    pub contamination: f64,
    pub seed: u64,
    pub trees: usize,
    /// Per-tree subsample cap.
    pub max_samples: usize,
    /// Keep category codes in a persisted append-only table instead of
    /// re-deriving them per batch.
    pub stable_categories: bool,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            contamination: 0.1,
            seed: 42,
            trees: 100,
            max_samples: 256,
            stable_categories: true,
        }
    }
}

/// Static per-service scaling limits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceLimit {
    pub name: String,
    pub max_instances: u32,
}

impl ServiceLimit {
    pub fn new(name: &str, max_instances: u32) -> Self {
        Self {
            name: name.to_string(),
            max_instances,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScalingConfig {
    pub state_file: PathBuf,
    /// Percent.
    pub cpu_threshold: f64,
    /// Percent.
    pub memory_threshold: f64,
    /// Milliseconds.
    pub response_time_threshold: f64,
    /// Retries on a state write conflict before the conflict is surfaced.
    pub max_retries: u32,
    pub services: Vec<ServiceLimit>,
}

impl Default for ScalingConfig {
    fn default() -> Self {
        Self {
            state_file: PathBuf::from("./config/scaling_state.json"),
            cpu_threshold: 80.0,
            memory_threshold: 80.0,
            response_time_threshold: 1000.0,
            max_retries: 3,
            services: vec![
                ServiceLimit::new("web-server", 5),
                ServiceLimit::new("database", 3),
                ServiceLimit::new("auth-service", 3),
                ServiceLimit::new("payment-service", 3),
            ],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StateConfig {
    pub db_path: PathBuf,
    /// Restore the read cursor on restart (at-most-once reprocessing).
    /// When off, a restart re-reads every source from its earliest entry.
    pub persist_cursor: bool,
    /// Snapshot the fitted model after every fit and restore it on start.
    pub persist_model: bool,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("./state/logscale.redb"),
            persist_cursor: true,
            persist_model: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    pub interval_secs: u64,
    pub remediation_timeout_secs: u64,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            interval_secs: 30,
            remediation_timeout_secs: 30,
        }
    }
}

impl LogscaleConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: LogscaleConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load `path` if it exists, otherwise return the defaults.
    pub fn load_or_default(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            Self::from_file(path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let d = &self.detector;
        if !(d.contamination > 0.0 && d.contamination <= 0.5) {
            return Err(ConfigError::Contamination(d.contamination));
        }
        if d.trees == 0 {
            return Err(ConfigError::NoTrees);
        }
        if d.max_samples < 2 {
            return Err(ConfigError::MaxSamples(d.max_samples));
        }

        if self.scaling.services.is_empty() {
            return Err(ConfigError::NoServices);
        }
        let mut seen = HashSet::new();
        for svc in &self.scaling.services {
            if !seen.insert(svc.name.as_str()) {
                return Err(ConfigError::DuplicateService(svc.name.clone()));
            }
            if svc.max_instances == 0 {
                return Err(ConfigError::ZeroMaxInstances(svc.name.clone()));
            }
        }
        Ok(())
    }
}
