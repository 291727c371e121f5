//! ScalingEngine: turns anomaly batches into committed scale-up actions.

use std::collections::BTreeMap;
use std::path::Path;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use logscale_core::config::ScalingConfig;
use logscale_detect::{AnomalyRecord, FeatureVector};
use logscale_state::{ScalingState, ScalingStateFile, StateError};

use crate::error::AutoscaleError;

const REASON: &str = "High resource usage or response time";

/// Resource limits an anomaly must breach to justify a scale-up.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Thresholds {
    /// Percent.
    pub cpu: f64,
    /// Percent.
    pub memory: f64,
    /// Milliseconds.
    pub response_time: f64,
}

impl Thresholds {
    pub fn from_config(config: &ScalingConfig) -> Self {
        Self {
            cpu: config.cpu_threshold,
            memory: config.memory_threshold,
            response_time: config.response_time_threshold,
        }
    }

    /// Compared on the normalized features, never the raw log strings.
    pub fn breached(&self, features: &FeatureVector) -> bool {
        features.cpu_usage > self.cpu
            || features.memory_usage > self.memory
            || features.response_time > self.response_time
    }
}

impl Default for Thresholds {
    fn default() -> Self {
        Self::from_config(&ScalingConfig::default())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    ScaleUp,
}

/// A committed change to one service's instance count.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScalingAction {
    pub service: String,
    pub action: ActionKind,
    pub from_instances: u32,
    pub to_instances: u32,
    pub reason: String,
}

/// Operator view of one service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceStatus {
    pub current_instances: u32,
    pub min_instances: u32,
    pub max_instances: u32,
}

/// Per-service scaling decisions over the persisted scaling state.
///
/// Within a process every read-modify-write cycle runs under `lock`; the
/// versioned commit of [`ScalingStateFile`] catches writers outside it.
pub struct ScalingEngine {
    file: ScalingStateFile,
    thresholds: Thresholds,
    max_retries: u32,
    lock: Mutex<()>,
}

impl ScalingEngine {
    pub fn new(file: ScalingStateFile, thresholds: Thresholds, max_retries: u32) -> Self {
        Self {
            file,
            thresholds,
            max_retries,
            lock: Mutex::new(()),
        }
    }

    /// Open (or create) the state file named by the config.
    pub fn from_config(config: &ScalingConfig) -> Result<Self, AutoscaleError> {
        Self::open(&config.state_file, config)
    }

    /// Like [`from_config`](Self::from_config) with an explicit state path.
    pub fn open(path: &Path, config: &ScalingConfig) -> Result<Self, AutoscaleError> {
        let defaults = ScalingState::defaults(
            config
                .services
                .iter()
                .map(|s| (s.name.as_str(), s.max_instances)),
        );
        let file = ScalingStateFile::open(path, defaults)?;
        Ok(Self::new(
            file,
            Thresholds::from_config(config),
            config.max_retries,
        ))
    }

    /// Apply an anomaly batch and commit the result as one write.
    ///
    /// Returns the actions taken. A batch that produces no action performs
    /// no write, so `evaluate(&[])` never changes persisted state.
    pub fn evaluate(&self, anomalies: &[AnomalyRecord]) -> Result<Vec<ScalingAction>, AutoscaleError> {
        if anomalies.is_empty() {
            return Ok(Vec::new());
        }
        let _guard = self.lock.lock();
        self.commit_with_retry(|state| self.apply(state, anomalies))
    }

    /// Current per-service status.
    pub fn status(&self) -> Result<BTreeMap<String, ServiceStatus>, AutoscaleError> {
        Ok(status_of(&self.file.load()?))
    }

    /// Restore every configured service to its defaults.
    pub fn reset(&self) -> Result<BTreeMap<String, ServiceStatus>, AutoscaleError> {
        let _guard = self.lock.lock();
        let state = self.file.reset()?;
        Ok(status_of(&state))
    }

    fn apply(&self, state: &mut ScalingState, anomalies: &[AnomalyRecord]) -> Vec<ScalingAction> {
        let configured = &self.file.defaults().services;
        let mut actions = Vec::new();

        for anomaly in anomalies {
            let service = anomaly.service();
            if !configured.contains_key(service) {
                debug!(%service, "anomaly for unknown service; skipped");
                continue;
            }
            if !self.thresholds.breached(&anomaly.anomaly_features) {
                continue;
            }
            let Some(svc) = state.services.get_mut(service) else {
                continue;
            };
            if !svc.has_headroom() {
                debug!(%service, instances = svc.instances, "already at max instances");
                continue;
            }

            let from = svc.instances;
            svc.instances += 1;
            actions.push(ScalingAction {
                service: service.to_string(),
                action: ActionKind::ScaleUp,
                from_instances: from,
                to_instances: svc.instances,
                reason: REASON.to_string(),
            });
        }

        actions
    }

    /// Load, mutate, commit. A conflicting commit reloads and re-runs
    /// `mutate` on the fresh state, up to `max_retries` times.
    fn commit_with_retry(
        &self,
        mut mutate: impl FnMut(&mut ScalingState) -> Vec<ScalingAction>,
    ) -> Result<Vec<ScalingAction>, AutoscaleError> {
        let mut attempts = 0;
        loop {
            attempts += 1;
            let mut state = self.file.load()?;
            let actions = mutate(&mut state);
            if actions.is_empty() {
                return Ok(actions);
            }

            match self.file.commit(state.version, &state) {
                Ok(version) => {
                    for action in &actions {
                        info!(
                            service = %action.service,
                            from = action.from_instances,
                            to = action.to_instances,
                            "scaling up"
                        );
                    }
                    debug!(version, actions = actions.len(), "scaling decisions committed");
                    return Ok(actions);
                }
                Err(StateError::Conflict { expected, found }) if attempts <= self.max_retries => {
                    warn!(attempt = attempts, expected, found, "scaling state changed; re-evaluating");
                }
                Err(StateError::Conflict { .. }) => {
                    return Err(AutoscaleError::Conflict { attempts });
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}

fn status_of(state: &ScalingState) -> BTreeMap<String, ServiceStatus> {
    state
        .services
        .iter()
        .map(|(name, svc)| {
            (
                name.clone(),
                ServiceStatus {
                    current_instances: svc.instances,
                    min_instances: 1,
                    max_instances: svc.max_instances,
                },
            )
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use chrono::{TimeZone, Utc};
    use logscale_core::LogRecord;

    fn engine(max_retries: u32) -> (tempfile::TempDir, ScalingEngine) {
        let dir = tempfile::tempdir().unwrap();
        let config = ScalingConfig {
            max_retries,
            ..Default::default()
        };
        let engine = ScalingEngine::open(&dir.path().join("scaling_state.json"), &config).unwrap();
        (dir, engine)
    }

    fn anomaly(service: &str, cpu: f64, memory: f64, response_time: f64) -> AnomalyRecord {
        let ts = Utc.with_ymd_and_hms(2024, 2, 15, 8, 0, 0).unwrap();
        AnomalyRecord {
            record: LogRecord::new(ts, "CRITICAL", service, "Query FAILED")
                .with_cpu(cpu)
                .with_memory(format!("{memory}%").as_str())
                .with_response_time(format!("{response_time}ms").as_str()),
            anomaly_score: 0.72,
            anomaly_features: FeatureVector {
                cpu_usage: cpu,
                memory_usage: memory,
                response_time,
                has_error: 1.0,
                ..Default::default()
            },
        }
    }

    fn set_instances(engine: &ScalingEngine, service: &str, instances: u32) {
        let mut state = engine.file.load().unwrap();
        state.services.get_mut(service).unwrap().instances = instances;
        engine.file.commit(state.version, &state).unwrap();
    }

    #[test]
    fn database_cpu_breach_scales_up_once() {
        let (_dir, engine) = engine(3);
        let actions = engine.evaluate(&[anomaly("database", 95.0, 10.0, 50.0)]).unwrap();

        assert_eq!(
            actions,
            vec![ScalingAction {
                service: "database".to_string(),
                action: ActionKind::ScaleUp,
                from_instances: 1,
                to_instances: 2,
                reason: REASON.to_string(),
            }]
        );
        assert_eq!(engine.status().unwrap()["database"].current_instances, 2);
    }

    #[test]
    fn at_ceiling_no_action_and_state_unchanged() {
        let (_dir, engine) = engine(3);
        set_instances(&engine, "database", 3);
        let before = engine.file.load().unwrap();

        let actions = engine.evaluate(&[anomaly("database", 95.0, 10.0, 50.0)]).unwrap();
        assert!(actions.is_empty());
        assert_eq!(engine.file.load().unwrap(), before);
    }

    #[test]
    fn empty_batch_never_writes() {
        let (_dir, engine) = engine(3);
        let before = engine.file.load().unwrap();
        assert!(engine.evaluate(&[]).unwrap().is_empty());
        assert_eq!(engine.file.load().unwrap(), before);
    }

    #[test]
    fn below_thresholds_and_unknown_services_are_ignored() {
        let (_dir, engine) = engine(3);
        let before = engine.file.load().unwrap();
        let actions = engine
            .evaluate(&[
                anomaly("database", 80.0, 80.0, 1000.0),
                anomaly("billing", 99.0, 99.0, 9000.0),
            ])
            .unwrap();
        assert!(actions.is_empty());
        assert_eq!(engine.file.load().unwrap(), before);
    }

    #[test]
    fn each_threshold_alone_is_enough() {
        let (_dir, engine) = engine(3);
        let actions = engine
            .evaluate(&[
                anomaly("web-server", 0.0, 85.0, 0.0),
                anomaly("auth-service", 0.0, 0.0, 1500.0),
                anomaly("payment-service", 81.0, 0.0, 0.0),
            ])
            .unwrap();
        assert_eq!(actions.len(), 3);
    }

    #[test]
    fn instances_never_exceed_max() {
        let (_dir, engine) = engine(3);
        let batch: Vec<_> = (0..10).map(|_| anomaly("web-server", 99.0, 0.0, 0.0)).collect();

        let actions = engine.evaluate(&batch).unwrap();
        assert_eq!(actions.len(), 4);
        assert_eq!(actions.last().unwrap().to_instances, 5);

        assert!(engine.evaluate(&batch).unwrap().is_empty());
        for status in engine.status().unwrap().values() {
            assert!(status.current_instances >= 1);
            assert!(status.current_instances <= status.max_instances);
        }
    }

    #[test]
    fn reset_then_status_returns_defaults() {
        let (_dir, engine) = engine(3);
        engine.evaluate(&[anomaly("database", 95.0, 0.0, 0.0)]).unwrap();

        let after_reset = engine.reset().unwrap();
        let status = engine.status().unwrap();
        assert_eq!(after_reset, status);
        assert_eq!(
            status["web-server"],
            ServiceStatus {
                current_instances: 1,
                min_instances: 1,
                max_instances: 5,
            }
        );
        for name in ["database", "auth-service", "payment-service"] {
            assert_eq!(status[name].current_instances, 1);
            assert_eq!(status[name].max_instances, 3);
        }
    }

    #[test]
    fn conflict_is_retried_against_fresh_state() {
        let (_dir, engine) = engine(3);
        let other = engine.file.clone();
        let mut raced = false;

        let actions = engine
            .commit_with_retry(|state| {
                if !raced {
                    // Another writer lands between our load and our commit.
                    raced = true;
                    let mut theirs = other.load().unwrap();
                    theirs.services.get_mut("database").unwrap().instances = 2;
                    other.commit(theirs.version, &theirs).unwrap();
                }
                engine.apply(state, &[anomaly("database", 95.0, 0.0, 0.0)])
            })
            .unwrap();

        assert_eq!(actions[0].from_instances, 2);
        assert_eq!(actions[0].to_instances, 3);
        assert_eq!(engine.status().unwrap()["database"].current_instances, 3);
    }

    #[test]
    fn conflict_surfaces_after_retries() {
        let (_dir, engine) = engine(1);
        let other = engine.file.clone();

        let err = engine
            .commit_with_retry(|state| {
                let theirs = other.load().unwrap();
                other.commit(theirs.version, &theirs).unwrap();
                engine.apply(state, &[anomaly("database", 95.0, 0.0, 0.0)])
            })
            .unwrap_err();

        assert!(matches!(err, AutoscaleError::Conflict { attempts: 2 }));
        assert_eq!(engine.status().unwrap()["database"].current_instances, 1);
    }

    #[test]
    fn concurrent_evaluations_do_not_lose_updates() {
        let (_dir, engine) = engine(3);
        let engine = Arc::new(engine);

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let engine = Arc::clone(&engine);
                std::thread::spawn(move || {
                    engine
                        .evaluate(&[anomaly("web-server", 99.0, 0.0, 0.0)])
                        .unwrap()
                })
            })
            .collect();

        let total: usize = handles.into_iter().map(|h| h.join().unwrap().len()).sum();
        assert_eq!(total, 4);
        assert_eq!(engine.status().unwrap()["web-server"].current_instances, 5);
    }

    #[test]
    fn action_serializes_with_snake_case_kind() {
        let (_dir, engine) = engine(3);
        let actions = engine.evaluate(&[anomaly("database", 95.0, 0.0, 0.0)]).unwrap();
        let json = serde_json::to_value(&actions[0]).unwrap();
        assert_eq!(json["action"], "scale_up");
        assert_eq!(json["to_instances"], 2);
    }
}
