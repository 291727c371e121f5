//! Pipeline: wires the stages together and runs them on a tick.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

use logscale_autoscale::{ScalingAction, ScalingEngine, Thresholds};
use logscale_core::{LogRecord, LogscaleConfig};
use logscale_detect::{
    AnomalyRecord, AnomalyScorer, CategoryEncoder, DetectError, IsolationForest, build, extract,
};
use logscale_ingest::{LogReader, PendingRead};
use logscale_state::{RemediationEntry, RemediationStatus, StateResult, StateStore};

use crate::remediation::{Remediator, RunbookRemediator};

/// Key of the forest snapshot in the models table.
const MODEL_KEY: &str = "isolation-forest";

/// Outcome of one incremental analysis cycle.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnalysisReport {
    pub logs_analyzed: usize,
    pub anomalies_detected: usize,
    pub anomalies: Vec<AnomalyRecord>,
    pub scaling_actions: Vec<ScalingAction>,
}

pub struct Pipeline {
    reader: LogReader,
    encoder: Mutex<CategoryEncoder>,
    scorer: AnomalyScorer,
    engine: ScalingEngine,
    store: StateStore,
    remediator: Option<Arc<dyn Remediator>>,
    remediation_timeout: Duration,
    persist_model: bool,
    /// Serializes incremental cycles between peek and cursor commit.
    cycle: Mutex<()>,
}

impl Pipeline {
    /// Assemble a pipeline from configuration.
    ///
    /// Opens the redb state store and the scaling state file, restores the
    /// read cursor, category table and model snapshot where configured, and
    /// installs the runbook remediator.
    pub fn from_config(config: &LogscaleConfig) -> anyhow::Result<Self> {
        config.validate()?;

        let store = StateStore::open(&config.state.db_path)?;
        info!(path = ?config.state.db_path, "state store opened");

        let mut reader = LogReader::from_config(&config.logs);
        if config.state.persist_cursor {
            reader = reader.with_cursor_store(store.clone())?;
        }

        let encoder = if config.detector.stable_categories {
            CategoryEncoder::stable_with_store(store.clone())?
        } else {
            CategoryEncoder::per_batch()
        };

        let mut scorer = AnomalyScorer::from_config(&config.detector);
        if config.state.persist_model
            && let Some(model) = store.get_model::<IsolationForest>(MODEL_KEY)?
        {
            if *model.params() == scorer.params() {
                info!(threshold = model.threshold(), "anomaly model restored");
                scorer = scorer.with_model(model);
            } else {
                info!("stored anomaly model was fitted with other parameters; starting unfitted");
            }
        }

        let engine = ScalingEngine::from_config(&config.scaling)?;
        let remediator: Arc<dyn Remediator> =
            Arc::new(RunbookRemediator::new(Thresholds::from_config(&config.scaling)));

        Ok(Self {
            reader,
            encoder: Mutex::new(encoder),
            scorer,
            engine,
            store,
            remediator: Some(remediator),
            remediation_timeout: Duration::from_secs(config.daemon.remediation_timeout_secs),
            persist_model: config.state.persist_model,
            cycle: Mutex::new(()),
        })
    }

    /// Replace the remediator; `None` disables remediation.
    pub fn with_remediator(mut self, remediator: Option<Arc<dyn Remediator>>) -> Self {
        self.remediator = remediator;
        self
    }

    pub fn with_remediation_timeout(mut self, timeout: Duration) -> Self {
        self.remediation_timeout = timeout;
        self
    }

    pub fn reader(&self) -> &LogReader {
        &self.reader
    }

    pub fn scorer(&self) -> &AnomalyScorer {
        &self.scorer
    }

    pub fn engine(&self) -> &ScalingEngine {
        &self.engine
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    /// Extract, score and keep the outliers of `records`.
    ///
    /// A schema error fails the batch. A failed model fit yields no
    /// anomalies.
    pub fn detect(&self, records: &[LogRecord]) -> Result<Vec<AnomalyRecord>, DetectError> {
        if records.is_empty() {
            return Ok(Vec::new());
        }

        let batch = {
            let mut encoder = self.encoder.lock();
            extract(records, &mut encoder)?
        };

        let before = self.scorer.model();
        let scores = self.scorer.score_and_label(&batch.vectors);
        if let Some(after) = self.scorer.model()
            && before.is_none_or(|b| !Arc::ptr_eq(&b, &after))
        {
            self.snapshot_model(&after);
        }

        let anomalies = build(records, &batch.vectors, &scores);
        debug!(
            records = records.len(),
            degraded = batch.degraded,
            anomalies = anomalies.len(),
            "batch scored"
        );
        Ok(anomalies)
    }

    /// One incremental cycle: new logs in, committed scaling actions out.
    ///
    /// Anomalies are journaled before scaling is evaluated. The read cursor
    /// only moves once the scaling decisions are committed, so a failed
    /// cycle sees the same logs again on retry. Remediation is not started
    /// here; see [`dispatch_remediation`](Self::dispatch_remediation).
    pub fn analyze_new(&self) -> anyhow::Result<AnalysisReport> {
        let _cycle = self.cycle.lock();
        let read = self.reader.peek_new();
        if read.is_empty() {
            self.commit_read(&read);
            debug!("no new logs");
            return Ok(AnalysisReport::default());
        }

        let anomalies = self.detect(&read.records)?;
        self.journal(&anomalies);
        let scaling_actions = self.engine.evaluate(&anomalies)?;
        self.commit_read(&read);

        info!(
            logs = read.records.len(),
            anomalies = anomalies.len(),
            actions = scaling_actions.len(),
            "analysis cycle complete"
        );
        Ok(AnalysisReport {
            logs_analyzed: read.records.len(),
            anomalies_detected: anomalies.len(),
            anomalies,
            scaling_actions,
        })
    }

    /// Anomalies in the recent window. Leaves the cursor and scaling state
    /// untouched.
    pub fn analyze_recent(&self, minutes: u64) -> Result<Vec<AnomalyRecord>, DetectError> {
        let records = self.reader.recent_window(minutes);
        self.detect(&records)
    }

    /// Ask the remediator about each anomaly in a background task and
    /// record the outcomes in the remediation history.
    ///
    /// Must be called from within a Tokio runtime. Returns `None` when there
    /// is nothing to do; otherwise the task yields the number of entries
    /// stored.
    pub fn dispatch_remediation(&self, anomalies: Vec<AnomalyRecord>) -> Option<JoinHandle<usize>> {
        self.remediation_task(anomalies).map(tokio::spawn)
    }

    fn remediation_task(
        &self,
        anomalies: Vec<AnomalyRecord>,
    ) -> Option<impl Future<Output = usize> + Send + use<>> {
        let remediator = self.remediator.clone()?;
        if anomalies.is_empty() {
            return None;
        }
        let store = self.store.clone();
        let timeout = self.remediation_timeout;

        Some(async move {
            let mut stored = 0;
            for anomaly in &anomalies {
                let service = anomaly.service().to_string();
                let (suggestion, error, status) =
                    match tokio::time::timeout(timeout, remediator.suggest(anomaly)).await {
                        Ok(Ok(text)) => (Some(text), None, RemediationStatus::Pending),
                        Ok(Err(e)) => {
                            warn!(%service, error = %e, "remediation failed");
                            (None, Some(e.to_string()), RemediationStatus::Failed)
                        }
                        Err(_) => {
                            let millis = timeout.as_millis() as u64;
                            warn!(%service, timeout_ms = millis, "remediation timed out");
                            (
                                None,
                                Some(format!("timed out after {millis}ms")),
                                RemediationStatus::Failed,
                            )
                        }
                    };

                let entry = RemediationEntry {
                    anomaly_timestamp: anomaly.record.timestamp,
                    service,
                    message: anomaly.record.message.clone().unwrap_or_default(),
                    suggestion,
                    error,
                    status,
                    created_at: Utc::now(),
                };
                match store.put_remediation(&entry) {
                    Ok(_) => stored += 1,
                    Err(e) => warn!(error = %e, "failed to store remediation"),
                }
            }
            debug!(stored, "remediation batch finished");
            stored
        })
    }

    /// Most recent remediation entries first.
    pub fn history(&self, limit: usize) -> StateResult<Vec<RemediationEntry>> {
        self.store.list_remediations(limit)
    }

    /// Most recent journaled anomalies first.
    pub fn journaled_anomalies(&self, limit: usize) -> StateResult<Vec<AnomalyRecord>> {
        self.store.list_anomalies(limit)
    }

    /// Analyze, then hand the anomalies to remediation on `remediations`.
    pub fn tick(&self, remediations: &mut JoinSet<usize>) -> anyhow::Result<AnalysisReport> {
        let report = self.analyze_new()?;
        // Scaling is committed by now.
        if let Some(task) = self.remediation_task(report.anomalies.clone()) {
            remediations.spawn(task);
        }
        Ok(report)
    }

    /// Run [`tick`](Self::tick) every `interval` until shutdown, then wait
    /// for in-flight remediation to be recorded.
    pub async fn run(&self, interval: Duration, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        info!(interval_secs = interval.as_secs(), "pipeline started");
        let mut remediations = JoinSet::new();

        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {
                    if let Err(e) = self.tick(&mut remediations) {
                        error!(error = %e, "analysis cycle failed");
                    }
                }
                Some(done) = remediations.join_next(), if !remediations.is_empty() => {
                    log_remediation(done);
                }
                _ = shutdown.changed() => {
                    info!("pipeline shutting down");
                    break;
                }
            }
        }

        if !remediations.is_empty() {
            info!(pending = remediations.len(), "waiting for in-flight remediation");
        }
        while let Some(done) = remediations.join_next().await {
            log_remediation(done);
        }
    }

    fn commit_read(&self, read: &PendingRead) {
        if let Err(e) = self.reader.commit(read) {
            error!(error = %e, "failed to persist read cursor");
        }
    }

    fn journal(&self, anomalies: &[AnomalyRecord]) {
        for anomaly in anomalies {
            let message = anomaly.record.message.as_deref().unwrap_or_default();
            if let Err(e) = self.store.record_anomaly(
                &anomaly.record.timestamp,
                anomaly.service(),
                message,
                anomaly,
            ) {
                warn!(service = %anomaly.service(), error = %e, "failed to journal anomaly");
            }
        }
    }

    fn snapshot_model(&self, model: &IsolationForest) {
        if !self.persist_model {
            return;
        }
        match self.store.put_model(MODEL_KEY, model) {
            Ok(()) => debug!("anomaly model snapshot stored"),
            Err(e) => warn!(error = %e, "failed to store anomaly model snapshot"),
        }
    }
}

fn log_remediation(done: Result<usize, tokio::task::JoinError>) {
    match done {
        Ok(stored) => debug!(stored, "remediation task finished"),
        Err(e) => error!(error = %e, "remediation task failed"),
    }
}
