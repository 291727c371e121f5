//! Ingestion-to-decision over CSV sources written to a temp directory.

use std::io::Write;
use std::path::Path;

use logscale_autoscale::ActionKind;
use logscale_core::LogscaleConfig;
use logscale_detect::AnomalyRecord;
use logscale_pipeline::Pipeline;
use logscale_state::RemediationStatus;

const HEADER: &str = "timestamp,level,service,message,cpu_usage,memory_usage,response_time\n";

fn config(root: &Path) -> LogscaleConfig {
    let mut config = LogscaleConfig::default();
    config.logs.dir = root.join("logs");
    config.scaling.state_file = root.join("config/scaling_state.json");
    config.state.db_path = root.join("state/logscale.redb");
    config
}

fn healthy_rows(start_minute: u32, count: u32) -> String {
    (0..count)
        .map(|i| {
            let minute = start_minute + i / 60;
            let second = i % 60;
            format!(
                "2024-02-15 08:{minute:02}:{second:02},INFO,web-server,GET /api/items - 200,{}%,35%,{}ms\n",
                20 + i % 5,
                110 + i % 7,
            )
        })
        .collect()
}

fn write_source(root: &Path, name: &str, rows: &str) {
    let dir = root.join("logs");
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(dir.join(name), format!("{HEADER}{rows}")).unwrap();
}

fn append_source(root: &Path, name: &str, rows: &str) {
    let mut file = std::fs::OpenOptions::new()
        .append(true)
        .open(root.join("logs").join(name))
        .unwrap();
    file.write_all(rows.as_bytes()).unwrap();
}

const DATABASE_SPIKE: &str = "2024-02-15 08:00:30,CRITICAL,database,Query FAILED: lock timeout,95,10%,50ms\n";

#[tokio::test]
async fn database_spike_scales_database_once() {
    let root = tempfile::tempdir().unwrap();
    write_source(root.path(), "web.csv", &healthy_rows(0, 40));
    write_source(root.path(), "db.csv", DATABASE_SPIKE);

    let pipeline = Pipeline::from_config(&config(root.path())).unwrap();
    let report = pipeline.analyze_new().unwrap();

    // The earliest row seeds the cursor and is not itself returned.
    assert_eq!(report.logs_analyzed, 40);
    assert_eq!(report.anomalies_detected, report.anomalies.len());
    let spike = report
        .anomalies
        .iter()
        .find(|a| a.service() == "database")
        .expect("database spike is flagged");
    assert_eq!(spike.anomaly_features.cpu_usage, 95.0);
    assert_eq!(spike.anomaly_features.memory_usage, 10.0);
    assert_eq!(spike.anomaly_features.response_time, 50.0);
    assert_eq!(spike.anomaly_features.has_error, 1.0);

    assert_eq!(report.scaling_actions.len(), 1);
    let action = &report.scaling_actions[0];
    assert_eq!(action.service, "database");
    assert_eq!(action.action, ActionKind::ScaleUp);
    assert_eq!((action.from_instances, action.to_instances), (1, 2));

    let status = pipeline.engine().status().unwrap();
    assert_eq!(status["database"].current_instances, 2);
    assert_eq!(status["web-server"].current_instances, 1);

    let journal: Vec<AnomalyRecord> = pipeline.journaled_anomalies(100).unwrap();
    assert_eq!(journal.len(), report.anomalies.len());

    let stored = pipeline
        .dispatch_remediation(report.anomalies.clone())
        .unwrap()
        .await
        .unwrap();
    assert_eq!(stored, report.anomalies.len());
    let history = pipeline.history(100).unwrap();
    let db_entry = history.iter().find(|e| e.service == "database").unwrap();
    assert_eq!(db_entry.status, RemediationStatus::Pending);
    assert!(db_entry.suggestion.as_deref().unwrap().contains("CPU at 95%"));
}

#[test]
fn database_at_ceiling_is_left_alone() {
    let root = tempfile::tempdir().unwrap();
    let state_file = root.path().join("config/scaling_state.json");
    std::fs::create_dir_all(state_file.parent().unwrap()).unwrap();
    std::fs::write(
        &state_file,
        r#"{"version": 0, "services": {"database": {"instances": 3, "max_instances": 3}}}"#,
    )
    .unwrap();
    write_source(root.path(), "web.csv", &healthy_rows(0, 40));
    write_source(root.path(), "db.csv", DATABASE_SPIKE);

    let pipeline = Pipeline::from_config(&config(root.path())).unwrap();
    let before = std::fs::read_to_string(&state_file).unwrap();
    let report = pipeline.analyze_new().unwrap();

    assert!(report.anomalies.iter().any(|a| a.service() == "database"));
    assert!(report.scaling_actions.is_empty());
    assert_eq!(std::fs::read_to_string(&state_file).unwrap(), before);
}

#[test]
fn failed_cycle_is_retried_with_the_same_logs() {
    let root = tempfile::tempdir().unwrap();
    write_source(root.path(), "web.csv", &healthy_rows(0, 40));
    write_source(root.path(), "db.csv", DATABASE_SPIKE);
    let config = config(root.path());

    let pipeline = Pipeline::from_config(&config).unwrap();
    let state_file = &config.scaling.state_file;
    let good = std::fs::read_to_string(state_file).unwrap();

    std::fs::write(state_file, "{ not json").unwrap();
    assert!(pipeline.analyze_new().is_err());
    assert!(pipeline.reader().cursor().is_none());

    std::fs::write(state_file, good).unwrap();
    let retry = pipeline.analyze_new().unwrap();
    assert_eq!(retry.logs_analyzed, 40);
    assert_eq!(retry.scaling_actions.len(), 1);
    assert_eq!(retry.scaling_actions[0].service, "database");
    assert_eq!(pipeline.engine().status().unwrap()["database"].current_instances, 2);
    assert!(pipeline.reader().cursor().is_some());

    // Journaling the retried batch again did not duplicate entries.
    assert_eq!(
        pipeline.journaled_anomalies(100).unwrap().len(),
        retry.anomalies_detected
    );
}

#[test]
fn incremental_reads_only_see_new_rows() {
    let root = tempfile::tempdir().unwrap();
    write_source(root.path(), "web.csv", &healthy_rows(0, 40));
    let config = config(root.path());

    let pipeline = Pipeline::from_config(&config).unwrap();
    assert_eq!(pipeline.analyze_new().unwrap().logs_analyzed, 39);
    let cursor = pipeline.reader().cursor().unwrap();

    let second = pipeline.analyze_new().unwrap();
    assert_eq!(second.logs_analyzed, 0);
    assert!(second.scaling_actions.is_empty());
    assert_eq!(pipeline.reader().cursor(), Some(cursor));

    append_source(root.path(), "web.csv", &healthy_rows(5, 10));
    assert_eq!(pipeline.analyze_new().unwrap().logs_analyzed, 10);
    assert!(pipeline.reader().cursor().unwrap() > cursor);
    drop(pipeline);

    // Cursor and model survive a restart.
    let restarted = Pipeline::from_config(&config).unwrap();
    assert_eq!(restarted.analyze_new().unwrap().logs_analyzed, 0);
    assert_eq!(
        restarted.scorer().state(),
        logscale_detect::ScorerState::Fitted
    );
}

#[test]
fn recent_window_does_not_touch_scaling_state() {
    let root = tempfile::tempdir().unwrap();
    write_source(root.path(), "web.csv", &healthy_rows(0, 40));
    write_source(root.path(), "db.csv", DATABASE_SPIKE);

    let pipeline = Pipeline::from_config(&config(root.path())).unwrap();
    let anomalies = pipeline.analyze_recent(10).unwrap();

    assert!(anomalies.iter().any(|a| a.service() == "database"));
    assert!(pipeline.reader().cursor().is_none());
    for status in pipeline.engine().status().unwrap().values() {
        assert_eq!(status.current_instances, 1);
    }
}

#[test]
fn reset_restores_defaults_after_scaling() {
    let root = tempfile::tempdir().unwrap();
    write_source(root.path(), "web.csv", &healthy_rows(0, 40));
    write_source(root.path(), "db.csv", DATABASE_SPIKE);

    let pipeline = Pipeline::from_config(&config(root.path())).unwrap();
    pipeline.analyze_new().unwrap();
    assert_eq!(pipeline.engine().status().unwrap()["database"].current_instances, 2);

    let status = pipeline.engine().reset().unwrap();
    assert_eq!(status, pipeline.engine().status().unwrap());
    assert_eq!(status["database"].current_instances, 1);
    assert_eq!(status["database"].max_instances, 3);
    assert_eq!(status["web-server"].max_instances, 5);
}

#[test]
fn missing_message_column_fails_the_cycle() {
    let root = tempfile::tempdir().unwrap();
    let dir = root.path().join("logs");
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(
        dir.join("bare.csv"),
        "timestamp,level,service\n2024-02-15 08:00:00,INFO,web-server\n2024-02-15 08:00:01,INFO,web-server\n",
    )
    .unwrap();

    let pipeline = Pipeline::from_config(&config(root.path())).unwrap();
    let err = pipeline.analyze_new().unwrap_err();
    assert!(err.to_string().contains("message"));
    // The rows stay unconsumed until the cycle succeeds.
    assert!(pipeline.reader().cursor().is_none());
    for status in pipeline.engine().status().unwrap().values() {
        assert_eq!(status.current_instances, 1);
    }
}
