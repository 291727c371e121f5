//! logscaled: the Logscale daemon and operator CLI.
//!
//! Reads log sources, detects anomalous records, and scales the affected
//! services within their configured limits.
//!
//! # Usage
//!
//! ```text
//! logscaled --config logscale.toml run --interval 30
//! logscaled analyze
//! logscaled recent --minutes 10
//! logscaled status
//! logscaled reset
//! logscaled history --limit 20
//! logscaled mark <KEY> applied
//! ```
//!
//! `status` and `reset` only touch the scaling state file and work while
//! the daemon runs. The other commands open the state database, which a
//! running daemon holds exclusively.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::EnvFilter;

use logscale_autoscale::ScalingEngine;
use logscale_core::LogscaleConfig;
use logscale_pipeline::Pipeline;
use logscale_state::{RemediationEntry, RemediationStatus, StateStore};

const DEFAULT_FILTER: &str = "info,logscaled=debug,logscale=debug";

#[derive(Parser)]
#[command(
    name = "logscaled",
    about = "Logscale: log anomaly detection and autoscaling",
    version,
    propagate_version = true
)]
struct Cli {
    /// Configuration file. A missing file means built-in defaults.
    #[arg(long, global = true, default_value = "logscale.toml")]
    config: PathBuf,

    /// Log output format.
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Command {
    /// Analyze new logs on a fixed interval until Ctrl-C.
    Run {
        /// Seconds between cycles (default: [daemon].interval_secs).
        #[arg(long)]
        interval: Option<u64>,
    },
    /// Run one incremental analysis cycle and print the report.
    Analyze,
    /// Print anomalies among the most recent log entries.
    Recent {
        #[arg(long, default_value = "10")]
        minutes: u64,
    },
    /// Print per-service scaling status.
    Status,
    /// Restore every service to its default instance count.
    Reset,
    /// Print remediation history, newest first.
    History {
        #[arg(long, default_value = "20")]
        limit: usize,
    },
    /// Set the status of a remediation entry (key as printed by `history`).
    Mark {
        key: String,
        #[arg(value_enum)]
        status: MarkStatus,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum MarkStatus {
    Pending,
    Applied,
    Dismissed,
    Failed,
}

impl From<MarkStatus> for RemediationStatus {
    fn from(status: MarkStatus) -> Self {
        match status {
            MarkStatus::Pending => RemediationStatus::Pending,
            MarkStatus::Applied => RemediationStatus::Applied,
            MarkStatus::Dismissed => RemediationStatus::Dismissed,
            MarkStatus::Failed => RemediationStatus::Failed,
        }
    }
}

#[derive(Serialize)]
struct HistoryItem {
    key: String,
    #[serde(flatten)]
    entry: RemediationEntry,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format)?;

    let config = LogscaleConfig::load_or_default(&cli.config)?;

    match cli.command {
        Command::Run { interval } => {
            let interval = interval.unwrap_or(config.daemon.interval_secs);
            run(&config, &cli.config, Duration::from_secs(interval)).await
        }
        Command::Analyze => analyze(&config).await,
        Command::Recent { minutes } => {
            let pipeline = open_pipeline(&config)?;
            print_json(&pipeline.analyze_recent(minutes)?)
        }
        Command::Status => {
            config.validate()?;
            let engine = ScalingEngine::from_config(&config.scaling)?;
            print_json(&engine.status()?)
        }
        Command::Reset => {
            config.validate()?;
            let engine = ScalingEngine::from_config(&config.scaling)?;
            let status = engine.reset()?;
            info!("scaling state reset");
            print_json(&status)
        }
        Command::History { limit } => {
            let store = open_store(&config)?;
            let items: Vec<HistoryItem> = store
                .list_remediations(limit)?
                .into_iter()
                .map(|entry| HistoryItem {
                    key: entry.table_key(),
                    entry,
                })
                .collect();
            print_json(&items)
        }
        Command::Mark { key, status } => {
            let store = open_store(&config)?;
            if !store.mark_remediation(&key, status.into())? {
                anyhow::bail!("no remediation entry with key {key}");
            }
            info!(%key, "remediation status updated");
            Ok(())
        }
    }
}

fn open_store(config: &LogscaleConfig) -> anyhow::Result<StateStore> {
    StateStore::open(&config.state.db_path).with_context(|| {
        format!(
            "cannot open state database {}; stop `logscaled run` first",
            config.state.db_path.display()
        )
    })
}

fn open_pipeline(config: &LogscaleConfig) -> anyhow::Result<Pipeline> {
    Pipeline::from_config(config).with_context(|| {
        format!(
            "cannot start pipeline on {}; stop `logscaled run` first",
            config.state.db_path.display()
        )
    })
}

fn init_tracing(format: LogFormat) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(DEFAULT_FILTER))?;
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
    Ok(())
}

async fn run(config: &LogscaleConfig, config_path: &Path, interval: Duration) -> anyhow::Result<()> {
    info!(config = ?config_path, "logscale daemon starting");

    let pipeline = Arc::new(Pipeline::from_config(config)?);
    info!(
        logs = ?config.logs.dir,
        state_file = ?config.scaling.state_file,
        "pipeline initialized"
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = {
        let pipeline = Arc::clone(&pipeline);
        tokio::spawn(async move { pipeline.run(interval, shutdown_rx).await })
    };

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");
    let _ = shutdown_tx.send(true);
    handle.await?;

    info!("logscale daemon stopped");
    Ok(())
}

async fn analyze(config: &LogscaleConfig) -> anyhow::Result<()> {
    let pipeline = open_pipeline(config)?;
    let report = pipeline.analyze_new()?;
    print_json(&report)?;

    // Scaling is already committed; wait for remediation so it is recorded
    // before the process exits.
    if let Some(handle) = pipeline.dispatch_remediation(report.anomalies) {
        let stored = handle.await?;
        info!(stored, "remediation suggestions recorded");
    }
    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
