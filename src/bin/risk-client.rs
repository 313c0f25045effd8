use anyhow::Context;
use clap::Parser;
use risk_cluster::client::config::ClientConfig;
use risk_cluster::client::directory::ClientDirectory;
use risk_cluster::client::model::{LogisticModel, RiskModel};
use risk_cluster::client::monitor::{PatientMonitor, SimulatedVitals};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "risk-client")]
#[command(about = "Patient monitor that reports risk to the cluster leader")]
struct Args {
    /// JSON configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Patient to monitor, overrides `patient_id`
    #[arg(short, long)]
    patient: Option<String>,

    /// Print the stored history for the patient and exit
    #[arg(long)]
    list: bool,

    /// How many reports `--list` prints; 0 for all
    #[arg(long, default_value = "10")]
    count: i64,

    #[arg(long)]
    log_level: Option<String>,
}

fn load_model(config: &ClientConfig) -> anyhow::Result<Arc<dyn RiskModel>> {
    let model = match &config.model_path {
        Some(path) => LogisticModel::from_file(path)?,
        None => {
            tracing::info!("No model file configured, using built-in coefficients");
            LogisticModel::default()
        }
    };
    Ok(Arc::new(model))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => ClientConfig::from_file(path)?,
        None => ClientConfig::default(),
    };
    if let Some(level) = &args.log_level {
        config.log_level = level.clone();
    }

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let patient_id = args
        .patient
        .clone()
        .or_else(|| config.patient_id.clone())
        .unwrap_or_else(|| format!("patient_{:04}", rand::random::<u16>() % 10_000));

    let directory = ClientDirectory::new(
        config.leader_address(),
        config.replicas(),
        config.directory_timings(),
    );

    if args.list {
        let lines = directory
            .list_reports(&patient_id, args.count)
            .await
            .context("failed to list risk reports")?;
        println!("Risk history for {} ({} report(s)):", patient_id, lines.len());
        for line in lines {
            println!("  {}", line);
        }
        return Ok(());
    }

    tracing::info!(
        "Monitoring {} via {} every {:?}",
        patient_id,
        directory.leader_address(),
        config.monitoring_interval()
    );

    let monitor = PatientMonitor::new(
        patient_id,
        directory.clone(),
        load_model(&config)?,
        Arc::new(SimulatedVitals),
        config.thresholds(),
    );

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let heartbeat = directory.clone().start_heartbeat(shutdown_rx.clone());
    let monitoring = monitor
        .clone()
        .start(config.monitoring_interval(), shutdown_rx);

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    tracing::info!("Shutting down client");
    let _ = shutdown_tx.send(true);
    let _ = tokio::join!(heartbeat, monitoring);

    if monitor.pending_len() > 0 {
        tracing::warn!("{} risk report(s) were never delivered", monitor.pending_len());
    }
    Ok(())
}
