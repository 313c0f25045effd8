use anyhow::Context;
use clap::Parser;
use risk_cluster::node::config::NodeConfig;
use risk_cluster::node::runtime;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "risk-node")]
#[command(about = "Replica of the patient risk telemetry cluster")]
struct Args {
    /// JSON configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Replica id, overrides `server_id`
    #[arg(long)]
    id: Option<u64>,

    #[arg(long)]
    host: Option<String>,

    #[arg(long)]
    port: Option<u16>,

    /// Seed replica address, repeatable
    #[arg(long = "seed")]
    seeds: Vec<String>,

    /// Start as the initial leader
    #[arg(long)]
    initial_leader: bool,

    /// SQLite file for the report table, overrides `db_file`
    #[arg(long)]
    db_file: Option<PathBuf>,

    /// Overrides `log_level`; `RUST_LOG` wins over both
    #[arg(long)]
    log_level: Option<String>,
}

fn load_config(args: &Args) -> anyhow::Result<NodeConfig> {
    let mut config = match (&args.config, args.id) {
        (Some(path), _) => NodeConfig::from_file(path)?,
        (None, Some(id)) => NodeConfig::new(id, "127.0.0.1", 50051),
        (None, None) => anyhow::bail!("either --config or --id is required"),
    };

    if let Some(id) = args.id {
        config.server_id = id;
    }
    if let Some(host) = &args.host {
        config.server_host = host.clone();
    }
    if let Some(port) = args.port {
        config.server_port = port;
    }
    if !args.seeds.is_empty() {
        config.replica_addresses = args.seeds.clone();
    }
    if args.initial_leader {
        config.initial_leader = true;
    }
    if let Some(path) = &args.db_file {
        config.db_file = Some(path.clone());
    }
    if let Some(level) = &args.log_level {
        config.log_level = level.clone();
    }

    config.normalize();
    config.validate()?;
    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = load_config(&args)?;

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    tracing::info!(
        "Replica {} on {}:{} (initial leader: {})",
        config.server_id,
        config.server_host,
        config.server_port,
        config.initial_leader
    );
    if config.replica_addresses.is_empty() {
        tracing::info!("No seed replicas configured");
    } else {
        tracing::info!("Seed replicas: {:?}", config.replica_addresses);
    }

    let node = runtime::start(config).await?;
    tracing::info!("Replica ready at {}. Press Ctrl+C to shutdown", node.address());

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    node.shutdown().await;

    Ok(())
}
