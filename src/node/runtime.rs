use anyhow::{Context, Result};
use axum::{
    Extension, Router,
    routing::{get, post},
};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use super::config::NodeConfig;
use crate::election::handlers::{handle_leader_info, handle_lease};
use crate::election::protocol::{LEADER_INFO_PATH, LEASE_PATH};
use crate::election::service::LeaderElector;
use crate::membership::service::MembershipStore;
use crate::membership::types::ReplicaAddress;
use crate::replication::handlers::handle_replicate;
use crate::replication::manager::ReplicationManager;
use crate::replication::protocol::REPLICATE_PATH;
use crate::reports::handlers::{handle_list_reports, handle_send_report};
use crate::reports::monitor::AlertMonitor;
use crate::reports::protocol::REPORTS_PATH;
use crate::reports::service::ReportService;
use crate::storage::memory::{MemoryReportStore, ReportStore};
use crate::storage::sqlite::SqliteReportStore;
use crate::transfer::handlers::{handle_join, handle_snapshot};
use crate::transfer::protocol::{JOIN_PATH, SNAPSHOT_PATH};
use crate::transfer::service::StateTransferService;
use crate::transport::peer::PeerClient;

/// How long a stopping node waits for open connections before dropping them.
const SERVER_GRACE: Duration = Duration::from_secs(3);

/// Status lines are logged once per this many heartbeats.
const STATUS_EVERY_HEARTBEATS: u32 = 10;

/// Every service of one replica, wired together.
#[derive(Clone)]
pub struct NodeServices {
    pub membership: Arc<MembershipStore>,
    pub store: Arc<dyn ReportStore>,
    pub elector: Arc<LeaderElector>,
    pub replication: Arc<ReplicationManager>,
    pub transfer: Arc<StateTransferService>,
    pub reports: Arc<ReportService>,
}

impl NodeServices {
    pub fn build(config: &NodeConfig, address: ReplicaAddress) -> Result<Self> {
        let peers = PeerClient::new();
        let membership = MembershipStore::new(config.replica_id(), address, config.seeds());
        let store: Arc<dyn ReportStore> = match &config.db_file {
            Some(path) => {
                let store = SqliteReportStore::open(path)?;
                info!(
                    "Opened report database {} ({} report(s))",
                    path.display(),
                    store.len()
                );
                store
            }
            None => MemoryReportStore::new(),
        };

        let elector = LeaderElector::new(
            membership.clone(),
            peers.clone(),
            config.election_timings(),
        );
        let replication = ReplicationManager::new(
            membership.clone(),
            store.clone(),
            peers.clone(),
            config.replication_timeout(),
        );
        let transfer = StateTransferService::new(
            membership.clone(),
            store.clone(),
            peers,
            config.transfer_timings(),
        );
        let reports = ReportService::new(store.clone(), elector.clone(), replication.clone());

        Ok(Self {
            membership,
            store,
            elector,
            replication,
            transfer,
            reports,
        })
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route(LEADER_INFO_PATH, get(handle_leader_info))
            .route(LEASE_PATH, post(handle_lease))
            .route(REPLICATE_PATH, post(handle_replicate))
            .route(JOIN_PATH, post(handle_join))
            .route(SNAPSHOT_PATH, get(handle_snapshot))
            .route(
                REPORTS_PATH,
                post(handle_send_report).get(handle_list_reports),
            )
            .layer(Extension(self.elector.clone()))
            .layer(Extension(self.replication.clone()))
            .layer(Extension(self.transfer.clone()))
            .layer(Extension(self.reports.clone()))
    }
}

/// A running replica. Dropping the handle leaves it running; call `shutdown`.
pub struct NodeHandle {
    address: ReplicaAddress,
    services: NodeServices,
    shutdown: watch::Sender<bool>,
    server: JoinHandle<()>,
    loops: Vec<JoinHandle<()>>,
}

impl NodeHandle {
    pub fn address(&self) -> &ReplicaAddress {
        &self.address
    }

    pub fn services(&self) -> &NodeServices {
        &self.services
    }

    pub fn elector(&self) -> &Arc<LeaderElector> {
        &self.services.elector
    }

    pub fn store(&self) -> &Arc<dyn ReportStore> {
        &self.services.store
    }

    pub fn reports(&self) -> &Arc<ReportService> {
        &self.services.reports
    }

    /// Stops every loop, drops replication queues and closes the listener.
    pub async fn shutdown(self) {
        info!("Shutting down replica at {}", self.address);
        self.services.elector.stop();
        let _ = self.shutdown.send(true);
        self.services.replication.shutdown();

        for handle in self.loops {
            if let Err(e) = handle.await {
                error!("Background task failed: {}", e);
            }
        }

        let mut server = self.server;
        if tokio::time::timeout(SERVER_GRACE, &mut server).await.is_err() {
            warn!("Open connections outlived the grace period, closing them");
            server.abort();
        }
    }
}

/// Binds `server_host:server_port` and starts the replica.
pub async fn start(config: NodeConfig) -> Result<NodeHandle> {
    let bind = format!("{}:{}", config.server_host, config.server_port);
    let listener = TcpListener::bind(&bind)
        .await
        .with_context(|| format!("failed to bind {}", bind))?;
    start_with_listener(config, listener).await
}

/// Starts the replica on an already bound listener.
///
/// Returns once the node is ready. A seeded node leads unless a peer already
/// does, in which case it joins through that peer like any other node. A node
/// that cannot join within `join_attempts` is stopped and an error returned.
pub async fn start_with_listener(config: NodeConfig, listener: TcpListener) -> Result<NodeHandle> {
    let port = listener
        .local_addr()
        .context("listener has no local address")?
        .port();
    let address = ReplicaAddress::new(&config.server_host, port);
    info!(
        "Starting replica {} on {} ({} seed(s))",
        config.server_id,
        address,
        config.replica_addresses.len()
    );

    let services = NodeServices::build(&config, address.clone())?;
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Serving starts before the join so peers get a 503 rather than a refused connection.
    let app = services.router();
    let mut server_shutdown = shutdown_rx.clone();
    let server = tokio::spawn(async move {
        let result = axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = server_shutdown.changed().await;
            })
            .await;
        if let Err(e) = result {
            error!("HTTP server failed: {}", e);
        }
    });

    let must_join =
        !config.initial_leader || services.elector.bootstrap_seeded().await.is_some();
    if must_join && let Err(e) = join_with_retry(&config, &services).await {
        services.elector.stop();
        let _ = shutdown_tx.send(true);
        if let Err(join_error) = server.await {
            error!("HTTP server failed: {}", join_error);
        }
        return Err(e);
    }
    services.elector.mark_ready();

    let alerts = AlertMonitor::new(services.reports.clone(), config.alert_scan_interval());
    let loops = vec![
        services.elector.clone().start(shutdown_rx.clone()),
        alerts.start(shutdown_rx.clone()),
        spawn_status_reporter(
            services.clone(),
            config.election_timings().heartbeat_interval * STATUS_EVERY_HEARTBEATS,
            shutdown_rx,
        ),
    ];

    Ok(NodeHandle {
        address,
        services,
        shutdown: shutdown_tx,
        server,
        loops,
    })
}

/// Up to `join_attempts` tries with a jittered delay in between. Adopts the
/// leader reported during the join.
async fn join_with_retry(config: &NodeConfig, services: &NodeServices) -> Result<()> {
    for attempt in 1..=config.join_attempts {
        match services.transfer.join_cluster().await {
            Ok(summary) => {
                info!(
                    "Joined via {}: {} report(s) received, {} already present",
                    summary.via, summary.stats.inserted, summary.stats.skipped
                );
                if let Some((id, leader)) = summary.leader {
                    services.elector.follow(id, leader);
                }
                return Ok(());
            }
            Err(e) => {
                warn!(
                    "Join attempt {}/{} failed: {:#}",
                    attempt, config.join_attempts, e
                );
                if attempt < config.join_attempts {
                    let jitter = rand::random::<u64>() % 50;
                    tokio::time::sleep(config.join_retry_delay() + Duration::from_millis(jitter))
                        .await;
                }
            }
        }
    }
    anyhow::bail!(
        "could not join the cluster after {} attempt(s)",
        config.join_attempts
    )
}

fn spawn_status_reporter(
    services: NodeServices,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        loop {
            tokio::select! {
                _ = interval.tick() => {}
                _ = shutdown.changed() => break,
            }
            info!(
                "Cluster status: role={} leader={} members={} reports={}",
                services.elector.role(),
                services.elector.leader_address(),
                services.membership.len(),
                services.store.len()
            );
            for (follower, stats) in services.replication.stats() {
                info!(
                    "  - {} delivered={} failed={}",
                    follower, stats.delivered, stats.failed
                );
            }
        }
    })
}
