use futures::stream::{FuturesUnordered, StreamExt};
use parking_lot::RwLock;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::error::ClientError;
use crate::election::protocol::{LEADER_INFO_PATH, LeaderInfoResponse};
use crate::membership::types::{GrowOnlySet, ReplicaAddress};
use crate::reports::protocol::{
    ListRiskReportsQuery, ListRiskReportsResponse, REPORTS_PATH, SendRiskReportRequest,
    SendRiskReportResponse,
};
use crate::transport::peer::PeerClient;

/// What a client believes about the cluster.
#[derive(Debug, Clone)]
pub struct ClientLeaderCache {
    pub leader_address: ReplicaAddress,
    pub replicas: GrowOnlySet<ReplicaAddress>,
}

#[derive(Debug, Clone, Copy)]
pub struct DirectoryTimings {
    /// Bound on calls to the cached leader.
    pub rpc_timeout: Duration,
    /// Bound on each probe during fallback discovery.
    pub fallback_timeout: Duration,
    /// Bound on a whole discovery round, regardless of replica count.
    pub overall_lookup_timeout: Duration,
    pub retry_delay: Duration,
    pub heartbeat_interval: Duration,
    pub max_retries: u32,
}

/// Keeps a client pointed at a working leader.
///
/// The heartbeat refreshes the cache from the cached leader; when that fails,
/// fallback discovery asks every known replica at once and adopts the first
/// authoritative answer.
pub struct ClientDirectory {
    cache: RwLock<ClientLeaderCache>,
    peers: PeerClient,
    timings: DirectoryTimings,
}

impl ClientDirectory {
    pub fn new(
        leader_address: ReplicaAddress,
        replicas: Vec<ReplicaAddress>,
        timings: DirectoryTimings,
    ) -> Arc<Self> {
        Arc::new(Self {
            cache: RwLock::new(ClientLeaderCache {
                leader_address,
                replicas: replicas.into_iter().filter(|a| !a.is_placeholder()).collect(),
            }),
            peers: PeerClient::new(),
            timings,
        })
    }

    pub fn cache(&self) -> ClientLeaderCache {
        self.cache.read().clone()
    }

    pub fn leader_address(&self) -> ReplicaAddress {
        self.cache.read().leader_address.clone()
    }

    pub fn replicas(&self) -> Vec<ReplicaAddress> {
        self.cache.read().replicas.to_vec()
    }

    /// Adopts an authoritative answer: switch leader if it changed and union the
    /// reported replica list into ours.
    fn adopt(&self, info: &LeaderInfoResponse) {
        let mut cache = self.cache.write();
        if cache.leader_address != info.leader_address {
            info!("Leader is now {}", info.leader_address);
            cache.leader_address = info.leader_address.clone();
        }
        let added = cache.replicas.merge(
            info.replica_addresses
                .iter()
                .filter(|a| !a.is_placeholder())
                .cloned(),
        );
        if added > 0 {
            debug!("Replica list grew to {}", cache.replicas.len());
        }
    }

    // ============================================================
    // HEARTBEAT
    // ============================================================

    /// Asks the cached leader for GetLeaderInfo. Falls back to discovery on any
    /// failure. Returns whether the cached leader answered authoritatively.
    pub async fn heartbeat_once(&self) -> bool {
        let leader = self.leader_address();
        match self
            .peers
            .get::<LeaderInfoResponse>(&leader, LEADER_INFO_PATH, self.timings.rpc_timeout)
            .await
        {
            Ok(reply) if reply.body.is_authoritative() => {
                self.adopt(&reply.body);
                true
            }
            Ok(_) => {
                warn!("Heartbeat to {} got no leader, running discovery", leader);
                self.discover().await;
                false
            }
            Err(e) => {
                warn!("Heartbeat failed: {}", e);
                self.discover().await;
                false
            }
        }
    }

    pub fn start_heartbeat(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(self.timings.heartbeat_interval);
            loop {
                tokio::select! {
                    _ = interval.tick() => {}
                    _ = shutdown.changed() => break,
                }
                self.heartbeat_once().await;
            }
            debug!("Heartbeat loop stopped");
        })
    }

    // ============================================================
    // FALLBACK DISCOVERY
    // ============================================================

    /// Probes every cached replica concurrently and adopts the first one that
    /// names a leader. On failure the cached leader is kept and the call waits
    /// `retry_delay` before returning `None`.
    pub async fn discover(&self) -> Option<ReplicaAddress> {
        let replicas = self.replicas();
        let per_probe = self.timings.fallback_timeout;

        let mut probes: FuturesUnordered<_> = replicas
            .into_iter()
            .map(|addr| {
                let peers = self.peers.clone();
                async move {
                    let result = tokio::time::timeout(
                        per_probe,
                        peers.get::<LeaderInfoResponse>(&addr, LEADER_INFO_PATH, per_probe),
                    )
                    .await;
                    (addr, result)
                }
            })
            .collect();

        let first_answer = async {
            while let Some((addr, result)) = probes.next().await {
                match result {
                    Ok(Ok(reply)) if reply.body.is_authoritative() => {
                        return Some((addr, reply.body));
                    }
                    Ok(Ok(_)) => debug!("{} does not know the leader", addr),
                    Ok(Err(e)) => debug!("Discovery probe failed: {}", e),
                    Err(_) => debug!("Discovery probe to {} timed out", addr),
                }
            }
            None
        };

        match tokio::time::timeout(self.timings.overall_lookup_timeout, first_answer).await {
            Ok(Some((via, info))) => {
                info!("Found leader at {} via {}", info.leader_address, via);
                self.adopt(&info);
                Some(info.leader_address)
            }
            Ok(None) | Err(_) => {
                warn!("Leader lookup failed, keeping {}", self.leader_address());
                tokio::time::sleep(self.timings.retry_delay).await;
                None
            }
        }
    }

    // ============================================================
    // CALLS WITH RETRY
    // ============================================================

    /// Runs `call` against the cached leader up to `max_retries` times.
    /// Unavailable errors trigger discovery and a retry; anything else is returned.
    async fn with_retry<T, F, Fut>(&self, mut call: F) -> Result<T, ClientError>
    where
        F: FnMut(ReplicaAddress) -> Fut,
        Fut: Future<Output = Result<T, ClientError>>,
    {
        let attempts = self.timings.max_retries.max(1);
        let mut last = String::new();
        for attempt in 1..=attempts {
            match call(self.leader_address()).await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_unavailable() => {
                    warn!("Attempt {}/{} unavailable: {}", attempt, attempts, e);
                    last = e.to_string();
                    // a failed discovery has already waited out retry_delay
                    if self.discover().await.is_some() && attempt < attempts {
                        tokio::time::sleep(self.timings.retry_delay).await;
                    }
                }
                Err(e) => return Err(e),
            }
        }
        Err(ClientError::Exhausted { attempts, last })
    }

    /// One SendRiskReport attempt against `leader`.
    async fn send_once(
        &self,
        leader: ReplicaAddress,
        request: &SendRiskReportRequest,
    ) -> Result<SendRiskReportResponse, ClientError> {
        let reply = self
            .peers
            .post::<_, SendRiskReportResponse>(&leader, REPORTS_PATH, request, self.timings.rpc_timeout)
            .await?;
        let response = reply.body;
        if response.success {
            return Ok(response);
        }
        if let Some(hint) = &response.leader_address
            && !hint.is_placeholder()
            && *hint != leader
        {
            info!("{} is not leader, switching to {}", leader, hint);
            self.cache.write().leader_address = hint.clone();
        }
        Err(ClientError::Rejected(response.message))
    }

    pub async fn send_with_retry(
        &self,
        request: &SendRiskReportRequest,
    ) -> Result<SendRiskReportResponse, ClientError> {
        self.with_retry(|leader| self.send_once(leader, request)).await
    }

    pub async fn list_reports(
        &self,
        patient_id: &str,
        count: i64,
    ) -> Result<Vec<String>, ClientError> {
        let query = ListRiskReportsQuery {
            patient_id: patient_id.to_string(),
            count,
        };
        self.with_retry(|target| {
            let query = &query;
            async move {
                let reply = self
                    .peers
                    .get_query::<_, ListRiskReportsResponse>(
                        &target,
                        REPORTS_PATH,
                        query,
                        self.timings.rpc_timeout,
                    )
                    .await?;
                if reply.body.success {
                    Ok(reply.body.reports)
                } else {
                    Err(ClientError::Rejected(format!(
                        "listing reports failed ({})",
                        reply.status
                    )))
                }
            }
        })
        .await
    }
}
