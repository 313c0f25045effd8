use anyhow::{Context, Result};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::protocol::{JOIN_PATH, JoinRequest, JoinResponse, SNAPSHOT_PATH, SnapshotResponse};
use crate::election::protocol::{LEADER_INFO_PATH, LeaderInfoResponse};
use crate::membership::service::MembershipStore;
use crate::membership::types::{ReplicaAddress, ReplicaId};
use crate::storage::memory::ReportStore;
use crate::storage::types::{AlertOutcome, InsertOutcome, Report};
use crate::transport::peer::PeerClient;

/// Counts from applying one snapshot.
#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
pub struct SnapshotStats {
    pub inserted: usize,
    pub skipped: usize,
    pub alerts_flagged: usize,
}

/// Result of a successful join.
#[derive(Debug, Clone)]
pub struct JoinSummary {
    /// Member that accepted the join.
    pub via: ReplicaAddress,
    /// Leader reported during the join, if any member named one.
    pub leader: Option<(Option<ReplicaId>, ReplicaAddress)>,
    pub stats: SnapshotStats,
}

#[derive(Debug, Clone, Copy)]
pub struct TransferTimings {
    pub probe_timeout: Duration,
    /// Bound on join and snapshot calls, which carry the whole table.
    pub transfer_timeout: Duration,
}

/// Bootstraps joining nodes from an existing member's table.
pub struct StateTransferService {
    membership: Arc<MembershipStore>,
    store: Arc<dyn ReportStore>,
    peers: PeerClient,
    timings: TransferTimings,
}

impl StateTransferService {
    pub fn new(
        membership: Arc<MembershipStore>,
        store: Arc<dyn ReportStore>,
        peers: PeerClient,
        timings: TransferTimings,
    ) -> Arc<Self> {
        Arc::new(Self {
            membership,
            store,
            peers,
            timings,
        })
    }

    /// Full scan of the local table, in local row order.
    pub fn snapshot(&self) -> Result<Vec<Report>> {
        self.store.scan().context("Failed to scan report table")
    }

    /// Inserts every report not already present and carries over set alert flags.
    ///
    /// Safe to run while live replication writes to the same table: both paths
    /// insert by natural key.
    pub fn apply_snapshot(&self, reports: Vec<Report>) -> Result<SnapshotStats> {
        let mut stats = SnapshotStats::default();
        for report in reports {
            let (outcome, alert) = self
                .store
                .restore(report)
                .context("Failed to apply snapshot row")?;
            match outcome {
                InsertOutcome::Inserted(_) => stats.inserted += 1,
                InsertOutcome::Existing(_) => stats.skipped += 1,
            }
            if alert == AlertOutcome::Flagged {
                stats.alerts_flagged += 1;
            }
        }
        info!(
            "Applied snapshot: {} inserted, {} skipped, {} alert flag(s) set",
            stats.inserted, stats.skipped, stats.alerts_flagged
        );
        Ok(stats)
    }

    /// Member side of JoinCluster: record the newcomer and hand back our view.
    pub fn accept_join(&self, address: ReplicaAddress) -> JoinResponse {
        if address.is_placeholder() {
            return JoinResponse::failure("Join request carries no address");
        }
        self.membership.join(address.clone());

        let snapshot = match self.snapshot() {
            Ok(reports) => Some(reports),
            Err(e) => {
                warn!("Serving join for {} without snapshot: {:#}", address, e);
                None
            }
        };

        JoinResponse {
            success: true,
            message: format!("Welcome {}", address),
            membership: self.membership.addresses(),
            snapshot,
        }
    }

    /// Joining side: one attempt at joining through any reachable member.
    ///
    /// The reported leader is tried first, then every member that answered a
    /// leader probe. Retrying a failed join is the caller's job.
    pub async fn join_cluster(&self) -> Result<JoinSummary> {
        let peers = self.membership.peers();
        if peers.is_empty() {
            anyhow::bail!("No known members to join through");
        }

        let mut leader: Option<(Option<ReplicaId>, ReplicaAddress)> = None;
        let mut responders = Vec::new();
        for peer in peers {
            match self
                .peers
                .get::<LeaderInfoResponse>(&peer, LEADER_INFO_PATH, self.timings.probe_timeout)
                .await
            {
                Ok(reply) => {
                    let info = reply.body;
                    if let Some(id) = info.replica_id {
                        self.membership.record_id(&peer, id);
                    }
                    if info.is_authoritative() {
                        let reported = info.leader_address.clone();
                        let id = if reported == peer {
                            info.replica_id
                        } else {
                            self.membership.id_of(&reported)
                        };
                        // a leader speaking for itself beats hearsay
                        if leader.is_none() || info.reports_self_leader() {
                            leader = Some((id, reported));
                        }
                    }
                    responders.push(peer);
                }
                Err(e) => debug!("Join probe failed: {}", e),
            }
        }

        let mut targets = Vec::new();
        if let Some((_, address)) = &leader
            && address != self.membership.local_address()
        {
            targets.push(address.clone());
        }
        for peer in responders {
            if !targets.contains(&peer) {
                targets.push(peer);
            }
        }

        for target in targets {
            match self.join_through(&target).await {
                Ok(stats) => {
                    info!("Joined cluster through {}", target);
                    return Ok(JoinSummary {
                        via: target,
                        leader,
                        stats,
                    });
                }
                Err(e) => warn!("Join through {} failed: {:#}", target, e),
            }
        }

        anyhow::bail!("No reachable member accepted the join")
    }

    async fn join_through(&self, target: &ReplicaAddress) -> Result<SnapshotStats> {
        let request = JoinRequest {
            address: self.membership.local_address().clone(),
        };
        let reply = self
            .peers
            .post::<_, JoinResponse>(target, JOIN_PATH, &request, self.timings.transfer_timeout)
            .await?;
        let response = reply.body;
        if !response.success {
            anyhow::bail!("Join refused: {}", response.message);
        }

        self.membership.merge(response.membership);

        let reports = match response.snapshot {
            Some(reports) => reports,
            None => self.pull_snapshot(target).await?,
        };
        self.apply_snapshot(reports)
    }

    /// Fetches a snapshot from one member.
    pub async fn pull_snapshot(&self, source: &ReplicaAddress) -> Result<Vec<Report>> {
        let reply = self
            .peers
            .get::<SnapshotResponse>(source, SNAPSHOT_PATH, self.timings.transfer_timeout)
            .await?;
        if !reply.body.success {
            anyhow::bail!("Snapshot refused by {}", source);
        }
        Ok(reply.body.reports)
    }
}
