use anyhow::Result;
use dashmap::DashMap;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::protocol::{REPLICATE_PATH, ReplicateRequest, ReplicateResponse, ReplicatedOperation};
use crate::membership::service::MembershipStore;
use crate::membership::types::ReplicaAddress;
use crate::storage::memory::ReportStore;
use crate::storage::types::{AlertOutcome, InsertOutcome};
use crate::transport::peer::PeerClient;

const MAX_TRACKED_OPS: usize = 10_000;

/// Delivery counters for one follower.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct FollowerStats {
    pub delivered: u64,
    pub failed: u64,
    pub last_error: Option<String>,
}

/// What applying a replicated operation did to the local table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Applied {
    Inserted,
    /// Seen before, either by `op_id` or by natural key.
    Duplicate,
    AlertFlagged,
    AlertAlreadyFlagged,
    /// Alert for a report this node does not hold yet.
    AlertMissingReport,
    Rejected(String),
}

impl Applied {
    pub fn describe(&self) -> String {
        match self {
            Applied::Inserted => "Report stored".to_string(),
            Applied::Duplicate => "Already applied".to_string(),
            Applied::AlertFlagged => "Alert flag set".to_string(),
            Applied::AlertAlreadyFlagged => "Alert flag already set".to_string(),
            Applied::AlertMissingReport => "Report not present yet, alert kept for it".to_string(),
            Applied::Rejected(reason) => reason.clone(),
        }
    }
}

/// Leader-side fan-out and follower-side apply of replicated operations.
///
/// Every follower has its own ordered queue drained by one delivery task, so a
/// follower sees operations in the leader's commit order while a slow follower
/// never holds up the others. Delivery is a single bounded attempt; failures
/// are counted and dropped.
pub struct ReplicationManager {
    membership: Arc<MembershipStore>,
    store: Arc<dyn ReportStore>,
    peers: PeerClient,
    timeout: Duration,
    queues: DashMap<ReplicaAddress, mpsc::UnboundedSender<ReplicateRequest>>,
    stats: Arc<DashMap<ReplicaAddress, FollowerStats>>,
    processed_ops: DashMap<Uuid, ()>,
}

impl ReplicationManager {
    pub fn new(
        membership: Arc<MembershipStore>,
        store: Arc<dyn ReportStore>,
        peers: PeerClient,
        timeout: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            membership,
            store,
            peers,
            timeout,
            queues: DashMap::new(),
            stats: Arc::new(DashMap::new()),
            processed_ops: DashMap::new(),
        })
    }

    // ============================================================
    // LEADER SIDE
    // ============================================================

    /// Enqueues `op` for every known follower. Returns how many were targeted.
    ///
    /// Never blocks; callers that need a global commit order must call this
    /// while still holding their write lock.
    pub fn replicate(&self, op: ReplicatedOperation) -> usize {
        let request = ReplicateRequest::new(op);
        let followers = self.membership.peers();
        debug!(
            "Replicating {} {} to {} follower(s)",
            request.op.kind(),
            request.op_id,
            followers.len()
        );

        let mut targeted = 0;
        for follower in followers {
            let sender = self
                .queues
                .entry(follower.clone())
                .or_insert_with(|| self.spawn_delivery(follower.clone()))
                .clone();

            if sender.send(request.clone()).is_err() {
                // the delivery task is gone; start a fresh one next time
                warn!("Replication queue for {} was closed", follower);
                self.queues.remove(&follower);
                continue;
            }
            targeted += 1;
        }
        targeted
    }

    fn spawn_delivery(&self, follower: ReplicaAddress) -> mpsc::UnboundedSender<ReplicateRequest> {
        let (tx, mut rx) = mpsc::unbounded_channel::<ReplicateRequest>();
        let peers = self.peers.clone();
        let stats = self.stats.clone();
        let timeout = self.timeout;
        info!("Opening replication queue to {}", follower);

        tokio::spawn(async move {
            while let Some(request) = rx.recv().await {
                let outcome = peers
                    .post::<_, ReplicateResponse>(&follower, REPLICATE_PATH, &request, timeout)
                    .await;

                let mut entry = stats.entry(follower.clone()).or_default();
                match outcome {
                    Ok(reply) if reply.body.success => {
                        entry.delivered += 1;
                        debug!("Delivered {} to {}", request.op_id, follower);
                    }
                    Ok(reply) => {
                        entry.failed += 1;
                        warn!(
                            "Follower {} refused {}: {}",
                            follower, request.op_id, reply.body.message
                        );
                        entry.last_error = Some(reply.body.message);
                    }
                    Err(e) => {
                        entry.failed += 1;
                        warn!("Replication of {} to {} failed: {}", request.op_id, follower, e);
                        entry.last_error = Some(e.to_string());
                    }
                }
            }
            debug!("Replication queue to {} closed", follower);
        });

        tx
    }

    /// Per-follower delivery counters.
    pub fn stats(&self) -> BTreeMap<ReplicaAddress, FollowerStats> {
        self.stats
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }

    /// Closes every queue. Delivery tasks finish what is already queued and exit.
    pub fn shutdown(&self) {
        self.queues.clear();
    }

    // ============================================================
    // FOLLOWER SIDE
    // ============================================================

    fn should_process(&self, op_id: Uuid) -> bool {
        if self.processed_ops.contains_key(&op_id) {
            return false;
        }
        if self.processed_ops.len() > MAX_TRACKED_OPS {
            self.processed_ops.clear();
        }
        self.processed_ops.insert(op_id, ());
        true
    }

    /// Applies an operation received from the leader.
    ///
    /// Re-delivery of the same operation, or of a report that arrived first
    /// through a snapshot, is a no-op.
    pub fn apply(&self, request: ReplicateRequest) -> Result<Applied> {
        if !self.should_process(request.op_id) {
            return Ok(Applied::Duplicate);
        }

        let result = self.apply_op(request.op);
        if result.is_err() {
            // let a later redelivery try again
            self.processed_ops.remove(&request.op_id);
        }
        result
    }

    fn apply_op(&self, op: ReplicatedOperation) -> Result<Applied> {
        match op {
            ReplicatedOperation::RiskReport(data) => {
                if let Err(e) = data.validate() {
                    return Ok(Applied::Rejected(e.to_string()));
                }
                Ok(match self.store.insert_if_absent(data)? {
                    InsertOutcome::Inserted(id) => {
                        debug!("Applied replicated report as row {}", id);
                        Applied::Inserted
                    }
                    InsertOutcome::Existing(_) => Applied::Duplicate,
                })
            }
            ReplicatedOperation::AlertUpdate { report_id, key } => {
                Ok(match self.store.mark_alert_sent(&key)? {
                    AlertOutcome::Flagged => Applied::AlertFlagged,
                    AlertOutcome::AlreadyFlagged => Applied::AlertAlreadyFlagged,
                    AlertOutcome::NotFound => {
                        info!(
                            "Alert update for leader row {} ({}) arrived before its report, deferring",
                            report_id, key.patient_id
                        );
                        Applied::AlertMissingReport
                    }
                })
            }
        }
    }
}
