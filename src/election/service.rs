use chrono::Utc;
use futures::stream::{FuturesUnordered, StreamExt};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::elect::elect_leader;
use super::protocol::{LEADER_INFO_PATH, LEASE_PATH, LeaderInfoResponse, LeaseAck, LeaseRenewal};
use super::types::{ElectionTimings, LeaderLease, Role};
use crate::membership::service::MembershipStore;
use crate::membership::types::{ReplicaAddress, ReplicaId};
use crate::transport::peer::PeerClient;

struct LeaderState {
    role: Role,
    leader_id: Option<ReplicaId>,
    leader_address: ReplicaAddress,
    lease_deadline: Instant,
}

impl LeaderState {
    fn set_role(&mut self, role: Role) {
        if self.role != role {
            info!("Role change: {} -> {}", self.role, role);
            self.role = role;
        }
    }
}

/// Per-node leadership state machine.
///
/// `Follower -> Candidate -> Leader` on lease expiry, `Leader -> Follower` when a
/// lower-id leader is observed, anything `-> Stopped` on shutdown. Lease checks and
/// renewals never fail outward: unreachable peers are logged and retried next tick.
pub struct LeaderElector {
    membership: Arc<MembershipStore>,
    peers: PeerClient,
    timings: ElectionTimings,
    state: RwLock<LeaderState>,
    ready: AtomicBool,
}

impl LeaderElector {
    pub fn new(
        membership: Arc<MembershipStore>,
        peers: PeerClient,
        timings: ElectionTimings,
    ) -> Arc<Self> {
        Arc::new(Self {
            membership,
            peers,
            timings,
            state: RwLock::new(LeaderState {
                role: Role::Follower,
                leader_id: None,
                leader_address: ReplicaAddress::unknown(),
                lease_deadline: Instant::now() + timings.lease_timeout,
            }),
            ready: AtomicBool::new(false),
        })
    }

    pub fn membership(&self) -> &Arc<MembershipStore> {
        &self.membership
    }

    pub fn role(&self) -> Role {
        self.state.read().role
    }

    pub fn is_leader(&self) -> bool {
        self.role() == Role::Leader
    }

    pub fn leader_id(&self) -> Option<ReplicaId> {
        self.state.read().leader_id
    }

    pub fn leader_address(&self) -> ReplicaAddress {
        self.state.read().leader_address.clone()
    }

    /// A node is ready once it has joined (or been seeded as leader).
    /// Until then it refuses to answer leader, join and snapshot queries.
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    pub fn mark_ready(&self) {
        if !self.ready.swap(true, Ordering::AcqRel) {
            info!("Replica {} is ready", self.membership.local_id());
        }
    }

    /// This node's current belief, as served by GetLeaderInfo.
    pub fn leader_info(&self) -> LeaderInfoResponse {
        let (role, leader_address) = {
            let state = self.state.read();
            (state.role, state.leader_address.clone())
        };
        LeaderInfoResponse {
            success: !leader_address.is_placeholder(),
            leader_address,
            replica_addresses: self.membership.addresses(),
            replica_id: Some(self.membership.local_id()),
            role: Some(role),
        }
    }

    // ============================================================
    // TRANSITIONS
    // ============================================================

    pub fn become_leader(&self) {
        let mut state = self.state.write();
        if state.role == Role::Stopped {
            return;
        }
        state.set_role(Role::Leader);
        state.leader_id = Some(self.membership.local_id());
        state.leader_address = self.membership.local_address().clone();
    }

    /// Follows `leader_address` with a fresh lease deadline.
    pub fn follow(&self, leader_id: Option<ReplicaId>, leader_address: ReplicaAddress) {
        let mut state = self.state.write();
        if state.role == Role::Stopped {
            return;
        }
        if state.leader_address != leader_address {
            info!("Following leader {}", leader_address);
        }
        state.set_role(Role::Follower);
        state.leader_id = leader_id;
        state.leader_address = leader_address;
        state.lease_deadline = Instant::now() + self.timings.lease_timeout;
    }

    /// Terminal. A stopped node also stops answering GetLeaderInfo so that it
    /// is not counted as reachable by elections still in flight.
    pub fn stop(&self) {
        self.state.write().set_role(Role::Stopped);
        self.ready.store(false, Ordering::Release);
    }

    // ============================================================
    // BOOTSTRAP AND ELECTION
    // ============================================================

    /// Startup path for the node seeded as initial leader.
    ///
    /// A restarted former leader must not reclaim leadership from whoever took
    /// over, so it only seeds itself if no reachable peer reports a leader.
    /// Returns the sitting leader when there is one; the caller then has to
    /// join through it to catch up on the reports it missed.
    pub async fn bootstrap_seeded(&self) -> Option<(ReplicaId, ReplicaAddress)> {
        let answers = self.probe_members().await;
        match Self::reported_leader(&answers) {
            Some((id, address)) => {
                info!("Replica {} at {} already leads, starting as follower", id, address);
                self.follow(Some(id), address.clone());
                Some((id, address))
            }
            None => {
                info!("Seeding replica {} as initial leader", self.membership.local_id());
                self.become_leader();
                None
            }
        }
    }

    /// Called on every tick while following.
    pub async fn check_lease(&self) {
        let expired_leader = {
            let state = self.state.read();
            (state.role == Role::Follower && Instant::now() >= state.lease_deadline)
                .then(|| state.leader_address.clone())
        };
        if let Some(leader) = expired_leader {
            warn!("Lease from leader {} expired, starting election", leader);
            self.run_election().await;
        }
    }

    /// Follower -> Candidate, probe every member, then apply the lowest-id rule.
    pub async fn run_election(&self) {
        {
            let mut state = self.state.write();
            if state.role != Role::Follower {
                return;
            }
            state.set_role(Role::Candidate);
            state.leader_id = None;
            state.leader_address = ReplicaAddress::unknown();
        }

        let answers = self.probe_members().await;

        // a lease may have arrived while probing
        if self.role() != Role::Candidate {
            return;
        }

        if let Some((id, address)) = Self::reported_leader(&answers) {
            self.follow(Some(id), address);
            return;
        }

        let reachable: HashSet<ReplicaId> =
            answers.iter().filter_map(|(_, info)| info.replica_id).collect();
        let members: BTreeMap<ReplicaId, ReplicaAddress> = self
            .membership
            .peers()
            .into_iter()
            .filter_map(|addr| self.membership.id_of(&addr).map(|id| (id, addr)))
            .collect();

        let local_id = self.membership.local_id();
        let winner = elect_leader(&members, local_id, &reachable);
        info!(
            "Election: {} of {} peers reachable, lowest id {}",
            reachable.len(),
            members.len(),
            winner
        );

        if winner == local_id {
            self.become_leader();
        } else if let Some(address) = members.get(&winner) {
            self.follow(Some(winner), address.clone());
        }
    }

    /// Queries GetLeaderInfo on every peer concurrently. Unreachable peers are
    /// left out of the result; responders have their id bindings recorded.
    async fn probe_members(&self) -> Vec<(ReplicaAddress, LeaderInfoResponse)> {
        let timeout = self.timings.probe_timeout;
        let mut probes: FuturesUnordered<_> = self
            .membership
            .peers()
            .into_iter()
            .map(|addr| {
                let peers = self.peers.clone();
                async move {
                    let result = peers
                        .get::<LeaderInfoResponse>(&addr, LEADER_INFO_PATH, timeout)
                        .await;
                    (addr, result)
                }
            })
            .collect();

        let mut answers = Vec::new();
        while let Some((addr, result)) = probes.next().await {
            match result {
                Ok(reply) => {
                    if let Some(id) = reply.body.replica_id {
                        self.membership.record_id(&addr, id);
                    }
                    self.membership
                        .merge(reply.body.replica_addresses.iter().cloned());
                    answers.push((addr, reply.body));
                }
                Err(e) => debug!("Probe failed: {}", e),
            }
        }
        answers
    }

    /// Lowest-id peer among those claiming to be leader themselves.
    fn reported_leader(
        answers: &[(ReplicaAddress, LeaderInfoResponse)],
    ) -> Option<(ReplicaId, ReplicaAddress)> {
        answers
            .iter()
            .filter(|(_, info)| info.reports_self_leader())
            .filter_map(|(addr, info)| info.replica_id.map(|id| (id, addr.clone())))
            .min_by_key(|(id, _)| *id)
    }

    // ============================================================
    // LEASES
    // ============================================================

    /// Pushes a fresh lease and the membership list to every follower.
    pub async fn renew_lease(&self) {
        if !self.is_leader() {
            return;
        }
        let local_id = self.membership.local_id();
        let renewal = LeaseRenewal {
            lease: LeaderLease {
                leader_id: local_id,
                leader_address: self.membership.local_address().clone(),
                expiry_ms: Utc::now().timestamp_millis()
                    + self.timings.lease_timeout.as_millis() as i64,
            },
            replica_addresses: self.membership.addresses(),
        };

        let timeout = self.timings.probe_timeout;
        let renewal = &renewal;
        let mut pushes: FuturesUnordered<_> = self
            .membership
            .peers()
            .into_iter()
            .map(|addr| {
                let peers = self.peers.clone();
                async move {
                    let result = peers
                        .post::<_, LeaseAck>(&addr, LEASE_PATH, renewal, timeout)
                        .await;
                    (addr, result)
                }
            })
            .collect();

        while let Some((addr, result)) = pushes.next().await {
            match result {
                Ok(reply) => {
                    let ack = reply.body;
                    self.membership.record_id(&addr, ack.replica_id);
                    if !ack.success && ack.role == Role::Leader && ack.replica_id < local_id {
                        info!("Replica {} at {} leads with a lower id, stepping down", ack.replica_id, addr);
                        self.follow(Some(ack.replica_id), addr);
                    }
                }
                Err(e) => debug!("Lease push failed: {}", e),
            }
        }
    }

    /// Handles a lease pushed by some leader. Returns whether it was adopted.
    pub fn observe_lease(&self, renewal: LeaseRenewal) -> LeaseAck {
        let LeaseRenewal {
            lease,
            replica_addresses,
        } = renewal;
        let local_id = self.membership.local_id();

        self.membership.merge(replica_addresses);
        self.membership.join(lease.leader_address.clone());
        self.membership.record_id(&lease.leader_address, lease.leader_id);

        let mut state = self.state.write();
        let accepted = match state.role {
            Role::Stopped => false,
            _ if lease.leader_id == local_id => false,
            Role::Leader => lease.leader_id < local_id,
            Role::Follower | Role::Candidate => {
                let live = state.role == Role::Follower && Instant::now() < state.lease_deadline;
                !matches!(state.leader_id, Some(current) if live && current < lease.leader_id)
            }
        };

        if accepted {
            if state.role == Role::Leader {
                info!("Replica {} holds a lease with a lower id, stepping down", lease.leader_id);
            }
            if state.leader_address != lease.leader_address {
                info!("Following leader {} ({})", lease.leader_address, lease.leader_id);
            }
            state.set_role(Role::Follower);
            state.leader_id = Some(lease.leader_id);
            state.leader_address = lease.leader_address;
            state.lease_deadline = Instant::now() + self.timings.lease_timeout;
        } else {
            debug!("Ignoring lease from replica {}", lease.leader_id);
        }

        LeaseAck {
            success: accepted,
            replica_id: local_id,
            role: state.role,
        }
    }

    // ============================================================
    // BACKGROUND LOOP
    // ============================================================

    /// Spawns the tick loop: renew while leading, check the lease while following.
    pub fn start(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(self.timings.heartbeat_interval);
            loop {
                tokio::select! {
                    _ = interval.tick() => {}
                    _ = shutdown.changed() => {
                        self.stop();
                        break;
                    }
                }

                match self.role() {
                    Role::Leader => self.renew_lease().await,
                    Role::Follower => self.check_lease().await,
                    Role::Candidate => {}
                    Role::Stopped => break,
                }
            }
            info!("Election loop stopped");
        })
    }
}
