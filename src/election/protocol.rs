use serde::{Deserialize, Serialize};

use super::types::{LeaderLease, Role};
use crate::membership::types::{ReplicaAddress, ReplicaId};

pub const LEADER_INFO_PATH: &str = "/leader";
pub const LEASE_PATH: &str = "/internal/lease";

/// Answer to GetLeaderInfo.
///
/// `replica_id` and `role` describe the responder itself and are optional on the
/// wire so that a bare `{success, leader_address, replica_addresses}` still decodes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeaderInfoResponse {
    pub success: bool,
    pub leader_address: ReplicaAddress,
    #[serde(default)]
    pub replica_addresses: Vec<ReplicaAddress>,
    #[serde(default)]
    pub replica_id: Option<ReplicaId>,
    #[serde(default)]
    pub role: Option<Role>,
}

impl LeaderInfoResponse {
    pub fn unavailable() -> Self {
        Self {
            success: false,
            leader_address: ReplicaAddress::unknown(),
            replica_addresses: Vec::new(),
            replica_id: None,
            role: None,
        }
    }

    /// Successful and naming a concrete leader.
    pub fn is_authoritative(&self) -> bool {
        self.success && !self.leader_address.is_placeholder()
    }

    /// The responder claims to be the leader itself.
    pub fn reports_self_leader(&self) -> bool {
        self.role == Some(Role::Leader)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeaseRenewal {
    #[serde(flatten)]
    pub lease: LeaderLease,
    pub replica_addresses: Vec<ReplicaAddress>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeaseAck {
    /// Whether the receiver now follows the sender.
    pub success: bool,
    pub replica_id: ReplicaId,
    pub role: Role,
}
