use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::membership::types::{ReplicaAddress, ReplicaId};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Follower,
    Candidate,
    Leader,
    /// Terminal; entered on shutdown.
    Stopped,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Role::Follower => "Follower",
            Role::Candidate => "Candidate",
            Role::Leader => "Leader",
            Role::Stopped => "Stopped",
        };
        f.write_str(name)
    }
}

/// Lease pushed by the leader on every renewal.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LeaderLease {
    pub leader_id: ReplicaId,
    pub leader_address: ReplicaAddress,
    /// Wall-clock expiry in Unix milliseconds, as seen by the leader.
    pub expiry_ms: i64,
}

#[derive(Debug, Clone, Copy)]
pub struct ElectionTimings {
    /// Lease renewal period on the leader and lease check period on followers.
    pub heartbeat_interval: Duration,
    /// How long a follower waits without a renewal before re-electing.
    pub lease_timeout: Duration,
    /// Bound on each GetLeaderInfo probe and lease push.
    pub probe_timeout: Duration,
}

impl Default for ElectionTimings {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_millis(2000),
            lease_timeout: Duration::from_millis(5000),
            probe_timeout: Duration::from_millis(1000),
        }
    }
}
