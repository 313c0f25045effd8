use serde::{Deserialize, Serialize};

use crate::membership::types::ReplicaAddress;
use crate::storage::types::Report;

pub const JOIN_PATH: &str = "/internal/join";
pub const SNAPSHOT_PATH: &str = "/internal/snapshot";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JoinRequest {
    pub address: ReplicaAddress,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JoinResponse {
    pub success: bool,
    pub message: String,
    #[serde(default)]
    pub membership: Vec<ReplicaAddress>,
    /// Absent when the member could not scan its table; the joiner then pulls
    /// a snapshot separately.
    #[serde(default)]
    pub snapshot: Option<Vec<Report>>,
}

impl JoinResponse {
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            membership: Vec::new(),
            snapshot: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotResponse {
    pub success: bool,
    #[serde(default)]
    pub reports: Vec<Report>,
}
