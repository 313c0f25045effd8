use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::storage::types::{NaturalKey, ReportData};

pub const REPLICATE_PATH: &str = "/internal/replicate";

/// A write accepted by the leader, shipped to every follower.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ReplicatedOperation {
    RiskReport(ReportData),
    /// `report_id` is the leader's local row id and only used for logging;
    /// followers locate the row by `key`.
    AlertUpdate { report_id: u64, key: NaturalKey },
}

impl ReplicatedOperation {
    pub fn kind(&self) -> &'static str {
        match self {
            ReplicatedOperation::RiskReport(_) => "risk_report",
            ReplicatedOperation::AlertUpdate { .. } => "alert_update",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplicateRequest {
    pub op_id: Uuid,
    pub op: ReplicatedOperation,
}

impl ReplicateRequest {
    pub fn new(op: ReplicatedOperation) -> Self {
        Self {
            op_id: Uuid::new_v4(),
            op,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplicateResponse {
    pub success: bool,
    pub message: String,
}
