use serde::{Deserialize, Serialize};

use crate::membership::types::ReplicaAddress;

pub const REPORTS_PATH: &str = "/reports";

/// SendRiskReport input as clients send it.
///
/// `inputs` and `tier` are checked by the report service, not by deserialization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendRiskReportRequest {
    pub patient_id: String,
    pub timestamp: i64,
    /// `[age, serum_sodium, serum_creatinine, ejection_fraction, day]`
    pub inputs: Vec<f64>,
    pub probability: f64,
    pub tier: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendRiskReportResponse {
    pub success: bool,
    pub message: String,
    /// Always `false` at write time; alerts are raised asynchronously.
    pub alert_sent: bool,
    /// Set on not-leader rejections when this node knows who leads.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub leader_address: Option<ReplicaAddress>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListRiskReportsQuery {
    #[serde(default)]
    pub patient_id: String,
    /// `<= 0` means all reports.
    #[serde(default)]
    pub count: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListRiskReportsResponse {
    pub success: bool,
    #[serde(default)]
    pub reports: Vec<String>,
}
