use anyhow::{Context, Result};
use chrono::DateTime;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{error, info};

use super::protocol::SendRiskReportRequest;
use crate::election::service::LeaderElector;
use crate::membership::types::ReplicaAddress;
use crate::replication::manager::ReplicationManager;
use crate::replication::protocol::ReplicatedOperation;
use crate::storage::memory::ReportStore;
use crate::storage::types::{AlertOutcome, FEATURE_COUNT, Report, ReportData, RiskTier};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// Committed locally. `duplicate` is set when the report was already stored.
    Accepted { report_id: u64, duplicate: bool },
    NotLeader { leader: ReplicaAddress },
    Invalid(String),
    Failed(String),
}

/// Client-facing write and read paths over the local report table.
///
/// All mutations on the leader go through `write_lock`, which also covers the
/// hand-off to replication so followers receive operations in commit order.
pub struct ReportService {
    store: Arc<dyn ReportStore>,
    elector: Arc<LeaderElector>,
    replication: Arc<ReplicationManager>,
    write_lock: Mutex<()>,
}

impl ReportService {
    pub fn new(
        store: Arc<dyn ReportStore>,
        elector: Arc<LeaderElector>,
        replication: Arc<ReplicationManager>,
    ) -> Arc<Self> {
        Arc::new(Self {
            store,
            elector,
            replication,
            write_lock: Mutex::new(()),
        })
    }

    pub fn elector(&self) -> &Arc<LeaderElector> {
        &self.elector
    }

    /// SendRiskReport. Only the leader accepts writes.
    pub fn submit(&self, request: SendRiskReportRequest) -> SubmitOutcome {
        if !self.elector.is_leader() {
            return SubmitOutcome::NotLeader {
                leader: self.elector.leader_address(),
            };
        }

        let data = match parse_report(request) {
            Ok(data) => data,
            Err(e) => return SubmitOutcome::Invalid(format!("Invalid risk report data: {:#}", e)),
        };

        let patient_id = data.patient_id.clone();
        let tier = data.tier;
        let probability = data.probability;

        let _guard = self.write_lock.lock();
        let outcome = match self.store.insert_if_absent(data.clone()) {
            Ok(outcome) => outcome,
            Err(e) => {
                error!("Failed to store risk report for {}: {:#}", patient_id, e);
                return SubmitOutcome::Failed(format!("Error storing risk report: {}", e));
            }
        };
        // a duplicate is shipped again; followers drop it by natural key
        self.replication.replicate(ReplicatedOperation::RiskReport(data));

        info!(
            "Risk report received: patient={}, tier={}, p={:.2}",
            patient_id, tier, probability
        );
        SubmitOutcome::Accepted {
            report_id: outcome.id(),
            duplicate: !outcome.is_inserted(),
        }
    }

    /// ListRiskReports: newest first, rendered for display.
    pub fn list(&self, patient_id: &str, count: i64) -> Result<Vec<String>> {
        if patient_id.trim().is_empty() {
            anyhow::bail!("patient_id must not be empty");
        }
        let limit = usize::try_from(count).ok().filter(|n| *n > 0);
        let reports = self
            .store
            .list_for_patient(patient_id, limit)
            .context("Failed to list risk reports")?;
        info!("Listed {} risk report(s) for patient '{}'", reports.len(), patient_id);
        Ok(reports.iter().map(format_report).collect())
    }

    /// RED reports past `after_id` still waiting for an alert.
    pub fn pending_alerts(&self, after_id: u64) -> Result<Vec<Report>> {
        self.store.pending_alerts(after_id)
    }

    /// Sets the alert flag and replicates the change. Returns `false` if the flag
    /// was already set.
    pub fn flag_alert(&self, report: &Report) -> Result<bool> {
        let _guard = self.write_lock.lock();
        match self.store.mark_alert_sent_by_id(report.id)? {
            AlertOutcome::Flagged => {
                self.replication.replicate(ReplicatedOperation::AlertUpdate {
                    report_id: report.id,
                    key: report.data.natural_key(),
                });
                Ok(true)
            }
            AlertOutcome::AlreadyFlagged => Ok(false),
            AlertOutcome::NotFound => anyhow::bail!("Report {} disappeared", report.id),
        }
    }
}

fn parse_report(request: SendRiskReportRequest) -> Result<ReportData> {
    let count = request.inputs.len();
    let features: [f64; FEATURE_COUNT] = request.inputs.try_into().map_err(|_| {
        anyhow::anyhow!("expected {} feature values, got {}", FEATURE_COUNT, count)
    })?;
    let tier: RiskTier = request.tier.parse()?;

    let data = ReportData {
        patient_id: request.patient_id,
        timestamp: request.timestamp,
        features,
        probability: request.probability,
        tier,
    };
    data.validate()?;
    Ok(data)
}

/// `YYYY-MM-DD HH:MM:SS` in UTC, or the raw number if out of range.
pub fn format_timestamp(timestamp: i64) -> String {
    DateTime::from_timestamp(timestamp, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| timestamp.to_string())
}

pub fn format_report(report: &Report) -> String {
    let data = &report.data;
    let [age, sodium, creatinine, ejection_fraction, _day] = data.features;
    format!(
        "{} - {} (p={:.2}) - Age: {:.1}, Na: {:.1}, Creat: {:.2}, EF: {:.1}%",
        format_timestamp(data.timestamp),
        data.tier,
        data.probability,
        age,
        sodium,
        creatinine,
        ejection_fraction
    )
}
