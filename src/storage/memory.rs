use anyhow::Result;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use super::types::{AlertOutcome, InsertOutcome, NaturalKey, Report, ReportData, RiskTier};

/// The local report table.
///
/// Every mutation is insert-if-absent by natural key or the one-way alert
/// flip, so replication, state transfer and client retries can overlap on the
/// same table without extra coordination.
pub trait ReportStore: Send + Sync {
    /// Inserts a new row unless one with the same natural key exists.
    fn insert_if_absent(&self, data: ReportData) -> Result<InsertOutcome>;

    /// Inserts a row copied from another replica, keeping its alert flag.
    /// An existing row only ever gains the flag.
    fn restore(&self, report: Report) -> Result<(InsertOutcome, AlertOutcome)>;

    /// Flags the row with `key`. An unknown key is remembered and the flag is
    /// applied when that report arrives, so an alert replicated ahead of the
    /// snapshot carrying its row is not lost.
    fn mark_alert_sent(&self, key: &NaturalKey) -> Result<AlertOutcome>;

    fn mark_alert_sent_by_id(&self, id: u64) -> Result<AlertOutcome>;

    fn get(&self, id: u64) -> Option<Report>;

    /// Reports for one patient, newest timestamp first, at most `limit` if set.
    fn list_for_patient(&self, patient_id: &str, limit: Option<usize>) -> Result<Vec<Report>>;

    /// Full table scan in row id order.
    fn scan(&self) -> Result<Vec<Report>>;

    /// RED reports with `id > after_id` whose alert has not been sent.
    fn pending_alerts(&self, after_id: u64) -> Result<Vec<Report>>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Default)]
struct Table {
    rows: BTreeMap<u64, Report>,
    by_key: HashMap<NaturalKey, u64>,
    early_alerts: HashSet<NaturalKey>,
    next_id: u64,
}

impl Table {
    fn insert(&mut self, data: ReportData, alert_sent: bool) -> InsertOutcome {
        let key = data.natural_key();
        if let Some(id) = self.by_key.get(&key) {
            return InsertOutcome::Existing(*id);
        }
        let alert_sent = self.early_alerts.remove(&key) || alert_sent;
        self.next_id += 1;
        let id = self.next_id;
        self.rows.insert(
            id,
            Report {
                id,
                data,
                alert_sent,
            },
        );
        self.by_key.insert(key, id);
        InsertOutcome::Inserted(id)
    }

    fn flag(&mut self, id: u64) -> AlertOutcome {
        match self.rows.get_mut(&id) {
            Some(row) if row.alert_sent => AlertOutcome::AlreadyFlagged,
            Some(row) => {
                row.alert_sent = true;
                AlertOutcome::Flagged
            }
            None => AlertOutcome::NotFound,
        }
    }
}

/// In-memory report table guarded by a single reader/writer lock.
///
/// Writers are serialized by the lock; readers proceed concurrently.
#[derive(Default)]
pub struct MemoryReportStore {
    table: RwLock<Table>,
}

impl MemoryReportStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

impl ReportStore for MemoryReportStore {
    fn insert_if_absent(&self, data: ReportData) -> Result<InsertOutcome> {
        Ok(self.table.write().insert(data, false))
    }

    fn restore(&self, report: Report) -> Result<(InsertOutcome, AlertOutcome)> {
        let mut table = self.table.write();
        let outcome = table.insert(report.data, report.alert_sent);
        let alert = match outcome {
            InsertOutcome::Existing(id) if report.alert_sent => table.flag(id),
            InsertOutcome::Inserted(id) if table.rows.get(&id).is_some_and(|r| r.alert_sent) => {
                AlertOutcome::Flagged
            }
            _ => AlertOutcome::AlreadyFlagged,
        };
        Ok((outcome, alert))
    }

    fn mark_alert_sent(&self, key: &NaturalKey) -> Result<AlertOutcome> {
        let mut table = self.table.write();
        let Some(id) = table.by_key.get(key).copied() else {
            table.early_alerts.insert(key.clone());
            return Ok(AlertOutcome::NotFound);
        };
        Ok(table.flag(id))
    }

    fn mark_alert_sent_by_id(&self, id: u64) -> Result<AlertOutcome> {
        Ok(self.table.write().flag(id))
    }

    fn get(&self, id: u64) -> Option<Report> {
        self.table.read().rows.get(&id).cloned()
    }

    fn list_for_patient(&self, patient_id: &str, limit: Option<usize>) -> Result<Vec<Report>> {
        let mut reports: Vec<Report> = self
            .table
            .read()
            .rows
            .values()
            .filter(|row| row.data.patient_id == patient_id)
            .cloned()
            .collect();

        // newest first; equal timestamps keep the later insert first
        reports.sort_by(|a, b| {
            b.data
                .timestamp
                .cmp(&a.data.timestamp)
                .then_with(|| b.id.cmp(&a.id))
        });
        if let Some(limit) = limit {
            reports.truncate(limit);
        }
        Ok(reports)
    }

    fn scan(&self) -> Result<Vec<Report>> {
        Ok(self.table.read().rows.values().cloned().collect())
    }

    fn pending_alerts(&self, after_id: u64) -> Result<Vec<Report>> {
        Ok(self
            .table
            .read()
            .rows
            .range(after_id.saturating_add(1)..)
            .map(|(_, row)| row)
            .filter(|row| row.data.tier == RiskTier::Red && !row.alert_sent)
            .cloned()
            .collect())
    }

    fn len(&self) -> usize {
        self.table.read().rows.len()
    }
}
