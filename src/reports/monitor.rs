use anyhow::Result;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use super::service::{ReportService, format_timestamp};

/// Leader-only scan for RED reports that still need an alert.
///
/// Followers keep the loop running but skip every tick, so a node that takes
/// over leadership picks up alerts its predecessor never sent.
pub struct AlertMonitor {
    reports: Arc<ReportService>,
    interval: Duration,
    last_scanned: AtomicU64,
}

impl AlertMonitor {
    pub fn new(reports: Arc<ReportService>, interval: Duration) -> Arc<Self> {
        Arc::new(Self {
            reports,
            interval,
            last_scanned: AtomicU64::new(0),
        })
    }

    /// One pass over new RED reports. Returns how many alerts were raised.
    pub fn scan_once(&self) -> Result<usize> {
        if !self.reports.elector().is_leader() {
            return Ok(0);
        }

        let mut raised = 0;
        for report in self.reports.pending_alerts(self.last_scanned.load(Ordering::Acquire))? {
            self.last_scanned.fetch_max(report.id, Ordering::AcqRel);
            if !self.reports.flag_alert(&report)? {
                continue;
            }
            warn!(
                "[ALERT] RED risk detected for patient {} at {} (p={:.2})",
                report.data.patient_id,
                format_timestamp(report.data.timestamp),
                report.data.probability
            );
            raised += 1;
        }
        Ok(raised)
    }

    pub fn start(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(self.interval);
            loop {
                tokio::select! {
                    _ = interval.tick() => {}
                    _ = shutdown.changed() => break,
                }
                if let Err(e) = self.scan_once() {
                    error!("Error in alert monitoring: {:#}", e);
                }
            }
            info!("Alert monitor stopped");
        })
    }
}
