use chrono::Utc;
use parking_lot::Mutex;
use rand::Rng;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::directory::ClientDirectory;
use super::model::{RiskModel, classify};
use crate::reports::protocol::SendRiskReportRequest;
use crate::storage::types::{FEATURE_COUNT, RiskTier};

/// Probability returned when the model cannot score a reading.
const FALLBACK_PROBABILITY: f64 = 0.5;

/// GREEN readings kept on the client.
const LOCAL_HISTORY_LIMIT: usize = 1_000;

/// Source of vital sign readings.
pub trait VitalsSource: Send + Sync {
    /// `[age, serum_sodium, serum_creatinine, ejection_fraction, day]`
    fn sample(&self) -> [f64; FEATURE_COUNT];
}

/// Random readings in clinically plausible ranges.
#[derive(Debug, Default, Clone, Copy)]
pub struct SimulatedVitals;

impl VitalsSource for SimulatedVitals {
    fn sample(&self) -> [f64; FEATURE_COUNT] {
        let mut rng = rand::thread_rng();
        let day = (Utc::now().timestamp() / 86_400) % 365;
        [
            rng.gen_range(50.0..85.0),
            rng.gen_range(125.0..145.0),
            rng.gen_range(0.8..2.5),
            rng.gen_range(20.0..65.0),
            day as f64,
        ]
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Thresholds {
    pub green: f64,
    pub amber: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            green: 0.30,
            amber: 0.60,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Reading {
    pub timestamp: i64,
    pub features: [f64; FEATURE_COUNT],
    pub probability: f64,
    pub tier: RiskTier,
}

/// What one monitoring cycle did.
#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutcome {
    KeptLocal(Reading),
    Sent(Reading),
    Queued(Reading),
}

/// One patient's monitoring loop.
///
/// Every cycle samples vitals, scores them and classifies the result. GREEN stays
/// on the client; AMBER and RED go to the leader. Reports that could not be
/// delivered are queued and retried at the start of the next cycle.
pub struct PatientMonitor {
    patient_id: String,
    directory: Arc<ClientDirectory>,
    model: Arc<dyn RiskModel>,
    vitals: Arc<dyn VitalsSource>,
    thresholds: Thresholds,
    pending: Mutex<VecDeque<SendRiskReportRequest>>,
    local_history: Mutex<VecDeque<Reading>>,
}

impl PatientMonitor {
    pub fn new(
        patient_id: String,
        directory: Arc<ClientDirectory>,
        model: Arc<dyn RiskModel>,
        vitals: Arc<dyn VitalsSource>,
        thresholds: Thresholds,
    ) -> Arc<Self> {
        Arc::new(Self {
            patient_id,
            directory,
            model,
            vitals,
            thresholds,
            pending: Mutex::new(VecDeque::new()),
            local_history: Mutex::new(VecDeque::new()),
        })
    }

    pub fn patient_id(&self) -> &str {
        &self.patient_id
    }

    pub fn pending_len(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn local_history(&self) -> Vec<Reading> {
        self.local_history.lock().iter().cloned().collect()
    }

    /// Samples, scores and classifies one reading.
    pub fn assess(&self) -> Reading {
        let features = self.vitals.sample();
        let probability = match self.model.predict(&features) {
            Ok(p) => p,
            Err(e) => {
                warn!("Model inference failed, assuming medium risk: {:#}", e);
                FALLBACK_PROBABILITY
            }
        };
        Reading {
            timestamp: Utc::now().timestamp(),
            features,
            probability,
            tier: classify(probability, self.thresholds.green, self.thresholds.amber),
        }
    }

    /// One full cycle: retry the backlog, then handle a fresh reading.
    pub async fn run_cycle(&self) -> CycleOutcome {
        self.retry_pending().await;

        let reading = self.assess();
        let [age, sodium, creatinine, ef, day] = reading.features;
        debug!(
            "Vitals: Age={:.1}, Na={:.1}, Creat={:.2}, EF={:.1}%, Day={}, p={:.4}",
            age, sodium, creatinine, ef, day, reading.probability
        );

        match reading.tier {
            RiskTier::Green => {
                info!("GREEN risk (p={:.2}), stored locally", reading.probability);
                let mut history = self.local_history.lock();
                if history.len() >= LOCAL_HISTORY_LIMIT {
                    history.pop_front();
                }
                history.push_back(reading.clone());
                return CycleOutcome::KeptLocal(reading);
            }
            RiskTier::Amber => warn!(
                "AMBER risk detected (p={:.2}): please hydrate and re-measure vitals",
                reading.probability
            ),
            RiskTier::Red => warn!(
                "URGENT: RED risk detected (p={:.2}), immediate attention required",
                reading.probability
            ),
        }

        let request = SendRiskReportRequest {
            patient_id: self.patient_id.clone(),
            timestamp: reading.timestamp,
            inputs: reading.features.to_vec(),
            probability: reading.probability,
            tier: reading.tier.to_string(),
        };

        if self.deliver(&request).await {
            CycleOutcome::Sent(reading)
        } else {
            self.pending.lock().push_back(request);
            CycleOutcome::Queued(reading)
        }
    }

    async fn deliver(&self, request: &SendRiskReportRequest) -> bool {
        match self.directory.send_with_retry(request).await {
            Ok(response) => {
                info!("Risk report sent, alert sent: {}", response.alert_sent);
                true
            }
            Err(e) => {
                warn!("Failed to send risk report: {}", e);
                false
            }
        }
    }

    /// Resends queued reports in order. Returns how many are still queued.
    pub async fn retry_pending(&self) -> usize {
        let backlog: Vec<SendRiskReportRequest> = self.pending.lock().drain(..).collect();
        if backlog.is_empty() {
            return 0;
        }
        info!("Retrying {} queued risk report(s)", backlog.len());

        let mut failed = Vec::new();
        for request in backlog {
            if !self.deliver(&request).await {
                failed.push(request);
            }
        }

        let mut pending = self.pending.lock();
        // failures go back in front of anything queued meanwhile
        for request in failed.into_iter().rev() {
            pending.push_front(request);
        }
        pending.len()
    }

    pub fn start(
        self: Arc<Self>,
        interval: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = shutdown.changed() => break,
                }
                self.run_cycle().await;
            }
            info!("Monitoring for patient {} stopped", self.patient_id);
        })
    }
}
