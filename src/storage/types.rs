//! Report Data Types
//!
//! Rows of the report table and the payload that flows through replication.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Number of numeric features in a risk report:
/// `[age, serum_sodium, serum_creatinine, ejection_fraction, day]`.
pub const FEATURE_COUNT: usize = 5;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum RiskTier {
    Green,
    Amber,
    Red,
}

impl RiskTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskTier::Green => "GREEN",
            RiskTier::Amber => "AMBER",
            RiskTier::Red => "RED",
        }
    }
}

impl fmt::Display for RiskTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RiskTier {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "GREEN" => Ok(RiskTier::Green),
            "AMBER" => Ok(RiskTier::Amber),
            "RED" => Ok(RiskTier::Red),
            other => Err(anyhow::anyhow!("Unknown risk tier: {}", other)),
        }
    }
}

/// The immutable content of a report, as accepted by the leader.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReportData {
    pub patient_id: String,
    /// Seconds since the Unix epoch, set by the client.
    pub timestamp: i64,
    pub features: [f64; FEATURE_COUNT],
    pub probability: f64,
    pub tier: RiskTier,
}

impl ReportData {
    /// Checks the invariants every stored report satisfies.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.patient_id.trim().is_empty() {
            anyhow::bail!("patient_id must not be empty");
        }
        if let Some(bad) = self.features.iter().find(|f| !f.is_finite()) {
            anyhow::bail!("feature values must be finite, got {}", bad);
        }
        if !(0.0..=1.0).contains(&self.probability) {
            anyhow::bail!("probability {} is outside [0, 1]", self.probability);
        }
        Ok(())
    }

    pub fn natural_key(&self) -> NaturalKey {
        NaturalKey {
            patient_id: self.patient_id.clone(),
            timestamp: self.timestamp,
            features: self.features.map(f64::to_bits),
        }
    }
}

/// Identity of a report independent of any node's local row id.
///
/// Row ids are assigned by each node's own table, so two replicas hold the
/// same report under different ids. Replication and state transfer dedupe by
/// this key instead. Features are compared bit-for-bit.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct NaturalKey {
    pub patient_id: String,
    pub timestamp: i64,
    pub features: [u64; FEATURE_COUNT],
}

/// A persisted row.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Report {
    /// Local auto-increment id; meaningless on other nodes.
    pub id: u64,
    #[serde(flatten)]
    pub data: ReportData,
    /// Flips false -> true once, never back.
    pub alert_sent: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted(u64),
    Existing(u64),
}

impl InsertOutcome {
    pub fn id(&self) -> u64 {
        match self {
            InsertOutcome::Inserted(id) | InsertOutcome::Existing(id) => *id,
        }
    }

    pub fn is_inserted(&self) -> bool {
        matches!(self, InsertOutcome::Inserted(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertOutcome {
    Flagged,
    AlreadyFlagged,
    NotFound,
}
