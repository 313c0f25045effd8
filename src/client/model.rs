//! Risk scoring.
//!
//! The scoring model is opaque to the rest of the client: it maps the five
//! features to a probability. A standardised logistic model is provided.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::storage::types::{FEATURE_COUNT, RiskTier};

pub trait RiskModel: Send + Sync {
    /// Probability of an adverse event for
    /// `[age, serum_sodium, serum_creatinine, ejection_fraction, day]`.
    fn predict(&self, features: &[f64; FEATURE_COUNT]) -> Result<f64>;
}

/// `sigmoid(bias + Σ weight_i * (x_i - mean_i) / scale_i)`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LogisticModel {
    pub weights: [f64; FEATURE_COUNT],
    pub bias: f64,
    pub means: [f64; FEATURE_COUNT],
    pub scales: [f64; FEATURE_COUNT],
}

impl Default for LogisticModel {
    /// Built-in coefficients, used when no model file is configured.
    fn default() -> Self {
        Self {
            weights: [0.62, -0.31, 0.68, -0.88, -0.6],
            bias: -0.95,
            means: [60.8, 136.6, 1.39, 38.1, 130.3],
            scales: [11.9, 4.4, 1.03, 11.8, 77.6],
        }
    }
}

impl LogisticModel {
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read model file: {}", path.display()))?;
        let model: LogisticModel =
            serde_json::from_str(&content).context("failed to parse model coefficients")?;
        model.validate()?;
        Ok(model)
    }

    pub fn validate(&self) -> Result<()> {
        if self.scales.iter().any(|s| !s.is_finite() || *s == 0.0) {
            anyhow::bail!("model scales must be finite and non-zero");
        }
        let finite = self
            .weights
            .iter()
            .chain(self.means.iter())
            .chain(std::iter::once(&self.bias))
            .all(|v| v.is_finite());
        if !finite {
            anyhow::bail!("model coefficients must be finite");
        }
        Ok(())
    }
}

impl RiskModel for LogisticModel {
    fn predict(&self, features: &[f64; FEATURE_COUNT]) -> Result<f64> {
        if let Some(bad) = features.iter().find(|f| !f.is_finite()) {
            anyhow::bail!("cannot score non-finite feature {}", bad);
        }
        let z = features
            .iter()
            .zip(self.weights.iter())
            .zip(self.means.iter().zip(self.scales.iter()))
            .map(|((x, w), (mean, scale))| w * (x - mean) / scale)
            .sum::<f64>()
            + self.bias;
        Ok(1.0 / (1.0 + (-z).exp()))
    }
}

/// GREEN below `green`, AMBER below `amber`, RED otherwise.
pub fn classify(probability: f64, green: f64, amber: f64) -> RiskTier {
    if probability < green {
        RiskTier::Green
    } else if probability < amber {
        RiskTier::Amber
    } else {
        RiskTier::Red
    }
}
