//! Client configuration.
//!
//! Loaded from JSON with per-field defaults, then normalised and validated.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::directory::DirectoryTimings;
use super::monitor::Thresholds;
use crate::membership::types::ReplicaAddress;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Initial leader guess.
    #[serde(default = "default_connect_host")]
    pub client_connect_host: String,

    #[serde(default = "default_connect_port")]
    pub client_connect_port: u16,

    /// Fallback discovery targets; grows at runtime, never persisted back.
    #[serde(default)]
    pub replica_addresses: Vec<String>,

    #[serde(default = "default_rpc_timeout_ms")]
    pub rpc_timeout_ms: u64,

    #[serde(default = "default_fallback_timeout_ms")]
    pub fallback_timeout_ms: u64,

    #[serde(default = "default_overall_leader_lookup_timeout_ms")]
    pub overall_leader_lookup_timeout_ms: u64,

    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,

    #[serde(default = "default_client_heartbeat_interval_ms")]
    pub client_heartbeat_interval_ms: u64,

    #[serde(default = "default_monitoring_interval_ms")]
    pub monitoring_interval_ms: u64,

    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Probabilities below this are GREEN.
    #[serde(default = "default_green_threshold")]
    pub green_threshold: f64,

    /// Probabilities below this (and not GREEN) are AMBER; the rest RED.
    #[serde(default = "default_amber_threshold")]
    pub amber_threshold: f64,

    #[serde(default)]
    pub patient_id: Option<String>,

    /// JSON logistic model coefficients. Built-in coefficients when unset.
    #[serde(default)]
    pub model_path: Option<PathBuf>,

    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_connect_host() -> String {
    "127.0.0.1".to_string()
}

fn default_connect_port() -> u16 {
    50051
}

fn default_rpc_timeout_ms() -> u64 {
    10_000
}

fn default_fallback_timeout_ms() -> u64 {
    1_000
}

fn default_overall_leader_lookup_timeout_ms() -> u64 {
    5_000
}

fn default_retry_delay_ms() -> u64 {
    1_000
}

fn default_client_heartbeat_interval_ms() -> u64 {
    5_000
}

fn default_monitoring_interval_ms() -> u64 {
    30_000
}

fn default_max_retries() -> u32 {
    3
}

fn default_green_threshold() -> f64 {
    0.30
}

fn default_amber_threshold() -> f64 {
    0.60
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            client_connect_host: default_connect_host(),
            client_connect_port: default_connect_port(),
            replica_addresses: Vec::new(),
            rpc_timeout_ms: default_rpc_timeout_ms(),
            fallback_timeout_ms: default_fallback_timeout_ms(),
            overall_leader_lookup_timeout_ms: default_overall_leader_lookup_timeout_ms(),
            retry_delay_ms: default_retry_delay_ms(),
            client_heartbeat_interval_ms: default_client_heartbeat_interval_ms(),
            monitoring_interval_ms: default_monitoring_interval_ms(),
            max_retries: default_max_retries(),
            green_threshold: default_green_threshold(),
            amber_threshold: default_amber_threshold(),
            patient_id: None,
            model_path: None,
            log_level: default_log_level(),
        }
    }
}

/// Rewrites `localhost` to `127.0.0.1` so lookups never resolve to IPv6 first.
fn force_ipv4(address: &str) -> String {
    match address.strip_prefix("localhost") {
        Some(rest) if rest.is_empty() || rest.starts_with(':') => format!("127.0.0.1{}", rest),
        _ => address.to_string(),
    }
}

impl ClientConfig {
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read client config: {}", path.display()))?;
        Self::from_json(&content)
    }

    pub fn from_json(content: &str) -> Result<Self> {
        let mut config: ClientConfig =
            serde_json::from_str(content).context("failed to parse client config")?;
        config.normalize();
        config.validate()?;
        Ok(config)
    }

    pub fn normalize(&mut self) {
        self.client_connect_host = force_ipv4(&self.client_connect_host);
        self.replica_addresses = self.replica_addresses.iter().map(|a| force_ipv4(a)).collect();
    }

    pub fn validate(&self) -> Result<()> {
        if self.client_connect_host.trim().is_empty() {
            anyhow::bail!("client_connect_host must not be empty");
        }
        if self.client_connect_port == 0 {
            anyhow::bail!("client_connect_port must be > 0");
        }
        if self.fallback_timeout_ms == 0 || self.rpc_timeout_ms == 0 {
            anyhow::bail!("rpc and fallback timeouts must be > 0");
        }
        if self.overall_leader_lookup_timeout_ms <= self.fallback_timeout_ms {
            anyhow::bail!(
                "overall_leader_lookup_timeout_ms ({}) must exceed fallback_timeout_ms ({})",
                self.overall_leader_lookup_timeout_ms,
                self.fallback_timeout_ms
            );
        }
        if self.max_retries == 0 {
            anyhow::bail!("max_retries must be >= 1");
        }
        if self.client_heartbeat_interval_ms == 0 || self.monitoring_interval_ms == 0 {
            anyhow::bail!("client_heartbeat_interval_ms and monitoring_interval_ms must be > 0");
        }
        if !(0.0 < self.green_threshold
            && self.green_threshold < self.amber_threshold
            && self.amber_threshold <= 1.0)
        {
            anyhow::bail!(
                "thresholds must satisfy 0 < green ({}) < amber ({}) <= 1",
                self.green_threshold,
                self.amber_threshold
            );
        }
        Ok(())
    }

    pub fn leader_address(&self) -> ReplicaAddress {
        ReplicaAddress::new(&self.client_connect_host, self.client_connect_port)
    }

    pub fn replicas(&self) -> Vec<ReplicaAddress> {
        self.replica_addresses
            .iter()
            .map(|a| ReplicaAddress::from(a.as_str()))
            .filter(|a| !a.is_placeholder())
            .collect()
    }

    pub fn directory_timings(&self) -> DirectoryTimings {
        DirectoryTimings {
            rpc_timeout: Duration::from_millis(self.rpc_timeout_ms),
            fallback_timeout: Duration::from_millis(self.fallback_timeout_ms),
            overall_lookup_timeout: Duration::from_millis(self.overall_leader_lookup_timeout_ms),
            retry_delay: Duration::from_millis(self.retry_delay_ms),
            heartbeat_interval: Duration::from_millis(self.client_heartbeat_interval_ms),
            max_retries: self.max_retries,
        }
    }

    pub fn monitoring_interval(&self) -> Duration {
        Duration::from_millis(self.monitoring_interval_ms)
    }

    pub fn thresholds(&self) -> Thresholds {
        Thresholds {
            green: self.green_threshold,
            amber: self.amber_threshold,
        }
    }
}
