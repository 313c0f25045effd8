//! Replica configuration.
//!
//! One JSON file per node. Every timing field has a default so a minimal file
//! only names the node and its peers.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::election::types::ElectionTimings;
use crate::membership::types::{ReplicaAddress, ReplicaId};
use crate::transfer::service::TransferTimings;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    pub server_id: u64,

    #[serde(default = "default_server_host")]
    pub server_host: String,

    /// `0` binds an ephemeral port.
    #[serde(default)]
    pub server_port: u16,

    /// Seed membership. May include this node's own address.
    #[serde(default)]
    pub replica_addresses: Vec<String>,

    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,

    #[serde(default = "default_lease_timeout_ms")]
    pub lease_timeout_ms: u64,

    #[serde(default = "default_probe_timeout_ms")]
    pub probe_timeout_ms: u64,

    #[serde(default = "default_replication_timeout_ms")]
    pub replication_timeout_ms: u64,

    #[serde(default = "default_alert_scan_interval_ms")]
    pub alert_scan_interval_ms: u64,

    #[serde(default = "default_join_attempts")]
    pub join_attempts: u32,

    #[serde(default = "default_join_retry_delay_ms")]
    pub join_retry_delay_ms: u64,

    #[serde(default = "default_transfer_timeout_ms")]
    pub transfer_timeout_ms: u64,

    /// Exactly one node per cluster should set this.
    #[serde(default)]
    pub initial_leader: bool,

    /// SQLite file holding the report table. Unset keeps it in memory.
    #[serde(default)]
    pub db_file: Option<PathBuf>,

    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_server_host() -> String {
    "127.0.0.1".to_string()
}

fn default_heartbeat_interval_ms() -> u64 {
    2_000
}

fn default_lease_timeout_ms() -> u64 {
    5_000
}

fn default_probe_timeout_ms() -> u64 {
    1_000
}

fn default_replication_timeout_ms() -> u64 {
    2_000
}

fn default_alert_scan_interval_ms() -> u64 {
    1_000
}

fn default_join_attempts() -> u32 {
    5
}

fn default_join_retry_delay_ms() -> u64 {
    1_000
}

fn default_transfer_timeout_ms() -> u64 {
    10_000
}

fn default_log_level() -> String {
    "info".to_string()
}

impl NodeConfig {
    /// A config with every default, for `server_id` on `host:port`.
    pub fn new(server_id: u64, server_host: &str, server_port: u16) -> Self {
        Self {
            server_id,
            server_host: server_host.to_string(),
            server_port,
            replica_addresses: Vec::new(),
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            lease_timeout_ms: default_lease_timeout_ms(),
            probe_timeout_ms: default_probe_timeout_ms(),
            replication_timeout_ms: default_replication_timeout_ms(),
            alert_scan_interval_ms: default_alert_scan_interval_ms(),
            join_attempts: default_join_attempts(),
            join_retry_delay_ms: default_join_retry_delay_ms(),
            transfer_timeout_ms: default_transfer_timeout_ms(),
            initial_leader: false,
            db_file: None,
            log_level: default_log_level(),
        }
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read node config: {}", path.display()))?;
        Self::from_json(&content)
    }

    pub fn from_json(content: &str) -> Result<Self> {
        let mut config: NodeConfig =
            serde_json::from_str(content).context("failed to parse node config")?;
        config.normalize();
        config.validate()?;
        Ok(config)
    }

    pub fn normalize(&mut self) {
        if self.server_host == "localhost" {
            self.server_host = "127.0.0.1".to_string();
        }
        for address in &mut self.replica_addresses {
            if let Some(port) = address.strip_prefix("localhost:") {
                *address = format!("127.0.0.1:{}", port);
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.server_host.trim().is_empty() {
            anyhow::bail!("server_host must not be empty");
        }
        if self.heartbeat_interval_ms == 0 {
            anyhow::bail!("heartbeat_interval_ms must be > 0");
        }
        if self.lease_timeout_ms <= self.heartbeat_interval_ms {
            anyhow::bail!(
                "lease_timeout_ms ({}) must exceed heartbeat_interval_ms ({})",
                self.lease_timeout_ms,
                self.heartbeat_interval_ms
            );
        }
        if self.probe_timeout_ms == 0 || self.replication_timeout_ms == 0 {
            anyhow::bail!("probe and replication timeouts must be > 0");
        }
        if self.alert_scan_interval_ms == 0 {
            anyhow::bail!("alert_scan_interval_ms must be > 0");
        }
        if self.join_attempts == 0 {
            anyhow::bail!("join_attempts must be >= 1");
        }
        Ok(())
    }

    pub fn replica_id(&self) -> ReplicaId {
        ReplicaId(self.server_id)
    }

    pub fn seeds(&self) -> Vec<ReplicaAddress> {
        self.replica_addresses
            .iter()
            .map(|a| ReplicaAddress::from(a.as_str()))
            .filter(|a| !a.is_placeholder())
            .collect()
    }

    pub fn election_timings(&self) -> ElectionTimings {
        ElectionTimings {
            heartbeat_interval: Duration::from_millis(self.heartbeat_interval_ms),
            lease_timeout: Duration::from_millis(self.lease_timeout_ms),
            probe_timeout: Duration::from_millis(self.probe_timeout_ms),
        }
    }

    pub fn transfer_timings(&self) -> TransferTimings {
        TransferTimings {
            probe_timeout: Duration::from_millis(self.probe_timeout_ms),
            transfer_timeout: Duration::from_millis(self.transfer_timeout_ms),
        }
    }

    pub fn replication_timeout(&self) -> Duration {
        Duration::from_millis(self.replication_timeout_ms)
    }

    pub fn alert_scan_interval(&self) -> Duration {
        Duration::from_millis(self.alert_scan_interval_ms)
    }

    pub fn join_retry_delay(&self) -> Duration {
        Duration::from_millis(self.join_retry_delay_ms)
    }
}
