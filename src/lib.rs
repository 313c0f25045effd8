//! Replicated Risk Telemetry Cluster Library
//!
//! Coordination layer for a small cluster of replicas that store patient risk
//! reports, plus the client side that finds and talks to the current leader.
//! Both binaries (`risk-node` and `risk-client`) are thin shells over this crate.
//!
//! ## Architecture Modules
//! - **`membership`**: the grow-only set of known replica addresses and the
//!   address to id bindings learned from peers.
//! - **`election`**: lease-based leadership. When a lease expires the lowest
//!   reachable replica id takes over.
//! - **`replication`**: primary/backup fan-out of committed writes with one
//!   ordered queue per follower, and idempotent apply on the follower side.
//! - **`transfer`**: join handling and full-table snapshots for new replicas.
//! - **`reports`**: the client-facing write and read paths and the leader-only
//!   alert monitor.
//! - **`storage`**: the report table, in memory or in a SQLite file, and its
//!   natural-key deduplication.
//! - **`transport`**: JSON over HTTP between replicas and from clients.
//! - **`node`**: configuration and startup of one replica.
//! - **`client`**: leader discovery, retries and the patient monitoring loop.

pub mod client;
pub mod election;
pub mod membership;
pub mod node;
pub mod replication;
pub mod reports;
pub mod storage;
pub mod transfer;
pub mod transport;
