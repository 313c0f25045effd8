//! Leader Election Module
//!
//! Decides which replica accepts writes.
//!
//! ## Core Concepts
//! - **Lowest id wins**: when a lease expires, the lowest `ReplicaId` among the members
//!   a node can reach becomes leader. No voting round is needed; under asymmetric
//!   partitions two nodes may both believe they lead.
//! - **Lease**: the leader pushes a renewal every heartbeat; followers that miss
//!   renewals for `lease_timeout` start an election.
//! - **Seeded bootstrap**: exactly one node is configured as initial leader and only
//!   takes the role if nobody else already holds it.
//! - **GetLeaderInfo**: every node answers from its own belief; `"Unknown"` or
//!   `success = false` means "ask someone else".

pub mod elect;
pub mod handlers;
pub mod protocol;
pub mod service;
pub mod types;
