//! Membership Module
//!
//! Holds the set of replica addresses known to this node.
//!
//! ## Core Concepts
//! - **Grow-only**: addresses are added by configuration, joins and lease renewals,
//!   and never removed. Merging two views is a set union.
//! - **Identity**: each process has a stable `ReplicaId` from configuration. Peers'
//!   ids are learned from their leader-info answers and drive the lowest-id election rule.

pub mod service;
pub mod types;
