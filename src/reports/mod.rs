//! Risk Reports Module
//!
//! The client-facing API: SendRiskReport, ListRiskReports and RED alerting.
//!
//! ## Core Concepts
//! - **Leader-only writes**: followers answer writes with a not-leader rejection that
//!   names the leader they believe in.
//! - **Local commit first**: a write succeeds once stored on the leader; replication
//!   follows asynchronously.
//! - **Any-node reads**: every ready node answers ListRiskReports from its own table.
//! - **Alert monitor**: the leader flags each RED report exactly once and replicates
//!   the flag.

pub mod handlers;
pub mod monitor;
pub mod protocol;
pub mod service;
