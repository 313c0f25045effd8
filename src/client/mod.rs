//! Client Module
//!
//! Everything a monitoring client runs: leader discovery, the write path with
//! retries, and the patient monitoring cycle.
//!
//! ## Core Concepts
//! - **ClientDirectory**: caches the leader address and a grow-only replica list.
//!   A heartbeat keeps the cache fresh; fallback discovery probes every replica
//!   concurrently and adopts the first authoritative answer.
//! - **Error classes**: only *unavailable* failures trigger rediscovery and a retry.
//!   Rejections surface immediately.
//! - **PatientMonitor**: scores vitals with an opaque `RiskModel`, keeps GREEN readings
//!   locally, sends AMBER/RED to the leader and queues what could not be delivered.

pub mod config;
pub mod directory;
pub mod error;
pub mod model;
pub mod monitor;

#[cfg(test)]
mod tests;
