//! Node Module
//!
//! Assembles one replica from the cluster services and runs it.
//!
//! ## Core Concepts
//! - **NodeConfig**: JSON configuration with per-field defaults.
//! - **Startup**: serve first, then either bootstrap as the seeded leader or join
//!   through any reachable member; only then mark the node ready and start the
//!   election and alert loops.
//! - **NodeHandle**: owns the shutdown signal. Stopping a node moves its elector to
//!   `Stopped`, drains the loops and closes the listener.

pub mod config;
pub mod runtime;
