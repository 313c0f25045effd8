//! Report Storage Module
//!
//! The local report table every node reads from and writes to.
//!
//! ## Core Concepts
//! - **Natural key**: `patient_id + timestamp + features` identifies a report across
//!   replicas; local row ids are assigned per node.
//! - **Insert-if-absent**: every write path (client writes, replication, snapshots)
//!   inserts by natural key, so re-applying the same report is a no-op.
//! - **Monotonic alert flag**: `alert_sent` only ever flips `false -> true`.
//! - **Early alerts**: an alert flag for a report not yet stored is remembered and
//!   applied when the row arrives.
//! - **Backends**: `MemoryReportStore` serializes mutations behind one lock while
//!   readers proceed concurrently; `SqliteReportStore` keeps the table in a file.

pub mod memory;
pub mod sqlite;
pub mod types;

#[cfg(test)]
mod tests;
