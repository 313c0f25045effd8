//! State Transfer Module
//!
//! Brings a joining or recovering node up to date.
//!
//! ## Core Concepts
//! - **Join**: the newcomer asks the leader (or any member that answers) to add it to
//!   membership and receives the member's full view plus a snapshot of its table.
//! - **Snapshot**: a full scan of the report table. Applying one inserts by natural key
//!   and only ever sets alert flags, so it can overlap with live replication.
//! - **Single attempt**: a failed join is reported to the caller, which decides when
//!   to retry.

pub mod handlers;
pub mod protocol;
pub mod service;
