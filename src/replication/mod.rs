//! Replication Module
//!
//! Leader-initiated primary/backup replication of accepted writes.
//!
//! ## Core Concepts
//! - **Off the critical path**: a write is acknowledged once committed locally on the
//!   leader; replication happens afterwards.
//! - **Ordered per follower**: one queue and one delivery task per follower preserve
//!   the leader's commit order.
//! - **Fire-and-forget**: each delivery is one bounded attempt. A lagging follower
//!   catches up through later writes or a rejoin snapshot.
//! - **Idempotent apply**: followers dedupe by operation id and insert by natural key.

pub mod handlers;
pub mod manager;
pub mod protocol;
