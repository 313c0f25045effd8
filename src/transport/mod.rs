//! Transport Module
//!
//! JSON-over-HTTP calls between nodes and from clients to nodes.
//!
//! ## Core Concepts
//! - **Bounded calls**: every request carries its own timeout; a hung peer costs at
//!   most that long.
//! - **Error classes**: unreachable peers, timeouts and `503 Service Unavailable`
//!   answers are all *unavailable*; anything else that arrives is decoded and handed
//!   back with its status so the caller can read the `success` flag.

pub mod error;
pub mod peer;
