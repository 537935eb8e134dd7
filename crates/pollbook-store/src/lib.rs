//! Poll Book Store - Durable event log and materialized state
//!
//! This crate provides:
//! - The append-only, idempotent event log over SQLite
//! - The materialized per-voter check-in view (latest event wins)
//! - Paginated incremental export for replication
//! - Election / roll configuration with a typed configured handle

pub mod roll;
pub mod store;

pub use roll::*;
pub use store::*;
