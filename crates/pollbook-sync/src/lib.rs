//! Poll Book Sync - Peer tracking and event replication
//!
//! This crate keeps a precinct's machines converged:
//! - Peer client trait: the wire surface one machine exposes to another
//! - Peer registry: connection state machine for every known machine
//! - Sync engine: per-peer cursors and paged event pulls

pub mod client;
pub mod engine;
pub mod peers;

pub use client::*;
pub use engine::*;
pub use peers::*;
