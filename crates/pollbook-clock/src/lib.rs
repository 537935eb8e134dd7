//! Poll Book Clock - Hybrid logical clock engine
//!
//! This crate provides:
//! - The `HybridLogicalClock` (tick / update / now)
//! - Pluggable wall-clock sources for testing clock skew

pub mod clock;
pub mod source;

pub use clock::*;
pub use source::*;
