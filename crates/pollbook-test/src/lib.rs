//! Poll Book Test Harness - Precinct simulation
//!
//! This crate provides:
//! - A simulated precinct of poll book machines with manual wall
//!   clocks and in-memory stores
//! - A loopback peer client so machines replicate without a network
//! - Multi-machine convergence scenarios

pub mod precinct;

#[cfg(test)]
mod scenarios;

pub use precinct::*;
