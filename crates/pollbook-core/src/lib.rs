//! Poll Book Core - Fundamental types and primitives
//!
//! This crate defines the core types used throughout the poll book
//! replication protocol:
//! - Identifiers (MachineId, VoterId, ElectionId)
//! - The hybrid logical clock timestamp primitive
//! - The replicated event union and export paging
//! - Voter roll and election configuration models
//! - Error taxonomy

pub mod id;
pub mod time;
pub mod event;
pub mod voter;
pub mod election;
pub mod error;

pub use id::*;
pub use time::*;
pub use event::*;
pub use voter::*;
pub use election::*;
pub use error::*;
