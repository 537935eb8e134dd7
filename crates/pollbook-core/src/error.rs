//! Error types for the poll book core

use thiserror::Error;

use crate::{MachineId, VoterId};

/// Central poll book errors.
///
/// Local operations surface these to the caller; replication treats
/// `Peer`/`PeerTimeout` as transient (demote the peer, retry next
/// cycle) and everything else as a real fault.
#[derive(Error, Debug)]
pub enum PollbookError {
    // Configuration errors
    #[error("no election is configured on this machine")]
    Unconfigured,

    #[error("voter not found: {0}")]
    VoterNotFound(VoterId),

    #[error("peer {0} is configured for a different election")]
    WrongElection(MachineId),

    // Log integrity errors
    #[error("corrupt event row ({physical}, {logical}, {machine_id}): {message}")]
    CorruptEvent {
        machine_id: String,
        physical: i64,
        logical: i64,
        message: String,
    },

    // Storage errors
    #[error("storage error: {0}")]
    Storage(String),

    // Peer transport errors
    #[error("peer error: {0}")]
    Peer(String),

    #[error("peer request timed out")]
    PeerTimeout,

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for PollbookError {
    fn from(err: serde_json::Error) -> Self {
        PollbookError::Serialization(err.to_string())
    }
}

/// Result alias for poll book operations
pub type PollbookResult<T> = Result<T, PollbookError>;
