//! Poll book event definitions
//!
//! Events are the only replicated mutations in the system. Each one
//! carries the shared envelope (machine id, voter id, HLC timestamp)
//! plus a variant payload, and is immutable once created. Current
//! voter state is derived by replaying events in timestamp order.

use serde::{Deserialize, Serialize};

use crate::{HlcTimestamp, MachineId, VoterCheckIn, VoterId};

/// Maximum number of events returned per `get_new_events` page.
/// Callers repeat with the last returned timestamp until `has_more`
/// is false.
pub const EVENT_PAGE_SIZE: usize = 500;

/// Event type discriminant, stored in the `event_type` log column.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventType {
    VoterCheckIn,
    UndoVoterCheckIn,
}

impl EventType {
    pub fn as_str(self) -> &'static str {
        match self {
            EventType::VoterCheckIn => "VoterCheckIn",
            EventType::UndoVoterCheckIn => "UndoVoterCheckIn",
        }
    }

    /// Parse a log column value. `None` signals a corrupt row.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "VoterCheckIn" => Some(EventType::VoterCheckIn),
            "UndoVoterCheckIn" => Some(EventType::UndoVoterCheckIn),
            _ => None,
        }
    }
}

/// A replicated poll book event.
///
/// The timestamp triple `(physical, logical, machine_id)` is the
/// uniqueness key used for deduplication during replication.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum PollbookEvent {
    #[serde(rename_all = "camelCase")]
    VoterCheckIn {
        machine_id: MachineId,
        voter_id: VoterId,
        timestamp: HlcTimestamp,
        check_in: VoterCheckIn,
    },
    #[serde(rename_all = "camelCase")]
    UndoVoterCheckIn {
        machine_id: MachineId,
        voter_id: VoterId,
        timestamp: HlcTimestamp,
    },
}

impl PollbookEvent {
    pub fn event_type(&self) -> EventType {
        match self {
            PollbookEvent::VoterCheckIn { .. } => EventType::VoterCheckIn,
            PollbookEvent::UndoVoterCheckIn { .. } => EventType::UndoVoterCheckIn,
        }
    }

    pub fn machine_id(&self) -> &MachineId {
        match self {
            PollbookEvent::VoterCheckIn { machine_id, .. } => machine_id,
            PollbookEvent::UndoVoterCheckIn { machine_id, .. } => machine_id,
        }
    }

    pub fn voter_id(&self) -> &VoterId {
        match self {
            PollbookEvent::VoterCheckIn { voter_id, .. } => voter_id,
            PollbookEvent::UndoVoterCheckIn { voter_id, .. } => voter_id,
        }
    }

    pub fn timestamp(&self) -> &HlcTimestamp {
        match self {
            PollbookEvent::VoterCheckIn { timestamp, .. } => timestamp,
            PollbookEvent::UndoVoterCheckIn { timestamp, .. } => timestamp,
        }
    }
}

/// One page of the incremental event export.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventPage {
    pub events: Vec<PollbookEvent>,
    pub has_more: bool,
}

impl EventPage {
    pub fn empty() -> Self {
        EventPage {
            events: Vec::new(),
            has_more: false,
        }
    }
}
