//! Hybrid logical clock implementation
//!
//! One clock per machine, shared by the store (which stamps local
//! events and merges replicated ones) and anything needing a cursor
//! snapshot. The guarantee that matters: after ingesting a remote
//! event, every subsequent local timestamp orders strictly after it,
//! even if the operator's wall clock reads earlier than the remote
//! event's physical time.

use std::sync::Arc;

use parking_lot::Mutex;

use pollbook_core::{HlcTimestamp, MachineId};

use crate::{SystemTimeSource, TimeSource};

/// Local `(physical, logical)` pair - monotonic for the life of the
/// process, reset only when the election configuration is wiped.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
struct ClockState {
    physical: u64,
    logical: u32,
}

/// Hybrid logical clock for a single machine.
pub struct HybridLogicalClock {
    machine_id: MachineId,
    state: Mutex<ClockState>,
    source: Arc<dyn TimeSource>,
}

impl HybridLogicalClock {
    /// Create a clock reading the real system time.
    pub fn new(machine_id: MachineId) -> Self {
        Self::with_source(machine_id, Arc::new(SystemTimeSource))
    }

    /// Create a clock with an injected wall-clock source.
    pub fn with_source(machine_id: MachineId, source: Arc<dyn TimeSource>) -> Self {
        HybridLogicalClock {
            machine_id,
            state: Mutex::new(ClockState::default()),
            source,
        }
    }

    pub fn machine_id(&self) -> &MachineId {
        &self.machine_id
    }

    /// Advance the clock for a locally originated event.
    ///
    /// MUST be called exactly once before persisting each local
    /// event; the returned timestamp is the event's identity.
    pub fn tick(&self) -> HlcTimestamp {
        let mut state = self.state.lock();
        let wall = self.source.now_millis();
        let physical = wall.max(state.physical);
        let logical = if physical == state.physical {
            state.logical + 1
        } else {
            0
        };
        *state = ClockState { physical, logical };
        HlcTimestamp::new(physical, logical, self.machine_id.clone())
    }

    /// Merge a remote timestamp into local state without generating
    /// an event - called when ingesting a replicated event. The
    /// remote event keeps its own stamp; only the local state moves.
    pub fn update(&self, remote: &HlcTimestamp) -> HlcTimestamp {
        let mut state = self.state.lock();
        let wall = self.source.now_millis();
        let physical = wall.max(state.physical).max(remote.physical);

        let logical = if physical == state.physical && physical == remote.physical {
            state.logical.max(remote.logical) + 1
        } else if physical == state.physical {
            state.logical + 1
        } else if physical == remote.physical {
            remote.logical + 1
        } else {
            0
        };

        *state = ClockState { physical, logical };
        HlcTimestamp::new(physical, logical, self.machine_id.clone())
    }

    /// Read the current state without advancing it (sync cursors).
    pub fn now(&self) -> HlcTimestamp {
        let state = self.state.lock();
        HlcTimestamp::new(state.physical, state.logical, self.machine_id.clone())
    }

    /// Forget all clock state. Only valid when the election
    /// configuration (and with it the event log) is wiped.
    pub fn reset(&self) {
        *self.state.lock() = ClockState::default();
    }
}
