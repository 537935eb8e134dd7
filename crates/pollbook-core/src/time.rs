//! Hybrid logical clock timestamp primitive
//!
//! Every replicated event carries an `HlcTimestamp`: wall-clock
//! milliseconds plus a logical counter plus the originating machine
//! id. The triple gives a deterministic total order across all
//! replicas without requiring their wall clocks to agree, and it is
//! the uniqueness key for the event log - a machine only ever
//! increments its own counter, so two machines cannot mint the same
//! triple.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::MachineId;

/// Hybrid logical clock timestamp.
///
/// Ordered lexicographically by `(physical, logical, machine_id)`;
/// the derived `Ord` relies on the field declaration order. The
/// machine id breaks ties between concurrent events so every replica
/// sorts its log identically.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HlcTimestamp {
    /// Wall-clock milliseconds since the Unix epoch
    pub physical: u64,
    /// Counter distinguishing events within the same millisecond
    pub logical: u32,
    /// Originating machine - the final tie-break
    pub machine_id: MachineId,
}

impl HlcTimestamp {
    pub fn new(physical: u64, logical: u32, machine_id: MachineId) -> Self {
        HlcTimestamp {
            physical,
            logical,
            machine_id,
        }
    }

    /// The sync-cursor origin: sorts before every real event.
    pub fn zero(machine_id: MachineId) -> Self {
        HlcTimestamp {
            physical: 0,
            logical: 0,
            machine_id,
        }
    }
}

impl fmt::Debug for HlcTimestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hlc({}.{}@{})", self.physical, self.logical, self.machine_id)
    }
}

impl fmt::Display for HlcTimestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}@{}", self.physical, self.logical, self.machine_id)
    }
}
