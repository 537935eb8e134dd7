//! Election configuration model
//!
//! Loaded once per election from an external package source and held
//! read-only by the core. Machines configured for different elections
//! refuse to replicate with each other.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::{ElectionId, MachineId};

/// A precinct served by this polling place.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Precinct {
    pub id: String,
    pub name: String,
}

/// Election configuration from the election package.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Election {
    pub id: ElectionId,
    pub title: String,
    pub date: NaiveDate,
    pub precincts: Vec<Precinct>,
}

/// Identity snapshot a machine reports to peers - used by discovery
/// to confirm who answered, and to detect election mismatches before
/// any replication happens.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MachineInfo {
    pub machine_id: MachineId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub configured_election_id: Option<ElectionId>,
}
