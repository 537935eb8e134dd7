//! Voter roll model
//!
//! A voter has an immutable identity loaded from the election package
//! and a single mutable, derived attribute: the current check-in.
//! The roll itself is never part of the event log; only check-in and
//! undo transitions are replicated.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{MachineId, VoterId};

/// How the voter proved their identity at the check-in desk.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum VoterIdentificationMethod {
    PhotoId { state: String },
    ChallengedVoterAffidavit,
    PersonalRecognizance { recognizer: Recognizer },
}

/// Official vouching for a personally-recognized voter.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Recognizer {
    Supervisor,
    Moderator,
    CityClerk,
}

/// The derived check-in attribute of a voter.
///
/// `timestamp` is the operator-visible wall time; ordering decisions
/// never use it - they use the event's HLC timestamp.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoterCheckIn {
    pub identification_method: VoterIdentificationMethod,
    pub timestamp: DateTime<Utc>,
    pub machine_id: MachineId,
}

/// A voter roll entry.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Voter {
    pub voter_id: VoterId,
    pub first_name: String,
    pub middle_name: String,
    pub last_name: String,
    pub suffix: String,
    pub street_number: String,
    pub street_name: String,
    pub apartment_unit_number: String,
    pub address_line_2: String,
    pub postal_city_town: String,
    pub state: String,
    pub postal_zip5: String,
    pub party: String,
    pub district: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub check_in: Option<VoterCheckIn>,
}

/// Name-prefix parameters for the check-in desk search screen.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoterSearchParams {
    pub last_name: String,
    pub first_name: String,
}

/// Search outcome: full matches under the result cap, otherwise just
/// how many matched so the UI can ask for a narrower prefix.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum VoterSearchResult {
    Matches(Vec<Voter>),
    TooMany(usize),
}

/// Minimal listing row for roll overview screens.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoterSummary {
    pub voter_id: VoterId,
    pub first_name: String,
    pub last_name: String,
}
