//! Identity types for the poll book protocol
//!
//! Machines, voters, and elections are identified by opaque strings
//! assigned outside the core: machine ids by device provisioning,
//! voter and election ids by the election package.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Machine identity - one per poll book device at a polling place.
///
/// Machine ids double as the final tie-break in timestamp ordering,
/// so their derived string ordering is load-bearing: every replica
/// must agree on it.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MachineId(pub String);

impl MachineId {
    pub fn new(id: impl Into<String>) -> Self {
        MachineId(id.into())
    }

    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for MachineId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Machine({})", self.0)
    }
}

impl fmt::Display for MachineId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for MachineId {
    fn from(id: &str) -> Self {
        MachineId(id.to_owned())
    }
}

/// Voter identity - unique within one election package.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VoterId(pub String);

impl VoterId {
    pub fn new(id: impl Into<String>) -> Self {
        VoterId(id.into())
    }

    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for VoterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Voter({})", self.0)
    }
}

impl fmt::Display for VoterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for VoterId {
    fn from(id: &str) -> Self {
        VoterId(id.to_owned())
    }
}

/// Election identity from the election package.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ElectionId(pub String);

impl ElectionId {
    pub fn new(id: impl Into<String>) -> Self {
        ElectionId(id.into())
    }

    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ElectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Election({})", self.0)
    }
}

impl fmt::Display for ElectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ElectionId {
    fn from(id: &str) -> Self {
        ElectionId(id.to_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_machine_id_ordering_is_string_ordering() {
        let a = MachineId::from("pollbook-a");
        let b = MachineId::from("pollbook-b");
        assert!(a < b);
        assert_eq!(a, MachineId::new("pollbook-a"));
    }

    #[test]
    fn test_id_serde_transparent() {
        let id = VoterId::from("voter-17");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"voter-17\"");
        let back: VoterId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }
}
