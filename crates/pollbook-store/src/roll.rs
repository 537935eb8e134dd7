//! Check-in operations over a configured voter roll
//!
//! `Roll` is a borrowed handle handed out by `Store::configured`, so
//! the operations that mutate voter state simply do not exist until
//! an election package has been loaded.

use chrono::Utc;

use pollbook_core::{
    Election, PollbookEvent, PollbookResult, Voter, VoterCheckIn, VoterId,
    VoterIdentificationMethod, VoterSearchParams, VoterSearchResult, VoterSummary,
    PollbookError,
};

use crate::store::{storage, Store};

/// Search results above this cap are reported as a bare count so the
/// desk worker narrows the prefix instead of scrolling.
pub const MAX_VOTER_SEARCH_RESULTS: usize = 20;

/// The configured voter roll of one machine.
pub struct Roll<'a> {
    store: &'a Store,
    election: Election,
}

impl<'a> Roll<'a> {
    pub(crate) fn new(store: &'a Store, election: Election) -> Self {
        Roll { store, election }
    }

    pub fn election(&self) -> &Election {
        &self.election
    }

    /// Look up one voter with their current check-in state.
    pub async fn voter(&self, voter_id: &VoterId) -> PollbookResult<Voter> {
        let row: Option<(String, Option<String>)> = sqlx::query_as(
            "SELECT v.voter_data, s.check_in_data \
             FROM voters v \
             LEFT JOIN voter_check_in_status s ON s.voter_id = v.voter_id \
             WHERE v.voter_id = ?",
        )
        .bind(voter_id.as_str())
        .fetch_optional(&self.store.pool)
        .await
        .map_err(storage)?;

        let (voter_data, check_in_data) =
            row.ok_or_else(|| PollbookError::VoterNotFound(voter_id.clone()))?;
        decode_voter(&voter_data, check_in_data.as_deref())
    }

    /// Case-insensitive name-prefix search, capped at
    /// [`MAX_VOTER_SEARCH_RESULTS`].
    pub async fn search_voters(
        &self,
        params: &VoterSearchParams,
    ) -> PollbookResult<VoterSearchResult> {
        let total: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM voters \
             WHERE upper(last_name) LIKE upper(?1) || '%' \
               AND upper(first_name) LIKE upper(?2) || '%'",
        )
        .bind(&params.last_name)
        .bind(&params.first_name)
        .fetch_one(&self.store.pool)
        .await
        .map_err(storage)?;
        if total as usize > MAX_VOTER_SEARCH_RESULTS {
            return Ok(VoterSearchResult::TooMany(total as usize));
        }

        let rows: Vec<(String, Option<String>)> = sqlx::query_as(
            "SELECT v.voter_data, s.check_in_data \
             FROM voters v \
             LEFT JOIN voter_check_in_status s ON s.voter_id = v.voter_id \
             WHERE upper(v.last_name) LIKE upper(?1) || '%' \
               AND upper(v.first_name) LIKE upper(?2) || '%' \
             ORDER BY v.last_name ASC, v.first_name ASC",
        )
        .bind(&params.last_name)
        .bind(&params.first_name)
        .fetch_all(&self.store.pool)
        .await
        .map_err(storage)?;

        let voters = rows
            .into_iter()
            .map(|(voter_data, check_in_data)| decode_voter(&voter_data, check_in_data.as_deref()))
            .collect::<PollbookResult<Vec<_>>>()?;
        Ok(VoterSearchResult::Matches(voters))
    }

    /// Listing rows for the whole roll, in name order.
    pub async fn voter_summaries(&self) -> PollbookResult<Vec<VoterSummary>> {
        let rows: Vec<(String, String, String)> = sqlx::query_as(
            "SELECT voter_id, first_name, last_name FROM voters \
             ORDER BY last_name ASC, first_name ASC",
        )
        .fetch_all(&self.store.pool)
        .await
        .map_err(storage)?;
        Ok(rows
            .into_iter()
            .map(|(voter_id, first_name, last_name)| VoterSummary {
                voter_id: VoterId::new(voter_id),
                first_name,
                last_name,
            })
            .collect())
    }

    /// Check a voter in. Appends a `VoterCheckIn` event stamped with
    /// this machine's clock and returns the updated voter plus the
    /// precinct-wide check-in count (all machines, replicated
    /// check-ins included).
    pub async fn record_voter_check_in(
        &self,
        voter_id: &VoterId,
        identification_method: VoterIdentificationMethod,
    ) -> PollbookResult<(Voter, u64)> {
        // Reject unknown ids before anything reaches the log.
        self.voter(voter_id).await?;

        let machine_id = self.store.machine_id().clone();
        let event = PollbookEvent::VoterCheckIn {
            machine_id: machine_id.clone(),
            voter_id: voter_id.clone(),
            timestamp: self.store.clock().tick(),
            check_in: VoterCheckIn {
                identification_method,
                timestamp: Utc::now(),
                machine_id: machine_id.clone(),
            },
        };
        self.store.apply_event(&event).await?;
        tracing::info!(voter = %voter_id, "voter checked in");

        let voter = self.voter(voter_id).await?;
        let count = self.store.get_check_in_count(None).await?;
        Ok((voter, count))
    }

    /// Undo a check-in. The event is appended regardless of current
    /// materialized state so the undo also wins on peers that saw the
    /// original check-in.
    pub async fn record_undo_voter_check_in(&self, voter_id: &VoterId) -> PollbookResult<Voter> {
        self.voter(voter_id).await?;

        let event = PollbookEvent::UndoVoterCheckIn {
            machine_id: self.store.machine_id().clone(),
            voter_id: voter_id.clone(),
            timestamp: self.store.clock().tick(),
        };
        self.store.apply_event(&event).await?;
        tracing::info!(voter = %voter_id, "voter check-in undone");

        self.voter(voter_id).await
    }
}

fn decode_voter(voter_data: &str, check_in_data: Option<&str>) -> PollbookResult<Voter> {
    let mut voter: Voter = serde_json::from_str(voter_data)?;
    voter.check_in = match check_in_data {
        Some(data) => Some(serde_json::from_str(data)?),
        None => None,
    };
    Ok(voter)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use pollbook_clock::HybridLogicalClock;
    use pollbook_core::{ElectionId, MachineId};

    use super::*;

    fn roll_voter(voter_id: &str, first_name: &str, last_name: &str) -> Voter {
        Voter {
            voter_id: VoterId::from(voter_id),
            first_name: first_name.to_owned(),
            middle_name: String::new(),
            last_name: last_name.to_owned(),
            suffix: String::new(),
            street_number: String::new(),
            street_name: String::new(),
            apartment_unit_number: String::new(),
            address_line_2: String::new(),
            postal_city_town: String::new(),
            state: String::new(),
            postal_zip5: String::new(),
            party: String::new(),
            district: String::new(),
            check_in: None,
        }
    }

    async fn configured_store(voters: &[Voter]) -> Store {
        let clock = Arc::new(HybridLogicalClock::new(MachineId::from("pollbook-a")));
        let store = Store::memory(clock).await.unwrap();
        let election = Election {
            id: ElectionId::from("test-election"),
            title: "Test Election".to_owned(),
            date: "2024-01-01".parse().unwrap(),
            precincts: Vec::new(),
        };
        store.set_election_and_voters(&election, voters).await.unwrap();
        store
    }

    #[tokio::test]
    async fn test_search_matches_name_prefixes_case_insensitively() {
        let store = configured_store(&[
            roll_voter("v1", "Alice", "Anderson"),
            roll_voter("v2", "Albert", "Andrews"),
            roll_voter("v3", "Bob", "Baker"),
        ])
        .await;
        let roll = store.configured().await.unwrap();

        let result = roll
            .search_voters(&VoterSearchParams {
                last_name: "and".to_owned(),
                first_name: "al".to_owned(),
            })
            .await
            .unwrap();
        let VoterSearchResult::Matches(voters) = result else {
            panic!("expected matches");
        };
        assert_eq!(voters.len(), 2);
        // Name order: Anderson before Andrews.
        assert_eq!(voters[0].voter_id.as_str(), "v1");
        assert_eq!(voters[1].voter_id.as_str(), "v2");
    }

    #[tokio::test]
    async fn test_search_over_cap_returns_count_only() {
        let voters: Vec<Voter> = (0..MAX_VOTER_SEARCH_RESULTS + 1)
            .map(|i| roll_voter(&format!("v{i}"), "Sam", "Smith"))
            .collect();
        let store = configured_store(&voters).await;
        let roll = store.configured().await.unwrap();

        let result = roll
            .search_voters(&VoterSearchParams {
                last_name: "smi".to_owned(),
                first_name: String::new(),
            })
            .await
            .unwrap();
        assert_eq!(
            result,
            VoterSearchResult::TooMany(MAX_VOTER_SEARCH_RESULTS + 1)
        );
    }

    #[tokio::test]
    async fn test_search_includes_check_in_state() {
        let store = configured_store(&[roll_voter("v1", "Alice", "Anderson")]).await;
        let roll = store.configured().await.unwrap();
        roll.record_voter_check_in(
            &VoterId::from("v1"),
            VoterIdentificationMethod::ChallengedVoterAffidavit,
        )
        .await
        .unwrap();

        let result = roll
            .search_voters(&VoterSearchParams {
                last_name: "anderson".to_owned(),
                first_name: "alice".to_owned(),
            })
            .await
            .unwrap();
        let VoterSearchResult::Matches(voters) = result else {
            panic!("expected matches");
        };
        assert!(voters[0].check_in.is_some());
    }

    #[tokio::test]
    async fn test_check_in_count_includes_replicated_check_ins() {
        let store = configured_store(&[
            roll_voter("v1", "Alice", "Anderson"),
            roll_voter("v2", "Bob", "Baker"),
        ])
        .await;

        // A check-in synced from another machine is already on the
        // books before this desk checks anyone in.
        let their_clock = HybridLogicalClock::new(MachineId::from("pollbook-b"));
        let machine_id = their_clock.machine_id().clone();
        store
            .apply_event(&PollbookEvent::VoterCheckIn {
                machine_id: machine_id.clone(),
                voter_id: VoterId::from("v2"),
                timestamp: their_clock.tick(),
                check_in: VoterCheckIn {
                    identification_method: VoterIdentificationMethod::ChallengedVoterAffidavit,
                    timestamp: Utc::now(),
                    machine_id,
                },
            })
            .await
            .unwrap();

        let roll = store.configured().await.unwrap();
        let (_, count) = roll
            .record_voter_check_in(
                &VoterId::from("v1"),
                VoterIdentificationMethod::ChallengedVoterAffidavit,
            )
            .await
            .unwrap();
        // Precinct-wide total, not just this machine's check-ins.
        assert_eq!(count, 2);
    }

    #[tokio::test]
    async fn test_voter_summaries_cover_whole_roll() {
        let store = configured_store(&[
            roll_voter("v1", "Alice", "Anderson"),
            roll_voter("v2", "Bob", "Baker"),
        ])
        .await;
        let roll = store.configured().await.unwrap();
        let summaries = roll.voter_summaries().await.unwrap();
        assert_eq!(summaries.len(), 2);
        assert_eq!(summaries[0].last_name, "Anderson");
        assert_eq!(summaries[1].last_name, "Baker");
    }
}
