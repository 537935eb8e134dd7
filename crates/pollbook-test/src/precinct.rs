//! Simulated precinct
//!
//! Machines with manual wall clocks and in-memory stores, wired
//! together with loopback peer clients. Sync passes run on demand so
//! scenarios control exactly who talks to whom, and when.

use std::sync::Arc;

use async_trait::async_trait;

use pollbook_clock::{HybridLogicalClock, ManualTimeSource, TimeSource};
use pollbook_core::{
    Election, ElectionId, EventPage, HlcTimestamp, MachineId, MachineInfo, PollbookResult, Voter,
    VoterId, VoterIdentificationMethod,
};
use pollbook_store::Store;
use pollbook_sync::{PeerClient, PeerRegistry, SyncEngine};

/// Loopback peer client: calls another machine's store directly.
pub struct LocalPeerClient {
    store: Arc<Store>,
}

impl LocalPeerClient {
    pub fn new(store: Arc<Store>) -> Self {
        LocalPeerClient { store }
    }
}

#[async_trait]
impl PeerClient for LocalPeerClient {
    async fn machine_info(&self) -> PollbookResult<MachineInfo> {
        Ok(MachineInfo {
            machine_id: self.store.machine_id().clone(),
            configured_election_id: self.store.election().await?.map(|e| e.id),
        })
    }

    async fn get_new_events(&self, since: &HlcTimestamp) -> PollbookResult<EventPage> {
        self.store.get_new_events(since).await
    }
}

/// One poll book machine in the simulated precinct.
pub struct SimulatedMachine {
    store: Arc<Store>,
    time: Arc<ManualTimeSource>,
    registry: Arc<PeerRegistry>,
    engine: Arc<SyncEngine>,
}

impl SimulatedMachine {
    /// Create a machine whose wall clock starts at `start_millis`.
    pub async fn new(name: &str, start_millis: u64) -> PollbookResult<Self> {
        let time = Arc::new(ManualTimeSource::new(start_millis));
        let clock = Arc::new(HybridLogicalClock::with_source(
            MachineId::from(name),
            Arc::clone(&time) as Arc<dyn TimeSource>,
        ));
        let store = Arc::new(Store::memory(clock).await?);
        let registry = Arc::new(PeerRegistry::new());
        let engine = Arc::new(SyncEngine::new(Arc::clone(&store), Arc::clone(&registry)));
        Ok(SimulatedMachine {
            store,
            time,
            registry,
            engine,
        })
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    pub fn machine_id(&self) -> &MachineId {
        self.store.machine_id()
    }

    /// Set this machine's wall clock, in epoch milliseconds.
    pub fn set_wall_clock(&self, millis: u64) {
        self.time.set(millis);
    }

    pub fn advance_wall_clock(&self, millis: u64) {
        self.time.advance(millis);
    }

    /// Make `peer` reachable from this machine. One-directional:
    /// this machine pulls from `peer` on its next sync pass.
    pub fn connect(&self, peer: &SimulatedMachine) {
        self.registry.mark_connected(
            peer.machine_id(),
            &format!("{}.local", peer.machine_id().as_str()),
            Arc::new(LocalPeerClient::new(Arc::clone(&peer.store))),
        );
    }

    /// Sever the link to `peer`.
    pub fn disconnect(&self, peer: &SimulatedMachine) {
        self.registry.mark_lost(peer.machine_id());
    }

    /// Pull from every reachable peer. Returns events applied.
    pub async fn sync(&self) -> usize {
        self.engine.sync_all().await
    }

    pub async fn configure(&self, election: &Election, voters: &[Voter]) -> PollbookResult<()> {
        self.store.set_election_and_voters(election, voters).await
    }

    pub async fn check_in(&self, voter_id: &str) -> PollbookResult<()> {
        let roll = self.store.configured().await?;
        roll.record_voter_check_in(
            &VoterId::from(voter_id),
            VoterIdentificationMethod::ChallengedVoterAffidavit,
        )
        .await?;
        Ok(())
    }

    pub async fn undo_check_in(&self, voter_id: &str) -> PollbookResult<()> {
        let roll = self.store.configured().await?;
        roll.record_undo_voter_check_in(&VoterId::from(voter_id))
            .await?;
        Ok(())
    }

    pub async fn check_in_count(&self) -> PollbookResult<u64> {
        self.store.get_check_in_count(None).await
    }

    pub async fn is_checked_in(&self, voter_id: &str) -> PollbookResult<bool> {
        let roll = self.store.configured().await?;
        let voter = roll.voter(&VoterId::from(voter_id)).await?;
        Ok(voter.check_in.is_some())
    }
}

/// A precinct of fully meshed machines sharing one voter roll.
pub struct SimulatedPrecinct {
    machines: Vec<SimulatedMachine>,
}

impl SimulatedPrecinct {
    /// Build `names.len()` machines, configure them all with the
    /// same election and roll, and mesh them together.
    pub async fn new(
        names: &[&str],
        start_millis: u64,
        voters: &[Voter],
    ) -> PollbookResult<Self> {
        let election = standard_election();
        let mut machines = Vec::with_capacity(names.len());
        for name in names {
            let machine = SimulatedMachine::new(name, start_millis).await?;
            machine.configure(&election, voters).await?;
            machines.push(machine);
        }
        let precinct = SimulatedPrecinct { machines };
        precinct.mesh();
        Ok(precinct)
    }

    pub fn machine(&self, index: usize) -> &SimulatedMachine {
        &self.machines[index]
    }

    pub fn machines(&self) -> &[SimulatedMachine] {
        &self.machines
    }

    /// (Re)connect every machine to every other.
    pub fn mesh(&self) {
        for a in &self.machines {
            for b in &self.machines {
                if a.machine_id() != b.machine_id() {
                    a.connect(b);
                }
            }
        }
    }

    /// One sync pass on every machine, in order.
    pub async fn sync_round(&self) -> usize {
        let mut applied = 0;
        for machine in &self.machines {
            applied += machine.sync().await;
        }
        applied
    }

    /// Sync rounds until a full round moves nothing.
    pub async fn sync_until_quiet(&self) {
        while self.sync_round().await > 0 {}
    }

    /// True when every machine reports identical check-in state.
    pub async fn converged(&self) -> PollbookResult<bool> {
        let mut counts = Vec::new();
        let mut log_lens = Vec::new();
        for machine in &self.machines {
            counts.push(machine.check_in_count().await?);
            log_lens.push(machine.store().event_log_len().await?);
        }
        Ok(counts.windows(2).all(|w| w[0] == w[1]) && log_lens.windows(2).all(|w| w[0] == w[1]))
    }
}

/// 2024-11-05 07:00:00 UTC, in epoch milliseconds. Scenario wall
/// clocks start here unless a scenario skews them.
pub const ELECTION_MORNING: u64 = 1_730_790_000_000;

/// A fixed election every simulated precinct runs.
pub fn standard_election() -> Election {
    Election {
        id: ElectionId::from("general-2024"),
        title: "General Election".to_owned(),
        date: "2024-11-05".parse().unwrap_or_default(),
        precincts: Vec::new(),
    }
}

/// A bare voter record for simulation rosters.
pub fn simulated_voter(voter_id: &str, first_name: &str, last_name: &str) -> Voter {
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

/// Six-voter roster used by the convergence scenarios.
pub fn standard_roster() -> Vec<Voter> {
    vec![
        simulated_voter("alice", "Alice", "Anderson"),
        simulated_voter("bob", "Bob", "Baker"),
        simulated_voter("carl", "Carl", "Cooper"),
        simulated_voter("sue", "Sue", "Smith"),
        simulated_voter("dave", "Dave", "Davis"),
        simulated_voter("eve", "Eve", "Evans"),
    ]
}
