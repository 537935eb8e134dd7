//! Multi-machine convergence scenarios
//!
//! Each scenario plays out a day-of-election situation across a
//! simulated precinct and asserts that every machine lands on the
//! same check-in state.

use crate::precinct::{standard_roster, SimulatedPrecinct, ELECTION_MORNING};

const HOUR_MS: u64 = 60 * 60 * 1000;

#[tokio::test]
async fn test_three_machines_converge_through_one_hub() {
    let precinct = SimulatedPrecinct::new(
        &["pollbook-a", "pollbook-b", "pollbook-c"],
        ELECTION_MORNING,
        &standard_roster(),
    )
    .await
    .unwrap();
    let a = precinct.machine(0);
    let b = precinct.machine(1);
    let c = precinct.machine(2);

    // B never talks to C directly.
    b.disconnect(c);
    c.disconnect(b);

    a.check_in("alice").await.unwrap();
    a.check_in("bob").await.unwrap();
    a.check_in("carl").await.unwrap();
    c.check_in("sue").await.unwrap();
    c.check_in("dave").await.unwrap();

    // A pulls C's two check-ins.
    a.sync().await;
    assert_eq!(a.check_in_count().await.unwrap(), 5);

    // B reaches 5 through A alone: A's log carries C's events.
    b.sync().await;
    assert_eq!(b.check_in_count().await.unwrap(), 5);

    b.check_in("eve").await.unwrap();
    a.sync().await;
    c.sync().await;
    assert_eq!(a.check_in_count().await.unwrap(), 6);
    assert_eq!(c.check_in_count().await.unwrap(), 6);
}

#[tokio::test]
async fn test_precinct_day_with_offline_machine_and_late_rejoins() {
    let precinct = SimulatedPrecinct::new(
        &["pollbook-a", "pollbook-b", "pollbook-c"],
        ELECTION_MORNING,
        &standard_roster(),
    )
    .await
    .unwrap();
    let a = precinct.machine(0);
    let b = precinct.machine(1);
    let c = precinct.machine(2);

    // Each machine checks in one voter and everyone syncs.
    a.check_in("alice").await.unwrap();
    b.check_in("bob").await.unwrap();
    c.check_in("carl").await.unwrap();
    precinct.sync_until_quiet().await;
    for machine in precinct.machines() {
        assert_eq!(machine.check_in_count().await.unwrap(), 3);
    }

    // C drops off the network and keeps working.
    a.disconnect(c);
    b.disconnect(c);
    c.disconnect(a);
    c.disconnect(b);
    c.check_in("sue").await.unwrap();

    // A and B keep checking in and syncing with each other.
    a.check_in("dave").await.unwrap();
    b.check_in("eve").await.unwrap();
    a.sync().await;
    b.sync().await;
    assert_eq!(a.check_in_count().await.unwrap(), 5);
    assert_eq!(b.check_in_count().await.unwrap(), 5);
    assert_eq!(c.check_in_count().await.unwrap(), 4);

    // B shuts down. C rejoins but can only reach A.
    a.disconnect(b);
    a.connect(c);
    c.connect(a);
    a.sync().await;
    c.sync().await;
    assert_eq!(a.check_in_count().await.unwrap(), 6);
    assert_eq!(c.check_in_count().await.unwrap(), 6);

    // Check-ins stay attributed to their originating machines.
    for (machine, expected) in [("pollbook-a", 2), ("pollbook-b", 2), ("pollbook-c", 2)] {
        assert_eq!(
            a.store()
                .get_check_in_count(Some(&pollbook_core::MachineId::from(machine)))
                .await
                .unwrap(),
            expected
        );
    }

    // B comes back and reaches only A, yet still converges: A's log
    // carries C's events.
    b.connect(a);
    b.sync().await;
    assert_eq!(b.check_in_count().await.unwrap(), 6);
}

#[tokio::test]
async fn test_offline_undo_loses_to_later_check_in() {
    let precinct = SimulatedPrecinct::new(
        &["pollbook-a", "pollbook-b", "pollbook-c"],
        ELECTION_MORNING,
        &standard_roster(),
    )
    .await
    .unwrap();
    let a = precinct.machine(0);
    let b = precinct.machine(1);
    let c = precinct.machine(2);

    a.check_in("alice").await.unwrap();
    precinct.sync_until_quiet().await;

    // B drops off the network and undoes the check-in locally.
    b.disconnect(a);
    b.disconnect(c);
    b.advance_wall_clock(60_000);
    b.undo_check_in("alice").await.unwrap();

    // Meanwhile C, still online, checks alice in again later.
    c.advance_wall_clock(2 * 60_000);
    c.undo_check_in("alice").await.unwrap();
    c.check_in("alice").await.unwrap();
    a.sync().await;

    // B comes back; everyone exchanges everything.
    precinct.mesh();
    precinct.sync_until_quiet().await;

    assert!(precinct.converged().await.unwrap());
    for machine in precinct.machines() {
        assert!(machine.is_checked_in("alice").await.unwrap());
    }
}

#[tokio::test]
async fn test_undo_wins_despite_peer_clock_ahead() {
    let precinct = SimulatedPrecinct::new(
        &["pollbook-a", "pollbook-b"],
        ELECTION_MORNING,
        &standard_roster(),
    )
    .await
    .unwrap();
    let a = precinct.machine(0);
    let b = precinct.machine(1);

    // B's wall clock reads an hour ahead when it records the
    // check-in at what it believes is 9am.
    b.set_wall_clock(ELECTION_MORNING + 2 * HOUR_MS);
    b.check_in("alice").await.unwrap();

    // A still reads 8am. Pulling B's event advances A's logical
    // clock past it, so A's undo orders after the check-in even
    // though A's wall clock sits earlier.
    a.set_wall_clock(ELECTION_MORNING + HOUR_MS);
    a.sync().await;
    assert!(a.is_checked_in("alice").await.unwrap());
    a.undo_check_in("alice").await.unwrap();
    assert!(!a.is_checked_in("alice").await.unwrap());

    b.sync().await;
    assert!(!b.is_checked_in("alice").await.unwrap());
    assert!(precinct.converged().await.unwrap());
}

#[tokio::test]
async fn test_large_backlog_drains_in_pages() {
    let roster: Vec<_> = (0..pollbook_core::EVENT_PAGE_SIZE + 50)
        .map(|i| {
            crate::precinct::simulated_voter(&format!("voter-{i}"), "Voter", &format!("N{i:04}"))
        })
        .collect();
    let precinct = SimulatedPrecinct::new(&["pollbook-a", "pollbook-b"], ELECTION_MORNING, &roster)
        .await
        .unwrap();
    let a = precinct.machine(0);
    let b = precinct.machine(1);

    for voter in &roster {
        a.check_in(voter.voter_id.as_str()).await.unwrap();
        a.advance_wall_clock(10);
    }

    b.sync().await;
    assert_eq!(b.check_in_count().await.unwrap() as usize, roster.len());

    // Redelivery after an already-complete drain is a no-op.
    assert_eq!(b.sync().await, 0);
    assert_eq!(
        b.store().event_log_len().await.unwrap() as usize,
        roster.len()
    );
}

#[cfg(test)]
mod permutations {
    use proptest::prelude::*;

    use pollbook_core::{MachineId, PollbookEvent, VoterId};

    use crate::precinct::{standard_roster, SimulatedMachine, SimulatedPrecinct, ELECTION_MORNING};

    /// Apply the same event set in an arbitrary order to a fresh
    /// machine and report who ended up checked in, on which machine,
    /// plus the log length.
    async fn materialized_state(
        events: &[PollbookEvent],
    ) -> (Vec<(VoterId, MachineId)>, u64) {
        let machine = SimulatedMachine::new("pollbook-z", ELECTION_MORNING)
            .await
            .unwrap();
        machine
            .configure(&crate::precinct::standard_election(), &standard_roster())
            .await
            .unwrap();
        for event in events {
            machine.store().apply_event(event).await.unwrap();
        }
        (
            machine.store().checked_in_voters().await.unwrap(),
            machine.store().event_log_len().await.unwrap(),
        )
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(16))]

        #[test]
        fn prop_delivery_order_never_changes_final_state(seed in any::<u64>()) {
            let runtime = tokio::runtime::Runtime::new().unwrap();
            runtime.block_on(async {
                // Script a fixed day on three machines.
                let precinct = SimulatedPrecinct::new(
                    &["pollbook-a", "pollbook-b", "pollbook-c"],
                    ELECTION_MORNING,
                    &standard_roster(),
                )
                .await
                .unwrap();
                precinct.machine(0).check_in("alice").await.unwrap();
                precinct.machine(1).check_in("bob").await.unwrap();
                precinct.machine(1).undo_check_in("bob").await.unwrap();
                precinct.machine(2).check_in("carl").await.unwrap();
                precinct.machine(0).advance_wall_clock(1000);
                precinct.machine(0).check_in("sue").await.unwrap();
                precinct.sync_until_quiet().await;

                let mut events = precinct
                    .machine(0)
                    .store()
                    .get_new_events(&pollbook_core::HlcTimestamp::zero(
                        pollbook_core::MachineId::from("pollbook-z"),
                    ))
                    .await
                    .unwrap()
                    .events;

                let baseline = materialized_state(&events).await;

                // Fisher-Yates keyed by the proptest seed.
                let mut state = seed | 1;
                for i in (1..events.len()).rev() {
                    state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
                    let j = (state >> 33) as usize % (i + 1);
                    events.swap(i, j);
                }

                let shuffled = materialized_state(&events).await;
                prop_assert_eq!(baseline, shuffled);
                Ok(())
            })?;
        }
    }
}
