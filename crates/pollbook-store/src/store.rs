//! Event log store implementation
//!
//! The store owns the SQLite database and the machine's hybrid
//! logical clock. Every mutation runs inside a single serialized
//! transaction: the pool is capped at one connection, so local
//! check-ins and replicated batches can never interleave partway
//! through an append.

use std::path::Path;
use std::sync::Arc;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{SqliteConnection, SqlitePool};

use pollbook_clock::HybridLogicalClock;
use pollbook_core::{
    Election, EventPage, EventType, HlcTimestamp, MachineId, PollbookError, PollbookEvent,
    PollbookResult, Voter, VoterCheckIn, VoterId, EVENT_PAGE_SIZE,
};

use crate::Roll;

/// Schema applied on open; every statement is idempotent.
const SCHEMA: &str = include_str!("../schema.sql");

/// Map a storage-layer failure onto the core taxonomy.
pub(crate) fn storage(err: sqlx::Error) -> PollbookError {
    PollbookError::Storage(err.to_string())
}

/// A raw `event_log` row.
#[derive(Debug, Clone, sqlx::FromRow)]
pub(crate) struct EventRow {
    pub machine_id: String,
    pub voter_id: String,
    pub event_type: String,
    pub physical_time: i64,
    pub logical_counter: i64,
    pub event_data: String,
}

impl EventRow {
    /// Decode a persisted row back into a domain event.
    ///
    /// A row that fails here is a log integrity error: the schema or
    /// the log itself is corrupt, and the failure must surface
    /// rather than silently skewing materialized state.
    fn into_event(self) -> PollbookResult<PollbookEvent> {
        let corrupt = |message: String| PollbookError::CorruptEvent {
            machine_id: self.machine_id.clone(),
            physical: self.physical_time,
            logical: self.logical_counter,
            message,
        };

        let event_type = EventType::parse(&self.event_type)
            .ok_or_else(|| corrupt(format!("unknown event type {:?}", self.event_type)))?;
        let timestamp = HlcTimestamp::new(
            self.physical_time as u64,
            self.logical_counter as u32,
            MachineId::new(self.machine_id.clone()),
        );
        let machine_id = MachineId::new(self.machine_id.clone());
        let voter_id = VoterId::new(self.voter_id.clone());

        match event_type {
            EventType::VoterCheckIn => {
                let check_in: VoterCheckIn = serde_json::from_str(&self.event_data)
                    .map_err(|e| corrupt(format!("bad check-in payload: {e}")))?;
                Ok(PollbookEvent::VoterCheckIn {
                    machine_id,
                    voter_id,
                    timestamp,
                    check_in,
                })
            }
            EventType::UndoVoterCheckIn => Ok(PollbookEvent::UndoVoterCheckIn {
                machine_id,
                voter_id,
                timestamp,
            }),
        }
    }
}

/// Result of applying one replicated batch.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SaveOutcome {
    /// The caller's next sync cursor against this peer.
    pub cursor: HlcTimestamp,
    /// Events newly applied; redelivered duplicates are excluded.
    pub applied: usize,
}

/// Durable poll book store for a single machine.
pub struct Store {
    pub(crate) pool: SqlitePool,
    clock: Arc<HybridLogicalClock>,
    machine_id: MachineId,
}

impl Store {
    /// Open a file-backed store at `path`, creating it if missing.
    pub async fn file(path: impl AsRef<Path>, clock: Arc<HybridLogicalClock>) -> PollbookResult<Self> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal);
        Self::open(options, clock).await
    }

    /// Open a store whose data lives in memory (tests, simulators).
    pub async fn memory(clock: Arc<HybridLogicalClock>) -> PollbookResult<Self> {
        let options = SqliteConnectOptions::new().in_memory(true);
        Self::open(options, clock).await
    }

    async fn open(
        options: SqliteConnectOptions,
        clock: Arc<HybridLogicalClock>,
    ) -> PollbookResult<Self> {
        // One connection: all transactions serialize, and an
        // in-memory database stays coherent across calls.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(storage)?;
        sqlx::raw_sql(SCHEMA).execute(&pool).await.map_err(storage)?;

        let machine_id = clock.machine_id().clone();
        Ok(Store {
            pool,
            clock,
            machine_id,
        })
    }

    pub fn machine_id(&self) -> &MachineId {
        &self.machine_id
    }

    pub fn clock(&self) -> &Arc<HybridLogicalClock> {
        &self.clock
    }

    // ------------------------------------------------------------------
    // Configuration
    // ------------------------------------------------------------------

    /// Load the election package: election record, full voter roll,
    /// and a fresh materialized row per voter. Any events already in
    /// the log (from an earlier sync) are replayed so the
    /// materialized view matches the log from the start.
    pub async fn set_election_and_voters(
        &self,
        election: &Election,
        voters: &[Voter],
    ) -> PollbookResult<()> {
        let mut tx = self.pool.begin().await.map_err(storage)?;

        sqlx::query("DELETE FROM voter_check_in_status")
            .execute(&mut *tx)
            .await
            .map_err(storage)?;
        sqlx::query("DELETE FROM elections")
            .execute(&mut *tx)
            .await
            .map_err(storage)?;
        sqlx::query("DELETE FROM voters")
            .execute(&mut *tx)
            .await
            .map_err(storage)?;

        sqlx::query("INSERT INTO elections (election_id, election_data) VALUES (?, ?)")
            .bind(election.id.as_str())
            .bind(serde_json::to_string(election)?)
            .execute(&mut *tx)
            .await
            .map_err(storage)?;

        for voter in voters {
            sqlx::query(
                "INSERT INTO voters (voter_id, last_name, first_name, voter_data) \
                 VALUES (?, ?, ?, ?)",
            )
            .bind(voter.voter_id.as_str())
            .bind(&voter.last_name)
            .bind(&voter.first_name)
            .bind(serde_json::to_string(voter)?)
            .execute(&mut *tx)
            .await
            .map_err(storage)?;

            sqlx::query(
                "INSERT INTO voter_check_in_status (voter_id, is_checked_in) VALUES (?, 0)",
            )
            .bind(voter.voter_id.as_str())
            .execute(&mut *tx)
            .await
            .map_err(storage)?;
        }

        Self::replay_log(&mut tx).await?;

        tx.commit().await.map_err(storage)?;
        tracing::debug!(
            election = %election.id,
            voters = voters.len(),
            "configured election and voter roll"
        );
        Ok(())
    }

    /// Wipe the configuration, the event log, and the clock state.
    pub async fn delete_election_and_voters(&self) -> PollbookResult<()> {
        let mut tx = self.pool.begin().await.map_err(storage)?;
        for table in [
            "voter_check_in_status",
            "event_log",
            "voters",
            "elections",
        ] {
            sqlx::query(&format!("DELETE FROM {table}"))
                .execute(&mut *tx)
                .await
                .map_err(storage)?;
        }
        tx.commit().await.map_err(storage)?;
        self.clock.reset();
        Ok(())
    }

    /// The configured election, if any.
    pub async fn election(&self) -> PollbookResult<Option<Election>> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT election_data FROM elections ORDER BY rowid DESC LIMIT 1")
                .fetch_optional(&self.pool)
                .await
                .map_err(storage)?;
        match row {
            Some((data,)) => Ok(Some(serde_json::from_str(&data)?)),
            None => Ok(None),
        }
    }

    /// Typed handle over the configured roll. Check-in operations
    /// only exist on the handle, so an unconfigured machine cannot
    /// reach them.
    pub async fn configured(&self) -> PollbookResult<Roll<'_>> {
        let election = self.election().await?.ok_or(PollbookError::Unconfigured)?;
        Ok(Roll::new(self, election))
    }

    // ------------------------------------------------------------------
    // Event application
    // ------------------------------------------------------------------

    /// Apply one event: dedup, durably log, and fold into the
    /// materialized view if it is the latest for its voter.
    ///
    /// Returns `Ok(false)` when the event was already present
    /// (replication redelivers pages; delivery must be idempotent).
    /// The log append and the materialized update commit atomically.
    pub async fn apply_event(&self, event: &PollbookEvent) -> PollbookResult<bool> {
        let ts = event.timestamp();
        let mut tx = self.pool.begin().await.map_err(storage)?;

        let existing: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM event_log \
             WHERE physical_time = ? AND logical_counter = ? AND machine_id = ?",
        )
        .bind(ts.physical as i64)
        .bind(ts.logical as i64)
        .bind(ts.machine_id.as_str())
        .fetch_one(&mut *tx)
        .await
        .map_err(storage)?;
        if existing > 0 {
            // Redelivered page; the transaction is dropped untouched.
            tracing::debug!(timestamp = %ts, "skipping duplicate event");
            return Ok(false);
        }

        let event_data = match event {
            PollbookEvent::VoterCheckIn { check_in, .. } => serde_json::to_string(check_in)?,
            PollbookEvent::UndoVoterCheckIn { .. } => "{}".to_owned(),
        };
        sqlx::query(
            "INSERT INTO event_log \
             (machine_id, voter_id, event_type, physical_time, logical_counter, event_data) \
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(event.machine_id().as_str())
        .bind(event.voter_id().as_str())
        .bind(event.event_type().as_str())
        .bind(ts.physical as i64)
        .bind(ts.logical as i64)
        .bind(&event_data)
        .execute(&mut *tx)
        .await
        .map_err(storage)?;

        // Latest event for this voter, including the row just
        // appended. Only the maximum may drive materialized state.
        let latest = Self::latest_event_for_voter(&mut tx, event.voter_id()).await?;
        let superseded = matches!(&latest, Some(l) if l.timestamp() > ts);
        if superseded {
            tracing::debug!(
                voter = %event.voter_id(),
                timestamp = %ts,
                "event logged but already superseded; materialized state unchanged"
            );
        } else {
            Self::materialize(&mut tx, event).await?;
        }

        tx.commit().await.map_err(storage)?;
        self.clock.update(ts);
        Ok(true)
    }

    /// Apply a replicated batch. The returned cursor is the maximum
    /// timestamp observed, or `since` when the batch was empty;
    /// `applied` excludes redelivered duplicates.
    pub async fn save_remote_events(
        &self,
        events: &[PollbookEvent],
        since: &HlcTimestamp,
    ) -> PollbookResult<SaveOutcome> {
        let mut cursor = since.clone();
        let mut applied = 0usize;
        for event in events {
            if self.apply_event(event).await? {
                applied += 1;
            }
            if event.timestamp() > &cursor {
                cursor = event.timestamp().clone();
            }
        }
        if !events.is_empty() {
            tracing::debug!(
                received = events.len(),
                applied,
                cursor = %cursor,
                "saved remote events"
            );
        }
        Ok(SaveOutcome { cursor, applied })
    }

    /// Page of events strictly after `from`, in timestamp order.
    pub async fn get_new_events(&self, from: &HlcTimestamp) -> PollbookResult<EventPage> {
        let rows: Vec<EventRow> = sqlx::query_as(
            "SELECT machine_id, voter_id, event_type, physical_time, logical_counter, event_data \
             FROM event_log \
             WHERE physical_time > ?1 \
                OR (physical_time = ?1 AND logical_counter > ?2) \
                OR (physical_time = ?1 AND logical_counter = ?2 AND machine_id > ?3) \
             ORDER BY physical_time ASC, logical_counter ASC, machine_id ASC \
             LIMIT ?4",
        )
        .bind(from.physical as i64)
        .bind(from.logical as i64)
        .bind(from.machine_id.as_str())
        .bind((EVENT_PAGE_SIZE + 1) as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(storage)?;

        let has_more = rows.len() > EVENT_PAGE_SIZE;
        let events = rows
            .into_iter()
            .take(EVENT_PAGE_SIZE)
            .map(EventRow::into_event)
            .collect::<PollbookResult<Vec<_>>>()?;
        Ok(EventPage { events, has_more })
    }

    /// Count of materialized checked-in voters, optionally filtered
    /// by originating machine.
    pub async fn get_check_in_count(
        &self,
        machine_id: Option<&MachineId>,
    ) -> PollbookResult<u64> {
        let count: i64 = match machine_id {
            Some(machine) => sqlx::query_scalar(
                "SELECT COUNT(*) FROM voter_check_in_status \
                 WHERE is_checked_in = 1 AND machine_id = ?",
            )
            .bind(machine.as_str())
            .fetch_one(&self.pool)
            .await
            .map_err(storage)?,
            None => sqlx::query_scalar(
                "SELECT COUNT(*) FROM voter_check_in_status WHERE is_checked_in = 1",
            )
            .fetch_one(&self.pool)
            .await
            .map_err(storage)?,
        };
        Ok(count as u64)
    }

    /// Materialized checked-in voters with their originating
    /// machine, in voter-id order (status listing, test oracle).
    pub async fn checked_in_voters(&self) -> PollbookResult<Vec<(VoterId, MachineId)>> {
        let rows: Vec<(String, String)> = sqlx::query_as(
            "SELECT voter_id, machine_id FROM voter_check_in_status \
             WHERE is_checked_in = 1 ORDER BY voter_id ASC",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(storage)?;
        Ok(rows
            .into_iter()
            .map(|(voter_id, machine_id)| (VoterId::new(voter_id), MachineId::new(machine_id)))
            .collect())
    }

    /// Total number of rows in the event log (test oracle, status
    /// screens).
    pub async fn event_log_len(&self) -> PollbookResult<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM event_log")
            .fetch_one(&self.pool)
            .await
            .map_err(storage)?;
        Ok(count as u64)
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    async fn latest_event_for_voter(
        conn: &mut SqliteConnection,
        voter_id: &VoterId,
    ) -> PollbookResult<Option<PollbookEvent>> {
        let row: Option<EventRow> = sqlx::query_as(
            "SELECT machine_id, voter_id, event_type, physical_time, logical_counter, event_data \
             FROM event_log WHERE voter_id = ? \
             ORDER BY physical_time DESC, logical_counter DESC, machine_id DESC \
             LIMIT 1",
        )
        .bind(voter_id.as_str())
        .fetch_optional(conn)
        .await
        .map_err(storage)?;
        row.map(EventRow::into_event).transpose()
    }

    /// Overwrite the materialized row per the event variant.
    async fn materialize(
        conn: &mut SqliteConnection,
        event: &PollbookEvent,
    ) -> PollbookResult<()> {
        match event {
            PollbookEvent::VoterCheckIn {
                machine_id,
                voter_id,
                check_in,
                ..
            } => {
                sqlx::query(
                    "UPDATE voter_check_in_status \
                     SET is_checked_in = 1, machine_id = ?, check_in_data = ? \
                     WHERE voter_id = ?",
                )
                .bind(machine_id.as_str())
                .bind(serde_json::to_string(check_in)?)
                .bind(voter_id.as_str())
                .execute(conn)
                .await
                .map_err(storage)?;
            }
            PollbookEvent::UndoVoterCheckIn { voter_id, .. } => {
                sqlx::query(
                    "UPDATE voter_check_in_status \
                     SET is_checked_in = 0, machine_id = NULL, check_in_data = NULL \
                     WHERE voter_id = ?",
                )
                .bind(voter_id.as_str())
                .execute(conn)
                .await
                .map_err(storage)?;
            }
        }
        Ok(())
    }

    /// Rebuild materialized state by replaying the whole log in
    /// ascending timestamp order; the last event per voter wins.
    async fn replay_log(conn: &mut SqliteConnection) -> PollbookResult<()> {
        let rows: Vec<EventRow> = sqlx::query_as(
            "SELECT machine_id, voter_id, event_type, physical_time, logical_counter, event_data \
             FROM event_log \
             ORDER BY physical_time ASC, logical_counter ASC, machine_id ASC",
        )
        .fetch_all(&mut *conn)
        .await
        .map_err(storage)?;

        for row in rows {
            let event = row.into_event()?;
            Self::materialize(conn, &event).await?;
        }
        Ok(())
    }
}
