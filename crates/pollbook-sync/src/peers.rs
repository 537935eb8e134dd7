//! Peer registry
//!
//! Tracks every poll book machine seen on the local network and the
//! connection state machine each one moves through:
//!
//! ```text
//! discovered -> Connected <-> LostConnection
//!                  |
//!                  +-> WrongElection (peer runs a different election)
//!                  +-> ShutDown      (peer announced a clean exit)
//! ```
//!
//! Only `Connected` peers hold a live client and participate in sync.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;

use pollbook_core::MachineId;

use crate::client::PeerClient;

/// A peer that has not refreshed its announcement within this window
/// is treated as gone.
pub const MACHINE_DISCONNECTED_TIMEOUT: Duration = Duration::from_secs(30);

/// Connection state of one known peer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionStatus {
    Connected,
    LostConnection,
    ShutDown,
    WrongElection,
}

struct PeerRecord {
    status: ConnectionStatus,
    service_name: String,
    last_seen: Instant,
    client: Option<Arc<dyn PeerClient>>,
}

/// Point-in-time view of one peer, for status screens.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PeerStatus {
    pub machine_id: MachineId,
    /// Name the peer advertises on the local network.
    pub service_name: String,
    pub status: ConnectionStatus,
}

/// Registry of every peer this machine has seen.
#[derive(Default)]
pub struct PeerRegistry {
    peers: RwLock<HashMap<MachineId, PeerRecord>>,
}

impl PeerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A peer answered `machine_info` with a matching election.
    pub fn mark_connected(
        &self,
        machine_id: &MachineId,
        service_name: &str,
        client: Arc<dyn PeerClient>,
    ) {
        let mut peers = self.peers.write();
        let previous = peers.insert(
            machine_id.clone(),
            PeerRecord {
                status: ConnectionStatus::Connected,
                service_name: service_name.to_owned(),
                last_seen: Instant::now(),
                client: Some(client),
            },
        );
        if previous.map(|p| p.status) != Some(ConnectionStatus::Connected) {
            tracing::info!(peer = %machine_id, service_name, "peer connected");
        }
    }

    /// A peer answered `machine_info` with a different election id.
    /// It stays visible but never syncs.
    pub fn mark_wrong_election(&self, machine_id: &MachineId, service_name: &str) {
        self.transition(machine_id, Some(service_name), ConnectionStatus::WrongElection);
    }

    /// A peer announced a clean shutdown.
    pub fn mark_shut_down(&self, machine_id: &MachineId) {
        self.transition(machine_id, None, ConnectionStatus::ShutDown);
    }

    /// A request to the peer failed or timed out.
    pub fn mark_lost(&self, machine_id: &MachineId) {
        self.transition(machine_id, None, ConnectionStatus::LostConnection);
    }

    fn transition(
        &self,
        machine_id: &MachineId,
        service_name: Option<&str>,
        status: ConnectionStatus,
    ) {
        let mut peers = self.peers.write();
        let record = peers.entry(machine_id.clone()).or_insert_with(|| PeerRecord {
            status,
            // A peer first seen through a failure has never announced
            // a service name.
            service_name: machine_id.as_str().to_owned(),
            last_seen: Instant::now(),
            client: None,
        });
        if let Some(service_name) = service_name {
            record.service_name = service_name.to_owned();
        }
        if record.status != status {
            tracing::info!(peer = %machine_id, ?status, "peer status changed");
        }
        record.status = status;
        record.last_seen = Instant::now();
        // Non-connected peers must not be called again.
        record.client = None;
    }

    /// Record that the local network interface went down or came
    /// back. Going offline demotes every `Connected` peer at once;
    /// coming back changes nothing here, peers reconnect through
    /// discovery as their announcements reappear.
    pub fn set_online(&self, online: bool) {
        if online {
            return;
        }
        let mut peers = self.peers.write();
        for (machine_id, record) in peers.iter_mut() {
            if record.status == ConnectionStatus::Connected {
                record.status = ConnectionStatus::LostConnection;
                record.client = None;
                tracing::info!(peer = %machine_id, "went offline, peer connection lost");
            }
        }
    }

    /// Refresh `last_seen` for a peer still announcing itself.
    pub fn touch(&self, machine_id: &MachineId) {
        if let Some(record) = self.peers.write().get_mut(machine_id) {
            record.last_seen = Instant::now();
        }
    }

    /// Demote `Connected` peers that went silent longer than
    /// `timeout`. Returns the machines demoted this pass.
    pub fn cleanup_stale(&self, timeout: Duration) -> Vec<MachineId> {
        let mut demoted = Vec::new();
        let mut peers = self.peers.write();
        for (machine_id, record) in peers.iter_mut() {
            if record.status == ConnectionStatus::Connected
                && record.last_seen.elapsed() >= timeout
            {
                record.status = ConnectionStatus::LostConnection;
                record.client = None;
                demoted.push(machine_id.clone());
            }
        }
        drop(peers);
        for machine_id in &demoted {
            tracing::warn!(peer = %machine_id, "peer went silent, marking connection lost");
        }
        demoted
    }

    /// Peers eligible for a sync pass.
    pub fn connected(&self) -> Vec<(MachineId, Arc<dyn PeerClient>)> {
        self.peers
            .read()
            .iter()
            .filter(|(_, record)| record.status == ConnectionStatus::Connected)
            .filter_map(|(machine_id, record)| {
                record
                    .client
                    .as_ref()
                    .map(|client| (machine_id.clone(), Arc::clone(client)))
            })
            .collect()
    }

    pub fn status_of(&self, machine_id: &MachineId) -> Option<ConnectionStatus> {
        self.peers.read().get(machine_id).map(|r| r.status)
    }

    /// All known peers, sorted by machine id for stable display.
    pub fn statuses(&self) -> Vec<PeerStatus> {
        let mut statuses: Vec<PeerStatus> = self
            .peers
            .read()
            .iter()
            .map(|(machine_id, record)| PeerStatus {
                machine_id: machine_id.clone(),
                service_name: record.service_name.clone(),
                status: record.status,
            })
            .collect();
        statuses.sort_by(|a, b| a.machine_id.cmp(&b.machine_id));
        statuses
    }
}
