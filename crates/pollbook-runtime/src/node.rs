//! Poll book node - background loop orchestration

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::{interval, timeout};

use pollbook_core::{ElectionId, MachineId, PollbookError, PollbookResult};
use pollbook_store::Store;
use pollbook_sync::{
    PeerClient, PeerRegistry, PeerStatus, SyncEngine, MACHINE_DISCONNECTED_TIMEOUT,
};

/// Poll book node configuration
#[derive(Clone, Debug)]
pub struct NodeConfig {
    /// How often to pull events from connected peers
    pub sync_interval: Duration,
    /// How often to sweep for silent peers
    pub cleanup_interval: Duration,
    /// Bound on one peer request round trip
    pub request_timeout: Duration,
    /// Silence window after which a connected peer is demoted
    pub disconnect_timeout: Duration,
    /// Address the peer-facing HTTP API listens on
    pub listen_addr: SocketAddr,
}

impl Default for NodeConfig {
    fn default() -> Self {
        NodeConfig {
            sync_interval: Duration::from_secs(3),
            cleanup_interval: Duration::from_secs(5),
            request_timeout: Duration::from_secs(5),
            disconnect_timeout: MACHINE_DISCONNECTED_TIMEOUT,
            listen_addr: ([0, 0, 0, 0], 3002).into(),
        }
    }
}

/// Point-in-time network view for status screens.
#[derive(Clone, Debug)]
pub struct NetworkStatus {
    pub machine_id: MachineId,
    pub configured_election_id: Option<ElectionId>,
    pub peers: Vec<PeerStatus>,
}

/// A running poll book machine.
///
/// The node owns the store, the peer registry, and the sync engine,
/// and drives the two background timers (sync, stale-peer cleanup).
/// Discovery is external: whoever watches the network calls
/// `peer_discovered` / `peer_vanished` / `peer_shut_down`.
pub struct PollbookNode {
    store: Arc<Store>,
    registry: Arc<PeerRegistry>,
    engine: Arc<SyncEngine>,
    config: NodeConfig,
    shutdown: watch::Sender<bool>,
}

impl PollbookNode {
    pub fn new(store: Arc<Store>) -> Self {
        Self::with_config(store, NodeConfig::default())
    }

    pub fn with_config(store: Arc<Store>, config: NodeConfig) -> Self {
        let registry = Arc::new(PeerRegistry::new());
        let engine = Arc::new(SyncEngine::with_timeout(
            Arc::clone(&store),
            Arc::clone(&registry),
            config.request_timeout,
        ));
        let (shutdown, _) = watch::channel(false);
        PollbookNode {
            store,
            registry,
            engine,
            config,
            shutdown,
        }
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    pub fn registry(&self) -> &Arc<PeerRegistry> {
        &self.registry
    }

    pub fn engine(&self) -> &Arc<SyncEngine> {
        &self.engine
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    /// Bind the peer API on `listen_addr` and spawn it along with the
    /// sync and cleanup loops. Returns the bound address; everything
    /// stops when `shutdown` is called.
    pub async fn start(&self) -> PollbookResult<SocketAddr> {
        let listener = tokio::net::TcpListener::bind(self.config.listen_addr)
            .await
            .map_err(|e| {
                PollbookError::Peer(format!("failed to bind {}: {e}", self.config.listen_addr))
            })?;
        let addr = listener
            .local_addr()
            .map_err(|e| PollbookError::Peer(e.to_string()))?;
        tracing::info!(%addr, "peer API listening");

        let app = crate::http::peer_api(Arc::clone(&self.store));
        let mut rx = self.shutdown.subscribe();
        tokio::spawn(async move {
            let server = axum::serve(listener, app).with_graceful_shutdown(async move {
                let _ = rx.changed().await;
            });
            if let Err(err) = server.await {
                tracing::error!(error = %err, "peer API server exited");
            }
        });

        let engine = Arc::clone(&self.engine);
        let mut rx = self.shutdown.subscribe();
        let sync_interval = self.config.sync_interval;
        tokio::spawn(async move {
            let mut ticker = interval(sync_interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        engine.sync_all().await;
                    }
                    _ = rx.changed() => break,
                }
            }
        });

        let registry = Arc::clone(&self.registry);
        let mut rx = self.shutdown.subscribe();
        let cleanup_interval = self.config.cleanup_interval;
        let disconnect_timeout = self.config.disconnect_timeout;
        tokio::spawn(async move {
            let mut ticker = interval(cleanup_interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        registry.cleanup_stale(disconnect_timeout);
                    }
                    _ = rx.changed() => break,
                }
            }
        });

        Ok(addr)
    }

    /// Stop the peer API and the background loops.
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(true);
    }

    /// A service appeared on the network. Probes its identity and
    /// admits it to the registry; a peer configured for a different
    /// election is recorded but never synced. A failed identity check
    /// leaves the registry alone, the machine behind the service is
    /// still unknown.
    pub async fn peer_discovered(
        &self,
        service_name: &str,
        client: Arc<dyn PeerClient>,
    ) -> PollbookResult<()> {
        let info = match timeout(self.config.request_timeout, client.machine_info()).await {
            Ok(Ok(info)) => info,
            Ok(Err(err)) => return Err(err),
            Err(_) => return Err(PollbookError::PeerTimeout),
        };

        let ours = self.store.election().await?.map(|e| e.id);
        if info.configured_election_id == ours && ours.is_some() {
            self.registry
                .mark_connected(&info.machine_id, service_name, client);
        } else {
            tracing::warn!(
                peer = %info.machine_id,
                service_name,
                "peer is configured for a different election"
            );
            self.registry
                .mark_wrong_election(&info.machine_id, service_name);
        }
        Ok(())
    }

    /// The local network interface went down or came back.
    pub fn set_online(&self, online: bool) {
        self.registry.set_online(online);
    }

    /// A peer's announcement refreshed without a full re-probe.
    pub fn peer_seen(&self, machine_id: &MachineId) {
        self.registry.touch(machine_id);
    }

    /// A peer's announcement disappeared from the network.
    pub fn peer_vanished(&self, machine_id: &MachineId) {
        self.registry.mark_lost(machine_id);
    }

    /// A peer announced a clean shutdown.
    pub fn peer_shut_down(&self, machine_id: &MachineId) {
        self.registry.mark_shut_down(machine_id);
    }

    pub async fn network_status(&self) -> PollbookResult<NetworkStatus> {
        Ok(NetworkStatus {
            machine_id: self.store.machine_id().clone(),
            configured_election_id: self.store.election().await?.map(|e| e.id),
            peers: self.registry.statuses(),
        })
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use chrono::Utc;
    use pollbook_clock::HybridLogicalClock;
    use pollbook_core::{
        Election, EventPage, HlcTimestamp, MachineInfo, PollbookEvent, VoterCheckIn, VoterId,
        VoterIdentificationMethod,
    };
    use pollbook_sync::ConnectionStatus;

    use super::*;

    struct StoreClient {
        store: Arc<Store>,
    }

    #[async_trait]
    impl PeerClient for StoreClient {
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

    fn election(id: &str) -> Election {
        Election {
            id: ElectionId::from(id),
            title: "General Election".to_owned(),
            date: "2024-11-05".parse().unwrap(),
            precincts: Vec::new(),
        }
    }

    async fn machine(name: &str) -> Arc<Store> {
        let clock = Arc::new(HybridLogicalClock::new(MachineId::from(name)));
        Arc::new(Store::memory(clock).await.unwrap())
    }

    async fn check_in(store: &Store, voter_id: &str) {
        let machine_id = store.machine_id().clone();
        let event = PollbookEvent::VoterCheckIn {
            machine_id: machine_id.clone(),
            voter_id: VoterId::from(voter_id),
            timestamp: store.clock().tick(),
            check_in: VoterCheckIn {
                identification_method: VoterIdentificationMethod::ChallengedVoterAffidavit,
                timestamp: Utc::now(),
                machine_id,
            },
        };
        store.apply_event(&event).await.unwrap();
    }

    #[tokio::test]
    async fn test_discovered_peer_with_same_election_connects() {
        let local = machine("pollbook-a").await;
        local
            .set_election_and_voters(&election("general-2024"), &[])
            .await
            .unwrap();
        let remote = machine("pollbook-b").await;
        remote
            .set_election_and_voters(&election("general-2024"), &[])
            .await
            .unwrap();

        let node = PollbookNode::new(Arc::clone(&local));
        node.peer_discovered(
            "pollbook-b.local",
            Arc::new(StoreClient {
                store: Arc::clone(&remote),
            }),
        )
        .await
        .unwrap();

        assert_eq!(
            node.registry().status_of(remote.machine_id()),
            Some(ConnectionStatus::Connected)
        );

        check_in(&remote, "bob").await;
        assert_eq!(node.engine().sync_all().await, 1);
        assert_eq!(local.event_log_len().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_discovered_peer_with_other_election_is_quarantined() {
        let local = machine("pollbook-a").await;
        local
            .set_election_and_voters(&election("general-2024"), &[])
            .await
            .unwrap();
        let remote = machine("pollbook-b").await;
        remote
            .set_election_and_voters(&election("primary-2024"), &[])
            .await
            .unwrap();

        let node = PollbookNode::new(Arc::clone(&local));
        node.peer_discovered(
            "pollbook-b.local",
            Arc::new(StoreClient {
                store: Arc::clone(&remote),
            }),
        )
        .await
        .unwrap();

        assert_eq!(
            node.registry().status_of(remote.machine_id()),
            Some(ConnectionStatus::WrongElection)
        );
        assert!(node.registry().connected().is_empty());
    }

    #[tokio::test]
    async fn test_unconfigured_local_machine_connects_no_one() {
        let local = machine("pollbook-a").await;
        let remote = machine("pollbook-b").await;
        remote
            .set_election_and_voters(&election("general-2024"), &[])
            .await
            .unwrap();

        let node = PollbookNode::new(Arc::clone(&local));
        node.peer_discovered(
            "pollbook-b.local",
            Arc::new(StoreClient {
                store: Arc::clone(&remote),
            }),
        )
        .await
        .unwrap();

        assert!(node.registry().connected().is_empty());
    }

    #[tokio::test]
    async fn test_start_serves_peer_api_on_listen_addr() {
        let local = machine("pollbook-a").await;
        let node = PollbookNode::with_config(
            Arc::clone(&local),
            NodeConfig {
                listen_addr: ([127, 0, 0, 1], 0).into(),
                ..NodeConfig::default()
            },
        );
        let addr = node.start().await.unwrap();

        let client =
            crate::http::HttpPeerClient::new(format!("http://{addr}"), Duration::from_secs(5))
                .unwrap();
        let info = client.machine_info().await.unwrap();
        assert_eq!(info.machine_id.as_str(), "pollbook-a");

        node.shutdown();
    }

    #[tokio::test]
    async fn test_network_status_reports_peers() {
        let local = machine("pollbook-a").await;
        let node = PollbookNode::new(Arc::clone(&local));
        node.peer_shut_down(&MachineId::from("pollbook-b"));

        let status = node.network_status().await.unwrap();
        assert_eq!(status.machine_id.as_str(), "pollbook-a");
        assert!(status.configured_election_id.is_none());
        assert_eq!(status.peers.len(), 1);
        assert_eq!(status.peers[0].status, ConnectionStatus::ShutDown);
    }
}
