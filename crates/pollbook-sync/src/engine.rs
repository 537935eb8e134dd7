//! Pull-based sync engine
//!
//! Each machine pulls from every connected peer on a timer. Per peer
//! it keeps a cursor, the highest event timestamp already saved from
//! that peer, and drains pages until the peer reports no more. A
//! failed or timed-out request demotes the peer and leaves the
//! cursor where it was, so the next successful pass re-covers the
//! interrupted page.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::timeout;

use pollbook_core::{HlcTimestamp, MachineId, PollbookError, PollbookResult};
use pollbook_store::Store;

use crate::client::PeerClient;
use crate::peers::PeerRegistry;

/// Default bound on one `get_new_events` round trip.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Replication driver for one machine.
pub struct SyncEngine {
    store: Arc<Store>,
    registry: Arc<PeerRegistry>,
    cursors: Mutex<HashMap<MachineId, HlcTimestamp>>,
    request_timeout: Duration,
}

impl SyncEngine {
    pub fn new(store: Arc<Store>, registry: Arc<PeerRegistry>) -> Self {
        Self::with_timeout(store, registry, DEFAULT_REQUEST_TIMEOUT)
    }

    pub fn with_timeout(
        store: Arc<Store>,
        registry: Arc<PeerRegistry>,
        request_timeout: Duration,
    ) -> Self {
        SyncEngine {
            store,
            registry,
            cursors: Mutex::new(HashMap::new()),
            request_timeout,
        }
    }

    pub fn registry(&self) -> &Arc<PeerRegistry> {
        &self.registry
    }

    /// Cursor for `peer`, starting from the zero timestamp for peers
    /// never synced before so their whole log is pulled.
    fn cursor_for(&self, peer: &MachineId) -> HlcTimestamp {
        self.cursors
            .lock()
            .get(peer)
            .cloned()
            .unwrap_or_else(|| HlcTimestamp::zero(self.store.machine_id().clone()))
    }

    fn store_cursor(&self, peer: &MachineId, cursor: HlcTimestamp) {
        self.cursors.lock().insert(peer.clone(), cursor);
    }

    /// One sync pass over every connected peer. Each peer is drained
    /// on its own task so a slow peer never stalls the others.
    /// Per-peer failures are absorbed: the peer is demoted and the
    /// error logged. Returns the number of events newly applied.
    pub async fn sync_all(self: &Arc<Self>) -> usize {
        let mut tasks = Vec::new();
        for (peer, client) in self.registry.connected() {
            let engine = Arc::clone(self);
            tasks.push(tokio::spawn(async move {
                match engine.sync_peer(&peer, client.as_ref()).await {
                    Ok(applied) => applied,
                    Err(err) => {
                        tracing::warn!(peer = %peer, error = %err, "sync pass failed for peer");
                        0
                    }
                }
            }));
        }
        let mut total = 0;
        for task in tasks {
            total += task.await.unwrap_or(0);
        }
        total
    }

    /// Drain `peer` from its cursor to the end of its log. Returns
    /// the number of events newly applied.
    pub async fn sync_peer(
        &self,
        peer: &MachineId,
        client: &dyn PeerClient,
    ) -> PollbookResult<usize> {
        let mut cursor = self.cursor_for(peer);
        let mut applied = 0usize;
        loop {
            let page = match timeout(self.request_timeout, client.get_new_events(&cursor)).await {
                Ok(Ok(page)) => page,
                Ok(Err(err)) => {
                    self.registry.mark_lost(peer);
                    return Err(err);
                }
                Err(_) => {
                    self.registry.mark_lost(peer);
                    return Err(PollbookError::PeerTimeout);
                }
            };

            self.registry.touch(peer);
            let outcome = self.store.save_remote_events(&page.events, &cursor).await?;
            applied += outcome.applied;
            cursor = outcome.cursor;
            // Progress is recorded page by page; an interrupt later
            // in the drain never re-pulls pages already saved.
            self.store_cursor(peer, cursor.clone());

            if !page.has_more {
                break;
            }
        }
        if applied > 0 {
            tracing::debug!(peer = %peer, applied, "synced events from peer");
        }
        Ok(applied)
    }
}
