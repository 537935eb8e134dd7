//! Remote peer surface
//!
//! Transports implement this trait; the sync engine and registry only
//! ever talk through it, so tests can swap in loopback clients.

use async_trait::async_trait;

use pollbook_core::{EventPage, HlcTimestamp, MachineInfo, PollbookResult};

/// Client half of the peer-to-peer protocol.
///
/// `get_new_events` is the only replication primitive: one page of
/// events strictly after `since`, in timestamp order. `machine_info`
/// answers who a peer is and which election it is configured for.
#[async_trait]
pub trait PeerClient: Send + Sync {
    async fn machine_info(&self) -> PollbookResult<MachineInfo>;

    async fn get_new_events(&self, since: &HlcTimestamp) -> PollbookResult<EventPage>;
}
