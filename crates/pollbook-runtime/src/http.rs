//! Peer-facing HTTP API
//!
//! Two routes, mirrored by `HttpPeerClient` on the calling side:
//! - `GET /api/machine-info` answers who this machine is and which
//!   election it runs
//! - `POST /api/get-new-events` serves one page of the event log
//!   after the caller's cursor

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use pollbook_core::{
    EventPage, HlcTimestamp, MachineInfo, PollbookError, PollbookResult,
};
use pollbook_store::Store;
use pollbook_sync::PeerClient;

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetNewEventsRequest {
    pub since: HlcTimestamp,
}

/// Build the peer API router over a shared store.
pub fn peer_api(store: Arc<Store>) -> Router {
    Router::new()
        .route("/api/machine-info", get(machine_info))
        .route("/api/get-new-events", post(get_new_events))
        .with_state(store)
}

async fn machine_info(
    State(store): State<Arc<Store>>,
) -> Result<Json<MachineInfo>, (StatusCode, String)> {
    let configured_election_id = store
        .election()
        .await
        .map_err(internal)?
        .map(|election| election.id);
    Ok(Json(MachineInfo {
        machine_id: store.machine_id().clone(),
        configured_election_id,
    }))
}

async fn get_new_events(
    State(store): State<Arc<Store>>,
    Json(request): Json<GetNewEventsRequest>,
) -> Result<Json<EventPage>, (StatusCode, String)> {
    let page = store.get_new_events(&request.since).await.map_err(internal)?;
    Ok(Json(page))
}

fn internal(err: PollbookError) -> (StatusCode, String) {
    (StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
}

/// HTTP implementation of [`PeerClient`], one instance per peer.
pub struct HttpPeerClient {
    base_url: String,
    http: reqwest::Client,
}

impl HttpPeerClient {
    /// `base_url` is e.g. `http://192.168.1.7:3002`, no trailing
    /// slash.
    pub fn new(base_url: impl Into<String>, request_timeout: Duration) -> PollbookResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| PollbookError::Peer(e.to_string()))?;
        Ok(HttpPeerClient {
            base_url: base_url.into(),
            http,
        })
    }
}

fn transport(err: reqwest::Error) -> PollbookError {
    if err.is_timeout() {
        PollbookError::PeerTimeout
    } else {
        PollbookError::Peer(err.to_string())
    }
}

#[async_trait]
impl PeerClient for HttpPeerClient {
    async fn machine_info(&self) -> PollbookResult<MachineInfo> {
        let response = self
            .http
            .get(format!("{}/api/machine-info", self.base_url))
            .send()
            .await
            .map_err(transport)?
            .error_for_status()
            .map_err(transport)?;
        response.json().await.map_err(transport)
    }

    async fn get_new_events(&self, since: &HlcTimestamp) -> PollbookResult<EventPage> {
        let response = self
            .http
            .post(format!("{}/api/get-new-events", self.base_url))
            .json(&GetNewEventsRequest {
                since: since.clone(),
            })
            .send()
            .await
            .map_err(transport)?
            .error_for_status()
            .map_err(transport)?;
        response.json().await.map_err(transport)
    }
}
