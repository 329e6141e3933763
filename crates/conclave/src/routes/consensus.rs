//! Quorum, identity and peer-discovery endpoints.

use axum::{
    Json,
    extract::{Query, State},
};
use serde::Deserialize;

use conclave_common::{ConclaveError, ConsensusResponse, PeerAddress, PeersResponse, ReadyStatus};

use super::ApiError;
use crate::state::AppState;

/// `GET /ready` - has the group formed?
pub async fn ready(State(state): State<AppState>) -> Json<ReadyStatus> {
    Json(ReadyStatus {
        ready: state.quorum_reached().await,
    })
}

/// `GET /consensus` - current chain, proof and (after quorum) a fresh credential
pub async fn consensus(State(state): State<AppState>) -> Json<ConsensusResponse> {
    Json(state.consensus().await)
}

/// `GET /peers` - readiness set snapshot
pub async fn peers(State(state): State<AppState>) -> Json<PeersResponse> {
    Json(PeersResponse {
        peers: state.ready_peers().await,
    })
}

#[derive(Deserialize)]
pub struct AddPeerQuery {
    host: Option<String>,
    port: Option<String>,
}

/// `GET|POST /addPeer?host=H&port=P` - register a peer for outbound gossip
pub async fn add_peer(
    State(state): State<AppState>,
    Query(params): Query<AddPeerQuery>,
) -> Result<&'static str, ApiError> {
    let (Some(host), Some(port)) = (
        params.host.filter(|h| !h.trim().is_empty()),
        params.port.filter(|p| !p.trim().is_empty()),
    ) else {
        return Err(ConclaveError::InvalidInput("Missing host or port parameter.".to_string()).into());
    };

    let port = port
        .trim()
        .parse::<u16>()
        .map_err(|_| ConclaveError::InvalidInput(format!("Invalid port '{}'.", port)))?;

    state.add_peer(PeerAddress::tcp(host.trim(), port)).await;
    Ok("Peer added.")
}
