//! Peer readiness endpoints: one-shot announcements and persistent links.

use axum::{
    Json,
    extract::{
        State,
        ws::{Message, WebSocketUpgrade},
    },
    http::HeaderMap,
    response::Response,
};

use conclave_common::constants::headers::X_NODE_ID;
use conclave_common::{ConclaveError, TunnelAck};

use super::ApiError;
use crate::cluster::drive_link;
use crate::state::AppState;

/// Caller's node id from the `X-Node-ID` header, if present and non-empty
fn caller_id(headers: &HeaderMap) -> Option<String> {
    headers
        .get(X_NODE_ID)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(str::to_string)
}

/// `POST /tunnel/ready` - a peer announces it is alive
pub async fn tunnel_ready(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<TunnelAck>, ApiError> {
    let peer_id = caller_id(&headers).ok_or_else(|| {
        ConclaveError::InvalidInput(format!("missing {} header", X_NODE_ID))
    })?;

    state.announce_ready(&peer_id).await;
    Ok(Json(TunnelAck::acknowledged()))
}

/// `GET /ws` - upgrade to a persistent link that receives chain broadcasts.
///
/// A handshake carrying `X-Node-ID` also counts as a readiness announcement.
pub async fn ws_upgrade(
    State(state): State<AppState>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    let peer_id = caller_id(&headers);
    if let Some(ref id) = peer_id {
        state.announce_ready(id).await;
    }

    ws.on_upgrade(move |socket| async move {
        let label = peer_id.unwrap_or_else(|| "anonymous".to_string());
        let (link_id, queue) = state.attach_link(None).await;
        tracing::info!(link = link_id, peer = %label, "🔗 Inbound link established");

        drive_link(
            socket,
            queue,
            |payload: String| Message::Text(payload.into()),
            state.subscribe_shutdown(),
            &label,
        )
        .await;

        state.detach_link(link_id).await;
    })
}
