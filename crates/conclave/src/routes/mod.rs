//! HTTP route handlers for the Conclave node.
//!
//! The same router is served on the local-domain socket and, when enabled,
//! on the TCP port.

use axum::{
    Router,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use tower_http::trace::TraceLayer;

use conclave_common::ConclaveError;
use conclave_common::constants::routes as paths;

use crate::state::AppState;

mod consensus;
mod tunnel;

/// Create the main application router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Peer readiness
        .route(paths::TUNNEL_READY, post(tunnel::tunnel_ready))
        .route(paths::WS, get(tunnel::ws_upgrade))

        // Quorum & identity
        .route(paths::READY, get(consensus::ready))
        .route(paths::CONSENSUS, get(consensus::consensus))
        .route(paths::PEERS, get(consensus::peers))

        // Dynamic peer discovery
        .route(paths::ADD_PEER, get(consensus::add_peer).post(consensus::add_peer))

        .fallback(not_found)
        .method_not_allowed_fallback(not_found)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn not_found() -> (StatusCode, &'static str) {
    (StatusCode::NOT_FOUND, "Not found")
}

/// Handler error: status from [`ConclaveError::status_code`], message as text body
#[derive(Debug)]
pub struct ApiError(pub ConclaveError);

impl From<ConclaveError> for ApiError {
    fn from(err: ConclaveError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.0.status_code())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if status.is_server_error() {
            tracing::error!(error = %self.0, "Request failed");
        } else {
            tracing::debug!(error = %self.0, "Rejected request");
        }
        (status, self.0.to_string()).into_response()
    }
}
