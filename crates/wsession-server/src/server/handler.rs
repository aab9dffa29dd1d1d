//! HTTP handlers
//!
//! WebSocket upgrade endpoint and health check.

use axum::{
    extract::{State, WebSocketUpgrade},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::sync::Arc;

use crate::connection::ServerConnectionManager;
use crate::transport::AxumTransport;

/// axum's own message limit; ours is enforced by the reassembler
const UPGRADE_MESSAGE_LIMIT: usize = 64 << 20;

/// Upgrade to WebSocket and hand the socket to the manager
pub async fn ws_handler(
    State(manager): State<ServerConnectionManager>,
    ws: WebSocketUpgrade,
) -> Response {
    if !manager.state().can_accept_connections() {
        tracing::debug!(state = %manager.state(), "Upgrade refused");
        return (StatusCode::SERVICE_UNAVAILABLE, "WebSocket server is not ready").into_response();
    }

    let limit = manager.options().max_message_size().max(UPGRADE_MESSAGE_LIMIT);

    ws.max_message_size(limit)
        .on_upgrade(move |socket| async move {
            let transport = Arc::new(AxumTransport::new(socket));
            if let Err(e) = manager.handle_incoming_connection(transport).await {
                tracing::warn!(error = %e, "Upgraded connection was not accepted");
            }
        })
}

/// Health check endpoint
pub async fn health_check(State(manager): State<ServerConnectionManager>) -> impl IntoResponse {
    let state = manager.state();
    let status = if state.can_accept_connections() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(json!({
            "status": if status == StatusCode::OK { "ok" } else { "unavailable" },
            "state": state.as_str(),
            "connections": manager.connected_count(),
        })),
    )
}
