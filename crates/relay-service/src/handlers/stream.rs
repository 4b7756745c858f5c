//! Streaming handshake handler.

use crate::errors::RelayError;
use crate::middleware::admission::SlotRetained;
use crate::models::Session;
use crate::routes::AppState;
use crate::stream::{socket, ConnectionHandle, HandshakeMetadata};
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::response::Response;
use axum::Extension;
use serde::Deserialize;
use std::sync::Arc;
use tracing::instrument;

/// Query parameters accepted on the upgrade request.
#[derive(Debug, Deserialize)]
pub struct StreamQuery {
    /// Fallback for clients that cannot set the `context-id` header.
    pub context_id: Option<String>,
}

/// Upgrade to a WebSocket bound to a previously issued slot.
///
/// The slot is bound before the upgrade response is sent, so a rejected
/// handshake is an ordinary HTTP error and the connection is never opened.
///
/// When the route sits behind admission (the request-scoped policy), the slot
/// admitted on this very request is bound and any presented context id is
/// ignored. The connection then owns that slot until it closes.
///
/// # Errors
///
/// - `RelayError::BadRequest` if no parsable context id was presented
/// - `RelayError::HandshakeRejected` if the slot is not pending
#[instrument(skip_all, name = "relay.handler.stream")]
pub async fn stream_upgrade(
    State(state): State<Arc<AppState>>,
    Query(query): Query<StreamQuery>,
    headers: HeaderMap,
    admitted: Option<Extension<Session>>,
    ws: WebSocketUpgrade,
) -> Result<Response, RelayError> {
    let metadata = match &admitted {
        Some(Extension(session)) => HandshakeMetadata::new(Some(session.slot.to_string())),
        None => HandshakeMetadata::from_request(&headers, query.context_id),
    };
    let (connection, outbound) = ConnectionHandle::new();

    let bound = state.hooks.on_connect(&metadata, connection).await?;

    let hooks = Arc::clone(&state.hooks);
    let shutdown = state.shutdown.child_token();
    let mut response = ws.on_upgrade(move |upgraded| {
        socket::run_connection(upgraded, bound, outbound, hooks, shutdown)
    });
    if admitted.is_some() {
        response.extensions_mut().insert(SlotRetained);
    }
    Ok(response)
}
