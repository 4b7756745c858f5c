//! Notification send handler.

use crate::errors::RelayError;
use crate::models::{MessageResponse, NotificationRequest, UserSession};
use crate::routes::AppState;
use crate::stream::StreamEvent;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::{Extension, Json};
use std::sync::Arc;
use tracing::instrument;

/// Queue an event for every stream bound to the caller.
///
/// Responds 202 as soon as the body is accepted; delivery happens in the
/// background and its outcome is not reported to the caller.
///
/// # Errors
///
/// `RelayError::BadRequest` if the body is not `{"event": string, "payload": any}`.
#[instrument(skip_all, name = "relay.handler.notification_send", fields(user_id = %user.user_id))]
pub async fn send_notification(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<UserSession>,
    body: Bytes,
) -> Result<(StatusCode, Json<MessageResponse>), RelayError> {
    let request: NotificationRequest = serde_json::from_slice(&body).map_err(|e| {
        tracing::debug!(target: "relay.handler.notification_send", error = %e, "Malformed notification");
        RelayError::BadRequest("Malformed notification body".to_string())
    })?;

    state.fanout.spawn_dispatch(
        user.user_id,
        StreamEvent::new(request.event, request.payload),
    );

    Ok((
        StatusCode::ACCEPTED,
        Json(MessageResponse {
            message: "sending notifications".to_string(),
        }),
    ))
}
