//! Session issuance handler.

use crate::models::{IssuedSessionResponse, Session};
use axum::{Extension, Json};

/// Describe the slot the admission middleware just issued.
///
/// The `context-id` header is set by the middleware; the body repeats it for
/// clients that cannot read response headers.
pub async fn issue_session(Extension(session): Extension<Session>) -> Json<IssuedSessionResponse> {
    Json(IssuedSessionResponse {
        context_id: session.slot,
        user_id: session.user.user_id,
        created_at: session.created_at,
    })
}
