//! Admission middleware.
//!
//! Authenticates the caller, takes a session slot, and exposes the slot id in
//! the `context-id` response header. The wrapped handler finds the `Session`
//! in request extensions. Once it returns, the deployment's release policy
//! decides whether the slot is released now or left for the streaming leg.
//! A handler that has bound the slot itself marks its response with
//! [`SlotRetained`], and the slot is then left to the connection.

use super::auth::AuthState;
use crate::config::ReleasePolicy;
use crate::errors::RelayError;
use crate::models::CONTEXT_ID_HEADER;
use crate::observability::metrics;
use crate::registry::{AcquireResult, RegistryHandle, ReleaseReason};
use axum::{
    extract::{Request, State},
    http::HeaderValue,
    middleware::Next,
    response::Response,
};
use std::sync::Arc;
use tracing::{debug, instrument, warn};

/// Response extension set by a handler that took ownership of the admitted
/// slot (a stream bound on the admitting request). Suppresses the
/// request-scoped release.
#[derive(Debug, Clone, Copy)]
pub struct SlotRetained;

/// State for the admission middleware.
#[derive(Clone)]
pub struct AdmissionState {
    pub auth: AuthState,
    pub registry: RegistryHandle,
    pub policy: ReleasePolicy,
}

/// Admission control for slot-issuing routes.
///
/// # Response
///
/// - 403 if the caller cannot be authenticated
/// - 429 if every slot is outstanding (handler not run, nothing held)
/// - Otherwise the handler's response with a `context-id` header
#[instrument(skip_all, name = "relay.middleware.admission")]
pub async fn admit(
    State(state): State<Arc<AdmissionState>>,
    mut req: Request,
    next: Next,
) -> Result<Response, RelayError> {
    let user = state.auth.authenticate(req.headers()).await.map_err(|e| {
        let reason = match e {
            RelayError::ServiceUnavailable(_) => "identity_unavailable",
            _ => "unauthenticated",
        };
        metrics::record_admission_rejected(reason);
        e
    })?;

    let session = match state.registry.acquire(user).await? {
        AcquireResult::Acquired(session) => session,
        AcquireResult::Exhausted => {
            metrics::record_admission_rejected("exhausted");
            return Err(RelayError::SessionsExhausted);
        }
    };

    let key = session.key();
    debug!(
        target: "relay.middleware.admission",
        slot = %session.slot,
        user_id = %session.user_id(),
        policy = %state.policy,
        "Request admitted"
    );

    req.extensions_mut().insert(session);
    let mut response = next.run(req).await;

    response
        .headers_mut()
        .insert(CONTEXT_ID_HEADER, HeaderValue::from(key.slot.get()));

    let retained = response.extensions().get::<SlotRetained>().is_some();
    if state.policy == ReleasePolicy::RequestScoped && !retained {
        if let Err(e) = state
            .registry
            .release(key, None, ReleaseReason::RequestComplete)
            .await
        {
            warn!(
                target: "relay.middleware.admission",
                slot = %key.slot,
                error = %e,
                "Failed to release request-scoped slot"
            );
        }
    }

    Ok(response)
}
