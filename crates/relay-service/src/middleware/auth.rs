//! Identity middleware for routes that need a caller but not a session slot.
//!
//! Reads the caller's credential (auth cookie, then Bearer header), resolves it
//! through the identity provider and stores the `UserSession` in request
//! extensions.

use crate::errors::RelayError;
use crate::identity::{extract_credential, IdentityProvider};
use crate::models::UserSession;
use axum::{
    extract::{Request, State},
    http::HeaderMap,
    middleware::Next,
    response::IntoResponse,
};
use std::sync::Arc;
use tracing::{debug, instrument};

/// State for the identity middleware.
#[derive(Clone)]
pub struct AuthState {
    /// Resolves credentials to users.
    pub identity: Arc<dyn IdentityProvider>,

    /// Cookie carrying the credential.
    pub cookie_name: String,
}

impl AuthState {
    /// Resolve the caller of a request.
    ///
    /// # Errors
    ///
    /// - `RelayError::Unauthenticated` if no credential is present or it does not resolve
    /// - `RelayError::ServiceUnavailable` if the identity service cannot answer
    pub async fn authenticate(&self, headers: &HeaderMap) -> Result<UserSession, RelayError> {
        let credential = extract_credential(headers, &self.cookie_name).ok_or_else(|| {
            debug!(target: "relay.middleware.auth", "Missing credential");
            RelayError::Unauthenticated("Missing credential".to_string())
        })?;

        self.identity
            .authenticate(&credential)
            .await?
            .ok_or_else(|| {
                debug!(target: "relay.middleware.auth", "Credential did not resolve to a user");
                RelayError::Unauthenticated("Invalid or expired credential".to_string())
            })
    }
}

/// Rejects unauthenticated requests with 403; otherwise continues with the
/// caller's `UserSession` in extensions.
#[instrument(skip_all, name = "relay.middleware.auth")]
pub async fn require_identity(
    State(state): State<Arc<AuthState>>,
    mut req: Request,
    next: Next,
) -> Result<impl IntoResponse, RelayError> {
    let user = state.authenticate(req.headers()).await?;

    req.extensions_mut().insert(user);

    Ok(next.run(req).await)
}
