//! HTTP client for the identity service.
//!
//! Calls `GET {base_url}/v1/session` with the caller's credential as a Bearer
//! token. Errors are logged server-side; callers only see whether the
//! credential resolved and whether the service was reachable.

use super::IdentityProvider;
use crate::errors::RelayError;
use crate::models::UserSession;
use reqwest::{Client, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use std::time::Duration;
use tracing::{error, instrument, warn};

/// Timeout for identity lookups in seconds.
const IDENTITY_REQUEST_TIMEOUT_SECS: u64 = 5;

/// Connect timeout for identity lookups in seconds.
const IDENTITY_CONNECT_TIMEOUT_SECS: u64 = 2;

/// `IdentityProvider` backed by the identity service's HTTP API.
#[derive(Clone)]
pub struct HttpIdentityProvider {
    client: Client,
    base_url: String,
}

impl HttpIdentityProvider {
    /// Create a client for the identity service at `base_url`.
    ///
    /// # Errors
    ///
    /// Returns `RelayError::Internal` if the HTTP client cannot be built.
    pub fn new(base_url: String) -> Result<Self, RelayError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(IDENTITY_REQUEST_TIMEOUT_SECS))
            .connect_timeout(Duration::from_secs(IDENTITY_CONNECT_TIMEOUT_SECS))
            .build()
            .map_err(|e| {
                error!(target: "relay.identity", error = %e, "Failed to build HTTP client");
                RelayError::Internal(format!("failed to build identity client: {e}"))
            })?;

        Ok(Self { client, base_url })
    }
}

#[async_trait::async_trait]
impl IdentityProvider for HttpIdentityProvider {
    #[instrument(skip_all, name = "relay.identity.authenticate")]
    async fn authenticate(
        &self,
        credential: &SecretString,
    ) -> Result<Option<UserSession>, RelayError> {
        let url = format!("{}/v1/session", self.base_url);

        let response = self
            .client
            .get(&url)
            .bearer_auth(credential.expose_secret())
            .send()
            .await
            .map_err(|e| {
                warn!(target: "relay.identity", error = %e, "Identity request failed");
                RelayError::ServiceUnavailable("Identity service is unavailable".to_string())
            })?;

        let status = response.status();

        if status.is_success() {
            let session = response.json::<UserSession>().await.map_err(|e| {
                error!(target: "relay.identity", error = %e, "Failed to parse identity response");
                RelayError::Internal(format!("malformed identity response: {e}"))
            })?;
            Ok(Some(session))
        } else if matches!(
            status,
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN | StatusCode::NOT_FOUND
        ) {
            Ok(None)
        } else if status.is_server_error() {
            warn!(target: "relay.identity", status = %status, "Identity service returned server error");
            Err(RelayError::ServiceUnavailable(
                "Identity service is unavailable".to_string(),
            ))
        } else {
            warn!(target: "relay.identity", status = %status, "Unexpected identity response");
            Err(RelayError::Internal(format!(
                "unexpected identity response status {status}"
            )))
        }
    }
}
