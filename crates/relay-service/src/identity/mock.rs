//! In-memory identity provider for tests and local runs.

use super::IdentityProvider;
use crate::errors::RelayError;
use crate::models::{UserId, UserSession};
use secrecy::{ExposeSecret, SecretString};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Resolves credentials from a fixed table.
#[derive(Debug, Default)]
pub struct StaticIdentityProvider {
    /// credential → user session
    users: HashMap<String, UserSession>,
    /// Number of lookups made.
    call_count: AtomicUsize,
    /// Whether to fail every lookup as unavailable.
    unavailable: bool,
}

impl StaticIdentityProvider {
    /// Create a provider that knows no credentials.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Map `credential` to `user_id`.
    #[must_use]
    pub fn with_user(mut self, credential: &str, user_id: &str) -> Self {
        self.users.insert(
            credential.to_string(),
            UserSession {
                user_id: UserId::new(user_id),
                session_id: format!("static-{user_id}"),
            },
        );
        self
    }

    /// Create a provider whose identity service is down.
    #[must_use]
    pub fn unavailable() -> Self {
        Self {
            unavailable: true,
            ..Self::default()
        }
    }

    /// Get the number of lookups made.
    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl IdentityProvider for StaticIdentityProvider {
    async fn authenticate(
        &self,
        credential: &SecretString,
    ) -> Result<Option<UserSession>, RelayError> {
        self.call_count.fetch_add(1, Ordering::SeqCst);

        if self.unavailable {
            return Err(RelayError::ServiceUnavailable(
                "static identity provider marked unavailable".to_string(),
            ));
        }

        Ok(self.users.get(credential.expose_secret()).cloned())
    }
}
