//! Identity collaborator.
//!
//! The relay does not verify credentials itself. It pulls the caller's
//! credential out of the request (auth cookie first, then a Bearer header) and
//! asks an [`IdentityProvider`] which user it belongs to.

mod http;
pub mod mock;

pub use http::HttpIdentityProvider;

use crate::errors::RelayError;
use crate::models::UserSession;
use axum::http::{header, HeaderMap};
use secrecy::SecretString;

/// Resolves a credential to the user session it belongs to.
#[async_trait::async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Returns `Ok(None)` when the credential is unknown, expired or revoked.
    ///
    /// # Errors
    ///
    /// `RelayError::ServiceUnavailable` when the identity service cannot answer.
    async fn authenticate(&self, credential: &SecretString)
        -> Result<Option<UserSession>, RelayError>;
}

/// Pull the caller's credential from the request headers.
///
/// The named cookie wins; an `Authorization: Bearer` header is the fallback.
#[must_use]
pub fn extract_credential(headers: &HeaderMap, cookie_name: &str) -> Option<SecretString> {
    cookie_value(headers, cookie_name)
        .or_else(|| bearer_token(headers))
        .map(|value| SecretString::from(value.to_string()))
}

fn cookie_value<'a>(headers: &'a HeaderMap, cookie_name: &str) -> Option<&'a str> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == cookie_name)
        .map(|(_, value)| value.trim().trim_matches('"'))
        .filter(|value| !value.is_empty())
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
}
