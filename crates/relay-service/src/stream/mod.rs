//! Streaming connections.
//!
//! The transport (axum WebSocket upgrades) talks to the registry only through
//! [`StreamHooks`]: `on_connect` turns handshake metadata into a bound
//! connection, `on_disconnect` gives it back.

pub mod binder;
pub mod connection;
pub mod socket;

pub use binder::{BoundConnection, HandshakeBinder};
pub use connection::{ConnectionHandle, ConnectionId, DeliveryError, StreamEvent};

use crate::errors::RelayError;
use crate::models::CONTEXT_ID_HEADER;
use axum::http::HeaderMap;

/// What the remote side presented when opening a stream.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HandshakeMetadata {
    context_id: Option<String>,
}

impl HandshakeMetadata {
    #[must_use]
    pub fn new(context_id: Option<String>) -> Self {
        Self { context_id }
    }

    /// Read the slot id from the `context-id` header, falling back to the
    /// `context_id` query parameter.
    #[must_use]
    pub fn from_request(headers: &HeaderMap, query_context_id: Option<String>) -> Self {
        let header_value = headers
            .get(CONTEXT_ID_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);

        Self {
            context_id: header_value.or(query_context_id),
        }
    }

    #[must_use]
    pub fn context_id(&self) -> Option<&str> {
        self.context_id.as_deref()
    }
}

/// Connect/disconnect callbacks invoked by the streaming transport.
#[async_trait::async_trait]
pub trait StreamHooks: Send + Sync {
    /// Admit a new connection or reject the handshake.
    ///
    /// # Errors
    ///
    /// - `RelayError::BadRequest` if the metadata has no usable slot id
    /// - `RelayError::HandshakeRejected` if the slot is not pending
    async fn on_connect(
        &self,
        metadata: &HandshakeMetadata,
        connection: ConnectionHandle,
    ) -> Result<BoundConnection, RelayError>;

    /// Called exactly once when a bound connection ends.
    async fn on_disconnect(&self, bound: BoundConnection);
}
