//! Handshake binder: turns a streaming handshake into a bound session.

use super::connection::ConnectionHandle;
use super::{HandshakeMetadata, StreamHooks};
use crate::errors::RelayError;
use crate::models::{Session, SlotId};
use crate::observability::metrics;
use crate::registry::{BindResult, RegistryHandle, ReleaseReason};
use tracing::{debug, info, instrument, warn};

/// `StreamHooks` implementation backed by the session registry.
#[derive(Clone)]
pub struct HandshakeBinder {
    registry: RegistryHandle,
}

impl HandshakeBinder {
    #[must_use]
    pub fn new(registry: RegistryHandle) -> Self {
        Self { registry }
    }
}

#[async_trait::async_trait]
impl StreamHooks for HandshakeBinder {
    #[instrument(skip_all, name = "relay.stream.on_connect", fields(connection_id = %connection.id()))]
    async fn on_connect(
        &self,
        metadata: &HandshakeMetadata,
        connection: ConnectionHandle,
    ) -> Result<BoundConnection, RelayError> {
        let Some(raw) = metadata.context_id() else {
            metrics::record_handshake("malformed");
            debug!(target: "relay.stream.binder", "Handshake without context id");
            return Err(RelayError::BadRequest("Missing context id".to_string()));
        };

        let slot: SlotId = raw.parse().map_err(|_| {
            metrics::record_handshake("malformed");
            debug!(target: "relay.stream.binder", "Handshake with unparsable context id");
            RelayError::BadRequest("Invalid context id".to_string())
        })?;

        match self.registry.bind(slot, connection.clone()).await? {
            BindResult::Bound(session) => {
                metrics::record_handshake("bound");
                info!(
                    target: "relay.stream.binder",
                    slot = %slot,
                    user_id = %session.user_id(),
                    "Stream handshake accepted"
                );
                Ok(BoundConnection {
                    session,
                    connection,
                    registry: self.registry.clone(),
                    released: false,
                })
            }
            BindResult::NotFound => {
                metrics::record_handshake("rejected");
                info!(
                    target: "relay.stream.binder",
                    slot = %slot,
                    "Stream handshake rejected, context id not pending"
                );
                Err(RelayError::HandshakeRejected(
                    "Unknown or expired context id".to_string(),
                ))
            }
        }
    }

    async fn on_disconnect(&self, bound: BoundConnection) {
        bound.release().await;
    }
}

/// A connection that holds a bound slot.
///
/// Consumed by [`BoundConnection::release`]. Dropping it unreleased (an upgrade
/// that never completed, a panicked socket task) queues the release instead.
pub struct BoundConnection {
    session: Session,
    connection: ConnectionHandle,
    registry: RegistryHandle,
    released: bool,
}

impl BoundConnection {
    #[must_use]
    pub fn session(&self) -> &Session {
        &self.session
    }

    #[must_use]
    pub fn connection(&self) -> &ConnectionHandle {
        &self.connection
    }

    /// Give the slot back and wait for the registry to apply it.
    pub async fn release(mut self) {
        self.released = true;
        let result = self
            .registry
            .release(
                self.session.key(),
                Some(self.connection.id()),
                ReleaseReason::Disconnect,
            )
            .await;

        if let Err(e) = result {
            warn!(
                target: "relay.stream.binder",
                slot = %self.session.slot,
                error = %e,
                "Failed to release slot on disconnect"
            );
        }
    }
}

impl Drop for BoundConnection {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        debug!(
            target: "relay.stream.binder",
            slot = %self.session.slot,
            "Bound connection dropped without release"
        );
        self.registry.release_detached(
            self.session.key(),
            Some(self.connection.id()),
            ReleaseReason::Abandoned,
        );
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::models::{UserId, UserSession};
    use crate::registry::AcquireResult;

    async fn pending_slot(registry: &RegistryHandle, user_id: &str) -> SlotId {
        let user = UserSession {
            user_id: UserId::new(user_id),
            session_id: "s".to_string(),
        };
        match registry.acquire(user).await.unwrap() {
            AcquireResult::Acquired(session) => session.slot,
            AcquireResult::Exhausted => panic!("expected a free slot"),
        }
    }

    fn metadata(context_id: &str) -> HandshakeMetadata {
        HandshakeMetadata::new(Some(context_id.to_string()))
    }

    #[tokio::test]
    async fn test_connect_binds_and_disconnect_releases() {
        let registry = RegistryHandle::new(4);
        let binder = HandshakeBinder::new(registry.clone());
        let slot = pending_slot(&registry, "u1").await;
        let (conn, _rx) = ConnectionHandle::new();

        let bound = binder
            .on_connect(&metadata(&slot.to_string()), conn.clone())
            .await
            .unwrap();
        assert_eq!(bound.session().slot, slot);
        assert_eq!(bound.connection(), &conn);
        assert_eq!(registry.lookup(UserId::new("u1")).await.unwrap(), vec![conn]);

        binder.on_disconnect(bound).await;

        assert!(registry.lookup(UserId::new("u1")).await.unwrap().is_empty());
        let status = registry.status().await.unwrap();
        assert_eq!(status.free, 4);
    }

    #[tokio::test]
    async fn test_missing_context_id_is_bad_request() {
        let registry = RegistryHandle::new(1);
        let binder = HandshakeBinder::new(registry.clone());
        let (conn, _rx) = ConnectionHandle::new();

        let result = binder.on_connect(&HandshakeMetadata::default(), conn).await;
        assert!(matches!(result, Err(RelayError::BadRequest(_))));
    }

    #[tokio::test]
    async fn test_unparsable_context_id_is_bad_request() {
        let registry = RegistryHandle::new(1);
        let binder = HandshakeBinder::new(registry.clone());
        pending_slot(&registry, "u1").await;
        let (conn, _rx) = ConnectionHandle::new();

        let result = binder.on_connect(&metadata("one"), conn).await;
        assert!(matches!(result, Err(RelayError::BadRequest(_))));

        for raw in ["+1", " 1", "1 "] {
            let (conn, _rx) = ConnectionHandle::new();
            let result = binder.on_connect(&metadata(raw), conn).await;
            assert!(matches!(result, Err(RelayError::BadRequest(_))), "accepted {raw:?}");
        }

        let status = registry.status().await.unwrap();
        assert_eq!(status.pending, 1);
    }

    #[tokio::test]
    async fn test_unknown_slot_is_rejected() {
        let registry = RegistryHandle::new(3);
        let binder = HandshakeBinder::new(registry.clone());
        let (conn, _rx) = ConnectionHandle::new();

        let result = binder.on_connect(&metadata("2"), conn).await;
        assert!(matches!(result, Err(RelayError::HandshakeRejected(_))));
    }

    #[tokio::test]
    async fn test_slot_cannot_be_bound_twice() {
        let registry = RegistryHandle::new(2);
        let binder = HandshakeBinder::new(registry.clone());
        let slot = pending_slot(&registry, "u1").await;
        let (first, _r1) = ConnectionHandle::new();
        let (second, _r2) = ConnectionHandle::new();

        let _bound = binder
            .on_connect(&metadata(&slot.to_string()), first)
            .await
            .unwrap();
        let result = binder
            .on_connect(&metadata(&slot.to_string()), second)
            .await;

        assert!(matches!(result, Err(RelayError::HandshakeRejected(_))));
        assert_eq!(registry.lookup(UserId::new("u1")).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_dropped_binding_is_released() {
        let registry = RegistryHandle::new(2);
        let binder = HandshakeBinder::new(registry.clone());
        let slot = pending_slot(&registry, "u1").await;
        let (conn, _rx) = ConnectionHandle::new();

        let bound = binder
            .on_connect(&metadata(&slot.to_string()), conn)
            .await
            .unwrap();
        drop(bound);

        // The detached release is queued ahead of this status request.
        let status = registry.status().await.unwrap();
        assert_eq!(status.free, 2);
        assert_eq!(status.bound, 0);
        assert!(registry.lookup(UserId::new("u1")).await.unwrap().is_empty());
    }
}
