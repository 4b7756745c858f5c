//! Outbound side of a streaming connection.
//!
//! A `ConnectionHandle` is the cheap, cloneable reference the registry keeps in
//! the fan-out index. The socket task owns the matching receiver and is the only
//! place a connection is torn down.

use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Outbound queue depth per connection.
///
/// Emit never waits: once a client falls this far behind, further events
/// for it are counted as delivery failures.
pub const CONNECTION_CHANNEL_BUFFER: usize = 64;

/// Unique identifier for a live streaming connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An event as written to the wire: `{"event": <name>, "payload": <value>}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StreamEvent {
    pub event: String,
    pub payload: serde_json::Value,
}

impl StreamEvent {
    pub fn new(event: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            event: event.into(),
            payload,
        }
    }
}

/// Why an emit did not reach a connection's queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DeliveryError {
    #[error("outbound queue full")]
    QueueFull,

    #[error("connection closed")]
    Closed,
}

impl DeliveryError {
    /// Label value for delivery-failure metrics.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            DeliveryError::QueueFull => "queue_full",
            DeliveryError::Closed => "closed",
        }
    }
}

/// Cloneable sending half of a streaming connection.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: ConnectionId,
    sender: mpsc::Sender<Arc<StreamEvent>>,
}

impl ConnectionHandle {
    /// Create a handle and the receiver the socket task drains.
    #[must_use]
    pub fn new() -> (Self, mpsc::Receiver<Arc<StreamEvent>>) {
        let (sender, receiver) = mpsc::channel(CONNECTION_CHANNEL_BUFFER);
        let handle = Self {
            id: ConnectionId::new(),
            sender,
        };
        (handle, receiver)
    }

    #[must_use]
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Enqueue an event without waiting.
    pub fn emit(&self, event: Arc<StreamEvent>) -> Result<(), DeliveryError> {
        self.sender.try_send(event).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => DeliveryError::QueueFull,
            mpsc::error::TrySendError::Closed(_) => DeliveryError::Closed,
        })
    }

    /// True once the socket task has dropped its receiver.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

impl PartialEq for ConnectionHandle {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for ConnectionHandle {}
