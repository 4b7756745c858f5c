//! Message types for the registry actor.
//!
//! Every operation on the slot pool is a `RegistryMessage` variant sent over the
//! actor's `mpsc` mailbox. Replies come back on a per-call `oneshot` channel.

use crate::models::{Session, SessionKey, SlotId, UserId, UserSession};
use crate::stream::connection::{ConnectionHandle, ConnectionId};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::Instant;

/// Messages sent to the `RegistryActor`.
#[derive(Debug)]
pub enum RegistryMessage {
    /// Take a free slot for an authenticated request.
    Acquire {
        user: UserSession,
        respond_to: oneshot::Sender<AcquireResult>,
    },

    /// Attach a streaming connection to a pending slot.
    Bind {
        slot: SlotId,
        connection: ConnectionHandle,
        respond_to: oneshot::Sender<BindResult>,
    },

    /// Return a slot to the free set.
    Release {
        key: SessionKey,
        /// Connection the caller believes holds the slot, if bound.
        connection: Option<ConnectionId>,
        reason: ReleaseReason,
        /// `None` for fire-and-forget releases.
        respond_to: Option<oneshot::Sender<()>>,
    },

    /// Resolve a user's bound connections.
    Lookup {
        user_id: UserId,
        respond_to: oneshot::Sender<Vec<ConnectionHandle>>,
    },

    /// Free pending sessions older than `max_pending_age`. No reply.
    Reclaim {
        now: Instant,
        max_pending_age: Duration,
    },

    /// Read-only snapshot for health checks.
    GetStatus {
        respond_to: oneshot::Sender<RegistryStatus>,
    },
}

/// Result of an Acquire.
#[derive(Debug, Clone)]
pub enum AcquireResult {
    Acquired(Session),
    Exhausted,
}

/// Result of a Bind.
#[derive(Debug, Clone)]
pub enum BindResult {
    Bound(Session),
    NotFound,
}

/// Why a slot is being released.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseReason {
    /// Admitting request finished under the request-scoped policy.
    RequestComplete,
    /// Streaming connection closed.
    Disconnect,
    /// Bound connection dropped without an explicit release.
    Abandoned,
}

impl ReleaseReason {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            ReleaseReason::RequestComplete => "request_complete",
            ReleaseReason::Disconnect => "disconnect",
            ReleaseReason::Abandoned => "abandoned",
        }
    }
}

/// Registry snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegistryStatus {
    pub capacity: u32,
    pub free: usize,
    pub pending: usize,
    pub bound: usize,
    /// Distinct users with at least one bound connection.
    pub users: usize,
    /// Messages queued behind the status request.
    pub mailbox_depth: usize,
}
