//! Data models for the Notification Relay.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use tokio::time::Instant;

/// Header carrying the issued slot id, on admission responses and stream handshakes.
pub const CONTEXT_ID_HEADER: &str = "context-id";

/// Identifier of an admission slot, drawn from `[1, N]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SlotId(u32);

impl SlotId {
    #[must_use]
    pub const fn new(value: u32) -> Self {
        Self(value)
    }

    #[must_use]
    pub const fn get(self) -> u32 {
        self.0
    }
}

impl fmt::Display for SlotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A context id that is not a plain decimal slot number.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid slot id: {0:?}")]
pub struct InvalidSlotId(String);

impl FromStr for SlotId {
    type Err = InvalidSlotId;

    /// Accepts ASCII digits only: no sign, whitespace, or other decoration.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
            return Err(InvalidSlotId(s.to_string()));
        }
        s.parse().map(SlotId).map_err(|_| InvalidSlotId(s.to_string()))
    }
}

/// Authenticated user identity, as resolved by the identity service.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The identity service's view of the authenticated request.
///
/// Opaque to the relay apart from `user_id`, which keys fan-out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserSession {
    /// Owning user.
    pub user_id: UserId,

    /// Identity-service session identifier.
    pub session_id: String,
}

/// Identifies one specific issuance of a slot.
///
/// Slots are reused, so the slot id alone cannot tell a live session apart
/// from an earlier one that was reclaimed and re-issued; the generation can.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionKey {
    pub slot: SlotId,
    pub generation: u64,
}

/// A session created when a slot moves from free to pending.
#[derive(Debug, Clone)]
pub struct Session {
    /// Slot this session occupies.
    pub slot: SlotId,

    /// Issuance counter, unique for the lifetime of the registry.
    pub generation: u64,

    /// User session of the admitting request.
    pub user: UserSession,

    /// Wall-clock creation time (reported to clients).
    pub created_at: DateTime<Utc>,

    /// Monotonic acquisition time (used for reclaim).
    pub acquired_at: Instant,
}

impl Session {
    #[must_use]
    pub fn key(&self) -> SessionKey {
        SessionKey {
            slot: self.slot,
            generation: self.generation,
        }
    }

    #[must_use]
    pub fn user_id(&self) -> &UserId {
        &self.user.user_id
    }
}

/// Response body for a successful admission (`POST /v1/session`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IssuedSessionResponse {
    /// Slot id to echo back in the streaming handshake.
    pub context_id: SlotId,

    /// User the slot was issued to.
    pub user_id: UserId,

    /// When the slot was issued.
    pub created_at: DateTime<Utc>,
}

/// Request body for `POST /v1/notification/send`.
#[derive(Debug, Clone, Deserialize)]
pub struct NotificationRequest {
    /// Event name emitted to the client.
    pub event: String,

    /// Arbitrary JSON payload.
    #[serde(default)]
    pub payload: serde_json::Value,
}

/// Plain acknowledgement body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageResponse {
    pub message: String,
}

/// Session counters reported by the health endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionCounts {
    pub capacity: u32,
    pub free: usize,
    pub pending: usize,
    pub bound: usize,
}

/// Health check response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    /// "healthy" when the registry answers, "unhealthy" otherwise.
    pub status: String,

    /// Registry counters (omitted when the registry did not answer).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sessions: Option<SessionCounts>,
}
