//! Session-slot registry.
//!
//! The registry enforces the session ceiling, binds issued slots to streaming
//! handshakes, reclaims abandoned slots and keeps the per-user fan-out index.
//! All state lives in one actor task; everything else talks to it through a
//! [`RegistryHandle`].

mod actor;
pub mod messages;
pub mod pool;

pub use actor::RegistryHandle;
pub use messages::{AcquireResult, BindResult, RegistryStatus, ReleaseReason};
