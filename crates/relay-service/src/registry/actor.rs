//! `RegistryActor` - the single owner of the slot pool.
//!
//! Callers hold a cloneable `RegistryHandle`; every operation is a message on
//! the actor's mailbox, handled one at a time in receipt order. Invariant
//! violations are logged and skipped; the actor never stops on bad input.

use super::messages::{AcquireResult, BindResult, RegistryMessage, RegistryStatus, ReleaseReason};
use super::pool::{ReleaseOutcome, SlotPool};
use crate::errors::RelayError;
use crate::models::{SessionKey, SlotId, UserId, UserSession};
use crate::observability::metrics;
use crate::stream::connection::{ConnectionHandle, ConnectionId};

use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// Channel buffer size for the registry mailbox.
const REGISTRY_CHANNEL_BUFFER: usize = 1024;

/// Handle to the `RegistryActor`.
///
/// Cheap to clone; every clone talks to the same actor.
#[derive(Clone, Debug)]
pub struct RegistryHandle {
    sender: mpsc::Sender<RegistryMessage>,
    cancel_token: CancellationToken,
}

impl RegistryHandle {
    /// Spawn a registry actor with slots `[1, capacity]` and return its handle.
    #[must_use]
    pub fn new(capacity: u32) -> Self {
        let (sender, receiver) = mpsc::channel(REGISTRY_CHANNEL_BUFFER);
        let cancel_token = CancellationToken::new();

        let actor = RegistryActor {
            pool: SlotPool::new(capacity),
            receiver,
            cancel_token: cancel_token.clone(),
        };

        tokio::spawn(actor.run());

        Self {
            sender,
            cancel_token,
        }
    }

    /// Take the lowest free slot for `user`.
    pub async fn acquire(&self, user: UserSession) -> Result<AcquireResult, RelayError> {
        let (tx, rx) = oneshot::channel();
        self.send(RegistryMessage::Acquire {
            user,
            respond_to: tx,
        })
        .await?;

        rx.await
            .map_err(|e| RelayError::Internal(format!("response receive failed: {e}")))
    }

    /// Bind `connection` to the pending session at `slot`.
    pub async fn bind(
        &self,
        slot: SlotId,
        connection: ConnectionHandle,
    ) -> Result<BindResult, RelayError> {
        let (tx, rx) = oneshot::channel();
        self.send(RegistryMessage::Bind {
            slot,
            connection,
            respond_to: tx,
        })
        .await?;

        rx.await
            .map_err(|e| RelayError::Internal(format!("response receive failed: {e}")))
    }

    /// Release the session identified by `key` and wait for the actor to apply it.
    pub async fn release(
        &self,
        key: SessionKey,
        connection: Option<ConnectionId>,
        reason: ReleaseReason,
    ) -> Result<(), RelayError> {
        let (tx, rx) = oneshot::channel();
        self.send(RegistryMessage::Release {
            key,
            connection,
            reason,
            respond_to: Some(tx),
        })
        .await?;

        rx.await
            .map_err(|e| RelayError::Internal(format!("response receive failed: {e}")))
    }

    /// Queue a release without waiting. Usable from `Drop`.
    pub fn release_detached(
        &self,
        key: SessionKey,
        connection: Option<ConnectionId>,
        reason: ReleaseReason,
    ) {
        let message = RegistryMessage::Release {
            key,
            connection,
            reason,
            respond_to: None,
        };

        match self.sender.try_send(message) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(message)) => {
                let Ok(runtime) = tokio::runtime::Handle::try_current() else {
                    warn!(
                        target: "relay.registry",
                        slot = %key.slot,
                        "Mailbox full and no runtime available, release dropped"
                    );
                    return;
                };
                let sender = self.sender.clone();
                runtime.spawn(async move {
                    if sender.send(message).await.is_err() {
                        warn!(
                            target: "relay.registry",
                            slot = %key.slot,
                            "Registry stopped before deferred release was delivered"
                        );
                    }
                });
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!(
                    target: "relay.registry",
                    slot = %key.slot,
                    "Registry stopped, release dropped"
                );
            }
        }
    }

    /// Connections currently bound for `user_id`.
    pub async fn lookup(&self, user_id: UserId) -> Result<Vec<ConnectionHandle>, RelayError> {
        let (tx, rx) = oneshot::channel();
        self.send(RegistryMessage::Lookup {
            user_id,
            respond_to: tx,
        })
        .await?;

        rx.await
            .map_err(|e| RelayError::Internal(format!("response receive failed: {e}")))
    }

    /// Ask the actor to reclaim stale pending sessions. Returns once queued.
    pub async fn reclaim(&self, now: Instant, max_pending_age: Duration) -> Result<(), RelayError> {
        self.send(RegistryMessage::Reclaim {
            now,
            max_pending_age,
        })
        .await
    }

    /// Current registry snapshot.
    pub async fn status(&self) -> Result<RegistryStatus, RelayError> {
        let (tx, rx) = oneshot::channel();
        self.send(RegistryMessage::GetStatus { respond_to: tx })
            .await?;

        rx.await
            .map_err(|e| RelayError::Internal(format!("response receive failed: {e}")))
    }

    /// Stop the actor.
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    /// Check if the actor is cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    async fn send(&self, message: RegistryMessage) -> Result<(), RelayError> {
        self.sender
            .send(message)
            .await
            .map_err(|e| RelayError::Internal(format!("channel send failed: {e}")))
    }
}

/// The `RegistryActor` implementation.
struct RegistryActor {
    pool: SlotPool,
    receiver: mpsc::Receiver<RegistryMessage>,
    cancel_token: CancellationToken,
}

impl RegistryActor {
    /// Run the actor message loop.
    #[instrument(skip_all, name = "relay.registry", fields(capacity = self.pool.capacity()))]
    async fn run(mut self) {
        info!(
            target: "relay.registry",
            capacity = self.pool.capacity(),
            "RegistryActor started"
        );
        metrics::set_session_gauges(0, 0);

        loop {
            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    info!(
                        target: "relay.registry",
                        "RegistryActor received cancellation signal"
                    );
                    break;
                }

                msg = self.receiver.recv() => {
                    match msg {
                        Some(message) => {
                            self.handle_message(message);
                            metrics::set_session_gauges(
                                self.pool.pending_count(),
                                self.pool.bound_count(),
                            );
                        }
                        None => {
                            info!(
                                target: "relay.registry",
                                "RegistryActor channel closed, exiting"
                            );
                            break;
                        }
                    }
                }
            }
        }

        info!(
            target: "relay.registry",
            pending = self.pool.pending_count(),
            bound = self.pool.bound_count(),
            "RegistryActor stopped"
        );
    }

    fn handle_message(&mut self, message: RegistryMessage) {
        match message {
            RegistryMessage::Acquire { user, respond_to } => {
                let result = self.acquire(user);
                let _ = respond_to.send(result);
            }

            RegistryMessage::Bind {
                slot,
                connection,
                respond_to,
            } => {
                let result = self.bind(slot, connection);
                let _ = respond_to.send(result);
            }

            RegistryMessage::Release {
                key,
                connection,
                reason,
                respond_to,
            } => {
                self.release(key, connection, reason);
                if let Some(respond_to) = respond_to {
                    let _ = respond_to.send(());
                }
            }

            RegistryMessage::Lookup {
                user_id,
                respond_to,
            } => {
                let _ = respond_to.send(self.pool.lookup(&user_id));
            }

            RegistryMessage::Reclaim {
                now,
                max_pending_age,
            } => {
                self.reclaim(now, max_pending_age);
            }

            RegistryMessage::GetStatus { respond_to } => {
                let _ = respond_to.send(self.status());
            }
        }
    }

    fn acquire(&mut self, user: UserSession) -> AcquireResult {
        let user_id = user.user_id.clone();
        match self.pool.acquire(user, Instant::now()) {
            Some(session) => {
                metrics::record_session_acquired();
                debug!(
                    target: "relay.registry",
                    slot = %session.slot,
                    generation = session.generation,
                    user_id = %user_id,
                    free = self.pool.free_count(),
                    "Session acquired"
                );
                AcquireResult::Acquired(session)
            }
            None => {
                warn!(
                    target: "relay.registry",
                    user_id = %user_id,
                    capacity = self.pool.capacity(),
                    "Session pool exhausted"
                );
                AcquireResult::Exhausted
            }
        }
    }

    fn bind(&mut self, slot: SlotId, connection: ConnectionHandle) -> BindResult {
        let connection_id = connection.id();
        match self.pool.bind(slot, connection) {
            Some(session) => {
                info!(
                    target: "relay.registry",
                    slot = %slot,
                    user_id = %session.user_id(),
                    connection_id = %connection_id,
                    "Session bound to stream"
                );
                BindResult::Bound(session)
            }
            None => {
                debug!(
                    target: "relay.registry",
                    slot = %slot,
                    state = self.pool.state(slot).map_or("out_of_range", |s| s.as_str()),
                    "Bind refused, slot not pending"
                );
                BindResult::NotFound
            }
        }
    }

    fn release(&mut self, key: SessionKey, connection: Option<ConnectionId>, reason: ReleaseReason) {
        match self.pool.release(key, connection) {
            ReleaseOutcome::Released {
                session,
                from,
                index_consistent,
            } => {
                if !index_consistent {
                    error!(
                        target: "relay.registry",
                        slot = %key.slot,
                        user_id = %session.user_id(),
                        "Released bound session had no fan-out entry"
                    );
                }
                metrics::record_session_released(reason.as_str());
                debug!(
                    target: "relay.registry",
                    slot = %key.slot,
                    from = from.as_str(),
                    reason = reason.as_str(),
                    "Session released"
                );
            }
            ReleaseOutcome::AlreadyFree => {
                debug!(
                    target: "relay.registry",
                    slot = %key.slot,
                    reason = reason.as_str(),
                    "Release of free slot ignored"
                );
            }
            ReleaseOutcome::StaleGeneration { current } => {
                warn!(
                    target: "relay.registry",
                    slot = %key.slot,
                    generation = key.generation,
                    current_generation = current,
                    reason = reason.as_str(),
                    "Release for superseded session ignored"
                );
            }
            ReleaseOutcome::ConnectionMismatch => {
                error!(
                    target: "relay.registry",
                    slot = %key.slot,
                    reason = reason.as_str(),
                    "Release from a connection that does not hold the slot ignored"
                );
            }
        }
    }

    fn reclaim(&mut self, now: Instant, max_pending_age: Duration) {
        let reclaimed = self.pool.reclaim(now, max_pending_age);
        if reclaimed.is_empty() {
            return;
        }

        metrics::record_sessions_reclaimed(reclaimed.len());
        for session in &reclaimed {
            debug!(
                target: "relay.registry",
                slot = %session.slot,
                user_id = %session.user_id(),
                "Reclaimed abandoned session"
            );
        }
        info!(
            target: "relay.registry",
            count = reclaimed.len(),
            free = self.pool.free_count(),
            "Reclaimed pending sessions"
        );
    }

    fn status(&self) -> RegistryStatus {
        RegistryStatus {
            capacity: self.pool.capacity(),
            free: self.pool.free_count(),
            pending: self.pool.pending_count(),
            bound: self.pool.bound_count(),
            users: self.pool.user_count(),
            mailbox_depth: self.receiver.len(),
        }
    }
}
