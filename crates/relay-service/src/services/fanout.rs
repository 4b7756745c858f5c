//! Fan-out dispatcher.
//!
//! Resolves a user's bound connections through the registry and enqueues the
//! event on each. Delivery is best-effort: a full or closed connection is
//! counted and logged, and never holds up the others.

use crate::errors::RelayError;
use crate::models::UserId;
use crate::observability::metrics;
use crate::registry::RegistryHandle;
use crate::stream::connection::StreamEvent;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, instrument, warn};

/// Per-dispatch delivery counts.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DeliveryReport {
    /// Connections bound for the user at lookup time.
    pub attempted: usize,
    pub delivered: usize,
    pub failed: usize,
}

/// Sends events to every connection bound for a user.
#[derive(Clone, Debug)]
pub struct FanoutDispatcher {
    registry: RegistryHandle,
}

impl FanoutDispatcher {
    #[must_use]
    pub fn new(registry: RegistryHandle) -> Self {
        Self { registry }
    }

    /// Deliver `event` to each of `user_id`'s bound connections.
    ///
    /// # Errors
    ///
    /// Returns `RelayError::Internal` only if the registry cannot be reached.
    /// Per-connection failures are reported in the `DeliveryReport`.
    #[instrument(skip_all, name = "relay.services.fanout", fields(user_id = %user_id, event = %event.event))]
    pub async fn dispatch(
        &self,
        user_id: &UserId,
        event: StreamEvent,
    ) -> Result<DeliveryReport, RelayError> {
        let connections = self.registry.lookup(user_id.clone()).await?;
        let event = Arc::new(event);

        let mut report = DeliveryReport {
            attempted: connections.len(),
            ..DeliveryReport::default()
        };

        for connection in &connections {
            match connection.emit(Arc::clone(&event)) {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    report.failed += 1;
                    metrics::record_event_delivery_failure(e.as_str());
                    warn!(
                        target: "relay.services.fanout",
                        connection_id = %connection.id(),
                        error = %e,
                        "Event delivery failed"
                    );
                }
            }
        }

        metrics::record_events_delivered(report.delivered);
        debug!(
            target: "relay.services.fanout",
            attempted = report.attempted,
            delivered = report.delivered,
            failed = report.failed,
            "Event dispatched"
        );

        Ok(report)
    }

    /// Run [`dispatch`](Self::dispatch) in the background.
    pub fn spawn_dispatch(&self, user_id: UserId, event: StreamEvent) -> JoinHandle<()> {
        let dispatcher = self.clone();
        tokio::spawn(async move {
            if let Err(e) = dispatcher.dispatch(&user_id, event).await {
                warn!(
                    target: "relay.services.fanout",
                    user_id = %user_id,
                    error = %e,
                    "Event dispatch failed"
                );
            }
        })
    }
}
