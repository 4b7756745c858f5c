//! WebSocket connection loop.
//!
//! Drains the connection's outbound queue onto the socket until the client
//! goes away or the server shuts down, then hands the binding back through
//! `StreamHooks::on_disconnect`.

use super::binder::BoundConnection;
use super::connection::StreamEvent;
use super::StreamHooks;
use axum::extract::ws::{CloseFrame, Message, WebSocket};
use std::borrow::Cow;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Interval between server keepalive pings.
const PING_INTERVAL_SECS: u64 = 30;

/// Close code sent when the relay is shutting down (1001, going away).
const CLOSE_GOING_AWAY: u16 = 1001;

/// Serve one upgraded connection until either side closes it.
pub async fn run_connection(
    mut socket: WebSocket,
    bound: BoundConnection,
    mut outbound: mpsc::Receiver<Arc<StreamEvent>>,
    hooks: Arc<dyn StreamHooks>,
    shutdown: CancellationToken,
) {
    let connection_id = bound.connection().id();
    let slot = bound.session().slot;

    info!(
        target: "relay.stream.socket",
        connection_id = %connection_id,
        slot = %slot,
        user_id = %bound.session().user_id(),
        "Stream opened"
    );

    let mut keepalive = tokio::time::interval(Duration::from_secs(PING_INTERVAL_SECS));
    // First tick completes immediately.
    keepalive.tick().await;

    loop {
        tokio::select! {
            () = shutdown.cancelled() => {
                let _ = socket
                    .send(Message::Close(Some(CloseFrame {
                        code: CLOSE_GOING_AWAY,
                        reason: Cow::from("server shutting down"),
                    })))
                    .await;
                break;
            }

            event = outbound.recv() => {
                let Some(event) = event else { break };
                match serde_json::to_string(event.as_ref()) {
                    Ok(text) => {
                        if let Err(e) = socket.send(Message::Text(text)).await {
                            debug!(
                                target: "relay.stream.socket",
                                connection_id = %connection_id,
                                error = %e,
                                "Send failed, closing stream"
                            );
                            break;
                        }
                    }
                    Err(e) => {
                        warn!(
                            target: "relay.stream.socket",
                            connection_id = %connection_id,
                            event = %event.event,
                            error = %e,
                            "Failed to encode event"
                        );
                    }
                }
            }

            incoming = socket.recv() => {
                match incoming {
                    None | Some(Ok(Message::Close(_))) => break,
                    Some(Ok(Message::Text(_) | Message::Binary(_))) => {
                        debug!(
                            target: "relay.stream.socket",
                            connection_id = %connection_id,
                            "Ignoring inbound client message"
                        );
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        debug!(
                            target: "relay.stream.socket",
                            connection_id = %connection_id,
                            error = %e,
                            "Receive failed, closing stream"
                        );
                        break;
                    }
                }
            }

            _ = keepalive.tick() => {
                if socket.send(Message::Ping(Vec::new())).await.is_err() {
                    break;
                }
            }
        }
    }

    // Stop accepting events before the slot is handed back.
    outbound.close();
    hooks.on_disconnect(bound).await;

    info!(
        target: "relay.stream.socket",
        connection_id = %connection_id,
        slot = %slot,
        "Stream closed"
    );
}
