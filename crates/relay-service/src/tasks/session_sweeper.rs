//! Session sweeper background task.
//!
//! On a fixed interval, asks the registry to reclaim pending sessions whose
//! streaming leg never arrived. The sweeper holds no state and never touches
//! the pool directly; it only queues `Reclaim` requests.
//!
//! # Graceful Shutdown
//!
//! The task exits when its cancellation token is triggered.

use crate::config::{Config, MAX_SWEEP_INTERVAL_SECONDS};
use crate::registry::RegistryHandle;
use std::time::Duration;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Configuration for the session sweeper.
#[derive(Debug, Clone, Copy)]
pub struct SessionSweeperConfig {
    /// Time between sweeps.
    pub interval: Duration,
    /// Pending sessions older than this are reclaimed.
    pub max_pending_age: Duration,
}

impl From<&Config> for SessionSweeperConfig {
    fn from(config: &Config) -> Self {
        Self {
            interval: config.sweep_interval(),
            max_pending_age: config.max_pending_age(),
        }
    }
}

/// Start the session sweeper.
///
/// The first sweep runs one interval after start. Intervals longer than
/// `MAX_SWEEP_INTERVAL_SECONDS` are clamped to it. Returns when the
/// cancellation token is triggered.
#[instrument(skip_all, name = "relay.task.session_sweeper")]
pub async fn start_session_sweeper(
    registry: RegistryHandle,
    config: SessionSweeperConfig,
    cancel_token: CancellationToken,
) {
    info!(
        target: "relay.task.session_sweeper",
        interval_seconds = config.interval.as_secs(),
        max_pending_age_seconds = config.max_pending_age.as_secs(),
        "Starting session sweeper"
    );

    let max_period = Duration::from_secs(MAX_SWEEP_INTERVAL_SECONDS);
    let period = config.interval.min(max_period);
    if config.interval > max_period {
        warn!(
            target: "relay.task.session_sweeper",
            requested_seconds = config.interval.as_secs(),
            clamped_seconds = period.as_secs(),
            "Sweep interval too long, clamping"
        );
    }

    let mut interval = interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = interval.tick() => {
                sweep(&registry, config.max_pending_age).await;
            }
            () = cancel_token.cancelled() => {
                info!(
                    target: "relay.task.session_sweeper",
                    "Session sweeper received shutdown signal, exiting"
                );
                break;
            }
        }
    }

    info!(target: "relay.task.session_sweeper", "Session sweeper stopped");
}

/// Queue one reclaim request.
async fn sweep(registry: &RegistryHandle, max_pending_age: Duration) {
    match registry.reclaim(Instant::now(), max_pending_age).await {
        Ok(()) => {
            debug!(target: "relay.task.session_sweeper", "Reclaim requested");
        }
        Err(e) => {
            warn!(
                target: "relay.task.session_sweeper",
                error = %e,
                "Failed to request reclaim"
            );
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::models::{UserId, UserSession};
    use crate::registry::{AcquireResult, RegistryStatus};
    use crate::stream::connection::ConnectionHandle;
    use std::collections::HashMap;

    fn user() -> UserSession {
        UserSession {
            user_id: UserId::new("u1"),
            session_id: "s".to_string(),
        }
    }

    fn sweeper_config() -> SessionSweeperConfig {
        SessionSweeperConfig {
            interval: Duration::from_secs(10),
            max_pending_age: Duration::from_secs(5),
        }
    }

    /// Let spawned tasks run, then read the registry.
    async fn settled_status(registry: &RegistryHandle) -> RegistryStatus {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        registry.status().await.unwrap()
    }

    #[test]
    fn test_config_from_relay_config() {
        let vars = HashMap::from([
            ("IDENTITY_SERVICE_URL".to_string(), "http://id".to_string()),
            ("SWEEP_INTERVAL_SECONDS".to_string(), "30".to_string()),
            ("MAX_PENDING_AGE_SECONDS".to_string(), "90".to_string()),
        ]);
        let config = Config::from_vars(&vars).unwrap();

        let sweeper = SessionSweeperConfig::from(&config);
        assert_eq!(sweeper.interval, Duration::from_secs(30));
        assert_eq!(sweeper.max_pending_age, Duration::from_secs(90));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_reclaims_abandoned_pending() {
        let registry = RegistryHandle::new(2);
        let cancel_token = CancellationToken::new();
        let task = tokio::spawn(start_session_sweeper(
            registry.clone(),
            sweeper_config(),
            cancel_token.clone(),
        ));

        let AcquireResult::Acquired(_) = registry.acquire(user()).await.unwrap() else {
            panic!("expected a free slot");
        };

        // Before the first tick nothing is reclaimed.
        tokio::time::advance(Duration::from_secs(6)).await;
        assert_eq!(settled_status(&registry).await.pending, 1);

        tokio::time::advance(Duration::from_secs(5)).await;
        let status = settled_status(&registry).await;
        assert_eq!(status.pending, 0);
        assert_eq!(status.free, 2);

        cancel_token.cancel();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_leaves_bound_sessions() {
        let registry = RegistryHandle::new(2);
        let cancel_token = CancellationToken::new();
        let task = tokio::spawn(start_session_sweeper(
            registry.clone(),
            sweeper_config(),
            cancel_token.clone(),
        ));

        let AcquireResult::Acquired(session) = registry.acquire(user()).await.unwrap() else {
            panic!("expected a free slot");
        };
        let (conn, _rx) = ConnectionHandle::new();
        registry.bind(session.slot, conn).await.unwrap();

        tokio::time::advance(Duration::from_secs(35)).await;
        let status = settled_status(&registry).await;
        assert_eq!(status.bound, 1);
        assert_eq!(status.free, 1);

        cancel_token.cancel();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_oversized_interval_is_clamped() {
        let registry = RegistryHandle::new(1);
        let cancel_token = CancellationToken::new();
        let task = tokio::spawn(start_session_sweeper(
            registry.clone(),
            SessionSweeperConfig {
                interval: Duration::MAX,
                max_pending_age: Duration::from_secs(5),
            },
            cancel_token.clone(),
        ));

        let AcquireResult::Acquired(_) = registry.acquire(user()).await.unwrap() else {
            panic!("expected a free slot");
        };

        tokio::time::advance(Duration::from_secs(MAX_SWEEP_INTERVAL_SECONDS + 1)).await;
        let status = settled_status(&registry).await;
        assert_eq!(status.pending, 0);
        assert_eq!(status.free, 1);

        cancel_token.cancel();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_sweeper_stops_on_cancel() {
        let registry = RegistryHandle::new(1);
        let cancel_token = CancellationToken::new();
        let task = tokio::spawn(start_session_sweeper(
            registry,
            sweeper_config(),
            cancel_token.clone(),
        ));

        cancel_token.cancel();

        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("sweeper should stop")
            .unwrap();
    }
}
