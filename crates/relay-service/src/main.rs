//! Notification Relay
//!
//! Entry point for the Dark Tower notification relay: issues session slots,
//! binds them to WebSocket streams, and fans events out to each user's streams.

use relay_service::config::Config;
use relay_service::identity::HttpIdentityProvider;
use relay_service::observability::metrics::init_metrics_recorder;
use relay_service::registry::RegistryHandle;
use relay_service::routes::{self, AppState};
use relay_service::tasks::{start_session_sweeper, SessionSweeperConfig};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "relay_service=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Notification Relay");

    // Load configuration
    let config = Config::from_env().map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;

    info!(
        bind_address = %config.bind_address,
        max_sessions = config.max_sessions,
        max_pending_age_seconds = config.max_pending_age_seconds,
        sweep_interval_seconds = config.sweep_interval_seconds,
        release_policy = %config.release_policy,
        "Configuration loaded successfully"
    );

    // Initialize Prometheus metrics recorder (must precede any metric recording)
    let metrics_handle = init_metrics_recorder().map_err(|e| {
        error!("Failed to initialize metrics recorder: {}", e);
        e
    })?;

    let identity = HttpIdentityProvider::new(config.identity_service_url.clone())?;

    // Registry actor and sweeper
    let registry = RegistryHandle::new(config.max_sessions);
    let sweeper_token = CancellationToken::new();
    let sweeper = tokio::spawn(start_session_sweeper(
        registry.clone(),
        SessionSweeperConfig::from(&config),
        sweeper_token.clone(),
    ));

    let addr: SocketAddr = config.bind_address.parse().map_err(|e| {
        error!("Invalid bind address: {}", e);
        e
    })?;

    let stream_token = CancellationToken::new();
    let state = Arc::new(AppState::new(
        config,
        registry.clone(),
        Arc::new(identity),
        stream_token.clone(),
    ));
    let app = routes::build_routes(state, metrics_handle);

    info!("Notification Relay listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal(stream_token))
    .await?;

    // Streams are closed; stop reclaiming and retire the registry.
    sweeper_token.cancel();
    if let Err(e) = sweeper.await {
        warn!("Session sweeper did not stop cleanly: {}", e);
    }
    registry.cancel();

    info!("Notification Relay shutdown complete");

    Ok(())
}

/// Listens for shutdown signals (SIGTERM, SIGINT).
///
/// On signal, closes open streams, then waits out the drain period.
async fn shutdown_signal(stream_token: CancellationToken) {
    let ctrl_c = async {
        match signal::ctrl_c().await {
            Ok(()) => info!("Received SIGINT, starting graceful shutdown..."),
            Err(e) => error!("Failed to listen for SIGINT: {}", e),
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
                info!("Received SIGTERM, starting graceful shutdown...");
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }

    stream_token.cancel();

    let drain_secs: u64 = std::env::var("RELAY_DRAIN_SECONDS")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(30);

    if drain_secs > 0 {
        warn!("Draining connections for {} seconds...", drain_secs);
        tokio::time::sleep(Duration::from_secs(drain_secs)).await;
        info!("Drain period complete");
    } else {
        info!("Skipping drain period (RELAY_DRAIN_SECONDS=0)");
    }
}
