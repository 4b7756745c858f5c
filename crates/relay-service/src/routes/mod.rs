//! HTTP routes for the Notification Relay.
//!
//! Defines the Axum router and application state.

use crate::config::{Config, ReleasePolicy};
use crate::handlers;
use crate::identity::IdentityProvider;
use crate::middleware::admission::{admit, AdmissionState};
use crate::middleware::auth::{require_identity, AuthState};
use crate::middleware::http_metrics::http_metrics_middleware;
use crate::registry::RegistryHandle;
use crate::services::FanoutDispatcher;
use crate::stream::{HandshakeBinder, StreamHooks};
use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    /// Service configuration.
    pub config: Config,

    /// Session-slot registry.
    pub registry: RegistryHandle,

    /// Resolves caller credentials.
    pub identity: Arc<dyn IdentityProvider>,

    /// Connect/disconnect callbacks for streaming connections.
    pub hooks: Arc<dyn StreamHooks>,

    /// Event fan-out.
    pub fanout: FanoutDispatcher,

    /// Cancelled at shutdown to close open streams.
    pub shutdown: CancellationToken,
}

impl AppState {
    /// Wire the registry-backed stream hooks and dispatcher around `registry`.
    #[must_use]
    pub fn new(
        config: Config,
        registry: RegistryHandle,
        identity: Arc<dyn IdentityProvider>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            hooks: Arc::new(HandshakeBinder::new(registry.clone())),
            fanout: FanoutDispatcher::new(registry.clone()),
            config,
            registry,
            identity,
            shutdown,
        }
    }
}

/// Build the application routes.
///
/// - `/health` - Liveness with registry snapshot - public
/// - `/metrics` - Prometheus metrics - public
/// - `POST /v1/session` - Issue a session slot - admission controlled
/// - `GET /v1/stream` - WebSocket upgrade - requires an issued slot, or under the
///   request-scoped policy is admission controlled and binds the slot it admits
/// - `POST /v1/notification/send` - Fan an event out to the caller's streams - authenticated
pub fn build_routes(state: Arc<AppState>, metrics_handle: PrometheusHandle) -> Router {
    let auth_state = AuthState {
        identity: Arc::clone(&state.identity),
        cookie_name: state.config.auth_cookie_name.clone(),
    };
    let admission_state = Arc::new(AdmissionState {
        auth: auth_state.clone(),
        registry: state.registry.clone(),
        policy: state.config.release_policy,
    });
    let auth_state = Arc::new(auth_state);

    // Issued slots are released with their request under the request-scoped
    // policy, so streams there are admitted on the upgrade request itself.
    let stream_route = Router::new().route("/v1/stream", get(handlers::stream_upgrade));
    let stream_route = match state.config.release_policy {
        ReleasePolicy::AwaitStream => stream_route,
        ReleasePolicy::RequestScoped => stream_route.route_layer(
            middleware::from_fn_with_state(Arc::clone(&admission_state), admit),
        ),
    };

    // Public routes. Under await-stream the stream route is authorized by its slot id.
    let public_routes = Router::new()
        .route("/health", get(handlers::health_check))
        .merge(stream_route)
        .with_state(state.clone());

    let metrics_routes = Router::new()
        .route("/metrics", get(handlers::metrics_handler))
        .with_state(metrics_handle);

    // Slot-issuing routes
    let admission_routes = Router::new()
        .route("/v1/session", post(handlers::issue_session))
        .route_layer(middleware::from_fn_with_state(admission_state, admit))
        .with_state(state.clone());

    // Authenticated routes that do not hold a slot
    let identity_routes = Router::new()
        .route("/v1/notification/send", post(handlers::send_notification))
        .route_layer(middleware::from_fn_with_state(auth_state, require_identity))
        .with_state(state);

    // Layer order (bottom-to-top execution):
    // 1. TimeoutLayer (innermost)
    // 2. TraceLayer
    // 3. http_metrics_middleware (outermost, sees every response)
    public_routes
        .merge(metrics_routes)
        .merge(admission_routes)
        .merge(identity_routes)
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(Duration::from_secs(30)))
        .layer(middleware::from_fn(http_metrics_middleware))
}
