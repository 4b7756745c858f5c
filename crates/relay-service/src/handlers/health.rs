//! Health check handler.

use crate::models::{HealthResponse, SessionCounts};
use crate::routes::AppState;
use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use std::sync::Arc;

/// Liveness probe with a registry snapshot.
///
/// Returns 200 while the registry actor answers, 503 once it has stopped.
#[tracing::instrument(skip_all, name = "relay.health")]
pub async fn health_check(State(state): State<Arc<AppState>>) -> (StatusCode, Json<HealthResponse>) {
    match state.registry.status().await {
        Ok(status) => (
            StatusCode::OK,
            Json(HealthResponse {
                status: "healthy".to_string(),
                sessions: Some(SessionCounts {
                    capacity: status.capacity,
                    free: status.free,
                    pending: status.pending,
                    bound: status.bound,
                }),
            }),
        ),
        Err(e) => {
            tracing::warn!(target: "relay.health", error = %e, "Registry did not answer health check");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(HealthResponse {
                    status: "unhealthy".to_string(),
                    sessions: None,
                }),
            )
        }
    }
}
