//! Prometheus metrics endpoint.

use axum::extract::State;
use axum::response::IntoResponse;
use metrics_exporter_prometheus::PrometheusHandle;

/// Render all recorded metrics in Prometheus text format.
///
/// Unauthenticated; metrics carry no user identifiers.
pub async fn metrics_handler(State(handle): State<PrometheusHandle>) -> impl IntoResponse {
    handle.render()
}
