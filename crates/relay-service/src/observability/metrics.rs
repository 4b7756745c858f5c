//! Metrics definitions for the Notification Relay per ADR-0011.
//!
//! All metrics follow Prometheus naming conventions:
//! - `relay_` prefix
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Cardinality
//!
//! Labels are bounded:
//! - `method`: 7 values max
//! - `endpoint`: normalized to the handful of routes the relay serves
//! - `reason`: bounded by the enums that produce them
//! - `status`: bounded by handshake outcomes

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::time::Duration;

/// Initialize the Prometheus metrics recorder and return the handle used by
/// the `/metrics` endpoint.
///
/// # Errors
///
/// Returns error if the recorder fails to install (e.g., already installed).
pub fn init_metrics_recorder() -> Result<PrometheusHandle, String> {
    PrometheusBuilder::new()
        // HTTP request buckets (p95 < 200ms)
        .set_buckets_for_metric(
            Matcher::Prefix("relay_http".to_string()),
            &[
                0.005, 0.010, 0.025, 0.050, 0.100, 0.150, 0.200, 0.300, 0.500, 1.000, 2.000,
            ],
        )
        .map_err(|e| format!("Failed to set HTTP request buckets: {e}"))?
        .install_recorder()
        .map_err(|e| format!("Failed to install Prometheus metrics recorder: {e}"))
}

// ============================================================================
// HTTP Request Metrics
// ============================================================================

/// Record HTTP request completion.
///
/// Metric: `relay_http_requests_total`, `relay_http_request_duration_seconds`
/// Labels: `method`, `endpoint`, `status` / `status_code`
pub fn record_http_request(method: &str, endpoint: &str, status_code: u16, duration: Duration) {
    let normalized_endpoint = normalize_endpoint(endpoint);
    let status = categorize_status_code(status_code);

    histogram!("relay_http_request_duration_seconds",
        "method" => method.to_string(),
        "endpoint" => normalized_endpoint,
        "status" => status
    )
    .record(duration.as_secs_f64());

    counter!("relay_http_requests_total",
        "method" => method.to_string(),
        "endpoint" => normalized_endpoint,
        "status_code" => status_code.to_string()
    )
    .increment(1);
}

fn categorize_status_code(status_code: u16) -> &'static str {
    match status_code {
        101 | 200..=299 => "success",
        408 | 504 => "timeout",
        _ => "error",
    }
}

/// Collapse request paths onto the routes the relay serves.
fn normalize_endpoint(path: &str) -> &'static str {
    match path {
        "/" => "/",
        "/health" => "/health",
        "/metrics" => "/metrics",
        "/v1/session" => "/v1/session",
        "/v1/stream" => "/v1/stream",
        "/v1/notification/send" => "/v1/notification/send",
        _ => "/other",
    }
}

// ============================================================================
// Session Metrics
// ============================================================================

/// Metric: `relay_sessions_acquired_total`
pub fn record_session_acquired() {
    counter!("relay_sessions_acquired_total").increment(1);
}

/// Record an admission refused before a slot was held.
///
/// Metric: `relay_admission_rejected_total`
/// Labels: `reason` (unauthenticated, exhausted, identity_unavailable)
pub fn record_admission_rejected(reason: &'static str) {
    counter!("relay_admission_rejected_total", "reason" => reason).increment(1);
}

/// Metric: `relay_sessions_released_total`
/// Labels: `reason` (request_complete, disconnect, abandoned)
pub fn record_session_released(reason: &'static str) {
    counter!("relay_sessions_released_total", "reason" => reason).increment(1);
}

/// Metric: `relay_sessions_reclaimed_total`
pub fn record_sessions_reclaimed(count: usize) {
    counter!("relay_sessions_reclaimed_total").increment(count as u64);
}

/// Record the outcome of a streaming handshake.
///
/// Metric: `relay_handshakes_total`
/// Labels: `status` (bound, rejected, malformed)
pub fn record_handshake(status: &'static str) {
    counter!("relay_handshakes_total", "status" => status).increment(1);
}

/// Set the pending and bound session gauges.
///
/// Metric: `relay_sessions_pending`, `relay_sessions_bound`
pub fn set_session_gauges(pending: usize, bound: usize) {
    // Session counts are bounded by MAX_SESSIONS, far below 2^53
    #[allow(clippy::cast_precision_loss)]
    {
        gauge!("relay_sessions_pending").set(pending as f64);
        gauge!("relay_sessions_bound").set(bound as f64);
    }
}

// ============================================================================
// Fan-out Metrics
// ============================================================================

/// Metric: `relay_events_delivered_total`
pub fn record_events_delivered(count: usize) {
    counter!("relay_events_delivered_total").increment(count as u64);
}

/// Metric: `relay_event_delivery_failures_total`
/// Labels: `reason` (queue_full, closed)
pub fn record_event_delivery_failure(reason: &'static str) {
    counter!("relay_event_delivery_failures_total", "reason" => reason).increment(1);
}
