//! HTTP middleware for the Notification Relay.

pub mod admission;
pub mod auth;
pub mod http_metrics;
