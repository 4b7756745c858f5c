//! Observability for the Notification Relay.

pub mod metrics;
