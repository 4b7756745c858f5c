//! HTTP request handlers for the Notification Relay.

mod health;
mod metrics;
mod notifications;
mod session;
mod stream;

pub use health::health_check;
pub use metrics::metrics_handler;
pub use notifications::send_notification;
pub use session::issue_session;
pub use stream::stream_upgrade;
