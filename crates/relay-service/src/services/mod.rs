//! Services for the Notification Relay.

pub mod fanout;

pub use fanout::{DeliveryReport, FanoutDispatcher};
