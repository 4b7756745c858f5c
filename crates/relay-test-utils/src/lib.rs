//! # Relay Test Utilities
//!
//! Shared test utilities for the Notification Relay service.
//!
//! This crate provides:
//! - Server test harness (`TestRelayServer` for E2E tests)
//! - WebSocket client helpers for the stream endpoint
//!
//! ## Usage
//!
//! ```rust,ignore
//! use relay_test_utils::*;
//! use relay_service::identity::mock::StaticIdentityProvider;
//!
//! #[tokio::test]
//! async fn test_example() -> Result<()> {
//!     let identity = StaticIdentityProvider::new().with_user("tok-a", "alice");
//!     let server = TestRelayServer::spawn(identity).await?;
//!
//!     let context_id = server.issue_context_id("tok-a").await?;
//!     let stream = server.connect_stream(&context_id).await?;
//!     Ok(())
//! }
//! ```

pub mod server_harness;

// Re-export commonly used items
pub use server_harness::*;
