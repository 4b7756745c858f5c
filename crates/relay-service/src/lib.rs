//! Notification Relay Service Library
//!
//! Relays application events to browser clients over WebSocket streams,
//! addressed by authenticated user. The pieces:
//!
//! - A bounded pool of session slots, owned by a single registry actor
//! - Admission control that issues slots over plain HTTP (`POST /v1/session`)
//! - A handshake binder that attaches a WebSocket to an issued slot
//! - A sweeper that reclaims slots whose stream never arrived
//! - A fan-out dispatcher that delivers events to each of a user's streams
//!
//! # Architecture
//!
//! ```text
//! routes/mod.rs -> middleware/*.rs -> handlers/*.rs -> services/*.rs
//!                                                   \-> registry (actor) <- tasks/session_sweeper.rs
//! ```
//!
//! # Modules
//!
//! - `config` - Service configuration from environment
//! - `errors` - Error types with HTTP status code mapping
//! - `handlers` - HTTP request handlers
//! - `identity` - Identity collaborator (credential -> user)
//! - `middleware` - Admission, identity and metrics middleware
//! - `models` - Data models
//! - `observability` - Prometheus metrics
//! - `registry` - Session-slot registry actor
//! - `routes` - Axum router setup
//! - `services` - Event fan-out
//! - `stream` - WebSocket connections and handshake binding
//! - `tasks` - Background tasks

pub mod config;
pub mod errors;
pub mod handlers;
pub mod identity;
pub mod middleware;
pub mod models;
pub mod observability;
pub mod registry;
pub mod routes;
pub mod services;
pub mod stream;
pub mod tasks;
