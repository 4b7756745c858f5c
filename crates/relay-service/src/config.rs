//! Notification Relay configuration.
//!
//! Configuration is loaded from environment variables. Secrets (identity
//! credentials) never pass through here; the relay only needs to know where
//! the identity service lives and which cookie carries the user's credential.

use std::collections::HashMap;
use std::env;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Default HTTP bind address.
pub const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0:8078";

/// Default session ceiling (`N`): maximum concurrently outstanding sessions.
pub const DEFAULT_MAX_SESSIONS: u32 = 1000;

/// Default age after which a never-bound session is reclaimed.
pub const DEFAULT_MAX_PENDING_AGE_SECONDS: u64 = 120;

/// Default interval between sweeps of pending sessions.
pub const DEFAULT_SWEEP_INTERVAL_SECONDS: u64 = 120;

/// Upper bound on `MAX_SESSIONS`; every slot is allocated up front.
pub const MAX_MAX_SESSIONS: u32 = 100_000;

/// Upper bound on `MAX_PENDING_AGE_SECONDS` (one day).
pub const MAX_PENDING_AGE_LIMIT_SECONDS: u64 = 86_400;

/// Upper bound on `SWEEP_INTERVAL_SECONDS` (one hour).
pub const MAX_SWEEP_INTERVAL_SECONDS: u64 = 3_600;

/// Default name of the cookie carrying the user's credential.
pub const DEFAULT_AUTH_COOKIE_NAME: &str = "auth-token";

/// What the admission middleware does with a slot once the wrapped handler returns.
///
/// Chosen once per deployment and applied to every admitted request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReleasePolicy {
    /// Leave the slot pending until the streaming handshake binds it or the
    /// sweeper reclaims it.
    #[default]
    AwaitStream,
    /// Release the slot as soon as the handler returns.
    RequestScoped,
}

impl ReleasePolicy {
    /// Returns the policy as it is spelled in configuration.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            ReleasePolicy::AwaitStream => "await-stream",
            ReleasePolicy::RequestScoped => "request-scoped",
        }
    }
}

impl fmt::Display for ReleasePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReleasePolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "await-stream" => Ok(ReleasePolicy::AwaitStream),
            "request-scoped" => Ok(ReleasePolicy::RequestScoped),
            other => Err(ConfigError::InvalidReleasePolicy(format!(
                "SESSION_RELEASE_POLICY must be 'await-stream' or 'request-scoped', got '{}'",
                other
            ))),
        }
    }
}

/// Notification Relay configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Server bind address (default: "0.0.0.0:8078").
    pub bind_address: String,

    /// Session ceiling: slots are drawn from `[1, max_sessions]`.
    pub max_sessions: u32,

    /// Seconds a session may stay pending before the sweeper reclaims it.
    pub max_pending_age_seconds: u64,

    /// Seconds between sweeps.
    pub sweep_interval_seconds: u64,

    /// Whether admitted slots outlive the admitting request.
    pub release_policy: ReleasePolicy,

    /// Base URL of the identity service that resolves credentials to users.
    pub identity_service_url: String,

    /// Name of the cookie carrying the user's credential.
    pub auth_cookie_name: String,
}

impl Config {
    /// Pending-session age limit as a `Duration`.
    #[must_use]
    pub fn max_pending_age(&self) -> Duration {
        Duration::from_secs(self.max_pending_age_seconds)
    }

    /// Sweep interval as a `Duration`.
    #[must_use]
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_seconds)
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid session ceiling configuration: {0}")]
    InvalidMaxSessions(String),

    #[error("Invalid pending age configuration: {0}")]
    InvalidMaxPendingAge(String),

    #[error("Invalid sweep interval configuration: {0}")]
    InvalidSweepInterval(String),

    #[error("Invalid release policy configuration: {0}")]
    InvalidReleasePolicy(String),

    #[error("Invalid auth cookie configuration: {0}")]
    InvalidAuthCookie(String),
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a HashMap (for testing).
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let identity_service_url = vars
            .get("IDENTITY_SERVICE_URL")
            .ok_or_else(|| ConfigError::MissingEnvVar("IDENTITY_SERVICE_URL".to_string()))?
            .trim_end_matches('/')
            .to_string();

        let bind_address = vars
            .get("BIND_ADDRESS")
            .cloned()
            .unwrap_or_else(|| DEFAULT_BIND_ADDRESS.to_string());

        let max_sessions = parse_bounded(vars, "MAX_SESSIONS", DEFAULT_MAX_SESSIONS, MAX_MAX_SESSIONS)
            .map_err(ConfigError::InvalidMaxSessions)?;

        let max_pending_age_seconds = parse_bounded(
            vars,
            "MAX_PENDING_AGE_SECONDS",
            DEFAULT_MAX_PENDING_AGE_SECONDS,
            MAX_PENDING_AGE_LIMIT_SECONDS,
        )
        .map_err(ConfigError::InvalidMaxPendingAge)?;

        let sweep_interval_seconds = parse_bounded(
            vars,
            "SWEEP_INTERVAL_SECONDS",
            DEFAULT_SWEEP_INTERVAL_SECONDS,
            MAX_SWEEP_INTERVAL_SECONDS,
        )
        .map_err(ConfigError::InvalidSweepInterval)?;

        let release_policy = match vars.get("SESSION_RELEASE_POLICY") {
            Some(value) => value.parse()?,
            None => ReleasePolicy::default(),
        };

        let auth_cookie_name = vars
            .get("AUTH_COOKIE_NAME")
            .cloned()
            .unwrap_or_else(|| DEFAULT_AUTH_COOKIE_NAME.to_string());

        if auth_cookie_name.trim().is_empty() {
            return Err(ConfigError::InvalidAuthCookie(
                "AUTH_COOKIE_NAME must not be empty".to_string(),
            ));
        }

        Ok(Config {
            bind_address,
            max_sessions,
            max_pending_age_seconds,
            sweep_interval_seconds,
            release_policy,
            identity_service_url,
            auth_cookie_name,
        })
    }
}

/// Parse an optional integer variable in `[1, max]`, falling back to `default`.
fn parse_bounded<T>(
    vars: &HashMap<String, String>,
    name: &str,
    default: T,
    max: T,
) -> Result<T, String>
where
    T: FromStr + PartialOrd + Default + fmt::Display,
    T::Err: fmt::Display,
{
    let Some(value_str) = vars.get(name) else {
        return Ok(default);
    };

    let value: T = value_str.parse().map_err(|e| {
        format!(
            "{} must be a valid positive integer, got '{}': {}",
            name, value_str, e
        )
    })?;

    if value == T::default() {
        return Err(format!("{} must be greater than 0", name));
    }

    if value > max {
        return Err(format!(
            "{} must not exceed {}, got {}",
            name, max, value
        ));
    }

    Ok(value)
}
