//! Session and controller configuration.
//!
//! [`SessionConfig`] describes one join attempt and is immutable once built.
//! [`ControllerConfig`] carries the deployment settings (credential endpoint,
//! reconnection policy) and is loaded from environment variables. The
//! credential endpoint is redacted in Debug output because deployments embed
//! API keys in it.

use common::types::{AppointmentId, ChannelName, UserId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::env;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Default HTTP timeout for the credential request.
pub const DEFAULT_TOKEN_HTTP_TIMEOUT_MS: u64 = 10_000;

/// Default maximum number of reconnection attempts.
pub const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 3;

/// Default delay before the first reconnection attempt.
pub const DEFAULT_RECONNECT_BASE_DELAY_MS: u64 = 1_000;

/// Default upper bound on the reconnection delay.
pub const DEFAULT_RECONNECT_MAX_DELAY_MS: u64 = 10_000;

/// Role of the local participant in the appointment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParticipantRole {
    /// The therapist hosting the session.
    Host,
    /// The client attending the session.
    Guest,
}

impl ParticipantRole {
    /// Label used in logs.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            ParticipantRole::Host => "host",
            ParticipantRole::Guest => "guest",
        }
    }
}

/// One session attempt: who joins which appointment's channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    appointment_id: AppointmentId,
    user_id: UserId,
    role: ParticipantRole,
    channel_name: ChannelName,
}

impl SessionConfig {
    /// Build a config; the channel name is derived from the appointment.
    #[must_use]
    pub fn new(appointment_id: AppointmentId, user_id: UserId, role: ParticipantRole) -> Self {
        let channel_name = ChannelName::for_appointment(&appointment_id);
        Self {
            appointment_id,
            user_id,
            role,
            channel_name,
        }
    }

    #[must_use]
    pub fn appointment_id(&self) -> &AppointmentId {
        &self.appointment_id
    }

    #[must_use]
    pub fn user_id(&self) -> &UserId {
        &self.user_id
    }

    #[must_use]
    pub fn role(&self) -> ParticipantRole {
        self.role
    }

    #[must_use]
    pub fn channel_name(&self) -> &ChannelName {
        &self.channel_name
    }
}

/// Controller deployment configuration.
#[derive(Clone, PartialEq, Eq)]
pub struct ControllerConfig {
    /// URL of the credential-issuing endpoint.
    pub token_endpoint: String,

    /// HTTP timeout for the credential request.
    pub token_http_timeout: Duration,

    /// Maximum reconnection attempts before the session fails (default: 3).
    pub max_reconnect_attempts: u32,

    /// Delay before the first reconnection attempt (default: 1s).
    pub reconnect_base_delay: Duration,

    /// Upper bound on the reconnection delay (default: 10s).
    pub reconnect_max_delay: Duration,
}

/// Custom Debug implementation that redacts the endpoint.
impl fmt::Debug for ControllerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ControllerConfig")
            .field("token_endpoint", &"[REDACTED]")
            .field("token_http_timeout", &self.token_http_timeout)
            .field("max_reconnect_attempts", &self.max_reconnect_attempts)
            .field("reconnect_base_delay", &self.reconnect_base_delay)
            .field("reconnect_max_delay", &self.reconnect_max_delay)
            .finish()
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

impl ControllerConfig {
    /// Build a config with default timeouts and retry policy.
    #[must_use]
    pub fn new(token_endpoint: String) -> Self {
        Self {
            token_endpoint,
            token_http_timeout: Duration::from_millis(DEFAULT_TOKEN_HTTP_TIMEOUT_MS),
            max_reconnect_attempts: DEFAULT_MAX_RECONNECT_ATTEMPTS,
            reconnect_base_delay: Duration::from_millis(DEFAULT_RECONNECT_BASE_DELAY_MS),
            reconnect_max_delay: Duration::from_millis(DEFAULT_RECONNECT_MAX_DELAY_MS),
        }
    }

    /// Build a config requiring an HTTPS credential endpoint.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` if the URL doesn't use HTTPS.
    pub fn new_secure(token_endpoint: String) -> Result<Self, ConfigError> {
        if !token_endpoint.starts_with("https://") {
            return Err(ConfigError::InvalidValue(
                "SESSION_TOKEN_ENDPOINT must use HTTPS".to_string(),
            ));
        }
        Ok(Self::new(token_endpoint))
    }

    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a `HashMap` (for testing).
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let token_endpoint = vars
            .get("SESSION_TOKEN_ENDPOINT")
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| ConfigError::MissingEnvVar("SESSION_TOKEN_ENDPOINT".to_string()))?
            .clone();

        let token_http_timeout = Duration::from_millis(parse_or(
            vars,
            "SESSION_TOKEN_HTTP_TIMEOUT_MS",
            DEFAULT_TOKEN_HTTP_TIMEOUT_MS,
        )?);

        let max_reconnect_attempts = parse_or(
            vars,
            "SESSION_MAX_RECONNECT_ATTEMPTS",
            DEFAULT_MAX_RECONNECT_ATTEMPTS,
        )?;
        if max_reconnect_attempts == 0 {
            return Err(ConfigError::InvalidValue(
                "SESSION_MAX_RECONNECT_ATTEMPTS must be at least 1".to_string(),
            ));
        }

        let base_ms = parse_or(
            vars,
            "SESSION_RECONNECT_BASE_DELAY_MS",
            DEFAULT_RECONNECT_BASE_DELAY_MS,
        )?;
        let max_ms = parse_or(
            vars,
            "SESSION_RECONNECT_MAX_DELAY_MS",
            DEFAULT_RECONNECT_MAX_DELAY_MS,
        )?;
        if base_ms > max_ms {
            return Err(ConfigError::InvalidValue(format!(
                "SESSION_RECONNECT_BASE_DELAY_MS ({base_ms}) exceeds SESSION_RECONNECT_MAX_DELAY_MS ({max_ms})"
            )));
        }

        Ok(ControllerConfig {
            token_endpoint,
            token_http_timeout,
            max_reconnect_attempts,
            reconnect_base_delay: Duration::from_millis(base_ms),
            reconnect_max_delay: Duration::from_millis(max_ms),
        })
    }
}

fn parse_or<T: std::str::FromStr>(
    vars: &HashMap<String, String>,
    key: &str,
    default: T,
) -> Result<T, ConfigError> {
    match vars.get(key) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue(format!("{key}={raw}"))),
    }
}
