//! Relay service configuration.
//!
//! Configuration is loaded from environment variables. All sensitive
//! fields are redacted in Debug output.

use crate::transport::TransportSettings;

use common::jwt::{DEFAULT_CLOCK_SKEW, MAX_CLOCK_SKEW};
use common::secret::{ExposeSecret, SecretString};
use std::collections::HashMap;
use std::env;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Default WebSocket bind address.
pub const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0:3000";

/// Default health endpoint bind address.
pub const DEFAULT_HEALTH_BIND_ADDRESS: &str = "0.0.0.0:3001";

/// Default liveness sweep interval in seconds.
pub const DEFAULT_SWEEP_INTERVAL_SECONDS: u64 = 30;

/// Default keepalive ping interval in seconds.
pub const DEFAULT_PING_INTERVAL_SECONDS: u64 = 30;

/// Default number of unanswered pings before a connection is dropped.
pub const DEFAULT_MAX_MISSED_PONGS: u32 = 2;

/// Default outbound queue size per connection.
pub const DEFAULT_OUTBOUND_QUEUE_SIZE: usize = 256;

/// Default maximum WebSocket frame size in bytes.
pub const DEFAULT_MAX_FRAME_BYTES: usize = 1_048_576;

/// Default stats reporting interval in seconds.
pub const DEFAULT_STATS_INTERVAL_SECONDS: u64 = 60;

/// Default database pool size.
pub const DEFAULT_DB_MAX_CONNECTIONS: u32 = 10;

/// Minimum HS256 secret length in bytes.
pub const MIN_JWT_SECRET_BYTES: usize = 32;

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl LogFormat {
    fn parse(value: &str) -> Self {
        if value.trim().eq_ignore_ascii_case("json") {
            LogFormat::Json
        } else {
            LogFormat::Text
        }
    }
}

/// Relay service configuration.
#[derive(Clone)]
pub struct Config {
    /// PostgreSQL connection URL.
    /// Protected by `SecretString` to prevent accidental logging.
    pub database_url: SecretString,

    /// HS256 secret shared with the token issuer.
    pub jwt_secret: SecretString,

    /// WebSocket listener bind address (default: "0.0.0.0:3000").
    pub bind_address: String,

    /// Health and metrics bind address (default: "0.0.0.0:3001").
    pub health_bind_address: String,

    pub sweep_interval_seconds: u64,

    pub ping_interval_seconds: u64,

    pub max_missed_pongs: u32,

    pub outbound_queue_size: usize,

    pub max_frame_bytes: usize,

    pub stats_interval_seconds: u64,

    /// Clock skew tolerance for `exp` and `iat` (default: 300, max: 600).
    pub jwt_clock_skew_seconds: u64,

    pub db_max_connections: u32,

    pub log_format: LogFormat,
}

/// Custom Debug implementation that redacts sensitive fields.
impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("database_url", &"[REDACTED]")
            .field("jwt_secret", &"[REDACTED]")
            .field("bind_address", &self.bind_address)
            .field("health_bind_address", &self.health_bind_address)
            .field("sweep_interval_seconds", &self.sweep_interval_seconds)
            .field("ping_interval_seconds", &self.ping_interval_seconds)
            .field("max_missed_pongs", &self.max_missed_pongs)
            .field("outbound_queue_size", &self.outbound_queue_size)
            .field("max_frame_bytes", &self.max_frame_bytes)
            .field("stats_interval_seconds", &self.stats_interval_seconds)
            .field("jwt_clock_skew_seconds", &self.jwt_clock_skew_seconds)
            .field("db_max_connections", &self.db_max_connections)
            .field("log_format", &self.log_format)
            .finish()
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// See [`Config::from_vars`].
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a `HashMap` (for testing).
    ///
    /// Numeric values that fail to parse fall back to their defaults.
    ///
    /// # Errors
    ///
    /// - `ConfigError::MissingEnvVar` if `DATABASE_URL` or `JWT_SECRET` is unset
    /// - `ConfigError::InvalidValue` if a value parses but is out of bounds
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let database_url = SecretString::from(
            vars.get("DATABASE_URL")
                .ok_or_else(|| ConfigError::MissingEnvVar("DATABASE_URL".to_string()))?
                .clone(),
        );

        let jwt_secret = SecretString::from(
            vars.get("JWT_SECRET")
                .ok_or_else(|| ConfigError::MissingEnvVar("JWT_SECRET".to_string()))?
                .clone(),
        );
        if jwt_secret.expose_secret().len() < MIN_JWT_SECRET_BYTES {
            return Err(ConfigError::InvalidValue(format!(
                "JWT_SECRET must be at least {MIN_JWT_SECRET_BYTES} bytes"
            )));
        }

        let bind_address = vars
            .get("RELAY_BIND_ADDRESS")
            .cloned()
            .unwrap_or_else(|| DEFAULT_BIND_ADDRESS.to_string());

        let health_bind_address = vars
            .get("RELAY_HEALTH_BIND_ADDRESS")
            .cloned()
            .unwrap_or_else(|| DEFAULT_HEALTH_BIND_ADDRESS.to_string());

        let sweep_interval_seconds = positive(
            "RELAY_SWEEP_INTERVAL_SECONDS",
            parse_or(vars, "RELAY_SWEEP_INTERVAL_SECONDS", DEFAULT_SWEEP_INTERVAL_SECONDS),
        )?;

        let ping_interval_seconds = positive(
            "RELAY_PING_INTERVAL_SECONDS",
            parse_or(vars, "RELAY_PING_INTERVAL_SECONDS", DEFAULT_PING_INTERVAL_SECONDS),
        )?;

        let max_missed_pongs = parse_or(vars, "RELAY_MAX_MISSED_PONGS", DEFAULT_MAX_MISSED_PONGS);
        if max_missed_pongs == 0 {
            return Err(ConfigError::InvalidValue(
                "RELAY_MAX_MISSED_PONGS must be greater than 0".to_string(),
            ));
        }

        let outbound_queue_size =
            parse_or(vars, "RELAY_OUTBOUND_QUEUE_SIZE", DEFAULT_OUTBOUND_QUEUE_SIZE);
        if outbound_queue_size == 0 {
            return Err(ConfigError::InvalidValue(
                "RELAY_OUTBOUND_QUEUE_SIZE must be greater than 0".to_string(),
            ));
        }

        let max_frame_bytes = parse_or(vars, "RELAY_MAX_FRAME_BYTES", DEFAULT_MAX_FRAME_BYTES);

        let stats_interval_seconds = positive(
            "RELAY_STATS_INTERVAL_SECONDS",
            parse_or(vars, "RELAY_STATS_INTERVAL_SECONDS", DEFAULT_STATS_INTERVAL_SECONDS),
        )?;

        let jwt_clock_skew_seconds = parse_or(
            vars,
            "RELAY_JWT_CLOCK_SKEW_SECONDS",
            DEFAULT_CLOCK_SKEW.as_secs(),
        );
        if jwt_clock_skew_seconds > MAX_CLOCK_SKEW.as_secs() {
            return Err(ConfigError::InvalidValue(format!(
                "RELAY_JWT_CLOCK_SKEW_SECONDS must be at most {}",
                MAX_CLOCK_SKEW.as_secs()
            )));
        }

        let db_max_connections =
            parse_or(vars, "RELAY_DB_MAX_CONNECTIONS", DEFAULT_DB_MAX_CONNECTIONS);

        let log_format = vars
            .get("RELAY_LOG_FORMAT")
            .map(|s| LogFormat::parse(s))
            .unwrap_or_default();

        Ok(Config {
            database_url,
            jwt_secret,
            bind_address,
            health_bind_address,
            sweep_interval_seconds,
            ping_interval_seconds,
            max_missed_pongs,
            outbound_queue_size,
            max_frame_bytes,
            stats_interval_seconds,
            jwt_clock_skew_seconds,
            db_max_connections,
            log_format,
        })
    }

    #[must_use]
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_seconds)
    }

    #[must_use]
    pub fn stats_interval(&self) -> Duration {
        Duration::from_secs(self.stats_interval_seconds)
    }

    #[must_use]
    pub fn jwt_clock_skew(&self) -> Duration {
        Duration::from_secs(self.jwt_clock_skew_seconds)
    }

    /// Per-connection transport settings.
    #[must_use]
    pub fn transport_settings(&self) -> TransportSettings {
        TransportSettings {
            outbound_queue_size: self.outbound_queue_size,
            ping_interval: Duration::from_secs(self.ping_interval_seconds),
            max_missed_pongs: self.max_missed_pongs,
            max_frame_bytes: self.max_frame_bytes,
        }
    }
}

fn parse_or<T: FromStr>(vars: &HashMap<String, String>, key: &str, default: T) -> T {
    vars.get(key)
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(default)
}

fn positive(key: &str, value: u64) -> Result<u64, ConfigError> {
    if value == 0 {
        return Err(ConfigError::InvalidValue(format!(
            "{key} must be greater than 0"
        )));
    }
    Ok(value)
}
