//! Process configuration loaded from environment variables.
//!
//! Every component exposes a `from_env()` constructor; [`AppConfig`] gathers
//! them so the binary can fail fast on a bad setting before binding a port.

use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use crate::infra::{ReconcileError, Result};
use crate::ledger::LedgerConfig;
use crate::oracle::OracleConfig;
use crate::reconciler::ReconcilerConfig;

/// Port the trigger endpoint listens on by default
pub const DEFAULT_PORT: u16 = 3000;

/// Read a variable that must be present and non-blank.
pub fn required_env(name: &str) -> Result<String> {
    std::env::var(name)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| ReconcileError::Configuration(format!("{name} must be set")))
}

/// Parse an optional variable, falling back to `default` when unset.
///
/// A present but unparsable value is an error rather than silently ignored.
pub fn parse_env<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(v) if !v.trim().is_empty() => v.trim().parse().map_err(|e| {
            ReconcileError::Configuration(format!("invalid {name} value {v:?}: {e}"))
        }),
        _ => Ok(default),
    }
}

/// Whether a `LOG_FORMAT` value selects JSON logs.
pub fn is_json_log_format(value: &str) -> bool {
    value.trim().eq_ignore_ascii_case("json")
}

/// Read `LOG_FORMAT` on its own; logging is set up before the rest of the
/// configuration is validated.
pub fn json_logs_from_env() -> bool {
    std::env::var("LOG_FORMAT")
        .map(|v| is_json_log_format(&v))
        .unwrap_or(false)
}

/// HTTP surface configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Server listen address
    pub listen_addr: SocketAddr,
    /// Comma-separated allowed origins, `*` for any; `None` disables CORS
    pub cors_allow_origins: Option<String>,
    /// Emit JSON-formatted logs
    pub json_logs: bool,
}

impl ServerConfig {
    pub fn from_env() -> Result<Self> {
        let port: u16 = parse_env("PORT", DEFAULT_PORT)?;
        let host = std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string());

        let listen_addr: SocketAddr = format!("{host}:{port}").parse().map_err(|e| {
            ReconcileError::Configuration(format!("invalid listen address {host}:{port}: {e}"))
        })?;

        let cors_allow_origins = std::env::var("CORS_ALLOW_ORIGINS")
            .ok()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty());

        let json_logs = json_logs_from_env();

        Ok(Self {
            listen_addr,
            cors_allow_origins,
            json_logs,
        })
    }
}

/// Complete process configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub ledger: LedgerConfig,
    pub oracle: OracleConfig,
    pub reconciler: ReconcilerConfig,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        let reconciler = ReconcilerConfig::from_env()?;
        Ok(Self {
            server: ServerConfig::from_env()?,
            ledger: LedgerConfig::from_env()?,
            oracle: OracleConfig::from_env(reconciler.call_timeout)?,
            reconciler,
        })
    }
}

/// Parse a whole-seconds duration variable.
pub fn parse_env_secs(name: &str, default: Duration) -> Result<Duration> {
    parse_env(name, default.as_secs()).map(Duration::from_secs)
}

/// Parse a milliseconds duration variable.
pub fn parse_env_millis(name: &str, default: Duration) -> Result<Duration> {
    let default_ms = u64::try_from(default.as_millis()).unwrap_or(u64::MAX);
    parse_env(name, default_ms).map(Duration::from_millis)
}
