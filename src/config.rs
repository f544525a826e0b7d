//! Broker configuration loaded from environment variables.
//!
//! Follows 12-factor style: all settings come from environment variables
//! (or a `.env` file via `dotenvy`).

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable lines.
    Text,
    /// One JSON object per line.
    Json,
}

/// Top-level broker configuration.
///
/// Loaded once at startup via [`BrokerConfig::from_env`].
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    /// Socket address to bind the HTTP server to (e.g. `127.0.0.1:1717`).
    pub listen_addr: SocketAddr,

    /// How long a caller waits for an evaluator's reply.
    pub eval_timeout: Duration,

    /// Capacity of each connection's outbound frame queue.
    pub outbound_buffer: usize,

    /// Where the language store keeps its JSON snapshot.
    pub language_store_path: PathBuf,

    /// When `false`, languages live in memory only.
    pub store_persistence_enabled: bool,

    /// Log output format.
    pub log_format: LogFormat,
}

impl BrokerConfig {
    /// Loads configuration from environment variables.
    ///
    /// Falls back to defaults when a variable is not set.
    /// Calls `dotenvy::dotenv().ok()` to optionally load a `.env` file.
    ///
    /// # Errors
    ///
    /// Returns an error if `LISTEN_ADDR` is set but cannot be parsed as
    /// a [`SocketAddr`].
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let listen_addr: SocketAddr = std::env::var("LISTEN_ADDR")
            .unwrap_or_else(|_| "127.0.0.1:1717".to_string())
            .parse()?;

        let eval_timeout = Duration::from_millis(parse_env("EVAL_TIMEOUT_MS", 5_000));
        let outbound_buffer = parse_env("OUTBOUND_BUFFER", 64_usize).max(1);
        let language_store_path = std::env::var("LANGUAGE_STORE_PATH")
            .map_or_else(|_| PathBuf::from("data/languages.json"), PathBuf::from);
        let store_persistence_enabled = parse_env_bool("STORE_PERSISTENCE_ENABLED", true);
        let log_format = match std::env::var("LOG_FORMAT").ok().as_deref() {
            Some("json" | "JSON") => LogFormat::Json,
            _ => LogFormat::Text,
        };

        Ok(Self {
            listen_addr,
            eval_timeout,
            outbound_buffer,
            language_store_path,
            store_persistence_enabled,
            log_format,
        })
    }
}

/// Parses an environment variable as `T`, returning `default` on missing
/// or invalid values.
fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Parses an environment variable as a boolean. Accepts `"true"`, `"1"`,
/// `"false"`, `"0"` (case-insensitive). Returns `default` otherwise.
fn parse_env_bool(key: &str, default: bool) -> bool {
    match std::env::var(key).ok().map(|v| v.to_ascii_lowercase()).as_deref() {
        Some("true" | "1") => true,
        Some("false" | "0") => false,
        _ => default,
    }
}
