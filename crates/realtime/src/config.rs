//! Transport configuration.
//!
//! Read from a camelCase JSON file; every field has a default, so a missing
//! file or a partial one is fine.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use wardbell_protocol::HeartBeat;
use wardbell_protocol::constants::{
    CONNECT_TIMEOUT, DEFAULT_BROKER_PATH, HEARTBEAT_INCOMING, HEARTBEAT_OUTGOING,
    INITIALIZE_DEBOUNCE, NETWORK_POLL_INTERVAL, RECONNECT_DELAY,
};

use crate::types::ReconnectPolicy;

/// Errors from loading or validating configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid backend URL: {0}")]
    InvalidBackendUrl(String),
}

/// Realtime transport settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RealtimeConfig {
    /// Backend host the broker URL is derived from.
    pub backend_url: String,
    /// Broker endpoint appended to the backend host.
    pub broker_path: String,
    /// Extra CONNECT headers, e.g. `Authorization`.
    pub connect_headers: BTreeMap<String, String>,
    pub heartbeat_outgoing_ms: u64,
    pub heartbeat_incoming_ms: u64,
    pub reconnect_delay_ms: u64,
    pub initialize_debounce_ms: u64,
    pub connect_timeout_ms: u64,
    pub network_poll_ms: u64,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            backend_url: "https://localhost:8080".into(),
            broker_path: DEFAULT_BROKER_PATH.into(),
            connect_headers: BTreeMap::new(),
            heartbeat_outgoing_ms: HEARTBEAT_OUTGOING.as_millis() as u64,
            heartbeat_incoming_ms: HEARTBEAT_INCOMING.as_millis() as u64,
            reconnect_delay_ms: RECONNECT_DELAY.as_millis() as u64,
            initialize_debounce_ms: INITIALIZE_DEBOUNCE.as_millis() as u64,
            connect_timeout_ms: CONNECT_TIMEOUT.as_millis() as u64,
            network_poll_ms: NETWORK_POLL_INTERVAL.as_millis() as u64,
        }
    }
}

impl RealtimeConfig {
    /// Loads configuration from a JSON file. A missing file yields defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "no realtime config file, using defaults");
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Creates a config for the given backend with default timings.
    pub fn for_backend(backend_url: impl Into<String>) -> Self {
        Self {
            backend_url: backend_url.into(),
            ..Self::default()
        }
    }

    /// Derives the broker URL: `http(s)` is upgraded to `wss`, `ws` and `wss`
    /// are kept, and the broker path is joined with exactly one `/`.
    pub fn broker_url(&self) -> Result<String, ConfigError> {
        let raw = self.backend_url.trim();
        let (scheme, rest) = raw
            .split_once("://")
            .ok_or_else(|| ConfigError::InvalidBackendUrl(raw.to_string()))?;
        let scheme = match scheme.to_ascii_lowercase().as_str() {
            "http" | "https" | "wss" => "wss",
            "ws" => "ws",
            _ => return Err(ConfigError::InvalidBackendUrl(raw.to_string())),
        };
        let rest = rest.trim_end_matches('/');
        if host_of(rest).is_empty() {
            return Err(ConfigError::InvalidBackendUrl(raw.to_string()));
        }
        let path = self.broker_path.trim_start_matches('/');
        Ok(format!("{scheme}://{rest}/{path}"))
    }

    /// Host sent in the CONNECT frame.
    pub fn broker_host(&self) -> Result<String, ConfigError> {
        let url = self.broker_url()?;
        let rest = url.split_once("://").map(|(_, r)| r).unwrap_or(&url);
        Ok(host_of(rest).to_string())
    }

    /// Heartbeat offer sent in the CONNECT frame.
    pub fn heart_beat(&self) -> HeartBeat {
        HeartBeat {
            outgoing_ms: self.heartbeat_outgoing_ms,
            incoming_ms: self.heartbeat_incoming_ms,
        }
    }

    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        ReconnectPolicy {
            delay: Duration::from_millis(self.reconnect_delay_ms),
        }
    }

    pub fn initialize_debounce(&self) -> Duration {
        Duration::from_millis(self.initialize_debounce_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn network_poll(&self) -> Duration {
        Duration::from_millis(self.network_poll_ms)
    }
}

/// Host part of `host[:port][/path]`, without any `user@` prefix.
fn host_of(authority_and_path: &str) -> &str {
    let authority = authority_and_path
        .split(['/', '?', '#'])
        .next()
        .unwrap_or_default();
    let authority = authority.rsplit('@').next().unwrap_or_default();
    if let Some(v6) = authority.strip_prefix('[') {
        return v6.split(']').next().unwrap_or_default();
    }
    authority.split(':').next().unwrap_or_default()
}
