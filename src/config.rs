//! Client configuration parsed from environment variables.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::ClientError;

pub const DEFAULT_BASE_URL: &str = "http://127.0.0.1:5000";
pub const DEFAULT_WS_PATH: &str = "/ws";
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_STORE_PATH: &str = ".chatdeck.json";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// HTTP base URL of the backend; the socket URL is derived from it.
    pub base_url: String,
    pub ws_path: String,
    pub connect_timeout: Duration,
    /// Fail a session when no terminal event arrives in time. `None` waits forever.
    pub response_timeout: Option<Duration>,
    pub store_path: PathBuf,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_owned(),
            ws_path: DEFAULT_WS_PATH.to_owned(),
            connect_timeout: Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS),
            response_timeout: None,
            store_path: PathBuf::from(DEFAULT_STORE_PATH),
        }
    }
}

impl ClientConfig {
    /// Build typed config from environment variables.
    ///
    /// Optional:
    /// - `CHATDECK_BASE_URL`: default `http://127.0.0.1:5000`
    /// - `CHATDECK_WS_PATH`: default `/ws`
    /// - `CHATDECK_CONNECT_TIMEOUT_SECS`: default 10
    /// - `CHATDECK_RESPONSE_TIMEOUT_SECS`: unset or 0 disables the timeout
    /// - `CHATDECK_STORE_PATH`: default `.chatdeck.json`
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::InvalidBaseUrl`] when the base URL is not http(s).
    pub fn from_env() -> Result<Self, ClientError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`Self::from_env`] over an arbitrary key lookup.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::InvalidBaseUrl`] when the base URL is not http(s).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ClientError> {
        let base_url = lookup("CHATDECK_BASE_URL")
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_owned())
            .trim_end_matches('/')
            .to_owned();
        if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
            return Err(ClientError::InvalidBaseUrl(base_url));
        }

        let ws_path = lookup("CHATDECK_WS_PATH").unwrap_or_else(|| DEFAULT_WS_PATH.to_owned());
        let ws_path = if ws_path.starts_with('/') { ws_path } else { format!("/{ws_path}") };

        let connect_timeout = Duration::from_secs(parse_u64(
            lookup("CHATDECK_CONNECT_TIMEOUT_SECS"),
            DEFAULT_CONNECT_TIMEOUT_SECS,
        ));
        let response_timeout = match parse_u64(lookup("CHATDECK_RESPONSE_TIMEOUT_SECS"), 0) {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        };
        let store_path = lookup("CHATDECK_STORE_PATH").map_or_else(|| PathBuf::from(DEFAULT_STORE_PATH), PathBuf::from);

        Ok(Self { base_url, ws_path, connect_timeout, response_timeout, store_path })
    }

    /// WebSocket URL derived from the HTTP base URL.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::InvalidBaseUrl`] when the base URL is not http(s).
    pub fn ws_url(&self) -> Result<String, ClientError> {
        if let Some(rest) = self.base_url.strip_prefix("http://") {
            return Ok(format!("ws://{rest}{}", self.ws_path));
        }
        if let Some(rest) = self.base_url.strip_prefix("https://") {
            return Ok(format!("wss://{rest}{}", self.ws_path));
        }

        Err(ClientError::InvalidBaseUrl(self.base_url.clone()))
    }

    /// Absolute REST endpoint for `path`.
    #[must_use]
    pub fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }
}

fn parse_u64(raw: Option<String>, default: u64) -> u64 {
    raw.and_then(|v| v.trim().parse::<u64>().ok())
        .unwrap_or(default)
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
