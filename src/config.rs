//! Chat configuration parsed from environment variables.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::ChatError;

pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 15;
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_KEEPALIVE_SECS: u64 = 15;
pub const DEFAULT_SERVER_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_RECONNECT_DELAYS_MS: [u64; 4] = [0, 2_000, 10_000, 30_000];
pub const DEFAULT_AUTH_FILE: &str = ".chatdesk/staff-auth.json";

/// Delays between automatic reconnect attempts, one attempt per entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub delays: Vec<Duration>,
}

impl RetryPolicy {
    #[must_use]
    pub fn from_millis(millis: &[u64]) -> Self {
        Self { delays: millis.iter().copied().map(Duration::from_millis).collect() }
    }

    /// Delay before the given zero-based attempt, or `None` once exhausted.
    #[must_use]
    pub fn delay_for(&self, attempt: usize) -> Option<Duration> {
        self.delays.get(attempt).copied()
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_millis(&DEFAULT_RECONNECT_DELAYS_MS)
    }
}

/// Connection tuning shared by the hub driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HubOptions {
    pub retry: RetryPolicy,
    /// Bound on socket open + handshake.
    pub connect_timeout: Duration,
    /// Bound on a single invocation round trip.
    pub invoke_timeout: Duration,
    /// Client ping cadence.
    pub keepalive: Duration,
    /// Silence from the server after which the link counts as lost.
    pub server_timeout: Duration,
}

impl Default for HubOptions {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            connect_timeout: Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS),
            invoke_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            keepalive: Duration::from_secs(DEFAULT_KEEPALIVE_SECS),
            server_timeout: Duration::from_secs(DEFAULT_SERVER_TIMEOUT_SECS),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatConfig {
    pub api_url: String,
    pub hub_url: String,
    pub request_timeout: Duration,
    pub hub: HubOptions,
    pub auth_file: PathBuf,
}

impl ChatConfig {
    /// Build typed chat config from environment variables.
    ///
    /// Required:
    /// - `CHAT_API_URL`: REST base URL
    /// - `CHAT_HUB_URL`: realtime hub URL
    ///
    /// Optional:
    /// - `CHAT_REQUEST_TIMEOUT_SECS`: default 15
    /// - `CHAT_CONNECT_TIMEOUT_SECS`: default 10
    /// - `CHAT_RECONNECT_DELAYS_MS`: comma list, default `0,2000,10000,30000`
    /// - `CHAT_KEEPALIVE_SECS`: default 15
    /// - `CHAT_SERVER_TIMEOUT_SECS`: default 30
    /// - `CHAT_AUTH_FILE`: default `.chatdesk/staff-auth.json`
    ///
    /// # Errors
    ///
    /// Returns [`ChatError::MissingConfig`] when a required variable is
    /// absent or empty, and [`ChatError::ConfigParse`] for a malformed
    /// reconnect schedule.
    pub fn from_env() -> Result<Self, ChatError> {
        let api_url = required_env("CHAT_API_URL")?.trim_end_matches('/').to_string();
        let hub_url = required_env("CHAT_HUB_URL")?;

        let request_timeout = Duration::from_secs(env_parse_u64("CHAT_REQUEST_TIMEOUT_SECS", DEFAULT_REQUEST_TIMEOUT_SECS));
        let retry = match std::env::var("CHAT_RECONNECT_DELAYS_MS").ok().filter(|s| !s.trim().is_empty()) {
            Some(raw) => parse_delays(&raw)?,
            None => RetryPolicy::default(),
        };
        let hub = HubOptions {
            retry,
            connect_timeout: Duration::from_secs(env_parse_u64("CHAT_CONNECT_TIMEOUT_SECS", DEFAULT_CONNECT_TIMEOUT_SECS)),
            invoke_timeout: request_timeout,
            keepalive: Duration::from_secs(env_parse_u64("CHAT_KEEPALIVE_SECS", DEFAULT_KEEPALIVE_SECS)),
            server_timeout: Duration::from_secs(env_parse_u64("CHAT_SERVER_TIMEOUT_SECS", DEFAULT_SERVER_TIMEOUT_SECS)),
        };
        let auth_file = std::env::var("CHAT_AUTH_FILE")
            .ok()
            .filter(|s| !s.is_empty())
            .map_or_else(|| PathBuf::from(DEFAULT_AUTH_FILE), PathBuf::from);

        Ok(Self { api_url, hub_url, request_timeout, hub, auth_file })
    }
}

fn required_env(key: &str) -> Result<String, ChatError> {
    std::env::var(key)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| ChatError::MissingConfig { var: key.to_owned() })
}

fn env_parse_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<u64>().ok())
        .unwrap_or(default)
}

fn parse_delays(raw: &str) -> Result<RetryPolicy, ChatError> {
    let millis = raw
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<u64>()
                .map_err(|_| ChatError::ConfigParse(format!("invalid CHAT_RECONNECT_DELAYS_MS entry: {s}")))
        })
        .collect::<Result<Vec<_>, _>>()?;
    Ok(RetryPolicy::from_millis(&millis))
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
