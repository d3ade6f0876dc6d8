use std::time::Duration;

use backoff::backoff::Constant;
use bon::Builder;
use serde::Deserialize;
use serde_with::{DurationMilliSeconds, serde_as};

const DEFAULT_RECONNECT_INTERVAL_DURATION: Duration = Duration::from_millis(3000);
const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 10;
const DEFAULT_HEARTBEAT_INTERVAL_DURATION: Duration = Duration::from_secs(30);
const DEFAULT_REQUEST_TIMEOUT_DURATION: Duration = Duration::from_secs(5);

/// Configuration for the real-time client.
///
/// Only `url` is required. The struct can be built in code with [`Config::builder`] or
/// deserialized from the dashboard's settings, which use camelCase keys and millisecond
/// durations:
///
/// ```
/// use cto_realtime::ws::config::Config;
///
/// let config: Config = serde_json::from_str(
///     r#"{ "url": "ws://localhost:8000/ws", "reconnectInterval": 500, "debug": true }"#,
/// )?;
/// assert_eq!(config.max_reconnect_attempts, 10);
/// # Ok::<(), serde_json::Error>(())
/// ```
#[serde_as]
#[non_exhaustive]
#[derive(Debug, Clone, Builder, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Target endpoint (`ws://` or `wss://`)
    #[builder(into)]
    pub url: String,
    /// Fixed delay between reconnection attempts. There is no backoff and no jitter.
    #[builder(default = DEFAULT_RECONNECT_INTERVAL_DURATION)]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(default = "default_reconnect_interval")]
    pub reconnect_interval: Duration,
    /// Reconnection attempts allowed after an unexpected close before giving up
    #[builder(default = DEFAULT_MAX_RECONNECT_ATTEMPTS)]
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,
    /// Interval for sending `heartbeat` messages while open. Zero disables keep-alive.
    #[builder(default = DEFAULT_HEARTBEAT_INTERVAL_DURATION)]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval: Duration,
    /// Timeout used by `request` when none is given explicitly
    #[builder(default = DEFAULT_REQUEST_TIMEOUT_DURATION)]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(default = "default_request_timeout")]
    pub request_timeout: Duration,
    /// Log connect/disconnect/message events. Never required for correct operation.
    #[builder(default)]
    #[serde(default)]
    pub debug: bool,
}

impl Config {
    /// Shorthand for a configuration with every option at its default.
    pub fn new<S: Into<String>>(url: S) -> Self {
        Self::builder().url(url).build()
    }
}

const fn default_reconnect_interval() -> Duration {
    DEFAULT_RECONNECT_INTERVAL_DURATION
}

const fn default_max_reconnect_attempts() -> u32 {
    DEFAULT_MAX_RECONNECT_ATTEMPTS
}

const fn default_heartbeat_interval() -> Duration {
    DEFAULT_HEARTBEAT_INTERVAL_DURATION
}

const fn default_request_timeout() -> Duration {
    DEFAULT_REQUEST_TIMEOUT_DURATION
}

impl From<&Config> for Constant {
    fn from(config: &Config) -> Self {
        Constant::new(config.reconnect_interval)
    }
}
