/// Configuration management
use crate::conversation_store::OrderingPolicy;
use crate::error::{ClientError, Result};
use crate::transport::TransportKind;
use serde::{Deserialize, Serialize};
use std::time::Duration;

const DEFAULT_SOCKET_URL: &str = "http://localhost:5000";
const DEFAULT_API_URL: &str = "http://localhost:5000/api";
const DEFAULT_SOCKET_PATH: &str = "/socket.io/";

/// Reconnection policy applied by the transport
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconnectConfig {
    /// Reconnect automatically after an unexpected disconnect
    pub enabled: bool,

    /// Give up after this many consecutive failed attempts (`None` = never)
    pub max_attempts: Option<u32>,

    /// Delay before the first attempt
    pub delay: Duration,

    /// Upper bound for the backoff delay
    pub max_delay: Duration,

    /// Jitter factor in `[0, 1]`
    pub randomization_factor: f64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_attempts: None,
            delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(5),
            randomization_factor: 0.5,
        }
    }
}

/// Client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Base URL of the realtime server
    pub socket_url: String,

    /// Engine.IO endpoint path on the realtime server
    pub socket_path: String,

    /// Base URL of the REST API
    pub api_url: String,

    /// Raw `Cookie` header the session token is read from
    pub cookies: Option<String>,

    /// Transports in order of preference
    pub transports: Vec<TransportKind>,

    /// Display order of the conversation list
    pub ordering: OrderingPolicy,

    /// Timeout for a single connection attempt or REST request
    pub connection_timeout: Duration,

    pub reconnect: ReconnectConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            socket_url: DEFAULT_SOCKET_URL.to_string(),
            socket_path: DEFAULT_SOCKET_PATH.to_string(),
            api_url: DEFAULT_API_URL.to_string(),
            cookies: None,
            transports: vec![TransportKind::WebSocket, TransportKind::Polling],
            ordering: OrderingPolicy::RecentFirst,
            connection_timeout: Duration::from_secs(10),
            reconnect: ReconnectConfig::default(),
        }
    }
}

impl Config {
    /// Defaults overridden by `HIREWIRE_*` environment variables
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(url) = std::env::var("HIREWIRE_SOCKET_URL") {
            config.socket_url = url;
        }
        if let Ok(url) = std::env::var("HIREWIRE_API_URL") {
            config.api_url = url;
        }
        if let Ok(cookies) = std::env::var("HIREWIRE_COOKIES") {
            config.cookies = Some(cookies);
        }
        if let Ok(ordering) = std::env::var("HIREWIRE_ORDERING") {
            config.ordering = ordering.parse()?;
        }
        if let Ok(attempts) = std::env::var("HIREWIRE_RECONNECT_ATTEMPTS") {
            let attempts = attempts.parse::<u32>().map_err(|_| {
                ClientError::Config("HIREWIRE_RECONNECT_ATTEMPTS must be a number".to_string())
            })?;
            config.reconnect.max_attempts = Some(attempts);
        }

        config.validate()?;
        Ok(config)
    }

    /// Environment config with command line flags layered on top
    pub fn from_args(args: &[String]) -> Result<Self> {
        let mut config = Self::from_env()?;

        let mut i = 0;
        while i < args.len() {
            match args[i].as_str() {
                "--socket-url" => {
                    config.socket_url = flag_value(args, i, "--socket-url")?.to_string();
                    i += 2;
                }
                "--api-url" => {
                    config.api_url = flag_value(args, i, "--api-url")?.to_string();
                    i += 2;
                }
                "--cookie" => {
                    config.cookies = Some(flag_value(args, i, "--cookie")?.to_string());
                    i += 2;
                }
                "--token" => {
                    let token = flag_value(args, i, "--token")?;
                    config.cookies = Some(format!("{}={}", crate::session::TOKEN_COOKIE, token));
                    i += 2;
                }
                "--ordering" => {
                    config.ordering = flag_value(args, i, "--ordering")?.parse()?;
                    i += 2;
                }
                "--websocket-only" => {
                    config.transports = vec![TransportKind::WebSocket];
                    i += 1;
                }
                "--polling-only" => {
                    config.transports = vec![TransportKind::Polling];
                    i += 1;
                }
                "--no-reconnect" => {
                    config.reconnect.enabled = false;
                    i += 1;
                }
                other => {
                    return Err(ClientError::Config(format!("Unknown option: {}", other)));
                }
            }
        }

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        for (name, url) in [("socket url", &self.socket_url), ("api url", &self.api_url)] {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(ClientError::Config(format!(
                    "Invalid {}: {} (expected http:// or https://)",
                    name, url
                )));
            }
        }
        if self.transports.is_empty() {
            return Err(ClientError::Config("At least one transport is required".to_string()));
        }
        if !(0.0..=1.0).contains(&self.reconnect.randomization_factor) {
            return Err(ClientError::Config(
                "Randomization factor must be between 0 and 1".to_string(),
            ));
        }
        Ok(())
    }
}

fn flag_value<'a>(args: &'a [String], i: usize, flag: &str) -> Result<&'a str> {
    args.get(i + 1)
        .map(|s| s.as_str())
        .ok_or_else(|| ClientError::Config(format!("{} requires a value", flag)))
}
