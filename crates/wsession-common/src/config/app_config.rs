//! Application configuration structs
//!
//! Loads configuration from environment variables (and a `.env` file when
//! present).

use serde::Deserialize;
use std::env;
use std::str::FromStr;
use std::time::Duration;

use wsession_core::value_objects::{
    DEFAULT_HOST, DEFAULT_MAX_MESSAGE_SIZE, DEFAULT_PATH, DEFAULT_PORT,
    DEFAULT_RECEIVE_BUFFER_SIZE, DEFAULT_RETRY_COUNT, DEFAULT_RETRY_DELAY,
};
use wsession_core::{ConnectionOptions, SessionError};

use crate::telemetry::TracingConfig;

/// Main application configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub app: AppSettings,
    pub websocket: WebSocketConfig,
    pub log_format: LogFormat,
}

/// General application settings
#[derive(Debug, Clone, Deserialize)]
pub struct AppSettings {
    #[serde(default = "default_app_name")]
    pub name: String,
    #[serde(default)]
    pub env: Environment,
}

/// Environment type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Development,
    Staging,
    Production,
}

impl Environment {
    #[must_use]
    pub fn is_production(&self) -> bool {
        matches!(self, Self::Production)
    }

    #[must_use]
    pub fn is_development(&self) -> bool {
        matches!(self, Self::Development)
    }
}

impl FromStr for Environment {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "production" => Ok(Self::Production),
            "staging" => Ok(Self::Staging),
            "development" => Ok(Self::Development),
            _ => Err(()),
        }
    }
}

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Pretty,
    Json,
}

impl FromStr for LogFormat {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pretty" | "text" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            _ => Err(()),
        }
    }
}

/// WebSocket endpoint and session settings
#[derive(Debug, Clone, Deserialize)]
pub struct WebSocketConfig {
    pub host: String,
    pub port: u16,
    pub path: String,
    pub receive_buffer_size: usize,
    pub max_message_size: usize,
    pub auto_retry: bool,
    pub retry_count: u32,
    pub retry_delay_ms: u64,
    /// Whether the server relays inbound messages to every session
    pub relay_messages: bool,
}

impl WebSocketConfig {
    #[must_use]
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            path: DEFAULT_PATH.to_string(),
            receive_buffer_size: DEFAULT_RECEIVE_BUFFER_SIZE,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            auto_retry: false,
            retry_count: DEFAULT_RETRY_COUNT,
            retry_delay_ms: default_retry_delay_ms(),
            relay_messages: true,
        }
    }
}

// Default value functions
fn default_app_name() -> String {
    "wsession".to_string()
}

fn default_retry_delay_ms() -> u64 {
    u64::try_from(DEFAULT_RETRY_DELAY.as_millis()).unwrap_or(5000)
}

/// Parse `key` if set; a present but malformed value is an error
fn parse_var<T, F>(lookup: &F, key: &'static str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue(key, raw)),
        None => Ok(None),
    }
}

fn parse_bool<F>(lookup: &F, key: &'static str) -> Result<Option<bool>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(raw) => match raw.trim().to_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(Some(true)),
            "0" | "false" | "no" | "off" => Ok(Some(false)),
            _ => Err(ConfigError::InvalidValue(key, raw)),
        },
        None => Ok(None),
    }
}

impl AppConfig {
    /// Load configuration from environment variables
    ///
    /// # Errors
    /// Returns an error if a variable is set to a value that cannot be parsed
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build configuration from an arbitrary key/value source
    ///
    /// # Errors
    /// Returns an error if a key is set to a value that cannot be parsed
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = WebSocketConfig::default();

        let env = match lookup("APP_ENV") {
            Some(raw) => raw
                .parse::<Environment>()
                .map_err(|()| ConfigError::InvalidValue("APP_ENV", raw))?,
            None => Environment::default(),
        };

        let log_format = parse_var(&lookup, "LOG_FORMAT")?.unwrap_or(if env.is_production() {
            LogFormat::Json
        } else {
            LogFormat::Pretty
        });

        Ok(Self {
            app: AppSettings {
                name: lookup("APP_NAME").unwrap_or_else(default_app_name),
                env,
            },
            websocket: WebSocketConfig {
                host: lookup("WS_HOST").unwrap_or(defaults.host),
                port: parse_var(&lookup, "WS_PORT")?.unwrap_or(defaults.port),
                path: lookup("WS_PATH").unwrap_or(defaults.path),
                receive_buffer_size: parse_var(&lookup, "WS_RECEIVE_BUFFER_SIZE")?
                    .unwrap_or(defaults.receive_buffer_size),
                max_message_size: parse_var(&lookup, "WS_MAX_MESSAGE_SIZE")?
                    .unwrap_or(defaults.max_message_size),
                auto_retry: parse_bool(&lookup, "WS_AUTO_RETRY")?.unwrap_or(defaults.auto_retry),
                retry_count: parse_var(&lookup, "WS_RETRY_COUNT")?.unwrap_or(defaults.retry_count),
                retry_delay_ms: parse_var(&lookup, "WS_RETRY_DELAY_MS")?
                    .unwrap_or(defaults.retry_delay_ms),
                relay_messages: parse_bool(&lookup, "WS_RELAY_MESSAGES")?
                    .unwrap_or(defaults.relay_messages),
            },
            log_format,
        })
    }

    /// Validated session options
    ///
    /// # Errors
    /// Returns an error if the configured values violate the option rules
    pub fn connection_options(&self) -> Result<ConnectionOptions, ConfigError> {
        let ws = &self.websocket;
        ConnectionOptions::builder()
            .host(ws.host.clone())
            .port(ws.port)
            .path(ws.path.clone())
            .receive_buffer_size(ws.receive_buffer_size)
            .max_message_size(ws.max_message_size)
            .auto_retry_connection(ws.auto_retry)
            .retry_count(ws.retry_count)
            .retry_delay(Duration::from_millis(ws.retry_delay_ms))
            .build()
            .map_err(ConfigError::Options)
    }

    /// Tracing preset for the configured environment and log format
    #[must_use]
    pub fn tracing_config(&self) -> TracingConfig {
        let mut config = match self.app.env {
            Environment::Production => TracingConfig::production(),
            Environment::Development => TracingConfig::development(),
            Environment::Staging => TracingConfig::default(),
        };
        config.json = self.log_format == LogFormat::Json;
        config
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for {0}: {1}")]
    InvalidValue(&'static str, String),

    #[error("Invalid connection options: {0}")]
    Options(#[source] SessionError),
}
