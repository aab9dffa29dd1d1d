//! Connection options
//!
//! Validated once at construction; an invalid option never reaches a manager.

use std::time::Duration;

use crate::error::{SessionError, SessionResult};

/// Smallest receive buffer accepted
pub const MIN_RECEIVE_BUFFER_SIZE: usize = 1024;

/// Default receive buffer size in bytes
pub const DEFAULT_RECEIVE_BUFFER_SIZE: usize = 4096;

/// Default ceiling for one reassembled message (10 MiB)
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 10 * 1024 * 1024;

pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 5000;
pub const DEFAULT_PATH: &str = "/ws";
pub const DEFAULT_RETRY_COUNT: u32 = 3;
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(5);

/// Options shared by client and server managers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionOptions {
    host: String,
    port: u16,
    path: String,
    receive_buffer_size: usize,
    max_message_size: usize,
    auto_retry_connection: bool,
    retry_count: u32,
    retry_delay: Duration,
}

impl ConnectionOptions {
    /// Options for `host:port` with every other setting at its default
    pub fn new(host: impl Into<String>, port: u16) -> SessionResult<Self> {
        ConnectionOptionsBuilder::new().host(host).port(port).build()
    }

    #[must_use]
    pub fn builder() -> ConnectionOptionsBuilder {
        ConnectionOptionsBuilder::new()
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Endpoint path on the server, e.g. `/ws`
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn receive_buffer_size(&self) -> usize {
        self.receive_buffer_size
    }

    pub fn max_message_size(&self) -> usize {
        self.max_message_size
    }

    pub fn auto_retry_connection(&self) -> bool {
        self.auto_retry_connection
    }

    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    pub fn retry_delay(&self) -> Duration {
        self.retry_delay
    }

    /// Number of connect attempts a single `connect()` may make
    pub fn connect_attempts(&self) -> u32 {
        if self.auto_retry_connection {
            self.retry_count
        } else {
            1
        }
    }

    /// `host:port`
    #[must_use]
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// `ws://host:port/path`
    #[must_use]
    pub fn url(&self) -> String {
        format!("ws://{}:{}{}", self.host, self.port, self.path)
    }
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            path: DEFAULT_PATH.to_string(),
            receive_buffer_size: DEFAULT_RECEIVE_BUFFER_SIZE,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            auto_retry_connection: false,
            retry_count: DEFAULT_RETRY_COUNT,
            retry_delay: DEFAULT_RETRY_DELAY,
        }
    }
}

/// Builder for [`ConnectionOptions`]
#[derive(Debug, Clone, Default)]
pub struct ConnectionOptionsBuilder {
    options: ConnectionOptions,
}

impl ConnectionOptionsBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.options.host = host.into();
        self
    }

    #[must_use]
    pub fn port(mut self, port: u16) -> Self {
        self.options.port = port;
        self
    }

    #[must_use]
    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.options.path = path.into();
        self
    }

    #[must_use]
    pub fn receive_buffer_size(mut self, size: usize) -> Self {
        self.options.receive_buffer_size = size;
        self
    }

    #[must_use]
    pub fn max_message_size(mut self, size: usize) -> Self {
        self.options.max_message_size = size;
        self
    }

    #[must_use]
    pub fn auto_retry_connection(mut self, enabled: bool) -> Self {
        self.options.auto_retry_connection = enabled;
        self
    }

    #[must_use]
    pub fn retry_count(mut self, count: u32) -> Self {
        self.options.retry_count = count;
        self
    }

    #[must_use]
    pub fn retry_delay(mut self, delay: Duration) -> Self {
        self.options.retry_delay = delay;
        self
    }

    /// Validate and build the options
    pub fn build(self) -> SessionResult<ConnectionOptions> {
        let options = self.options;

        if options.host.trim().is_empty() {
            return Err(SessionError::configuration("Host cannot be null or empty"));
        }
        if options.port == 0 {
            return Err(SessionError::configuration(
                "Port must be between 1 and 65535",
            ));
        }
        if !options.path.starts_with('/') {
            return Err(SessionError::configuration(format!(
                "Path must start with '/': {}",
                options.path
            )));
        }
        if options.receive_buffer_size < MIN_RECEIVE_BUFFER_SIZE {
            return Err(SessionError::configuration(format!(
                "Buffer size must be at least {MIN_RECEIVE_BUFFER_SIZE} bytes"
            )));
        }
        if options.max_message_size == 0 {
            return Err(SessionError::configuration(
                "Max message size must be greater than zero",
            ));
        }
        if options.retry_count == 0 {
            return Err(SessionError::configuration("Retry count must be at least 1"));
        }

        Ok(options)
    }
}
