//! Configuration for the miniserver

use std::ops::RangeInclusive;
use std::time::Duration;

use crate::error::{MiniServerError, Result};

/// First port of the dynamic range, where HTTP listeners start searching
pub const APPLICATION_LISTENING_PORT: u16 = 49152;

/// Configuration for [`MiniServer`](crate::MiniServer)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MiniServerConfig {
    /// Port range searched for HTTP listeners; `(0, 0)` asks the OS for an
    /// ephemeral port
    /// Default: (49152, 65535)
    pub http_port_range: (u16, u16),

    /// Answer requests whose Host is not a numeric address with a redirect
    /// to the numeric address instead of closing the connection
    /// Default: false
    pub allow_literal_host_redirect: bool,

    /// How long `start` waits for the dispatch loop to report Running
    /// Default: 10 seconds
    pub startup_timeout: Duration,

    /// Poll interval while waiting for startup
    /// Default: 50 milliseconds
    pub startup_poll_interval: Duration,

    /// Read timeout applied to accepted connections
    /// Default: 30 seconds
    pub http_read_timeout: Duration,

    /// Upper bound for request line plus headers
    /// Default: 8192 bytes
    pub max_header_bytes: usize,

    /// Largest request body a handler may read through
    /// [`Connection::read_body`](crate::Connection::read_body)
    /// Default: 16000 bytes
    pub max_body_bytes: usize,

    /// Receive buffer for one SSDP datagram
    /// Default: 2500 bytes
    pub ssdp_buffer_size: usize,
}

impl Default for MiniServerConfig {
    fn default() -> Self {
        Self {
            http_port_range: (APPLICATION_LISTENING_PORT, u16::MAX),
            allow_literal_host_redirect: false,
            startup_timeout: Duration::from_secs(10),
            startup_poll_interval: Duration::from_millis(50),
            http_read_timeout: Duration::from_secs(30),
            max_header_bytes: 8 * 1024,
            max_body_bytes: 16_000,
            ssdp_buffer_size: 2500,
        }
    }
}

impl MiniServerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ephemeral ports and short timeouts, for tests and local tooling
    pub fn ephemeral() -> Self {
        Self {
            http_port_range: (0, 0),
            startup_timeout: Duration::from_secs(5),
            http_read_timeout: Duration::from_secs(5),
            ..Default::default()
        }
    }

    /// Redirect literal Host headers instead of rejecting them
    pub fn permissive_hosts() -> Self {
        Self {
            allow_literal_host_redirect: true,
            ..Default::default()
        }
    }

    pub fn port_range(&self) -> RangeInclusive<u16> {
        self.http_port_range.0..=self.http_port_range.1
    }

    /// Validate the configuration and return any issues
    pub fn validate(&self) -> Result<()> {
        let (start, end) = self.http_port_range;
        if start > end {
            return Err(MiniServerError::Config(
                "Invalid HTTP port range: start must not exceed end".to_string(),
            ));
        }

        if start == 0 && end != 0 {
            return Err(MiniServerError::Config(
                "Port 0 selects an ephemeral port and cannot start a range".to_string(),
            ));
        }

        if self.startup_timeout.is_zero() || self.startup_poll_interval.is_zero() {
            return Err(MiniServerError::Config(
                "Startup timeout and poll interval must be greater than 0".to_string(),
            ));
        }

        if self.startup_poll_interval > self.startup_timeout {
            return Err(MiniServerError::Config(
                "Startup poll interval must not exceed the startup timeout".to_string(),
            ));
        }

        if self.http_read_timeout.is_zero() {
            return Err(MiniServerError::Config(
                "HTTP read timeout must be greater than 0".to_string(),
            ));
        }

        if self.max_header_bytes < 256 {
            return Err(MiniServerError::Config(
                "Max header bytes must be at least 256".to_string(),
            ));
        }

        if self.max_body_bytes == 0 {
            return Err(MiniServerError::Config(
                "Max body bytes must be greater than 0".to_string(),
            ));
        }

        if self.ssdp_buffer_size == 0 {
            return Err(MiniServerError::Config(
                "SSDP buffer size must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    /// Builder pattern methods for fluent configuration

    pub fn with_http_ports(mut self, start: u16, end: u16) -> Self {
        self.http_port_range = (start, end);
        self
    }

    pub fn with_literal_host_redirect(mut self, allow: bool) -> Self {
        self.allow_literal_host_redirect = allow;
        self
    }

    pub fn with_startup_timeout(mut self, timeout: Duration) -> Self {
        self.startup_timeout = timeout;
        self
    }

    pub fn with_http_read_timeout(mut self, timeout: Duration) -> Self {
        self.http_read_timeout = timeout;
        self
    }

    pub fn with_max_header_bytes(mut self, bytes: usize) -> Self {
        self.max_header_bytes = bytes;
        self
    }

    pub fn with_max_body_bytes(mut self, bytes: usize) -> Self {
        self.max_body_bytes = bytes;
        self
    }
}
