//! Runtime configuration for the socket and proxy core.
//!
//! Provides capacity, buffer and timeout settings. Values can be loaded
//! from JSON or adjusted in code with the `with_*` methods.
//!
//! # Example
//!
//! ```ignore
//! use cellsock::Config;
//!
//! let config = Config::new()
//!     .with_socket_capacity(4)
//!     .with_proxy_idle_timeout_ms(60_000);
//! config.validate()?;
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

// ============================================================================
// Constants
// ============================================================================

/// Default number of socket table slots.
pub const DEFAULT_SOCKET_CAPACITY: usize = 8;

/// Default receive buffer size in bytes.
pub const DEFAULT_RECV_BUFFER_SIZE: usize = 2048;

/// Default bounded send retry window.
pub const DEFAULT_SEND_TIMEOUT_MS: u64 = 30_000;

/// Default connect timeout.
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 30_000;

/// Default proxy worker liveness tick.
pub const DEFAULT_PROXY_POLL_INTERVAL_MS: u64 = 10_000;

/// Default bound on a proxy peer's TLS handshake.
pub const DEFAULT_PROXY_HANDSHAKE_TIMEOUT_MS: u64 = 5_000;

/// Default bounded wait for proxy worker exit.
pub const DEFAULT_PROXY_STOP_TIMEOUT_MS: u64 = 3_000;

/// Default maximum number of allow-listed peer addresses.
pub const DEFAULT_ALLOWLIST_CAPACITY: usize = 6;

// ============================================================================
// Config
// ============================================================================

/// Socket and proxy configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Config {
    /// Number of socket table slots.
    pub socket_capacity: usize,

    /// Size of the shared receive buffer.
    pub recv_buffer_size: usize,

    /// Bounded wait-then-write retry window for sends.
    pub send_timeout_ms: u64,

    /// Timeout for outbound connects.
    pub connect_timeout_ms: u64,

    /// Liveness tick of the proxy worker loop.
    pub proxy_poll_interval_ms: u64,

    /// Bound on the TLS handshake of a peer accepted by the proxy server.
    ///
    /// The worker handles nothing else while a handshake runs.
    pub proxy_handshake_timeout_ms: u64,

    /// Bounded wait for the proxy worker to exit on stop.
    pub proxy_stop_timeout_ms: u64,

    /// Proxy server peer inactivity timeout; 0 disables it.
    pub proxy_idle_timeout_ms: u64,

    /// Maximum number of allow-listed peer addresses.
    pub allowlist_capacity: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Constructors
// ============================================================================

impl Config {
    /// Creates a configuration with default settings.
    #[inline]
    #[must_use]
    pub const fn new() -> Self {
        Self {
            socket_capacity: DEFAULT_SOCKET_CAPACITY,
            recv_buffer_size: DEFAULT_RECV_BUFFER_SIZE,
            send_timeout_ms: DEFAULT_SEND_TIMEOUT_MS,
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT_MS,
            proxy_poll_interval_ms: DEFAULT_PROXY_POLL_INTERVAL_MS,
            proxy_handshake_timeout_ms: DEFAULT_PROXY_HANDSHAKE_TIMEOUT_MS,
            proxy_stop_timeout_ms: DEFAULT_PROXY_STOP_TIMEOUT_MS,
            proxy_idle_timeout_ms: 0,
            allowlist_capacity: DEFAULT_ALLOWLIST_CAPACITY,
        }
    }

    /// Parses and validates a configuration from JSON.
    ///
    /// Missing fields take their default values.
    ///
    /// # Errors
    ///
    /// - [`Error::Json`] if the document is malformed
    /// - [`Error::Config`] if a value is out of range
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }
}

// ============================================================================
// Builder Methods
// ============================================================================

impl Config {
    /// Sets the socket table capacity.
    #[inline]
    #[must_use]
    pub fn with_socket_capacity(mut self, capacity: usize) -> Self {
        self.socket_capacity = capacity;
        self
    }

    /// Sets the receive buffer size.
    #[inline]
    #[must_use]
    pub fn with_recv_buffer_size(mut self, size: usize) -> Self {
        self.recv_buffer_size = size;
        self
    }

    /// Sets the send retry window.
    #[inline]
    #[must_use]
    pub fn with_send_timeout_ms(mut self, ms: u64) -> Self {
        self.send_timeout_ms = ms;
        self
    }

    /// Sets the connect timeout.
    #[inline]
    #[must_use]
    pub fn with_connect_timeout_ms(mut self, ms: u64) -> Self {
        self.connect_timeout_ms = ms;
        self
    }

    /// Sets the proxy worker liveness tick.
    #[inline]
    #[must_use]
    pub fn with_proxy_poll_interval_ms(mut self, ms: u64) -> Self {
        self.proxy_poll_interval_ms = ms;
        self
    }

    /// Sets the proxy peer handshake bound.
    #[inline]
    #[must_use]
    pub fn with_proxy_handshake_timeout_ms(mut self, ms: u64) -> Self {
        self.proxy_handshake_timeout_ms = ms;
        self
    }

    /// Sets the bounded wait for proxy stop.
    #[inline]
    #[must_use]
    pub fn with_proxy_stop_timeout_ms(mut self, ms: u64) -> Self {
        self.proxy_stop_timeout_ms = ms;
        self
    }

    /// Sets the proxy peer inactivity timeout (0 disables).
    #[inline]
    #[must_use]
    pub fn with_proxy_idle_timeout_ms(mut self, ms: u64) -> Self {
        self.proxy_idle_timeout_ms = ms;
        self
    }

    /// Sets the allow-list capacity.
    #[inline]
    #[must_use]
    pub fn with_allowlist_capacity(mut self, capacity: usize) -> Self {
        self.allowlist_capacity = capacity;
        self
    }
}

// ============================================================================
// Accessors
// ============================================================================

impl Config {
    /// Send retry window as a [`Duration`].
    #[inline]
    #[must_use]
    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }

    /// Connect timeout as a [`Duration`].
    #[inline]
    #[must_use]
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Worker liveness tick as a [`Duration`].
    #[inline]
    #[must_use]
    pub fn proxy_poll_interval(&self) -> Duration {
        Duration::from_millis(self.proxy_poll_interval_ms)
    }

    /// Proxy peer handshake bound as a [`Duration`].
    #[inline]
    #[must_use]
    pub fn proxy_handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.proxy_handshake_timeout_ms)
    }

    /// Proxy stop wait as a [`Duration`].
    #[inline]
    #[must_use]
    pub fn proxy_stop_timeout(&self) -> Duration {
        Duration::from_millis(self.proxy_stop_timeout_ms)
    }

    /// Peer inactivity timeout, if enabled.
    #[inline]
    #[must_use]
    pub fn proxy_idle_timeout(&self) -> Option<Duration> {
        (self.proxy_idle_timeout_ms > 0).then(|| Duration::from_millis(self.proxy_idle_timeout_ms))
    }
}

// ============================================================================
// Validation
// ============================================================================

impl Config {
    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if a capacity, buffer or timeout is zero.
    pub fn validate(&self) -> Result<()> {
        if self.socket_capacity == 0 {
            return Err(Error::config("socketCapacity must be at least 1"));
        }
        if self.recv_buffer_size == 0 {
            return Err(Error::config("recvBufferSize must be at least 1"));
        }
        if self.allowlist_capacity == 0 {
            return Err(Error::config("allowlistCapacity must be at least 1"));
        }

        let timeouts = [
            ("sendTimeoutMs", self.send_timeout_ms),
            ("connectTimeoutMs", self.connect_timeout_ms),
            ("proxyPollIntervalMs", self.proxy_poll_interval_ms),
            ("proxyHandshakeTimeoutMs", self.proxy_handshake_timeout_ms),
            ("proxyStopTimeoutMs", self.proxy_stop_timeout_ms),
        ];
        if let Some((name, _)) = timeouts.iter().find(|(_, ms)| *ms == 0) {
            return Err(Error::config(format!("{name} must be non-zero")));
        }

        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================
