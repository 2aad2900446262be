//! Modem builder.
//!
//! Fluent construction of a [`Modem`] with validation at build time.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;

use crate::config::Config;
use crate::error::Result;
use crate::protocol::Notifications;
use crate::transport::{CredentialStore, HostNetwork, MemoryCredentialStore, Network};

use super::core::Modem;

// ============================================================================
// ModemBuilder
// ============================================================================

/// Builder for [`Modem`].
///
/// # Example
///
/// ```no_run
/// use cellsock::{Config, Modem};
///
/// # fn example() -> cellsock::Result<()> {
/// let (modem, notifications) = Modem::builder()
///     .config(Config::new().with_socket_capacity(4))
///     .build()?;
/// # Ok(())
/// # }
/// ```
#[derive(Default, Clone)]
pub struct ModemBuilder {
    config: Option<Config>,
    network: Option<Arc<dyn Network>>,
    credentials: Option<Arc<dyn CredentialStore>>,
}

impl fmt::Debug for ModemBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModemBuilder")
            .field("config", &self.config)
            .field("network", &self.network.is_some())
            .field("credentials", &self.credentials.is_some())
            .finish()
    }
}

// ============================================================================
// ModemBuilder - Setters
// ============================================================================

impl ModemBuilder {
    /// Creates a builder with defaults.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the configuration.
    #[inline]
    #[must_use]
    pub fn config(mut self, config: Config) -> Self {
        self.config = Some(config);
        self
    }

    /// Sets the network interface. Defaults to [`HostNetwork::new`].
    #[inline]
    #[must_use]
    pub fn network(mut self, network: Arc<dyn Network>) -> Self {
        self.network = Some(network);
        self
    }

    /// Sets the credential store. Defaults to an empty
    /// [`MemoryCredentialStore`].
    #[inline]
    #[must_use]
    pub fn credentials(mut self, credentials: Arc<dyn CredentialStore>) -> Self {
        self.credentials = Some(credentials);
        self
    }
}

// ============================================================================
// ModemBuilder - Build
// ============================================================================

impl ModemBuilder {
    /// Builds the modem and its notification receiver.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`](crate::Error::Config) if the configuration
    /// is invalid.
    pub fn build(self) -> Result<(Modem, Notifications)> {
        let config = self.config.unwrap_or_default();
        config.validate()?;

        let network = self
            .network
            .unwrap_or_else(|| Arc::new(HostNetwork::new()));
        let credentials = self
            .credentials
            .unwrap_or_else(|| Arc::new(MemoryCredentialStore::new()));

        Ok(Modem::new(config, network, credentials))
    }
}

// ============================================================================
// Tests
// ============================================================================
