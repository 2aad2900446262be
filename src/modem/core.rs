//! Modem facade: state ownership, accessors and data forwarding.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::config::Config;
use crate::datamode::{DataMode, DataModeTarget};
use crate::error::{Error, Result};
use crate::protocol::{ExitCause, Notifications, Notifier};
use crate::proxy::Proxy;
use crate::socket::Sockets;
use crate::transport::{CredentialStore, Network};

use super::builder::ModemBuilder;

// ============================================================================
// Modem
// ============================================================================

/// Socket table, proxy session and data-mode bridge behind one command
/// surface.
///
/// Commands run one at a time through [`execute`](Self::execute); raw
/// data-mode bytes go through [`forward`](Self::forward). Asynchronous
/// events arrive on the [`Notifications`] returned at build time.
pub struct Modem {
    pub(super) sockets: Sockets,
    pub(super) proxy: Proxy,
    pub(super) data_mode: DataMode,
}

impl fmt::Debug for Modem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Modem")
            .field("sockets", &self.sockets)
            .field("proxy", &self.proxy)
            .field("data_mode", &self.data_mode)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Modem - Constructor
// ============================================================================

impl Modem {
    /// Creates a builder.
    #[inline]
    #[must_use]
    pub fn builder() -> ModemBuilder {
        ModemBuilder::new()
    }

    pub(super) fn new(
        config: Config,
        network: Arc<dyn Network>,
        credentials: Arc<dyn CredentialStore>,
    ) -> (Self, Notifications) {
        let (notifier, notifications) = Notifier::channel();
        let data_mode = DataMode::new(notifier.clone());

        let modem = Self {
            sockets: Sockets::new(config.clone(), Arc::clone(&network), Arc::clone(&credentials)),
            proxy: Proxy::new(config, network, credentials, notifier, data_mode.clone()),
            data_mode,
        };
        (modem, notifications)
    }
}

// ============================================================================
// Modem - Accessors
// ============================================================================

impl Modem {
    /// Socket table.
    #[inline]
    #[must_use]
    pub fn sockets(&self) -> &Sockets {
        &self.sockets
    }

    /// Mutable socket table, for direct typed calls.
    #[inline]
    pub fn sockets_mut(&mut self) -> &mut Sockets {
        &mut self.sockets
    }

    /// Proxy session.
    #[inline]
    #[must_use]
    pub fn proxy(&self) -> &Proxy {
        &self.proxy
    }

    /// Mutable proxy session, for direct typed calls.
    #[inline]
    pub fn proxy_mut(&mut self) -> &mut Proxy {
        &mut self.proxy
    }

    /// Data-mode bridge.
    #[inline]
    #[must_use]
    pub fn data_mode(&self) -> &DataMode {
        &self.data_mode
    }
}

// ============================================================================
// Modem - Data Mode
// ============================================================================

impl Modem {
    /// Forwards raw host bytes to the data-mode target.
    ///
    /// Returns the bytes actually written; a stalled or failed write is
    /// not an error. When the target's connection is lost, or the target
    /// no longer exists, data mode ends with
    /// [`ExitCause::ConnectionLost`].
    ///
    /// # Errors
    ///
    /// - [`Error::DataMode`] if data mode is not active
    /// - the target's validation error if it went away
    pub async fn forward(&mut self, data: &[u8]) -> Result<usize> {
        let target = self
            .data_mode
            .target()
            .ok_or_else(|| Error::data_mode("not active"))?;

        let report = match &target {
            DataModeTarget::Socket {
                id,
                destination: None,
            } => self.sockets.write_to(*id, data).await,
            DataModeTarget::Socket {
                id,
                destination: Some((host, port)),
            } => {
                self.sockets
                    .write_datagram_to(*id, host, *port, data)
                    .await
            }
            DataModeTarget::Proxy => self.proxy.write(data).await,
        };

        let report = match report {
            Ok(report) => report,
            Err(e) => {
                warn!(?target, error = %e, "Data mode target gone");
                self.data_mode.exit(ExitCause::ConnectionLost);
                return Err(e);
            }
        };

        if report.is_connection_lost() {
            warn!(?target, written = report.written, "Data mode connection lost");
            self.data_mode.exit(ExitCause::ConnectionLost);
        } else if let Some(e) = &report.error {
            debug!(?target, written = report.written, error = %e, "Partial forward");
        }
        Ok(report.written)
    }

    /// Leaves data mode on the host's terminator.
    ///
    /// Returns `false` if data mode was not active.
    pub fn exit_data_mode(&self) -> bool {
        self.data_mode.exit(ExitCause::Requested)
    }
}
