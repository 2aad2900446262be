//! Data-mode bridge state.
//!
//! In data mode, host bytes bypass command framing and are forwarded raw
//! to one target: a table socket or the proxy connection. Data mode ends
//! either on the host's terminator or when the target goes away, and each
//! ending emits exactly one [`Notification::DataModeExited`].
//!
//! [`DataMode`] is shared between the command context and the proxy
//! worker, so it is a cheap clone over shared state.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::identifiers::SocketId;
use crate::protocol::{ExitCause, Notification, Notifier};

// ============================================================================
// DataModeTarget
// ============================================================================

/// Where forwarded bytes go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataModeTarget {
    /// A table socket. Datagram sockets carry their destination.
    Socket {
        /// Target identity.
        id: SocketId,
        /// Destination for datagram sockets.
        destination: Option<(String, u16)>,
    },
    /// The proxy connection (peer or outbound).
    Proxy,
}

impl DataModeTarget {
    /// Returns `true` if this target is the proxy.
    #[inline]
    #[must_use]
    pub fn is_proxy(&self) -> bool {
        matches!(self, Self::Proxy)
    }
}

// ============================================================================
// DataMode
// ============================================================================

struct Inner {
    active: AtomicBool,
    target: Mutex<Option<DataModeTarget>>,
    notifier: Notifier,
}

/// Shared data-mode flag and target.
#[derive(Clone)]
pub struct DataMode {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for DataMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataMode")
            .field("active", &self.is_active())
            .field("target", &self.target())
            .finish()
    }
}

impl DataMode {
    /// Creates an inactive bridge reporting through `notifier`.
    #[must_use]
    pub fn new(notifier: Notifier) -> Self {
        Self {
            inner: Arc::new(Inner {
                active: AtomicBool::new(false),
                target: Mutex::new(None),
                notifier,
            }),
        }
    }

    /// Returns `true` while data mode is active.
    #[inline]
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.inner.active.load(Ordering::Acquire)
    }

    /// Current target, if active.
    #[must_use]
    pub fn target(&self) -> Option<DataModeTarget> {
        self.inner.target.lock().clone()
    }

    /// Returns `true` while data mode targets the proxy.
    #[must_use]
    pub fn targets_proxy(&self) -> bool {
        self.inner
            .target
            .lock()
            .as_ref()
            .is_some_and(DataModeTarget::is_proxy)
    }

    /// Enters data mode toward `target`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DataMode`] if data mode is already active.
    pub fn enter(&self, target: DataModeTarget) -> Result<()> {
        let mut slot = self.inner.target.lock();
        if slot.is_some() {
            return Err(Error::data_mode("already active"));
        }
        info!(?target, "Data mode entered");
        *slot = Some(target);
        self.inner.active.store(true, Ordering::Release);
        Ok(())
    }

    /// Leaves data mode.
    ///
    /// Emits one exit notification and returns `true` if data mode was
    /// active; otherwise does nothing and returns `false`.
    pub fn exit(&self, cause: ExitCause) -> bool {
        self.exit_if(|_| true, cause)
    }

    /// Leaves data mode only if the current target satisfies `pred`.
    pub fn exit_if(&self, pred: impl FnOnce(&DataModeTarget) -> bool, cause: ExitCause) -> bool {
        let mut slot = self.inner.target.lock();
        match slot.as_ref() {
            Some(target) if pred(target) => {}
            _ => return false,
        }

        let target = slot.take();
        self.inner.active.store(false, Ordering::Release);
        drop(slot);

        info!(?target, ?cause, "Data mode exited");
        self.inner
            .notifier
            .emit(Notification::DataModeExited { cause });
        true
    }

    /// Leaves data mode if it targets the proxy.
    pub fn exit_proxy(&self, cause: ExitCause) -> bool {
        let exited = self.exit_if(DataModeTarget::is_proxy, cause);
        if exited {
            debug!("Proxy data mode closed");
        }
        exited
    }

    /// Leaves data mode if it targets socket `id`.
    pub fn exit_socket(&self, id: SocketId, cause: ExitCause) -> bool {
        self.exit_if(
            |target| matches!(target, DataModeTarget::Socket { id: t, .. } if *t == id),
            cause,
        )
    }
}

// ============================================================================
// Tests
// ============================================================================
