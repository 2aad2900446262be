//! Error types for the socket and proxy core.
//!
//! This module defines all error types used throughout the crate.
//!
//! # Usage
//!
//! All fallible operations return [`Result<T>`] which uses [`Error`]:
//!
//! ```ignore
//! use cellsock::{Result, Error};
//!
//! async fn example(modem: &mut Modem) -> Result<()> {
//!     modem.sockets_mut().connect("example.com", 7).await?;
//!     modem.sockets_mut().send(b"PING").await?;
//!     Ok(())
//! }
//! ```
//!
//! # Error Categories
//!
//! | Category | Variants |
//! |----------|----------|
//! | Capacity | [`Error::TableFull`], [`Error::SessionActive`] |
//! | Validation | [`Error::NoCurrentSocket`], [`Error::SocketNotFound`], [`Error::InvalidRole`], [`Error::InvalidState`], [`Error::NotConnected`], [`Error::NotSupported`], [`Error::InvalidArgument`], [`Error::NotSecure`], [`Error::NoSession`], [`Error::DataMode`] |
//! | Environment | [`Error::AddressUnavailable`], [`Error::Resolve`], [`Error::Credential`], [`Error::Tls`], [`Error::Config`] |
//! | Transport | [`Error::Transport`] |
//! | Timeout | [`Error::Timeout`] |
//! | External | [`Error::Io`], [`Error::Json`], [`Error::ChannelClosed`] |

// ============================================================================
// Imports
// ============================================================================

use std::io::{Error as IoError, ErrorKind};
use std::result::Result as StdResult;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::oneshot::error::RecvError;

use crate::identifiers::{SecTag, SocketId};
use crate::socket::{AddressFamily, SocketRole, SocketState};

// ============================================================================
// Result Alias
// ============================================================================

/// Result type alias using crate [`enum@Error`].
///
/// All fallible operations in this crate return this type.
pub type Result<T> = StdResult<T, Error>;

// ============================================================================
// Error Enum
// ============================================================================

/// Main error type for the crate.
///
/// Each variant includes relevant context for debugging.
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Capacity Errors
    // ========================================================================
    /// Socket table has no free slot.
    #[error("Socket table full ({capacity} entries)")]
    TableFull {
        /// Capacity of the table.
        capacity: usize,
    },

    /// A proxy session is already running.
    #[error("Proxy session already active")]
    SessionActive,

    // ========================================================================
    // Validation Errors
    // ========================================================================
    /// No socket is selected as current.
    #[error("No current socket")]
    NoCurrentSocket,

    /// Socket identity is not live.
    #[error("Socket not found: {id}")]
    SocketNotFound {
        /// The unknown identity.
        id: SocketId,
    },

    /// Operation is not valid for the socket's role.
    #[error("Invalid role for {operation}: socket {id} is {role}")]
    InvalidRole {
        /// Socket the operation targeted.
        id: SocketId,
        /// Actual role of the socket.
        role: SocketRole,
        /// Rejected operation.
        operation: &'static str,
    },

    /// Operation is not valid in the socket's current state.
    #[error("Invalid state for {operation}: socket {id} is {state}")]
    InvalidState {
        /// Socket the operation targeted.
        id: SocketId,
        /// Actual state of the socket.
        state: SocketState,
        /// Rejected operation.
        operation: &'static str,
    },

    /// Server socket has no accepted peer, or proxy has no connection.
    #[error("Not connected")]
    NotConnected,

    /// Option, transport or feature outside the supported set.
    #[error("Not supported: {what}")]
    NotSupported {
        /// Description of the unsupported request.
        what: String,
    },

    /// Invalid argument in operation parameters.
    #[error("Invalid argument: {message}")]
    InvalidArgument {
        /// Description of the invalid argument.
        message: String,
    },

    /// TLS operation on a plain socket.
    #[error("Socket {id} is not secure")]
    NotSecure {
        /// The plain socket.
        id: SocketId,
    },

    /// No proxy session is running.
    #[error("No proxy session")]
    NoSession,

    /// Data mode request rejected.
    #[error("Data mode: {message}")]
    DataMode {
        /// Why the request was rejected.
        message: String,
    },

    // ========================================================================
    // Environment Errors
    // ========================================================================
    /// Own address unavailable (bearer not attached).
    #[error("No local {family} address on bearer {bearer}")]
    AddressUnavailable {
        /// Requested address family.
        family: AddressFamily,
        /// Bearer that was queried.
        bearer: u8,
    },

    /// Host name resolution failed.
    #[error("Failed to resolve {host}: {message}")]
    Resolve {
        /// Host that could not be resolved.
        host: String,
        /// Description of the failure.
        message: String,
    },

    /// Credential staging failed.
    #[error("Credential error for tag {tag}: {message}")]
    Credential {
        /// Security tag involved.
        tag: SecTag,
        /// Description of the failure.
        message: String,
    },

    /// TLS configuration or handshake failure.
    #[error("TLS error: {message}")]
    Tls {
        /// Description of the TLS failure.
        message: String,
    },

    /// Configuration error.
    #[error("Configuration error: {message}")]
    Config {
        /// Description of the configuration error.
        message: String,
    },

    // ========================================================================
    // Transport Errors
    // ========================================================================
    /// Network error from the underlying transport.
    ///
    /// `transferred` reports the bytes moved before the failure.
    #[error("{operation} failed after {transferred} bytes: {source}")]
    Transport {
        /// Operation that failed.
        operation: &'static str,
        /// Bytes transferred before the failure.
        transferred: usize,
        /// Underlying network error.
        #[source]
        source: IoError,
    },

    // ========================================================================
    // Timeout
    // ========================================================================
    /// No event within the caller's bound. Retryable.
    #[error("Timeout after {timeout_ms}ms: {operation}")]
    Timeout {
        /// Operation that timed out.
        operation: &'static str,
        /// Milliseconds waited before timeout.
        timeout_ms: u64,
    },

    // ========================================================================
    // External Errors
    // ========================================================================
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] IoError),

    /// JSON error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Channel to the proxy worker closed.
    #[error("Channel closed")]
    ChannelClosed(#[from] RecvError),
}

// ============================================================================
// Error Constructors
// ============================================================================

impl Error {
    /// Creates a table full error.
    #[inline]
    pub fn table_full(capacity: usize) -> Self {
        Self::TableFull { capacity }
    }

    /// Creates a socket not found error.
    #[inline]
    pub fn socket_not_found(id: SocketId) -> Self {
        Self::SocketNotFound { id }
    }

    /// Creates an invalid role error.
    #[inline]
    pub fn invalid_role(id: SocketId, role: SocketRole, operation: &'static str) -> Self {
        Self::InvalidRole {
            id,
            role,
            operation,
        }
    }

    /// Creates an invalid state error.
    #[inline]
    pub fn invalid_state(id: SocketId, state: SocketState, operation: &'static str) -> Self {
        Self::InvalidState {
            id,
            state,
            operation,
        }
    }

    /// Creates a not supported error.
    #[inline]
    pub fn not_supported(what: impl Into<String>) -> Self {
        Self::NotSupported { what: what.into() }
    }

    /// Creates an invalid argument error.
    #[inline]
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    /// Creates a data mode error.
    #[inline]
    pub fn data_mode(message: impl Into<String>) -> Self {
        Self::DataMode {
            message: message.into(),
        }
    }

    /// Creates an address unavailable error.
    #[inline]
    pub fn address_unavailable(family: AddressFamily, bearer: u8) -> Self {
        Self::AddressUnavailable { family, bearer }
    }

    /// Creates a resolve error.
    #[inline]
    pub fn resolve(host: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Resolve {
            host: host.into(),
            message: message.into(),
        }
    }

    /// Creates a credential error.
    #[inline]
    pub fn credential(tag: SecTag, message: impl Into<String>) -> Self {
        Self::Credential {
            tag,
            message: message.into(),
        }
    }

    /// Creates a TLS error.
    #[inline]
    pub fn tls(message: impl Into<String>) -> Self {
        Self::Tls {
            message: message.into(),
        }
    }

    /// Creates a configuration error.
    #[inline]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Creates a transport error.
    #[inline]
    pub fn transport(operation: &'static str, transferred: usize, source: IoError) -> Self {
        Self::Transport {
            operation,
            transferred,
            source,
        }
    }

    /// Creates a timeout error.
    #[inline]
    pub fn timeout(operation: &'static str, waited: Duration) -> Self {
        Self::Timeout {
            operation,
            timeout_ms: waited.as_millis() as u64,
        }
    }
}

// ============================================================================
// Error Predicates
// ============================================================================

impl Error {
    /// Returns `true` if this is a timeout error.
    #[inline]
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// Returns `true` if retrying the same call may succeed.
    ///
    /// Timeouts and transient transport conditions qualify.
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Timeout { .. } => true,
            Self::Transport { source, .. } => matches!(
                source.kind(),
                ErrorKind::WouldBlock | ErrorKind::TimedOut | ErrorKind::Interrupted
            ),
            _ => false,
        }
    }

    /// Returns `true` if the request was rejected before any transport call.
    #[inline]
    #[must_use]
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::NoCurrentSocket
                | Self::SocketNotFound { .. }
                | Self::InvalidRole { .. }
                | Self::InvalidState { .. }
                | Self::NotConnected
                | Self::NotSupported { .. }
                | Self::InvalidArgument { .. }
                | Self::NotSecure { .. }
                | Self::NoSession
                | Self::DataMode { .. }
        )
    }

    /// Returns `true` if this is a capacity error.
    #[inline]
    #[must_use]
    pub fn is_capacity(&self) -> bool {
        matches!(self, Self::TableFull { .. } | Self::SessionActive)
    }

    /// Returns `true` if this error came from the network stack.
    #[inline]
    #[must_use]
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport { .. } | Self::Io(_))
    }

    /// Returns the bytes transferred before a transport failure, if known.
    #[inline]
    #[must_use]
    pub fn transferred(&self) -> Option<usize> {
        match self {
            Self::Transport { transferred, .. } => Some(*transferred),
            _ => None,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
