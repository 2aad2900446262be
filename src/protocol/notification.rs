//! Unsolicited notifications for the host.
//!
//! The proxy worker and the data-mode bridge report asynchronous
//! conditions here. Every steady-state condition yields exactly one
//! notification; the channel is unbounded so the worker never blocks on
//! a slow host.
//!
//! # Format
//!
//! ```json
//! { "event": "peerConnected", "id": 7, "addr": "10.0.0.2:5123" }
//! { "event": "dataReceived", "len": 5 }
//! { "event": "data", "data": [72, 69, 76, 76, 79] }
//! { "event": "proxyStopped", "role": "server", "cause": "requested" }
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::net::SocketAddr;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{debug, trace};

use crate::identifiers::SocketId;
use crate::socket::SocketRole;

// ============================================================================
// Causes
// ============================================================================

/// Why a proxy peer went away.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum DisconnectCause {
    /// Orderly shutdown by the remote end.
    PeerClosed,
    /// Read error on the connection.
    Error,
    /// Dropped on request of the host.
    HungUp,
    /// Idle longer than the configured timeout.
    IdleTimeout,
    /// Session stopped while the peer was tracked.
    Stopped,
}

impl fmt::Display for DisconnectCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PeerClosed => write!(f, "peer closed"),
            Self::Error => write!(f, "error"),
            Self::HungUp => write!(f, "hung up"),
            Self::IdleTimeout => write!(f, "idle timeout"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}

/// Why a proxy session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum StopCause {
    /// Stopped by the host.
    Requested,
    /// Listening socket failed.
    ListenerFailed,
    /// Outbound connection closed or failed.
    ConnectionLost,
    /// Worker was aborted after the stop timeout.
    Aborted,
}

impl fmt::Display for StopCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Requested => write!(f, "requested"),
            Self::ListenerFailed => write!(f, "listener failed"),
            Self::ConnectionLost => write!(f, "connection lost"),
            Self::Aborted => write!(f, "aborted"),
        }
    }
}

/// Why data mode ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ExitCause {
    /// Terminator received from the host.
    Requested,
    /// Forwarding target went away.
    ConnectionLost,
}

// ============================================================================
// Notification
// ============================================================================

/// An unsolicited event for the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum Notification {
    /// A proxy peer was accepted and is now tracked.
    PeerConnected {
        /// Peer identity.
        id: SocketId,
        /// Remote address.
        addr: SocketAddr,
    },

    /// The tracked proxy peer went away.
    PeerDisconnected {
        /// Peer identity.
        id: SocketId,
        /// Reason.
        cause: DisconnectCause,
    },

    /// Byte-count notice preceding a [`Data`](Self::Data) notification.
    DataReceived {
        /// Number of bytes.
        len: usize,
    },

    /// Bytes received by the proxy.
    Data {
        /// Payload.
        data: Vec<u8>,
    },

    /// The proxy session ended.
    ProxyStopped {
        /// Role of the ended session.
        role: SocketRole,
        /// Reason.
        cause: StopCause,
    },

    /// Data mode ended.
    DataModeExited {
        /// Reason.
        cause: ExitCause,
    },
}

impl Notification {
    /// Event name as it appears on the wire.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::PeerConnected { .. } => "peerConnected",
            Self::PeerDisconnected { .. } => "peerDisconnected",
            Self::DataReceived { .. } => "dataReceived",
            Self::Data { .. } => "data",
            Self::ProxyStopped { .. } => "proxyStopped",
            Self::DataModeExited { .. } => "dataModeExited",
        }
    }
}

// ============================================================================
// Notifier
// ============================================================================

/// Sending half of the notification channel.
#[derive(Debug, Clone)]
pub struct Notifier {
    tx: mpsc::UnboundedSender<Notification>,
}

impl Notifier {
    /// Creates a connected notifier/receiver pair.
    #[must_use]
    pub fn channel() -> (Self, Notifications) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, Notifications { rx })
    }

    /// Emits one notification.
    ///
    /// A dropped receiver is not an error; the notification is discarded.
    pub fn emit(&self, notification: Notification) {
        let name = notification.name();
        if self.tx.send(notification).is_err() {
            debug!(event = name, "Notification dropped, no receiver");
        } else {
            trace!(event = name, "Notification emitted");
        }
    }
}

// ============================================================================
// Notifications
// ============================================================================

/// Receiving half of the notification channel.
#[derive(Debug)]
pub struct Notifications {
    rx: mpsc::UnboundedReceiver<Notification>,
}

impl Notifications {
    /// Waits for the next notification.
    ///
    /// Returns `None` once every [`Notifier`] is gone.
    pub async fn recv(&mut self) -> Option<Notification> {
        self.rx.recv().await
    }

    /// Waits up to `limit` for the next notification.
    pub async fn recv_timeout(&mut self, limit: Duration) -> Option<Notification> {
        timeout(limit, self.rx.recv()).await.ok().flatten()
    }

    /// Next notification if one is already queued.
    pub fn try_recv(&mut self) -> Option<Notification> {
        self.rx.try_recv().ok()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_emit_and_receive() {
        let (notifier, mut notifications) = Notifier::channel();
        notifier.emit(Notification::DataReceived { len: 5 });
        notifier.emit(Notification::Data {
            data: b"HELLO".to_vec(),
        });

        assert_eq!(
            notifications.recv().await,
            Some(Notification::DataReceived { len: 5 })
        );
        assert_eq!(
            notifications.try_recv(),
            Some(Notification::Data {
                data: b"HELLO".to_vec()
            })
        );
        assert_eq!(notifications.try_recv(), None);
    }

    #[tokio::test]
    async fn test_closed_channel_ends_stream() {
        let (notifier, mut notifications) = Notifier::channel();
        drop(notifier);
        assert_eq!(notifications.recv().await, None);
    }

    #[test]
    fn test_emit_without_receiver_is_silent() {
        let (notifier, notifications) = Notifier::channel();
        drop(notifications);
        notifier.emit(Notification::DataModeExited {
            cause: ExitCause::Requested,
        });
    }

    #[test]
    fn test_wire_format() {
        let stopped = Notification::ProxyStopped {
            role: SocketRole::Server,
            cause: StopCause::ListenerFailed,
        };
        assert_eq!(
            serde_json::to_value(&stopped).expect("serialize"),
            json!({ "event": "proxyStopped", "role": "server", "cause": "listenerFailed" })
        );

        let disconnected = Notification::PeerDisconnected {
            id: SocketId::from_raw(3).expect("id"),
            cause: DisconnectCause::IdleTimeout,
        };
        assert_eq!(
            serde_json::to_value(&disconnected).expect("serialize"),
            json!({ "event": "peerDisconnected", "id": 3, "cause": "idleTimeout" })
        );
        assert_eq!(disconnected.name(), "peerDisconnected");
    }
}
