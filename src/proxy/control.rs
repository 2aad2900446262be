//! Control channel and status snapshot shared with the proxy worker.
//!
//! The control channel is the only way the command context reaches a
//! running worker; the status snapshot is the only way it observes one.
//! The worker is the single writer of the snapshot.

// ============================================================================
// Imports
// ============================================================================

use std::net::SocketAddr;

use serde::Serialize;
use tokio::sync::oneshot;

use crate::error::Result;
use crate::identifiers::SocketId;
use crate::socket::{PeerInfo, SocketRole};
use crate::transport::WriteReport;

// ============================================================================
// Constants
// ============================================================================

/// Depth of the control queue.
pub(crate) const CONTROL_DEPTH: usize = 8;

// ============================================================================
// ControlEvent
// ============================================================================

/// Request from the command context to the worker.
#[derive(Debug)]
pub(crate) enum ControlEvent {
    /// Stop the whole session.
    CloseSession,
    /// Drop the tracked peer if it is `id`; the listener keeps running.
    ClosePeer(SocketId),
    /// Write `data` to the peer or outbound connection.
    Send {
        data: Vec<u8>,
        reply: oneshot::Sender<Result<WriteReport>>,
    },
}

// ============================================================================
// ProxyStatus
// ============================================================================

/// Snapshot of a running proxy session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProxyStatus {
    /// Session role.
    pub role: SocketRole,
    /// Listening (server) or outbound (client) identity.
    pub id: SocketId,
    /// Local address of that identity.
    pub local: SocketAddr,
    /// Remote address of the outbound connection (client only).
    pub remote: Option<SocketAddr>,
    /// Tracked peer (server only).
    pub peer: Option<PeerInfo>,
    /// Whether the session runs over TLS.
    pub secure: bool,
    /// Whether data mode currently targets the proxy.
    pub data_mode: bool,
}
