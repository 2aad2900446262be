//! Socket entries: classification, endpoint and derived state.
//!
//! # State Machine
//!
//! ```text
//! EMPTY ──open──► OPEN ──bind──► BOUND
//!                  │               │
//!                  ├──connect──────┴──► CONNECTED
//!                  └──listen───────┴──► LISTENING ──accept──► ACCEPTED
//! any ──close──► EMPTY
//! ```
//!
//! State is derived from the endpoint rather than stored, so it can never
//! disagree with what the socket actually is.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::net::{TcpListener, TcpSocket, TcpStream, UdpSocket};

use crate::identifiers::{BearerId, SecTag, SocketId};
use crate::transport::{NetStream, PeerVerify, Staged, TlsSettings};

// ============================================================================
// Classification
// ============================================================================

/// Transport type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SocketType {
    /// TCP, optionally TLS.
    Stream,
    /// UDP.
    Datagram,
    /// Raw IP. Recognised but not supported.
    Raw,
}

impl fmt::Display for SocketType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stream => write!(f, "stream"),
            Self::Datagram => write!(f, "datagram"),
            Self::Raw => write!(f, "raw"),
        }
    }
}

/// Socket role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SocketRole {
    /// Connects out.
    Client,
    /// Listens and accepts.
    Server,
}

impl SocketRole {
    /// Default peer verification for secured sockets of this role.
    #[inline]
    #[must_use]
    pub fn default_peer_verify(&self) -> PeerVerify {
        match self {
            Self::Client => PeerVerify::Required,
            Self::Server => PeerVerify::None,
        }
    }
}

impl fmt::Display for SocketRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Client => write!(f, "client"),
            Self::Server => write!(f, "server"),
        }
    }
}

/// Address family.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AddressFamily {
    /// IPv4.
    #[default]
    Ipv4,
    /// IPv6.
    Ipv6,
}

impl AddressFamily {
    /// Returns `true` if `ip` belongs to this family.
    #[inline]
    #[must_use]
    pub fn matches(&self, ip: &IpAddr) -> bool {
        matches!(
            (self, ip),
            (Self::Ipv4, IpAddr::V4(_)) | (Self::Ipv6, IpAddr::V6(_))
        )
    }

    /// Wildcard address of this family.
    #[inline]
    #[must_use]
    pub fn unspecified(&self) -> IpAddr {
        match self {
            Self::Ipv4 => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            Self::Ipv6 => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
        }
    }

    /// Creates an unbound TCP socket of this family.
    pub(crate) fn tcp_socket(&self) -> io::Result<TcpSocket> {
        match self {
            Self::Ipv4 => TcpSocket::new_v4(),
            Self::Ipv6 => TcpSocket::new_v6(),
        }
    }
}

impl fmt::Display for AddressFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ipv4 => write!(f, "IPv4"),
            Self::Ipv6 => write!(f, "IPv6"),
        }
    }
}

/// Lifecycle state of a live entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SocketState {
    /// Created, not bound.
    Open,
    /// Bound to a local address.
    Bound,
    /// Connected to a peer.
    Connected,
    /// Listening without a peer.
    Listening,
    /// Listening with an accepted peer.
    Accepted,
}

impl fmt::Display for SocketState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Open => write!(f, "open"),
            Self::Bound => write!(f, "bound"),
            Self::Connected => write!(f, "connected"),
            Self::Listening => write!(f, "listening"),
            Self::Accepted => write!(f, "accepted"),
        }
    }
}

// ============================================================================
// OpenParams
// ============================================================================

/// Security part of an open request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SecureOpen {
    /// Credential set to stage.
    pub tag: SecTag,
    /// Verification level; `None` takes the role default.
    pub peer_verify: Option<PeerVerify>,
}

/// Parameters of [`Sockets::open`](super::Sockets::open).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpenParams {
    /// Transport type.
    pub kind: SocketType,
    /// Client or server.
    pub role: SocketRole,
    /// Address family.
    pub family: AddressFamily,
    /// Device binding.
    pub bearer: BearerId,
    /// Security binding, for secured sockets.
    pub security: Option<SecureOpen>,
}

impl OpenParams {
    /// Plain stream socket on the primary bearer.
    #[inline]
    #[must_use]
    pub fn stream(role: SocketRole, family: AddressFamily) -> Self {
        Self {
            kind: SocketType::Stream,
            role,
            family,
            bearer: BearerId::PRIMARY,
            security: None,
        }
    }

    /// Datagram socket on the primary bearer.
    #[inline]
    #[must_use]
    pub fn datagram(role: SocketRole, family: AddressFamily) -> Self {
        Self {
            kind: SocketType::Datagram,
            ..Self::stream(role, family)
        }
    }

    /// Binds the socket to `bearer`.
    #[inline]
    #[must_use]
    pub fn with_bearer(mut self, bearer: BearerId) -> Self {
        self.bearer = bearer;
        self
    }

    /// Secures the socket with `tag`.
    #[inline]
    #[must_use]
    pub fn secured(mut self, tag: SecTag, peer_verify: Option<PeerVerify>) -> Self {
        self.security = Some(SecureOpen { tag, peer_verify });
        self
    }
}

// ============================================================================
// Info
// ============================================================================

/// Accepted peer of a server entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PeerInfo {
    /// Identity of the accepted connection.
    pub id: SocketId,
    /// Remote address.
    pub addr: SocketAddr,
}

/// Snapshot of one entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SocketInfo {
    /// Identity.
    pub id: SocketId,
    /// Transport type.
    #[serde(rename = "type")]
    pub kind: SocketType,
    /// Role.
    pub role: SocketRole,
    /// Address family.
    pub family: AddressFamily,
    /// Device binding.
    pub bearer: BearerId,
    /// Security tag, for secured sockets.
    pub sec_tag: Option<SecTag>,
    /// Lifecycle state.
    pub state: SocketState,
    /// Recency rank.
    pub rank: u64,
    /// Whether this entry is current.
    pub current: bool,
    /// Local address, once known.
    pub local: Option<SocketAddr>,
    /// Remote address for connected sockets.
    pub remote: Option<SocketAddr>,
    /// Accepted peer for server sockets.
    pub peer: Option<PeerInfo>,
}

// ============================================================================
// Endpoint
// ============================================================================

/// Accepted connection tracked by a listening entry.
#[derive(Debug)]
pub(crate) struct Peer {
    pub id: SocketId,
    pub stream: NetStream,
    pub addr: SocketAddr,
}

impl Peer {
    pub fn info(&self) -> PeerInfo {
        PeerInfo {
            id: self.id,
            addr: self.addr,
        }
    }
}

/// What the entry currently wraps.
#[derive(Debug)]
pub(crate) enum Endpoint {
    /// TCP socket before connect/listen. The socket is taken while a
    /// connect is in flight.
    Unconnected {
        socket: Option<TcpSocket>,
        bound: Option<SocketAddr>,
    },
    /// Established outbound stream.
    Connected { stream: NetStream, peer: SocketAddr },
    /// Listener with at most one tracked peer and at most one connection
    /// accepted by poll but not yet claimed.
    Listening {
        listener: TcpListener,
        peer: Option<Peer>,
        queued: Option<(TcpStream, SocketAddr)>,
    },
    /// UDP socket, created on first bind.
    Datagram {
        socket: Option<UdpSocket>,
        connected: Option<SocketAddr>,
    },
}

// ============================================================================
// Security
// ============================================================================

/// Security binding of a secured entry.
#[derive(Debug)]
pub(crate) struct Security {
    pub staged: Staged,
    pub tls: TlsSettings,
}

// ============================================================================
// Options
// ============================================================================

/// Entry-level option values.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct EntryOptions {
    pub reuse_addr: bool,
    pub recv_timeout: Option<Duration>,
    pub send_timeout: Option<Duration>,
}

// ============================================================================
// SocketEntry
// ============================================================================

/// One live row of the socket table.
#[derive(Debug)]
pub(crate) struct SocketEntry {
    pub id: SocketId,
    pub kind: SocketType,
    pub role: SocketRole,
    pub family: AddressFamily,
    pub bearer: BearerId,
    pub endpoint: Endpoint,
    pub security: Option<Security>,
    pub options: EntryOptions,
}

impl SocketEntry {
    /// Lifecycle state derived from the endpoint.
    pub fn state(&self) -> SocketState {
        match &self.endpoint {
            Endpoint::Unconnected { bound: None, .. } => SocketState::Open,
            Endpoint::Unconnected { bound: Some(_), .. } => SocketState::Bound,
            Endpoint::Connected { .. } => SocketState::Connected,
            Endpoint::Listening { peer: None, .. } => SocketState::Listening,
            Endpoint::Listening { peer: Some(_), .. } => SocketState::Accepted,
            Endpoint::Datagram { socket: None, .. } => SocketState::Open,
            Endpoint::Datagram {
                connected: Some(_), ..
            } => SocketState::Connected,
            Endpoint::Datagram { .. } => SocketState::Bound,
        }
    }

    /// Local address, once the endpoint has one.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        match &self.endpoint {
            Endpoint::Unconnected { bound, .. } => *bound,
            Endpoint::Connected { stream, .. } => stream.tcp().local_addr().ok(),
            Endpoint::Listening { listener, .. } => listener.local_addr().ok(),
            Endpoint::Datagram { socket, .. } => {
                socket.as_ref().and_then(|s| s.local_addr().ok())
            }
        }
    }

    /// Snapshot for listing.
    pub fn info(&self, rank: u64, current: bool) -> SocketInfo {
        let (remote, peer) = match &self.endpoint {
            Endpoint::Connected { peer, .. } => (Some(*peer), None),
            Endpoint::Listening { peer, .. } => (None, peer.as_ref().map(Peer::info)),
            Endpoint::Datagram { connected, .. } => (*connected, None),
            Endpoint::Unconnected { .. } => (None, None),
        };

        SocketInfo {
            id: self.id,
            kind: self.kind,
            role: self.role,
            family: self.family,
            bearer: self.bearer,
            sec_tag: self.security.as_ref().map(|s| s.staged.tag()),
            state: self.state(),
            rank,
            current,
            local: self.local_addr(),
            remote,
            peer,
        }
    }

    /// Releases the endpoint first, then the security binding.
    pub fn close(self) {
        let Self {
            endpoint, security, ..
        } = self;
        drop(endpoint);
        drop(security);
    }
}

// ============================================================================
// Tests
// ============================================================================
