//! Supported socket and TLS options.
//!
//! Options form closed enums, so anything outside the supported set is
//! rejected when the request is decoded. Numeric option codes from the
//! host map through [`SocketOptionName::from_code`] and
//! [`TlsOptionName::from_code`]; unknown codes are
//! [`Error::NotSupported`].
//!
//! # Socket Options
//!
//! | Code | Option | Get | Set |
//! |------|--------|-----|-----|
//! | 1 | `noDelay` | connected stream | connected stream |
//! | 2 | `reuseAddr` | always | unconnected stream |
//! | 3 | `ttl` | connected stream, listener, datagram | same |
//! | 20 | `recvTimeout` | always | always |
//! | 21 | `sendTimeout` | always | always |
//! | 40 | `bearer` | always | before bind/connect |
//!
//! # TLS Options
//!
//! | Code | Option | Get | Set |
//! |------|--------|-----|-----|
//! | 2 | `hostname` | yes | before connect |
//! | 4 | `cipherSuiteUsed` | yes | no |
//! | 5 | `peerVerify` | yes | before connect/listen |
//! | 12 | `sessionCache` | yes | before connect |

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};
use crate::identifiers::BearerId;
use crate::transport::PeerVerify;

use super::core::Sockets;
use super::entry::{Endpoint, SocketState};

// ============================================================================
// Socket Options
// ============================================================================

/// Name of a supported socket option.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SocketOptionName {
    /// Disable Nagle.
    NoDelay,
    /// Allow address reuse on bind.
    ReuseAddr,
    /// IP time to live.
    Ttl,
    /// Receive timeout.
    RecvTimeout,
    /// Send retry window.
    SendTimeout,
    /// Device binding.
    Bearer,
}

impl SocketOptionName {
    /// Option from its numeric code.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotSupported`] for unknown codes.
    pub fn from_code(code: u16) -> Result<Self> {
        match code {
            1 => Ok(Self::NoDelay),
            2 => Ok(Self::ReuseAddr),
            3 => Ok(Self::Ttl),
            20 => Ok(Self::RecvTimeout),
            21 => Ok(Self::SendTimeout),
            40 => Ok(Self::Bearer),
            other => Err(Error::not_supported(format!("socket option {other}"))),
        }
    }

    /// Numeric code of this option.
    #[must_use]
    pub fn code(&self) -> u16 {
        match self {
            Self::NoDelay => 1,
            Self::ReuseAddr => 2,
            Self::Ttl => 3,
            Self::RecvTimeout => 20,
            Self::SendTimeout => 21,
            Self::Bearer => 40,
        }
    }
}

/// Socket option with its value.
///
/// Timeouts are in milliseconds; 0 means no timeout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "name", content = "value", rename_all = "camelCase")]
pub enum SocketOption {
    /// Disable Nagle.
    NoDelay(bool),
    /// Allow address reuse on bind.
    ReuseAddr(bool),
    /// IP time to live.
    Ttl(u32),
    /// Receive timeout in milliseconds.
    RecvTimeout(u64),
    /// Send retry window in milliseconds.
    SendTimeout(u64),
    /// Device binding.
    Bearer(BearerId),
}

impl SocketOption {
    /// Name of this option.
    #[must_use]
    pub fn name(&self) -> SocketOptionName {
        match self {
            Self::NoDelay(_) => SocketOptionName::NoDelay,
            Self::ReuseAddr(_) => SocketOptionName::ReuseAddr,
            Self::Ttl(_) => SocketOptionName::Ttl,
            Self::RecvTimeout(_) => SocketOptionName::RecvTimeout,
            Self::SendTimeout(_) => SocketOptionName::SendTimeout,
            Self::Bearer(_) => SocketOptionName::Bearer,
        }
    }
}

// ============================================================================
// TLS Options
// ============================================================================

/// Name of a supported TLS option.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TlsOptionName {
    /// Hostname checked against the server certificate.
    Hostname,
    /// Negotiated cipher suite (read-only).
    CipherSuiteUsed,
    /// Peer verification level.
    PeerVerify,
    /// Session resumption.
    SessionCache,
}

impl TlsOptionName {
    /// Option from its numeric code.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotSupported`] for unknown codes.
    pub fn from_code(code: u16) -> Result<Self> {
        match code {
            2 => Ok(Self::Hostname),
            4 => Ok(Self::CipherSuiteUsed),
            5 => Ok(Self::PeerVerify),
            12 => Ok(Self::SessionCache),
            other => Err(Error::not_supported(format!("TLS option {other}"))),
        }
    }

    /// Numeric code of this option.
    #[must_use]
    pub fn code(&self) -> u16 {
        match self {
            Self::Hostname => 2,
            Self::CipherSuiteUsed => 4,
            Self::PeerVerify => 5,
            Self::SessionCache => 12,
        }
    }
}

/// TLS option with its value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "name", content = "value", rename_all = "camelCase")]
pub enum TlsOption {
    /// Hostname to verify; `None` clears it.
    Hostname(Option<String>),
    /// Negotiated cipher suite, once connected.
    CipherSuiteUsed(Option<String>),
    /// Peer verification level.
    PeerVerify(PeerVerify),
    /// Session resumption.
    SessionCache(bool),
}

impl TlsOption {
    /// Name of this option.
    #[must_use]
    pub fn name(&self) -> TlsOptionName {
        match self {
            Self::Hostname(_) => TlsOptionName::Hostname,
            Self::CipherSuiteUsed(_) => TlsOptionName::CipherSuiteUsed,
            Self::PeerVerify(_) => TlsOptionName::PeerVerify,
            Self::SessionCache(_) => TlsOptionName::SessionCache,
        }
    }
}

// ============================================================================
// Sockets - Socket Options
// ============================================================================

impl Sockets {
    /// Reads a socket option of the current socket.
    ///
    /// # Errors
    ///
    /// - [`Error::NotSupported`] if the option does not apply to the socket type
    /// - [`Error::InvalidState`] if the socket has no endpoint for it yet
    /// - [`Error::Transport`] if the stack rejects the query
    pub fn get_option(&self, name: SocketOptionName) -> Result<SocketOption> {
        let id = self.current_id()?;
        let entry = self.entry(id)?;
        let state = entry.state();
        let sockopt = |e| Error::transport("getOption", 0, e);

        let option = match name {
            SocketOptionName::ReuseAddr => SocketOption::ReuseAddr(entry.options.reuse_addr),
            SocketOptionName::RecvTimeout => {
                SocketOption::RecvTimeout(millis(entry.options.recv_timeout))
            }
            SocketOptionName::SendTimeout => {
                SocketOption::SendTimeout(millis(entry.options.send_timeout))
            }
            SocketOptionName::Bearer => SocketOption::Bearer(entry.bearer),
            SocketOptionName::NoDelay => match &entry.endpoint {
                Endpoint::Connected { stream, .. } => {
                    SocketOption::NoDelay(stream.tcp().nodelay().map_err(sockopt)?)
                }
                Endpoint::Listening {
                    peer: Some(peer), ..
                } => SocketOption::NoDelay(peer.stream.tcp().nodelay().map_err(sockopt)?),
                Endpoint::Datagram { .. } => {
                    return Err(Error::not_supported("noDelay on datagram socket"));
                }
                _ => return Err(Error::invalid_state(id, state, "getOption")),
            },
            SocketOptionName::Ttl => match &entry.endpoint {
                Endpoint::Connected { stream, .. } => {
                    SocketOption::Ttl(stream.tcp().ttl().map_err(sockopt)?)
                }
                Endpoint::Listening { listener, .. } => {
                    SocketOption::Ttl(listener.ttl().map_err(sockopt)?)
                }
                Endpoint::Datagram {
                    socket: Some(udp), ..
                } => SocketOption::Ttl(udp.ttl().map_err(sockopt)?),
                _ => return Err(Error::invalid_state(id, state, "getOption")),
            },
        };

        Ok(option)
    }

    /// Sets a socket option on the current socket.
    ///
    /// # Errors
    ///
    /// - [`Error::NotSupported`] if the option does not apply to the socket type
    /// - [`Error::InvalidState`] if the socket is past the state the option needs
    /// - [`Error::Transport`] if the stack rejects the value
    pub fn set_option(&mut self, option: SocketOption) -> Result<()> {
        let id = self.current_id()?;
        let entry = Self::entry_in(&mut self.table, id)?;
        let state = entry.state();
        let sockopt = |e| Error::transport("setOption", 0, e);

        match option {
            SocketOption::RecvTimeout(ms) => entry.options.recv_timeout = duration(ms),
            SocketOption::SendTimeout(ms) => entry.options.send_timeout = duration(ms),
            SocketOption::ReuseAddr(on) => match &entry.endpoint {
                Endpoint::Unconnected { socket, bound: None } => {
                    if let Some(tcp) = socket {
                        tcp.set_reuseaddr(on).map_err(sockopt)?;
                    }
                    entry.options.reuse_addr = on;
                }
                Endpoint::Datagram { .. } => {
                    return Err(Error::not_supported("reuseAddr on datagram socket"));
                }
                _ => return Err(Error::invalid_state(id, state, "setOption")),
            },
            SocketOption::Bearer(bearer) => match state {
                SocketState::Open => entry.bearer = bearer,
                _ => return Err(Error::invalid_state(id, state, "setOption")),
            },
            SocketOption::NoDelay(on) => match &entry.endpoint {
                Endpoint::Connected { stream, .. } => {
                    stream.tcp().set_nodelay(on).map_err(sockopt)?;
                }
                Endpoint::Listening {
                    peer: Some(peer), ..
                } => peer.stream.tcp().set_nodelay(on).map_err(sockopt)?,
                Endpoint::Datagram { .. } => {
                    return Err(Error::not_supported("noDelay on datagram socket"));
                }
                _ => return Err(Error::invalid_state(id, state, "setOption")),
            },
            SocketOption::Ttl(ttl) => match &entry.endpoint {
                Endpoint::Connected { stream, .. } => stream.tcp().set_ttl(ttl).map_err(sockopt)?,
                Endpoint::Listening { listener, .. } => listener.set_ttl(ttl).map_err(sockopt)?,
                Endpoint::Datagram {
                    socket: Some(udp), ..
                } => udp.set_ttl(ttl).map_err(sockopt)?,
                _ => return Err(Error::invalid_state(id, state, "setOption")),
            },
        }

        debug!(%id, ?option, "Socket option set");
        Ok(())
    }
}

// ============================================================================
// Sockets - TLS Options
// ============================================================================

impl Sockets {
    /// Reads a TLS option of the current secured socket.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotSecure`] for plain sockets.
    pub fn get_tls_option(&self, name: TlsOptionName) -> Result<TlsOption> {
        let id = self.current_id()?;
        let entry = self.entry(id)?;
        let security = entry.security.as_ref().ok_or(Error::NotSecure { id })?;

        let option = match name {
            TlsOptionName::Hostname => TlsOption::Hostname(security.tls.hostname.clone()),
            TlsOptionName::PeerVerify => TlsOption::PeerVerify(security.tls.peer_verify),
            TlsOptionName::SessionCache => TlsOption::SessionCache(security.tls.session_cache),
            TlsOptionName::CipherSuiteUsed => TlsOption::CipherSuiteUsed(match &entry.endpoint {
                Endpoint::Connected { stream, .. } => stream.cipher_suite(),
                Endpoint::Listening {
                    peer: Some(peer), ..
                } => peer.stream.cipher_suite(),
                _ => None,
            }),
        };

        Ok(option)
    }

    /// Sets a TLS option on the current secured socket.
    ///
    /// Settings apply to the next handshake, so they can only change
    /// before connect (client) or between accepts (server).
    ///
    /// # Errors
    ///
    /// - [`Error::NotSecure`] for plain sockets
    /// - [`Error::NotSupported`] for read-only options
    /// - [`Error::InvalidState`] once connected
    pub fn set_tls_option(&mut self, option: TlsOption) -> Result<()> {
        let id = self.current_id()?;
        let entry = Self::entry_in(&mut self.table, id)?;
        let state = entry.state();
        let security = entry.security.as_mut().ok_or(Error::NotSecure { id })?;

        if matches!(state, SocketState::Connected | SocketState::Accepted) {
            return Err(Error::invalid_state(id, state, "setTlsOption"));
        }

        match option {
            TlsOption::Hostname(hostname) => security.tls.hostname = hostname,
            TlsOption::PeerVerify(level) => security.tls.peer_verify = level,
            TlsOption::SessionCache(on) => security.tls.session_cache = on,
            TlsOption::CipherSuiteUsed(_) => {
                return Err(Error::not_supported("cipherSuiteUsed is read-only"));
            }
        }

        debug!(%id, "TLS option set");
        Ok(())
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn millis(timeout: Option<Duration>) -> u64 {
    timeout.map_or(0, |d| d.as_millis() as u64)
}

fn duration(ms: u64) -> Option<Duration> {
    (ms > 0).then(|| Duration::from_millis(ms))
}

// ============================================================================
// Tests
// ============================================================================
