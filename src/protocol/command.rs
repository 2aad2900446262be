//! Typed operations delivered by the host's command dispatcher.
//!
//! The dispatcher owns framing; this module only defines the parsed
//! operation ([`Command`]) and its synchronous result ([`Reply`]).
//!
//! # Format
//!
//! ```json
//! { "op": "open", "type": "stream", "role": "client", "family": "ipv4" }
//! { "op": "connect", "host": "example.com", "port": 443 }
//! { "op": "send", "data": "PING" }
//! { "op": "send" }
//! ```
//!
//! A `send`, `sendTo` or `proxySend` without `data` enters data mode.
//!
//! # Operations
//!
//! | Group | Ops |
//! |-------|-----|
//! | Table | `open`, `close`, `select`, `list` |
//! | Socket | `bind`, `connect`, `listen`, `accept`, `send`, `sendTo`, `receive`, `receiveFrom`, `poll` |
//! | Options | `getOption`, `setOption`, `getTlsOption`, `setTlsOption` |
//! | Proxy | `proxyServerStart`, `proxyClientStart`, `proxyStop`, `proxyHangup`, `proxySend`, `proxyStatus`, `setAllowlist`, `clearAllowlist` |
//! | Data mode | `dataModeExit` |

// ============================================================================
// Imports
// ============================================================================

use std::net::{IpAddr, SocketAddr};

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::identifiers::{BearerId, SecTag, SocketId};
use crate::proxy::{ClientParams, ProxyStatus, ServerParams};
use crate::socket::{
    AddressFamily, PeerInfo, PollEvent, RecvFlags, SocketInfo, SocketOption, SocketOptionName,
    SocketRole, SocketType, TlsOption, TlsOptionName,
};
use crate::transport::PeerVerify;

// ============================================================================
// Command
// ============================================================================

/// One parsed host operation.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "op", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum Command {
    /// Open a socket and make it current.
    Open {
        /// Transport type.
        #[serde(rename = "type")]
        kind: SocketType,
        /// Client or server.
        role: SocketRole,
        /// Address family.
        #[serde(default)]
        family: AddressFamily,
        /// Device binding.
        #[serde(default)]
        bearer: BearerId,
        /// Security tag for secured sockets.
        #[serde(default)]
        sec_tag: Option<SecTag>,
        /// Peer verification; role default when absent.
        #[serde(default)]
        peer_verify: Option<PeerVerify>,
    },

    /// Close a socket, or the current one.
    Close {
        /// Socket to close; current when absent.
        #[serde(default)]
        id: Option<SocketId>,
    },

    /// Make a socket current.
    Select {
        /// Socket to select.
        id: SocketId,
    },

    /// List live sockets.
    List,

    /// Bind the current socket.
    Bind {
        /// Local port; 0 for ephemeral.
        port: u16,
    },

    /// Connect the current socket.
    Connect {
        /// Remote host.
        host: String,
        /// Remote port.
        port: u16,
    },

    /// Listen on the current socket.
    Listen,

    /// Accept one peer on the current socket.
    Accept {
        /// Wait in milliseconds.
        timeout_ms: u64,
    },

    /// Send on the current socket.
    Send {
        /// Payload; absent enters data mode.
        #[serde(default)]
        data: Option<String>,
    },

    /// Send a datagram to an explicit destination.
    SendTo {
        /// Destination host.
        host: String,
        /// Destination port.
        port: u16,
        /// Payload; absent enters data mode.
        #[serde(default)]
        data: Option<String>,
    },

    /// Receive from the current socket.
    Receive {
        /// Wait in milliseconds; socket receive timeout when absent.
        #[serde(default)]
        timeout_ms: Option<u64>,
        /// Receive flags.
        #[serde(default)]
        flags: RecvFlags,
    },

    /// Receive with the sender's address.
    ReceiveFrom {
        /// Wait in milliseconds; socket receive timeout when absent.
        #[serde(default)]
        timeout_ms: Option<u64>,
        /// Receive flags.
        #[serde(default)]
        flags: RecvFlags,
    },

    /// Poll sockets for readability.
    Poll {
        /// Wait in milliseconds; forever when absent.
        #[serde(default)]
        timeout_ms: Option<u64>,
        /// Sockets to poll; every live socket when absent.
        #[serde(default)]
        ids: Option<Vec<SocketId>>,
    },

    /// Read a socket option.
    GetOption {
        /// Option to read.
        name: SocketOptionName,
    },

    /// Set a socket option.
    SetOption {
        /// Option and value.
        option: SocketOption,
    },

    /// Read a TLS option.
    GetTlsOption {
        /// Option to read.
        name: TlsOptionName,
    },

    /// Set a TLS option.
    SetTlsOption {
        /// Option and value.
        option: TlsOption,
    },

    /// Start a proxy server session.
    ProxyServerStart(ServerParams),

    /// Start a proxy client session.
    ProxyClientStart(ClientParams),

    /// Stop the proxy session.
    ProxyStop,

    /// Drop the proxy server's tracked peer.
    ProxyHangup {
        /// Tracked peer identity.
        id: SocketId,
    },

    /// Send through the proxy.
    ProxySend {
        /// Payload; absent enters data mode.
        #[serde(default)]
        data: Option<String>,
    },

    /// Read the proxy status.
    ProxyStatus,

    /// Enable the proxy peer allow-list.
    SetAllowlist {
        /// Permitted peer addresses.
        addrs: Vec<IpAddr>,
    },

    /// Disable the proxy peer allow-list.
    ClearAllowlist,

    /// Leave data mode.
    DataModeExit,
}

impl Command {
    /// Parses a command from JSON.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Json`](crate::Error::Json) for malformed or unknown
    /// operations.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Operation name as it appears on the wire.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Open { .. } => "open",
            Self::Close { .. } => "close",
            Self::Select { .. } => "select",
            Self::List => "list",
            Self::Bind { .. } => "bind",
            Self::Connect { .. } => "connect",
            Self::Listen => "listen",
            Self::Accept { .. } => "accept",
            Self::Send { .. } => "send",
            Self::SendTo { .. } => "sendTo",
            Self::Receive { .. } => "receive",
            Self::ReceiveFrom { .. } => "receiveFrom",
            Self::Poll { .. } => "poll",
            Self::GetOption { .. } => "getOption",
            Self::SetOption { .. } => "setOption",
            Self::GetTlsOption { .. } => "getTlsOption",
            Self::SetTlsOption { .. } => "setTlsOption",
            Self::ProxyServerStart(_) => "proxyServerStart",
            Self::ProxyClientStart(_) => "proxyClientStart",
            Self::ProxyStop => "proxyStop",
            Self::ProxyHangup { .. } => "proxyHangup",
            Self::ProxySend { .. } => "proxySend",
            Self::ProxyStatus => "proxyStatus",
            Self::SetAllowlist { .. } => "setAllowlist",
            Self::ClearAllowlist => "clearAllowlist",
            Self::DataModeExit => "dataModeExit",
        }
    }
}

// ============================================================================
// Reply
// ============================================================================

/// Synchronous result of one [`Command`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum Reply {
    /// Done, nothing to report.
    Ok,

    /// Socket opened.
    Opened {
        /// New identity, now current.
        id: SocketId,
    },

    /// Socket closed; `None` when nothing was current.
    Closed {
        /// Closed identity.
        id: Option<SocketId>,
    },

    /// Live sockets.
    Sockets {
        /// Snapshots in slot order.
        sockets: Vec<SocketInfo>,
    },

    /// Socket bound.
    Bound {
        /// Local address.
        addr: SocketAddr,
    },

    /// Socket connected.
    Connected {
        /// Remote address.
        addr: SocketAddr,
    },

    /// Socket listening.
    Listening {
        /// Local address.
        addr: SocketAddr,
    },

    /// Peer accepted.
    Accepted {
        /// Accepted peer.
        peer: PeerInfo,
    },

    /// Bytes sent.
    Sent {
        /// Bytes written.
        len: usize,
    },

    /// Bytes received.
    Received {
        /// Payload; empty on peer shutdown.
        data: Vec<u8>,
    },

    /// Bytes received with the sender.
    ReceivedFrom {
        /// Payload.
        data: Vec<u8>,
        /// Sender address.
        from: SocketAddr,
    },

    /// Poll results.
    Polled {
        /// One entry per polled identity.
        events: Vec<PollEvent>,
    },

    /// Socket option value.
    SocketOption {
        /// Option and value.
        option: SocketOption,
    },

    /// TLS option value.
    TlsOption {
        /// Option and value.
        option: TlsOption,
    },

    /// Proxy session started.
    ProxyStarted {
        /// Local (server) or remote (client) address.
        addr: SocketAddr,
    },

    /// Proxy stop handled.
    ProxyStopped {
        /// `false` when no session was running.
        stopped: bool,
    },

    /// Proxy status.
    ProxyStatus {
        /// Snapshot; `None` when no session is running.
        status: Option<ProxyStatus>,
    },

    /// Data mode entered; raw bytes now go through [`Modem::forward`](crate::Modem::forward).
    DataModeEntered,
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_open_defaults() {
        let command = Command::from_json(r#"{"op":"open","type":"stream","role":"client"}"#)
            .expect("parse");
        assert_eq!(
            command,
            Command::Open {
                kind: SocketType::Stream,
                role: SocketRole::Client,
                family: AddressFamily::Ipv4,
                bearer: BearerId::PRIMARY,
                sec_tag: None,
                peer_verify: None,
            }
        );
        assert_eq!(command.name(), "open");
    }

    #[test]
    fn test_parse_send_without_data() {
        let command = Command::from_json(r#"{"op":"send"}"#).expect("parse");
        assert_eq!(command, Command::Send { data: None });
    }

    #[test]
    fn test_parse_options() {
        let command = Command::from_json(
            r#"{"op":"setOption","option":{"name":"recvTimeout","value":500}}"#,
        )
        .expect("parse");
        assert_eq!(
            command,
            Command::SetOption {
                option: SocketOption::RecvTimeout(500)
            }
        );

        let command = Command::from_json(
            r#"{"op":"setTlsOption","option":{"name":"peerVerify","value":"optional"}}"#,
        )
        .expect("parse");
        assert_eq!(
            command,
            Command::SetTlsOption {
                option: TlsOption::PeerVerify(PeerVerify::Optional)
            }
        );
    }

    #[test]
    fn test_parse_proxy_start() {
        let command = Command::from_json(
            r#"{"op":"proxyClientStart","host":"example.com","port":443,"secTag":4}"#,
        )
        .expect("parse");
        let Command::ProxyClientStart(params) = command else {
            panic!("expected proxyClientStart");
        };
        assert_eq!(params.host, "example.com");
        assert_eq!(params.sec_tag, Some(SecTag::new(4)));
        assert!(params.hostname_verify);
        assert!(!params.data_mode);

        let command = Command::from_json(r#"{"op":"proxyServerStart","port":0,"dataMode":true}"#)
            .expect("parse");
        assert_eq!(
            command,
            Command::ProxyServerStart(ServerParams::new(0).with_data_mode())
        );
    }

    #[test]
    fn test_unknown_option_rejected_at_parse() {
        assert!(
            Command::from_json(r#"{"op":"getOption","name":"keepAlive"}"#).is_err()
        );
        assert!(Command::from_json(r#"{"op":"frobnicate"}"#).is_err());
    }

    #[test]
    fn test_reply_wire_format() {
        let id = SocketId::from_raw(2).expect("id");
        assert_eq!(
            serde_json::to_value(Reply::Opened { id }).expect("serialize"),
            json!({ "kind": "opened", "id": 2 })
        );
        assert_eq!(
            serde_json::to_value(Reply::Sent { len: 4 }).expect("serialize"),
            json!({ "kind": "sent", "len": 4 })
        );
        assert_eq!(
            serde_json::to_value(Reply::ProxyStatus { status: None }).expect("serialize"),
            json!({ "kind": "proxyStatus", "status": null })
        );
    }
}
