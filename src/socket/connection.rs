//! Bind, connect, listen and accept on the current socket.

// ============================================================================
// Imports
// ============================================================================

use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use tokio::net::{TcpSocket, UdpSocket};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::identifiers::SocketId;
use crate::transport::{NetStream, tls};

use super::core::Sockets;
use super::entry::{AddressFamily, Endpoint, Peer, PeerInfo, SocketRole, SocketType};

// ============================================================================
// Constants
// ============================================================================

/// Listen backlog; only one peer is ever tracked.
const LISTEN_BACKLOG: u32 = 1;

// ============================================================================
// Sockets - Connection Setup
// ============================================================================

impl Sockets {
    /// Binds the current socket to the device's own address on `port`.
    ///
    /// Returns the bound address (useful with port 0).
    ///
    /// # Errors
    ///
    /// - [`Error::NoCurrentSocket`] if nothing is selected
    /// - [`Error::AddressUnavailable`] if the bearer has no address
    /// - [`Error::InvalidState`] if already bound, connected or listening
    /// - [`Error::Transport`] if the bind fails
    pub async fn bind(&mut self, port: u16) -> Result<SocketAddr> {
        let id = self.current_id()?;
        let entry = Self::entry_in(&mut self.table, id)?;
        let state = entry.state();

        let ip = self
            .network
            .local_addr(entry.bearer, entry.family)
            .ok_or_else(|| Error::address_unavailable(entry.family, entry.bearer.get()))?;
        let addr = SocketAddr::new(ip, port);

        let local = match &mut entry.endpoint {
            Endpoint::Unconnected {
                socket,
                bound: bound @ None,
            } => {
                let tcp = match socket.take() {
                    Some(tcp) => tcp,
                    None => entry
                        .family
                        .tcp_socket()
                        .map_err(|e| Error::transport("bind", 0, e))?,
                };
                let tcp = socket.insert(tcp);
                if entry.options.reuse_addr {
                    tcp.set_reuseaddr(true)
                        .map_err(|e| Error::transport("bind", 0, e))?;
                }
                tcp.bind(addr).map_err(|e| Error::transport("bind", 0, e))?;
                let local = tcp.local_addr().map_err(|e| Error::transport("bind", 0, e))?;
                *bound = Some(local);
                local
            }
            Endpoint::Datagram { socket: udp @ None, .. } => {
                let socket = UdpSocket::bind(addr)
                    .await
                    .map_err(|e| Error::transport("bind", 0, e))?;
                let local = socket
                    .local_addr()
                    .map_err(|e| Error::transport("bind", 0, e))?;
                *udp = Some(socket);
                local
            }
            _ => return Err(Error::invalid_state(id, state, "bind")),
        };

        info!(%id, %local, "Socket bound");
        Ok(local)
    }

    /// Connects the current client socket to `host:port`.
    ///
    /// Secured stream sockets complete the TLS handshake before returning.
    /// A failed stream connect leaves the socket open and reusable.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidRole`] for server sockets
    /// - [`Error::InvalidState`] if already connected or listening
    /// - [`Error::Resolve`] if the host cannot be resolved
    /// - [`Error::Timeout`] if the connect exceeds the connect timeout
    /// - [`Error::Transport`] or [`Error::Tls`] if the connect fails
    pub async fn connect(&mut self, host: &str, port: u16) -> Result<SocketAddr> {
        let id = self.current_id()?;
        let limit = self.config.connect_timeout();
        let entry = Self::entry_in(&mut self.table, id)?;
        let state = entry.state();

        if entry.role == SocketRole::Server {
            return Err(Error::invalid_role(id, entry.role, "connect"));
        }
        match &entry.endpoint {
            Endpoint::Unconnected { .. } => {}
            Endpoint::Datagram {
                connected: None, ..
            } => {}
            _ => return Err(Error::invalid_state(id, state, "connect")),
        }

        let addr = timeout(
            limit,
            self.network.resolve(entry.bearer, host, port, entry.family),
        )
        .await
        .map_err(|_| Error::timeout("resolve", limit))??;
        let local_ip = self.network.local_addr(entry.bearer, entry.family);

        match &mut entry.endpoint {
            Endpoint::Unconnected { socket, bound } => {
                let reuse = entry.options.reuse_addr;
                let tcp = match socket.take() {
                    Some(tcp) => tcp,
                    None => entry
                        .family
                        .tcp_socket()
                        .map_err(|e| Error::transport("connect", 0, e))?,
                };

                let connected = match timeout(limit, tcp.connect(addr)).await {
                    Ok(Ok(stream)) => stream,
                    Ok(Err(e)) => {
                        rearm(socket, bound, entry.family, reuse);
                        return Err(Error::transport("connect", 0, e));
                    }
                    Err(_) => {
                        rearm(socket, bound, entry.family, reuse);
                        return Err(Error::timeout("connect", limit));
                    }
                };

                let stream = match &entry.security {
                    Some(sec) => {
                        match tls::handshake_client(
                            connected,
                            sec.staged.credentials(),
                            &sec.tls,
                            limit,
                        )
                        .await
                        {
                            Ok(stream) => stream,
                            Err(e) => {
                                rearm(socket, bound, entry.family, reuse);
                                return Err(e);
                            }
                        }
                    }
                    None => NetStream::Plain(connected),
                };

                entry.endpoint = Endpoint::Connected { stream, peer: addr };
            }
            Endpoint::Datagram { socket, connected } => {
                let ip = local_ip
                    .ok_or_else(|| Error::address_unavailable(entry.family, entry.bearer.get()))?;
                let udp = ensure_udp(socket, ip).await?;
                udp.connect(addr)
                    .await
                    .map_err(|e| Error::transport("connect", 0, e))?;
                *connected = Some(addr);
            }
            _ => return Err(Error::invalid_state(id, state, "connect")),
        }

        info!(%id, host, %addr, "Socket connected");
        Ok(addr)
    }

    /// Puts the current server socket into listening state.
    ///
    /// Listening again is a no-op.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidRole`] for client sockets
    /// - [`Error::NotSupported`] for datagram sockets
    /// - [`Error::InvalidState`] if connected
    /// - [`Error::Transport`] if listen fails
    pub fn listen(&mut self) -> Result<SocketAddr> {
        let id = self.current_id()?;
        let entry = Self::entry_in(&mut self.table, id)?;
        let state = entry.state();

        if entry.role != SocketRole::Server {
            return Err(Error::invalid_role(id, entry.role, "listen"));
        }
        if entry.kind != SocketType::Stream {
            return Err(Error::not_supported("listen on datagram socket"));
        }

        match &mut entry.endpoint {
            Endpoint::Listening { listener, .. } => {
                return listener
                    .local_addr()
                    .map_err(|e| Error::transport("listen", 0, e));
            }
            Endpoint::Unconnected { socket, bound } => {
                let reuse = entry.options.reuse_addr;
                let tcp = match socket.take() {
                    Some(tcp) => tcp,
                    None => entry
                        .family
                        .tcp_socket()
                        .map_err(|e| Error::transport("listen", 0, e))?,
                };
                let listener = match tcp.listen(LISTEN_BACKLOG) {
                    Ok(listener) => listener,
                    Err(e) => {
                        rearm(socket, bound, entry.family, reuse);
                        return Err(Error::transport("listen", 0, e));
                    }
                };
                entry.endpoint = Endpoint::Listening {
                    listener,
                    peer: None,
                    queued: None,
                };
            }
            _ => return Err(Error::invalid_state(id, state, "listen")),
        }

        let local = entry
            .local_addr()
            .ok_or_else(|| Error::invalid_state(id, entry.state(), "listen"))?;
        info!(%id, %local, "Socket listening");
        Ok(local)
    }

    /// Accepts one connection on the current listening socket.
    ///
    /// The accepted connection becomes the tracked peer. An existing peer
    /// is replaced only once the new accept (and handshake) succeeded.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidRole`] for client sockets
    /// - [`Error::InvalidState`] if not listening
    /// - [`Error::Timeout`] if nobody connects within `wait`
    /// - [`Error::Transport`] or [`Error::Tls`] if accept fails
    pub async fn accept(&mut self, wait: Duration) -> Result<PeerInfo> {
        let id = self.current_id()?;
        let entry = Self::entry_in(&mut self.table, id)?;
        let state = entry.state();

        if entry.role != SocketRole::Server {
            return Err(Error::invalid_role(id, entry.role, "accept"));
        }
        let Endpoint::Listening {
            listener,
            peer,
            queued,
        } = &mut entry.endpoint
        else {
            return Err(Error::invalid_state(id, state, "accept"));
        };

        let (tcp, addr) = match queued.take() {
            Some(connection) => connection,
            None => timeout(wait, listener.accept())
                .await
                .map_err(|_| Error::timeout("accept", wait))?
                .map_err(|e| Error::transport("accept", 0, e))?,
        };

        let stream = match &entry.security {
            Some(sec) => {
                let config = tls::server_config(sec.staged.credentials(), sec.tls.peer_verify)?;
                tls::handshake_server(tcp, config, wait).await?
            }
            None => NetStream::Plain(tcp),
        };

        let accepted = Peer {
            id: SocketId::next(),
            stream,
            addr,
        };
        let info = accepted.info();
        if let Some(old) = peer.replace(accepted) {
            debug!(%id, old = %old.id, "Replaced tracked peer");
        }

        info!(%id, peer = %info.id, addr = %info.addr, "Connection accepted");
        Ok(info)
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// Replaces a socket consumed by a failed connect or listen.
///
/// Re-applies address reuse and the previous bind where possible.
fn rearm(
    socket: &mut Option<TcpSocket>,
    bound: &mut Option<SocketAddr>,
    family: AddressFamily,
    reuse: bool,
) {
    let fresh = family.tcp_socket().and_then(|tcp| {
        if reuse {
            tcp.set_reuseaddr(true)?;
        }
        if let Some(addr) = *bound {
            tcp.bind(addr)?;
        }
        Ok(tcp)
    });

    match fresh {
        Ok(tcp) => *socket = Some(tcp),
        Err(e) => {
            warn!(error = %e, bound = ?bound, "Could not restore socket after failure");
            *socket = None;
            *bound = None;
        }
    }
}

/// Returns the datagram socket, binding it to `ip:0` on first use.
pub(super) async fn ensure_udp(
    socket: &mut Option<UdpSocket>,
    ip: IpAddr,
) -> Result<&mut UdpSocket> {
    let udp = match socket.take() {
        Some(udp) => udp,
        None => UdpSocket::bind(SocketAddr::new(ip, 0))
            .await
            .map_err(|e| Error::transport("bind", 0, e))?,
    };
    Ok(socket.insert(udp))
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identifiers::BearerId;
    use crate::socket::core::tests::sockets;
    use crate::socket::{OpenParams, SocketState};
    use tokio::io::AsyncWriteExt;
    use tokio::net::{TcpListener, TcpStream};

    #[tokio::test]
    async fn test_bind_reports_local_address() {
        let (mut sockets, _) = sockets(2);
        sockets
            .open(OpenParams::stream(SocketRole::Server, AddressFamily::Ipv4))
            .expect("open");
        let local = sockets.bind(0).await.expect("bind");
        assert!(local.ip().is_loopback());
        assert_ne!(local.port(), 0);
        assert_eq!(sockets.current_info().expect("info").state, SocketState::Bound);

        let err = sockets.bind(0).await.unwrap_err();
        assert!(matches!(err, Error::InvalidState { .. }));
    }

    #[tokio::test]
    async fn test_bind_without_bearer_address() {
        let (mut sockets, _) = sockets(2);
        let secondary = BearerId::new(3).expect("bearer");
        sockets
            .open(
                OpenParams::stream(SocketRole::Client, AddressFamily::Ipv4).with_bearer(secondary),
            )
            .expect("open");
        let err = sockets.bind(0).await.unwrap_err();
        assert!(matches!(err, Error::AddressUnavailable { .. }));
    }

    #[tokio::test]
    async fn test_server_cannot_connect() {
        let (mut sockets, _) = sockets(2);
        sockets
            .open(OpenParams::stream(SocketRole::Server, AddressFamily::Ipv4))
            .expect("open");
        let err = sockets.connect("127.0.0.1", 9).await.unwrap_err();
        assert!(matches!(err, Error::InvalidRole { .. }));
        assert!(err.is_validation());
    }

    #[tokio::test]
    async fn test_client_cannot_listen() {
        let (mut sockets, _) = sockets(2);
        sockets
            .open(OpenParams::stream(SocketRole::Client, AddressFamily::Ipv4))
            .expect("open");
        assert!(matches!(sockets.listen(), Err(Error::InvalidRole { .. })));
    }

    #[tokio::test]
    async fn test_failed_connect_keeps_socket_usable() {
        let (mut sockets, _) = sockets(2);
        sockets
            .open(OpenParams::stream(SocketRole::Client, AddressFamily::Ipv4))
            .expect("open");

        // Grab a free port, then close it so the connect is refused.
        let closed = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let dead = closed.local_addr().expect("addr");
        drop(closed);

        let err = sockets.connect("127.0.0.1", dead.port()).await.unwrap_err();
        assert!(err.is_transport() || err.is_timeout());
        assert_eq!(sockets.current_info().expect("info").state, SocketState::Open);

        let live = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let port = live.local_addr().expect("addr").port();
        sockets.connect("127.0.0.1", port).await.expect("retry connect");
        assert_eq!(
            sockets.current_info().expect("info").state,
            SocketState::Connected
        );
    }

    #[tokio::test]
    async fn test_listen_accept_replaces_peer_on_success() {
        let (mut sockets, _) = sockets(2);
        sockets
            .open(OpenParams::stream(SocketRole::Server, AddressFamily::Ipv4))
            .expect("open");
        sockets.bind(0).await.expect("bind");
        let local = sockets.listen().expect("listen");
        assert_eq!(sockets.listen().expect("idempotent"), local);

        let err = sockets.accept(Duration::from_millis(50)).await.unwrap_err();
        assert!(err.is_timeout());
        assert_eq!(
            sockets.current_info().expect("info").state,
            SocketState::Listening
        );

        let mut first = TcpStream::connect(local).await.expect("connect");
        let peer1 = sockets.accept(Duration::from_secs(2)).await.expect("accept");
        assert_eq!(
            sockets.current_info().expect("info").peer,
            Some(peer1)
        );

        let _second = TcpStream::connect(local).await.expect("connect");
        let peer2 = sockets.accept(Duration::from_secs(2)).await.expect("accept");
        assert_ne!(peer1.id, peer2.id);
        assert_eq!(sockets.current_info().expect("info").peer, Some(peer2));

        // The replaced peer was closed.
        let mut buf = [0u8; 1];
        let n = tokio::io::AsyncReadExt::read(&mut first, &mut buf)
            .await
            .unwrap_or(0);
        assert_eq!(n, 0);
        first.shutdown().await.ok();
    }

    #[tokio::test]
    async fn test_datagram_connect_binds_lazily() {
        let (mut sockets, _) = sockets(2);
        sockets
            .open(OpenParams::datagram(SocketRole::Client, AddressFamily::Ipv4))
            .expect("open");
        let peer = UdpSocket::bind("127.0.0.1:0").await.expect("bind");
        let port = peer.local_addr().expect("addr").port();

        sockets.connect("127.0.0.1", port).await.expect("connect");
        let info = sockets.current_info().expect("info");
        assert_eq!(info.state, SocketState::Connected);
        assert!(info.local.is_some());
    }
}
