//! Send and receive on table sockets.

// ============================================================================
// Imports
// ============================================================================

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::io::AsyncReadExt;
use tokio::time::timeout;
use tracing::{debug, trace, warn};

use crate::error::{Error, Result};
use crate::identifiers::SocketId;
use crate::transport::{NetStream, WriteReport, write_bounded};

use super::connection::ensure_udp;
use super::core::Sockets;
use super::entry::{Endpoint, SocketType};

// ============================================================================
// Types
// ============================================================================

/// Receive flags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RecvFlags {
    /// Leave the data queued.
    pub peek: bool,
    /// Fail with a timeout instead of waiting.
    pub dont_wait: bool,
}

/// Data read together with its source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Received {
    /// Payload; empty on stream shutdown or for an empty datagram.
    pub data: Vec<u8>,
    /// Sender address.
    pub from: SocketAddr,
}

// ============================================================================
// Sockets - Send
// ============================================================================

impl Sockets {
    /// Sends `data` on the current socket.
    ///
    /// Server sockets send to their accepted peer. Returns the byte count,
    /// which equals `data.len()` on success.
    ///
    /// # Errors
    ///
    /// - [`Error::NoCurrentSocket`] if nothing is selected
    /// - [`Error::NotConnected`] for a server socket without a peer
    /// - [`Error::InvalidState`] if not connected
    /// - [`Error::Transport`] with the bytes already written on failure
    pub async fn send(&mut self, data: &[u8]) -> Result<usize> {
        let id = self.current_id()?;
        self.write_to(id, data).await?.into_result("send")
    }

    /// Sends a datagram to `host:port` from the current socket.
    ///
    /// Binds the socket to the bearer address on first use.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidState`] for stream sockets
    /// - [`Error::Resolve`] if the host cannot be resolved
    /// - [`Error::Transport`] if the send fails
    pub async fn send_to(&mut self, host: &str, port: u16, data: &[u8]) -> Result<usize> {
        let id = self.current_id()?;
        self.write_datagram_to(id, host, port, data)
            .await?
            .into_result("sendTo")
    }

    /// Bounded write on `id`, reporting partial progress instead of failing.
    ///
    /// Only validation problems are returned as errors; transport failures
    /// are carried in the report.
    pub(crate) async fn write_to(&mut self, id: SocketId, data: &[u8]) -> Result<WriteReport> {
        let default_window = self.config.send_timeout();
        let entry = Self::entry_in(&mut self.table, id)?;
        let state = entry.state();
        let window = entry.options.send_timeout.unwrap_or(default_window);

        let report = match &mut entry.endpoint {
            Endpoint::Connected { stream, .. } => write_bounded(stream, data, window).await,
            Endpoint::Listening {
                peer: Some(peer), ..
            } => write_bounded(&mut peer.stream, data, window).await,
            Endpoint::Listening { peer: None, .. } => return Err(Error::NotConnected),
            Endpoint::Datagram {
                socket: Some(udp),
                connected: Some(_),
            } => datagram_report(timeout(window, udp.send(data)).await),
            _ => return Err(Error::invalid_state(id, state, "send")),
        };

        trace!(%id, len = data.len(), written = report.written, "Send");
        Ok(report)
    }

    /// Datagram send to `host:port` on `id`.
    pub(crate) async fn write_datagram_to(
        &mut self,
        id: SocketId,
        host: &str,
        port: u16,
        data: &[u8],
    ) -> Result<WriteReport> {
        let window = self.config.send_timeout();
        let limit = self.config.connect_timeout();
        let entry = Self::entry_in(&mut self.table, id)?;
        let state = entry.state();

        if entry.kind != SocketType::Datagram {
            return Err(Error::invalid_state(id, state, "sendTo"));
        }
        let window = entry.options.send_timeout.unwrap_or(window);

        let dest = timeout(
            limit,
            self.network.resolve(entry.bearer, host, port, entry.family),
        )
        .await
        .map_err(|_| Error::timeout("resolve", limit))??;
        let ip = self
            .network
            .local_addr(entry.bearer, entry.family)
            .ok_or_else(|| Error::address_unavailable(entry.family, entry.bearer.get()))?;

        let Endpoint::Datagram { socket, .. } = &mut entry.endpoint else {
            return Err(Error::invalid_state(id, state, "sendTo"));
        };
        let udp = ensure_udp(socket, ip).await?;
        let report = datagram_report(timeout(window, udp.send_to(data, dest)).await);

        trace!(%id, %dest, len = data.len(), written = report.written, "Send to");
        Ok(report)
    }
}

// ============================================================================
// Sockets - Receive
// ============================================================================

impl Sockets {
    /// Receives once from the current socket.
    ///
    /// Waits up to `wait` (or the socket's receive timeout, or forever)
    /// for data, then performs one read into the shared buffer. An empty
    /// result on a stream means the peer shut down.
    ///
    /// # Errors
    ///
    /// - [`Error::Timeout`] if nothing arrives in time (retryable)
    /// - [`Error::NotConnected`] for a server socket without a peer
    /// - [`Error::InvalidState`] if not connected or bound
    /// - [`Error::Transport`] if the read fails
    pub async fn receive(&mut self, wait: Option<Duration>, flags: RecvFlags) -> Result<Vec<u8>> {
        self.receive_from(wait, flags)
            .await
            .map(|received| received.data)
    }

    /// Receives once from the current socket, with the sender address.
    ///
    /// # Errors
    ///
    /// Same as [`receive`](Self::receive).
    pub async fn receive_from(
        &mut self,
        wait: Option<Duration>,
        flags: RecvFlags,
    ) -> Result<Received> {
        let id = self.current_id()?;
        let entry = Self::entry_in(&mut self.table, id)?;
        let state = entry.state();
        let buf = self.buffer.as_mut_slice();

        let wait = if flags.dont_wait {
            Some(Duration::ZERO)
        } else {
            wait.or(entry.options.recv_timeout)
        };

        let received = match &mut entry.endpoint {
            Endpoint::Connected { stream, peer } => Received {
                data: read_stream(stream, buf, wait, flags.peek).await?,
                from: *peer,
            },
            Endpoint::Listening {
                peer: Some(peer), ..
            } => Received {
                data: read_stream(&mut peer.stream, buf, wait, flags.peek).await?,
                from: peer.addr,
            },
            Endpoint::Listening { peer: None, .. } => return Err(Error::NotConnected),
            Endpoint::Datagram {
                socket: Some(udp), ..
            } => {
                let (n, from) = if flags.peek {
                    bounded(wait, udp.peek_from(buf)).await?
                } else {
                    bounded(wait, udp.recv_from(buf)).await?
                };
                Received {
                    data: buf[..n].to_vec(),
                    from,
                }
            }
            _ => return Err(Error::invalid_state(id, state, "receive")),
        };

        trace!(%id, len = received.data.len(), from = %received.from, "Received");
        Ok(received)
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// Applies an optional receive timeout and maps failures.
async fn bounded<F, T>(wait: Option<Duration>, fut: F) -> Result<T>
where
    F: Future<Output = io::Result<T>>,
{
    let result = match wait {
        Some(limit) => timeout(limit, fut)
            .await
            .map_err(|_| Error::timeout("receive", limit))?,
        None => fut.await,
    };
    result.map_err(|e| Error::transport("receive", 0, e))
}

/// One read (or peek) from a stream.
async fn read_stream(
    stream: &mut NetStream,
    buf: &mut [u8],
    wait: Option<Duration>,
    peek: bool,
) -> Result<Vec<u8>> {
    let n = if peek {
        let NetStream::Plain(tcp) = stream else {
            return Err(Error::not_supported("peek on secured stream"));
        };
        bounded(wait, tcp.peek(buf)).await?
    } else {
        bounded(wait, stream.read(buf)).await?
    };

    if n == 0 {
        debug!("Peer shut down stream");
    }
    Ok(buf[..n].to_vec())
}

/// Converts a single datagram send into a write report.
fn datagram_report(
    result: std::result::Result<io::Result<usize>, tokio::time::error::Elapsed>,
) -> WriteReport {
    match result {
        Ok(Ok(written)) => WriteReport {
            written,
            error: None,
        },
        Ok(Err(e)) => {
            warn!(error = %e, "Datagram send failed");
            WriteReport {
                written: 0,
                error: Some(e),
            }
        }
        Err(_) => WriteReport {
            written: 0,
            error: Some(io::ErrorKind::TimedOut.into()),
        },
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::socket::core::tests::sockets;
    use crate::socket::{AddressFamily, OpenParams, SocketRole};
    use tokio::io::AsyncWriteExt;
    use tokio::net::{TcpListener, TcpStream, UdpSocket};

    /// Spawns a one-shot echo peer and returns its address.
    async fn echo_peer() -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.expect("accept");
            let mut buf = [0u8; 64];
            loop {
                match stream.read(&mut buf).await {
                    Ok(0) | Err(_) => break,
                    Ok(n) => {
                        if stream.write_all(&buf[..n]).await.is_err() {
                            break;
                        }
                    }
                }
            }
        });
        addr
    }

    #[tokio::test]
    async fn test_send_receive_echo() {
        let (mut sockets, _) = sockets(2);
        let peer = echo_peer().await;
        sockets
            .open(OpenParams::stream(SocketRole::Client, AddressFamily::Ipv4))
            .expect("open");
        sockets.connect("127.0.0.1", peer.port()).await.expect("connect");

        let sent = sockets.send(b"PING").await.expect("send");
        assert_eq!(sent, 4);

        let data = sockets
            .receive(Some(Duration::from_secs(5)), RecvFlags::default())
            .await
            .expect("receive");
        assert_eq!(data, b"PING");
    }

    #[tokio::test]
    async fn test_no_current_socket_is_validation_error() {
        let (mut sockets, _) = sockets(2);
        let id = sockets
            .open(OpenParams::stream(SocketRole::Client, AddressFamily::Ipv4))
            .expect("open");
        sockets.close(id).expect("close");

        let err = sockets.send(b"x").await.unwrap_err();
        assert!(matches!(err, Error::NoCurrentSocket));
        let err = sockets
            .receive(Some(Duration::from_millis(10)), RecvFlags::default())
            .await
            .unwrap_err();
        assert!(err.is_validation());
        assert!(!err.is_transport());
    }

    #[tokio::test]
    async fn test_receive_timeout_is_retryable() {
        let (mut sockets, _) = sockets(2);
        let peer = echo_peer().await;
        sockets
            .open(OpenParams::stream(SocketRole::Client, AddressFamily::Ipv4))
            .expect("open");
        sockets.connect("127.0.0.1", peer.port()).await.expect("connect");

        let err = sockets
            .receive(Some(Duration::from_millis(20)), RecvFlags::default())
            .await
            .unwrap_err();
        assert!(err.is_timeout());
        assert!(err.is_retryable());

        let err = sockets
            .receive(
                None,
                RecvFlags {
                    dont_wait: true,
                    ..RecvFlags::default()
                },
            )
            .await
            .unwrap_err();
        assert!(err.is_timeout());
    }

    #[tokio::test]
    async fn test_peer_shutdown_reads_empty() {
        let (mut sockets, _) = sockets(2);
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let port = listener.local_addr().expect("addr").port();
        sockets
            .open(OpenParams::stream(SocketRole::Client, AddressFamily::Ipv4))
            .expect("open");
        sockets.connect("127.0.0.1", port).await.expect("connect");
        let (stream, _) = listener.accept().await.expect("accept");
        drop(stream);

        let data = sockets
            .receive(Some(Duration::from_secs(2)), RecvFlags::default())
            .await
            .expect("shutdown is not an error");
        assert!(data.is_empty());
    }

    #[tokio::test]
    async fn test_server_sends_to_peer() {
        let (mut sockets, _) = sockets(2);
        sockets
            .open(OpenParams::stream(SocketRole::Server, AddressFamily::Ipv4))
            .expect("open");
        sockets.bind(0).await.expect("bind");
        let local = sockets.listen().expect("listen");

        let err = sockets.send(b"early").await.unwrap_err();
        assert!(matches!(err, Error::NotConnected));

        let mut client = TcpStream::connect(local).await.expect("connect");
        sockets.accept(Duration::from_secs(2)).await.expect("accept");
        assert_eq!(sockets.send(b"HELLO").await.expect("send"), 5);

        let mut buf = [0u8; 5];
        client.read_exact(&mut buf).await.expect("read");
        assert_eq!(&buf, b"HELLO");

        client.write_all(b"BACK").await.expect("write");
        let received = sockets
            .receive_from(Some(Duration::from_secs(2)), RecvFlags::default())
            .await
            .expect("receive");
        assert_eq!(received.data, b"BACK");
        assert_eq!(received.from, client.local_addr().expect("addr"));
    }

    #[tokio::test]
    async fn test_peek_leaves_data_queued() {
        let (mut sockets, _) = sockets(2);
        let peer = echo_peer().await;
        sockets
            .open(OpenParams::stream(SocketRole::Client, AddressFamily::Ipv4))
            .expect("open");
        sockets.connect("127.0.0.1", peer.port()).await.expect("connect");
        sockets.send(b"ABC").await.expect("send");

        let peek = RecvFlags {
            peek: true,
            ..RecvFlags::default()
        };
        let peeked = sockets
            .receive(Some(Duration::from_secs(2)), peek)
            .await
            .expect("peek");
        assert!(!peeked.is_empty());
        let read = sockets
            .receive(Some(Duration::from_secs(2)), RecvFlags::default())
            .await
            .expect("read");
        assert_eq!(&read[..peeked.len()], &peeked[..]);
    }

    #[tokio::test]
    async fn test_datagram_send_to_and_receive_from() {
        let (mut sockets, _) = sockets(2);
        let peer = UdpSocket::bind("127.0.0.1:0").await.expect("bind");
        let peer_addr = peer.local_addr().expect("addr");

        sockets
            .open(OpenParams::datagram(SocketRole::Client, AddressFamily::Ipv4))
            .expect("open");
        let n = sockets
            .send_to("127.0.0.1", peer_addr.port(), b"DGRAM")
            .await
            .expect("send_to");
        assert_eq!(n, 5);

        let mut buf = [0u8; 16];
        let (n, from) = peer.recv_from(&mut buf).await.expect("recv");
        assert_eq!(&buf[..n], b"DGRAM");

        peer.send_to(b"", from).await.expect("empty datagram");
        let received = sockets
            .receive_from(Some(Duration::from_secs(2)), RecvFlags::default())
            .await
            .expect("empty datagram is valid");
        assert!(received.data.is_empty());
        assert_eq!(received.from, peer_addr);
    }

    #[tokio::test]
    async fn test_send_to_on_stream_rejected() {
        let (mut sockets, _) = sockets(2);
        sockets
            .open(OpenParams::stream(SocketRole::Client, AddressFamily::Ipv4))
            .expect("open");
        let err = sockets.send_to("127.0.0.1", 9, b"x").await.unwrap_err();
        assert!(matches!(err, Error::InvalidState { .. }));
    }
}
