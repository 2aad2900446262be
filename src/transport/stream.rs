//! Plain or TLS stream and the bounded write discipline.

// ============================================================================
// Imports
// ============================================================================

use std::io::{self, ErrorKind};
use std::net::SocketAddr;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadBuf};
use tokio::net::TcpStream;
use tokio::time::{Instant, timeout_at};
use tokio_rustls::{client, server};
use tracing::trace;

use crate::error::{Error, Result};

// ============================================================================
// NetStream
// ============================================================================

/// Connected stream, plain or secured.
pub enum NetStream {
    /// Plain TCP.
    Plain(TcpStream),
    /// TLS, local end is the client.
    ClientTls(Box<client::TlsStream<TcpStream>>),
    /// TLS, local end is the server.
    ServerTls(Box<server::TlsStream<TcpStream>>),
}

impl NetStream {
    /// Underlying TCP stream.
    #[must_use]
    pub fn tcp(&self) -> &TcpStream {
        match self {
            Self::Plain(tcp) => tcp,
            Self::ClientTls(tls) => tls.get_ref().0,
            Self::ServerTls(tls) => tls.get_ref().0,
        }
    }

    /// Remote address.
    ///
    /// # Errors
    ///
    /// Returns the socket error if the connection is gone.
    pub fn peer_addr(&self) -> io::Result<SocketAddr> {
        self.tcp().peer_addr()
    }

    /// Returns `true` for TLS streams.
    #[inline]
    #[must_use]
    pub fn is_secure(&self) -> bool {
        !matches!(self, Self::Plain(_))
    }

    /// Negotiated cipher suite name, for TLS streams.
    #[must_use]
    pub fn cipher_suite(&self) -> Option<String> {
        let suite = match self {
            Self::Plain(_) => None,
            Self::ClientTls(tls) => tls.get_ref().1.negotiated_cipher_suite(),
            Self::ServerTls(tls) => tls.get_ref().1.negotiated_cipher_suite(),
        }?;
        Some(format!("{:?}", suite.suite()))
    }
}

impl std::fmt::Debug for NetStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match self {
            Self::Plain(_) => "plain",
            Self::ClientTls(_) => "tls-client",
            Self::ServerTls(_) => "tls-server",
        };
        f.debug_struct("NetStream")
            .field("kind", &kind)
            .field("peer", &self.peer_addr().ok())
            .finish()
    }
}

impl AsyncRead for NetStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Plain(s) => Pin::new(s).poll_read(cx, buf),
            Self::ClientTls(s) => Pin::new(s.as_mut()).poll_read(cx, buf),
            Self::ServerTls(s) => Pin::new(s.as_mut()).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for NetStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            Self::Plain(s) => Pin::new(s).poll_write(cx, buf),
            Self::ClientTls(s) => Pin::new(s.as_mut()).poll_write(cx, buf),
            Self::ServerTls(s) => Pin::new(s.as_mut()).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Plain(s) => Pin::new(s).poll_flush(cx),
            Self::ClientTls(s) => Pin::new(s.as_mut()).poll_flush(cx),
            Self::ServerTls(s) => Pin::new(s.as_mut()).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Plain(s) => Pin::new(s).poll_shutdown(cx),
            Self::ClientTls(s) => Pin::new(s.as_mut()).poll_shutdown(cx),
            Self::ServerTls(s) => Pin::new(s.as_mut()).poll_shutdown(cx),
        }
    }
}

// ============================================================================
// Bounded Write
// ============================================================================

/// Outcome of a bounded write.
#[derive(Debug)]
pub struct WriteReport {
    /// Bytes accepted by the transport.
    pub written: usize,
    /// Error that stopped the write early, if any.
    pub error: Option<io::Error>,
}

impl WriteReport {
    /// Returns `true` if every byte was written.
    #[inline]
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.error.is_none()
    }

    /// Converts to the byte count, or a transport error carrying it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Transport`] with `transferred` set when the write
    /// stopped early.
    pub fn into_result(self, operation: &'static str) -> Result<usize> {
        match self.error {
            None => Ok(self.written),
            Some(e) => Err(Error::transport(operation, self.written, e)),
        }
    }

    /// Returns `true` if the write stopped because the connection is gone.
    #[must_use]
    pub fn is_connection_lost(&self) -> bool {
        self.error.as_ref().is_some_and(|e| {
            matches!(
                e.kind(),
                ErrorKind::BrokenPipe
                    | ErrorKind::ConnectionReset
                    | ErrorKind::ConnectionAborted
                    | ErrorKind::NotConnected
                    | ErrorKind::WriteZero
            )
        })
    }
}

/// Writes `data`, waiting for writability, until done or `window` elapses.
///
/// Never loses the count of bytes already written: the report carries
/// both the count and the error that stopped the loop.
pub async fn write_bounded<W>(writer: &mut W, data: &[u8], window: Duration) -> WriteReport
where
    W: AsyncWrite + Unpin + ?Sized,
{
    let deadline = Instant::now() + window;
    let mut written = 0;

    while written < data.len() {
        match timeout_at(deadline, writer.write(&data[written..])).await {
            Ok(Ok(0)) => {
                return WriteReport {
                    written,
                    error: Some(ErrorKind::WriteZero.into()),
                };
            }
            Ok(Ok(n)) => {
                written += n;
                trace!(n, written, total = data.len(), "Partial write");
            }
            Ok(Err(e)) if e.kind() == ErrorKind::Interrupted => {}
            Ok(Err(e)) => return WriteReport { written, error: Some(e) },
            Err(_) => {
                return WriteReport {
                    written,
                    error: Some(ErrorKind::TimedOut.into()),
                };
            }
        }
    }

    let error = match timeout_at(deadline, writer.flush()).await {
        Ok(Ok(())) => None,
        Ok(Err(e)) => Some(e),
        Err(_) => Some(ErrorKind::TimedOut.into()),
    };

    WriteReport { written, error }
}

// ============================================================================
// Tests
// ============================================================================
