//! Command dispatch.

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use tracing::debug;

use crate::datamode::DataModeTarget;
use crate::error::{Error, Result};
use crate::protocol::{Command, Reply};
use crate::socket::{OpenParams, SecureOpen, SocketRole, SocketState, SocketType};

use super::core::Modem;

// ============================================================================
// Modem - Execute
// ============================================================================

impl Modem {
    /// Executes one host command.
    ///
    /// While data mode is active only [`Command::DataModeExit`] is
    /// accepted. A `send`, `sendTo` or `proxySend` without data enters
    /// data mode toward the named target and replies
    /// [`Reply::DataModeEntered`].
    ///
    /// # Errors
    ///
    /// Returns the operation's error; see the [`Sockets`](crate::socket::Sockets)
    /// and [`Proxy`](crate::proxy::Proxy) methods each command maps to.
    pub async fn execute(&mut self, command: Command) -> Result<Reply> {
        let op = command.name();
        if self.data_mode.is_active() && !matches!(command, Command::DataModeExit) {
            return Err(Error::data_mode(format!("{op} rejected in data mode")));
        }

        debug!(op, "Executing command");
        let result = self.dispatch(command).await;
        if let Err(e) = &result {
            debug!(op, error = %e, "Command failed");
        }
        result
    }

    async fn dispatch(&mut self, command: Command) -> Result<Reply> {
        let reply = match command {
            Command::Open {
                kind,
                role,
                family,
                bearer,
                sec_tag,
                peer_verify,
            } => {
                let security = match (sec_tag, peer_verify) {
                    (Some(tag), peer_verify) => Some(SecureOpen { tag, peer_verify }),
                    (None, Some(_)) => {
                        return Err(Error::invalid_argument("peerVerify requires secTag"));
                    }
                    (None, None) => None,
                };
                let id = self.sockets.open(OpenParams {
                    kind,
                    role,
                    family,
                    bearer,
                    security,
                })?;
                Reply::Opened { id }
            }
            Command::Close { id: Some(id) } => {
                self.sockets.close(id)?;
                Reply::Closed { id: Some(id) }
            }
            Command::Close { id: None } => Reply::Closed {
                id: self.sockets.close_current()?,
            },
            Command::Select { id } => {
                self.sockets.select(id)?;
                Reply::Ok
            }
            Command::List => Reply::Sockets {
                sockets: self.sockets.list(),
            },

            Command::Bind { port } => Reply::Bound {
                addr: self.sockets.bind(port).await?,
            },
            Command::Connect { host, port } => Reply::Connected {
                addr: self.sockets.connect(&host, port).await?,
            },
            Command::Listen => Reply::Listening {
                addr: self.sockets.listen()?,
            },
            Command::Accept { timeout_ms } => Reply::Accepted {
                peer: self
                    .sockets
                    .accept(Duration::from_millis(timeout_ms))
                    .await?,
            },

            Command::Send { data: Some(data) } => Reply::Sent {
                len: self.sockets.send(data.as_bytes()).await?,
            },
            Command::Send { data: None } => self.enter_socket_data_mode(None)?,
            Command::SendTo {
                host,
                port,
                data: Some(data),
            } => Reply::Sent {
                len: self.sockets.send_to(&host, port, data.as_bytes()).await?,
            },
            Command::SendTo {
                host,
                port,
                data: None,
            } => self.enter_socket_data_mode(Some((host, port)))?,

            Command::Receive { timeout_ms, flags } => Reply::Received {
                data: self
                    .sockets
                    .receive(timeout_ms.map(Duration::from_millis), flags)
                    .await?,
            },
            Command::ReceiveFrom { timeout_ms, flags } => {
                let received = self
                    .sockets
                    .receive_from(timeout_ms.map(Duration::from_millis), flags)
                    .await?;
                Reply::ReceivedFrom {
                    data: received.data,
                    from: received.from,
                }
            }
            Command::Poll { timeout_ms, ids } => Reply::Polled {
                events: self
                    .sockets
                    .poll(timeout_ms.map(Duration::from_millis), ids.as_deref())
                    .await,
            },

            Command::GetOption { name } => Reply::SocketOption {
                option: self.sockets.get_option(name)?,
            },
            Command::SetOption { option } => {
                self.sockets.set_option(option)?;
                Reply::Ok
            }
            Command::GetTlsOption { name } => Reply::TlsOption {
                option: self.sockets.get_tls_option(name)?,
            },
            Command::SetTlsOption { option } => {
                self.sockets.set_tls_option(option)?;
                Reply::Ok
            }

            Command::ProxyServerStart(params) => Reply::ProxyStarted {
                addr: self.proxy.start_server(&params)?,
            },
            Command::ProxyClientStart(params) => Reply::ProxyStarted {
                addr: self.proxy.start_client(&params).await?,
            },
            Command::ProxyStop => Reply::ProxyStopped {
                stopped: self.proxy.stop().await,
            },
            Command::ProxyHangup { id } => {
                self.proxy.hangup(id).await?;
                Reply::Ok
            }
            Command::ProxySend { data: Some(data) } => Reply::Sent {
                len: self.proxy.send(data.as_bytes()).await?,
            },
            Command::ProxySend { data: None } => self.enter_proxy_data_mode()?,
            Command::ProxyStatus => Reply::ProxyStatus {
                status: self.proxy.status(),
            },
            Command::SetAllowlist { addrs } => {
                self.proxy.set_allowlist(&addrs)?;
                Reply::Ok
            }
            Command::ClearAllowlist => {
                self.proxy.clear_allowlist();
                Reply::Ok
            }

            Command::DataModeExit => {
                if !self.exit_data_mode() {
                    return Err(Error::data_mode("not active"));
                }
                Reply::Ok
            }
        };
        Ok(reply)
    }
}

// ============================================================================
// Modem - Data Mode Entry
// ============================================================================

impl Modem {
    /// Enters data mode toward the current socket.
    ///
    /// Streams need a connection (or an accepted peer); datagram sockets
    /// need either a connected peer or an explicit destination.
    fn enter_socket_data_mode(&mut self, destination: Option<(String, u16)>) -> Result<Reply> {
        let info = self.sockets.current_info()?;
        let op = if destination.is_some() { "sendTo" } else { "send" };

        let ready = match (info.kind, &destination) {
            (SocketType::Datagram, Some(_)) => true,
            (_, Some(_)) => false,
            (_, None) => matches!(info.state, SocketState::Connected | SocketState::Accepted),
        };
        if !ready {
            if info.role == SocketRole::Server && info.state == SocketState::Listening {
                return Err(Error::NotConnected);
            }
            return Err(Error::invalid_state(info.id, info.state, op));
        }

        self.data_mode.enter(DataModeTarget::Socket {
            id: info.id,
            destination,
        })?;
        Ok(Reply::DataModeEntered)
    }

    /// Enters data mode toward the proxy connection.
    fn enter_proxy_data_mode(&mut self) -> Result<Reply> {
        let status = self.proxy.status().ok_or(Error::NoSession)?;
        if status.role == SocketRole::Server && status.peer.is_none() {
            return Err(Error::NotConnected);
        }

        self.data_mode.enter(DataModeTarget::Proxy)?;
        Ok(Reply::DataModeEntered)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream, UdpSocket};
    use tokio::time::timeout;

    use crate::config::Config;
    use crate::identifiers::SocketId;
    use crate::protocol::{ExitCause, Notification, Notifications, StopCause};
    use crate::proxy::ServerParams;
    use crate::transport::HostNetwork;

    const WAIT: Duration = Duration::from_secs(2);

    fn modem() -> (Modem, Notifications) {
        Modem::builder()
            .config(
                Config::new()
                    .with_socket_capacity(4)
                    .with_connect_timeout_ms(2_000)
                    .with_send_timeout_ms(2_000),
            )
            .network(Arc::new(HostNetwork::new()))
            .build()
            .expect("build")
    }

    fn command(json: &str) -> Command {
        Command::from_json(json).expect("parse")
    }

    async fn next(notifications: &mut Notifications) -> Notification {
        notifications
            .recv_timeout(WAIT)
            .await
            .expect("notification in time")
    }

    /// Echo server handling one connection.
    async fn echo_server() -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let port = listener.local_addr().expect("addr").port();
        tokio::spawn(async move {
            let Ok((mut stream, _)) = listener.accept().await else {
                return;
            };
            let mut buf = [0u8; 256];
            while let Ok(n) = stream.read(&mut buf).await {
                if n == 0 || stream.write_all(&buf[..n]).await.is_err() {
                    break;
                }
            }
        });
        port
    }

    async fn open_connected(modem: &mut Modem, port: u16) -> SocketId {
        let Reply::Opened { id } = modem
            .execute(command(r#"{"op":"open","type":"stream","role":"client"}"#))
            .await
            .expect("open")
        else {
            panic!("expected opened");
        };
        modem
            .execute(Command::Connect {
                host: "127.0.0.1".into(),
                port,
            })
            .await
            .expect("connect");
        id
    }

    #[tokio::test]
    async fn test_echo_round_trip() {
        let (mut modem, _notifications) = modem();
        let port = echo_server().await;
        let id = open_connected(&mut modem, port).await;

        let reply = modem
            .execute(command(r#"{"op":"send","data":"PING"}"#))
            .await
            .expect("send");
        assert_eq!(reply, Reply::Sent { len: 4 });

        let reply = modem
            .execute(command(r#"{"op":"receive","timeoutMs":2000}"#))
            .await
            .expect("receive");
        assert_eq!(
            reply,
            Reply::Received {
                data: b"PING".to_vec()
            }
        );

        let reply = modem
            .execute(command(r#"{"op":"close"}"#))
            .await
            .expect("close");
        assert_eq!(reply, Reply::Closed { id: Some(id) });
        assert_eq!(
            modem.execute(Command::List).await.expect("list"),
            Reply::Sockets { sockets: vec![] }
        );
    }

    #[tokio::test]
    async fn test_socket_data_mode() {
        let (mut modem, mut notifications) = modem();
        let port = echo_server().await;
        open_connected(&mut modem, port).await;

        let reply = modem
            .execute(command(r#"{"op":"send"}"#))
            .await
            .expect("enter");
        assert_eq!(reply, Reply::DataModeEntered);
        assert!(modem.data_mode().is_active());

        let err = modem.execute(Command::List).await.unwrap_err();
        assert!(matches!(err, Error::DataMode { .. }));

        assert_eq!(modem.forward(b"raw bytes").await.expect("forward"), 9);

        assert_eq!(
            modem.execute(Command::DataModeExit).await.expect("exit"),
            Reply::Ok
        );
        assert_eq!(
            next(&mut notifications).await,
            Notification::DataModeExited {
                cause: ExitCause::Requested
            }
        );

        let reply = modem
            .execute(command(r#"{"op":"receive","timeoutMs":2000}"#))
            .await
            .expect("receive");
        assert_eq!(
            reply,
            Reply::Received {
                data: b"raw bytes".to_vec()
            }
        );
    }

    #[tokio::test]
    async fn test_data_mode_needs_connection() {
        let (mut modem, _notifications) = modem();
        modem
            .execute(command(r#"{"op":"open","type":"stream","role":"client"}"#))
            .await
            .expect("open");

        let err = modem.execute(Command::Send { data: None }).await.unwrap_err();
        assert!(matches!(err, Error::InvalidState { .. }));

        let err = modem
            .execute(Command::SendTo {
                host: "127.0.0.1".into(),
                port: 9,
                data: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidState { .. }));
        assert!(!modem.data_mode().is_active());
    }

    #[tokio::test]
    async fn test_datagram_data_mode() {
        let (mut modem, mut notifications) = modem();
        let receiver = UdpSocket::bind("127.0.0.1:0").await.expect("bind");
        let port = receiver.local_addr().expect("addr").port();

        modem
            .execute(command(r#"{"op":"open","type":"datagram","role":"client"}"#))
            .await
            .expect("open");
        let reply = modem
            .execute(Command::SendTo {
                host: "127.0.0.1".into(),
                port,
                data: None,
            })
            .await
            .expect("enter");
        assert_eq!(reply, Reply::DataModeEntered);

        assert_eq!(modem.forward(b"x").await.expect("forward"), 1);
        let mut buf = [0u8; 8];
        let (len, _) = timeout(WAIT, receiver.recv_from(&mut buf))
            .await
            .expect("datagram in time")
            .expect("recv");
        assert_eq!(&buf[..len], b"x");

        assert!(modem.exit_data_mode());
        assert_eq!(
            next(&mut notifications).await,
            Notification::DataModeExited {
                cause: ExitCause::Requested
            }
        );
    }

    #[tokio::test]
    async fn test_exit_without_data_mode() {
        let (mut modem, _notifications) = modem();
        let err = modem.execute(Command::DataModeExit).await.unwrap_err();
        assert!(matches!(err, Error::DataMode { .. }));
        assert!(matches!(
            modem.forward(b"x").await.unwrap_err(),
            Error::DataMode { .. }
        ));
    }

    #[tokio::test]
    async fn test_open_rejects_peer_verify_without_tag() {
        let (mut modem, _notifications) = modem();
        let err = modem
            .execute(command(
                r#"{"op":"open","type":"stream","role":"client","peerVerify":"required"}"#,
            ))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidArgument { .. }));
        assert!(modem.sockets().is_empty());
    }

    #[tokio::test]
    async fn test_proxy_data_mode() {
        let (mut modem, mut notifications) = modem();

        let err = modem
            .execute(Command::ProxySend { data: None })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NoSession));

        let Reply::ProxyStarted { addr } = modem
            .execute(Command::ProxyServerStart(ServerParams::new(0)))
            .await
            .expect("start")
        else {
            panic!("expected proxyStarted");
        };

        let err = modem
            .execute(Command::ProxySend { data: None })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotConnected));

        let mut peer = TcpStream::connect(addr).await.expect("connect");
        assert!(matches!(
            next(&mut notifications).await,
            Notification::PeerConnected { .. }
        ));

        assert_eq!(
            modem
                .execute(Command::ProxySend { data: None })
                .await
                .expect("enter"),
            Reply::DataModeEntered
        );
        assert_eq!(modem.forward(b"PING").await.expect("forward"), 4);
        let mut buf = [0u8; 4];
        timeout(WAIT, peer.read_exact(&mut buf))
            .await
            .expect("read in time")
            .expect("read");
        assert_eq!(&buf, b"PING");

        drop(peer);
        assert_eq!(
            next(&mut notifications).await,
            Notification::DataModeExited {
                cause: ExitCause::ConnectionLost
            }
        );
        assert!(!modem.data_mode().is_active());

        assert_eq!(
            modem.execute(Command::ProxyStop).await.expect("stop"),
            Reply::ProxyStopped { stopped: true }
        );
        assert_eq!(
            next(&mut notifications).await,
            Notification::ProxyStopped {
                role: SocketRole::Server,
                cause: StopCause::Requested
            }
        );
    }
}
