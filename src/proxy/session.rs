//! Proxy session lifecycle: start, stop, hangup, send.
//!
//! Setup runs in the command context and is all-or-nothing: any failure
//! drops what was created so far, which closes the socket and unstages
//! credentials. Only a fully set up session is handed to a worker.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::Deserialize;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::datamode::{DataMode, DataModeTarget};
use crate::error::{Error, Result};
use crate::identifiers::{BearerId, SecTag, SocketId};
use crate::protocol::Notifier;
use crate::socket::{AddressFamily, SocketRole};
use crate::transport::{
    CredentialStore, NetStream, Network, PeerVerify, Staged, TlsSettings, WriteReport, tls,
};

use super::control::{ControlEvent, ProxyStatus};
use super::filter::AllowList;
use super::worker::{Shared, Worker, WorkerSettings};

// ============================================================================
// Parameters
// ============================================================================

/// Parameters of [`Proxy::start_server`].
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerParams {
    /// Listening port; 0 picks an ephemeral port.
    pub port: u16,
    /// Address family.
    #[serde(default)]
    pub family: AddressFamily,
    /// Device binding.
    #[serde(default)]
    pub bearer: BearerId,
    /// Security tag; secures the session when set.
    #[serde(default)]
    pub sec_tag: Option<SecTag>,
    /// Client-certificate verification; defaults to none.
    #[serde(default)]
    pub peer_verify: Option<PeerVerify>,
    /// Enter data mode when a peer connects.
    #[serde(default)]
    pub data_mode: bool,
}

impl ServerParams {
    /// Plain IPv4 server on the primary bearer.
    #[must_use]
    pub fn new(port: u16) -> Self {
        Self {
            port,
            family: AddressFamily::Ipv4,
            bearer: BearerId::PRIMARY,
            sec_tag: None,
            peer_verify: None,
            data_mode: false,
        }
    }

    /// Sets the address family.
    #[must_use]
    pub fn with_family(mut self, family: AddressFamily) -> Self {
        self.family = family;
        self
    }

    /// Secures the session with `tag`.
    #[must_use]
    pub fn secured(mut self, tag: SecTag, peer_verify: Option<PeerVerify>) -> Self {
        self.sec_tag = Some(tag);
        self.peer_verify = peer_verify;
        self
    }

    /// Enters data mode when a peer connects.
    #[must_use]
    pub fn with_data_mode(mut self) -> Self {
        self.data_mode = true;
        self
    }
}

/// Parameters of [`Proxy::start_client`].
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientParams {
    /// Remote host name or address.
    pub host: String,
    /// Remote port.
    pub port: u16,
    /// Address family.
    #[serde(default)]
    pub family: AddressFamily,
    /// Device binding.
    #[serde(default)]
    pub bearer: BearerId,
    /// Security tag; secures the session when set.
    #[serde(default)]
    pub sec_tag: Option<SecTag>,
    /// Server-certificate verification; defaults to required.
    #[serde(default)]
    pub peer_verify: Option<PeerVerify>,
    /// Check the server certificate against `host`.
    #[serde(default = "enabled")]
    pub hostname_verify: bool,
    /// Enter data mode once connected.
    #[serde(default)]
    pub data_mode: bool,
}

fn enabled() -> bool {
    true
}

impl ClientParams {
    /// Plain IPv4 client on the primary bearer.
    #[must_use]
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            family: AddressFamily::Ipv4,
            bearer: BearerId::PRIMARY,
            sec_tag: None,
            peer_verify: None,
            hostname_verify: true,
            data_mode: false,
        }
    }

    /// Sets the address family.
    #[must_use]
    pub fn with_family(mut self, family: AddressFamily) -> Self {
        self.family = family;
        self
    }

    /// Secures the session with `tag`.
    #[must_use]
    pub fn secured(mut self, tag: SecTag, peer_verify: Option<PeerVerify>) -> Self {
        self.sec_tag = Some(tag);
        self.peer_verify = peer_verify;
        self
    }

    /// Skips the hostname check of the server certificate.
    #[must_use]
    pub fn without_hostname_verify(mut self) -> Self {
        self.hostname_verify = false;
        self
    }

    /// Enters data mode once connected.
    #[must_use]
    pub fn with_data_mode(mut self) -> Self {
        self.data_mode = true;
        self
    }
}

// ============================================================================
// Proxy
// ============================================================================

/// Handles of a running worker.
struct Session {
    role: SocketRole,
    control: mpsc::Sender<ControlEvent>,
    status: watch::Receiver<Option<ProxyStatus>>,
    handle: JoinHandle<()>,
}

/// The singleton proxy session owner.
///
/// At most one session runs at a time. The worker owns the session's
/// sockets; this value only holds the control channel, the status watch
/// and the task handle.
pub struct Proxy {
    config: Config,
    network: Arc<dyn Network>,
    credentials: Arc<dyn CredentialStore>,
    shared: Shared,
    session: Option<Session>,
}

impl fmt::Debug for Proxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Proxy")
            .field("role", &self.session.as_ref().map(|s| s.role))
            .field("active", &self.is_active())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Proxy - Constructor
// ============================================================================

impl Proxy {
    /// Creates an idle proxy.
    #[must_use]
    pub fn new(
        config: Config,
        network: Arc<dyn Network>,
        credentials: Arc<dyn CredentialStore>,
        notifier: Notifier,
        data_mode: DataMode,
    ) -> Self {
        let allowlist = AllowList::new(config.allowlist_capacity);
        Self {
            config,
            network,
            credentials,
            shared: Shared {
                notifier,
                data_mode,
                allowlist: Arc::new(RwLock::new(allowlist)),
            },
            session: None,
        }
    }
}

// ============================================================================
// Proxy - Lifecycle
// ============================================================================

impl Proxy {
    /// Starts a server session and returns its local address.
    ///
    /// The listener accepts one tracked peer at a time; connections made
    /// while a peer is tracked are closed without being reported.
    ///
    /// # Errors
    ///
    /// - [`Error::SessionActive`] if a session is running
    /// - [`Error::Credential`] or [`Error::Tls`] for bad security settings
    /// - [`Error::AddressUnavailable`] if the bearer has no address
    /// - [`Error::Transport`] if the listener cannot be set up
    pub fn start_server(&mut self, params: &ServerParams) -> Result<SocketAddr> {
        self.ensure_idle(params.data_mode)?;

        let staged = self.stage(params.sec_tag)?;
        let server_tls = staged
            .as_ref()
            .map(|staged| {
                let level = params
                    .peer_verify
                    .unwrap_or_else(|| SocketRole::Server.default_peer_verify());
                tls::server_config(staged.credentials(), level)
            })
            .transpose()?;

        let ip = self
            .network
            .local_addr(params.bearer, params.family)
            .ok_or_else(|| Error::address_unavailable(params.family, params.bearer.get()))?;
        let listener = listen(params.family, SocketAddr::new(ip, params.port))?;
        let local = listener
            .local_addr()
            .map_err(|e| Error::transport("proxyServerStart", 0, e))?;

        let id = SocketId::next();
        let secure = staged.is_some();
        let mut settings = WorkerSettings::from_config(&self.config);
        settings.data_mode_on_accept = params.data_mode;

        let (worker, (control, status)) = Worker::new(
            SocketRole::Server,
            id,
            local,
            staged,
            self.shared.clone(),
            settings,
        );
        let handle = worker.with_listener(listener, server_tls).spawn();
        self.session = Some(Session {
            role: SocketRole::Server,
            control,
            status,
            handle,
        });

        info!(%id, %local, secure, "Proxy server started");
        Ok(local)
    }

    /// Starts a client session and returns the remote address.
    ///
    /// # Errors
    ///
    /// - [`Error::SessionActive`] if a session is running
    /// - [`Error::Credential`] or [`Error::Tls`] for bad security settings
    /// - [`Error::Resolve`] if the host cannot be resolved
    /// - [`Error::Timeout`] if connect or handshake exceed the connect timeout
    /// - [`Error::Transport`] if the connect fails
    pub async fn start_client(&mut self, params: &ClientParams) -> Result<SocketAddr> {
        self.ensure_idle(params.data_mode)?;
        let limit = self.config.connect_timeout();
        let op = |e| Error::transport("proxyClientStart", 0, e);

        let staged = self.stage(params.sec_tag)?;
        let remote = timeout(
            limit,
            self.network
                .resolve(params.bearer, &params.host, params.port, params.family),
        )
        .await
        .map_err(|_| Error::timeout("resolve", limit))??;

        let socket = params.family.tcp_socket().map_err(op)?;
        let tcp = timeout(limit, socket.connect(remote))
            .await
            .map_err(|_| Error::timeout("proxyClientStart", limit))?
            .map_err(op)?;
        let local = tcp.local_addr().map_err(op)?;

        let stream = match &staged {
            Some(staged) => {
                let settings = TlsSettings {
                    peer_verify: params
                        .peer_verify
                        .unwrap_or_else(|| SocketRole::Client.default_peer_verify()),
                    hostname: params.hostname_verify.then(|| params.host.clone()),
                    session_cache: false,
                };
                tls::handshake_client(tcp, staged.credentials(), &settings, limit).await?
            }
            None => NetStream::Plain(tcp),
        };

        let id = SocketId::next();
        let secure = staged.is_some();
        let (worker, (control, status)) = Worker::new(
            SocketRole::Client,
            id,
            local,
            staged,
            self.shared.clone(),
            WorkerSettings::from_config(&self.config),
        );
        let handle = worker.with_outbound(remote, stream).spawn();
        self.session = Some(Session {
            role: SocketRole::Client,
            control,
            status,
            handle,
        });

        info!(%id, host = %params.host, %remote, secure, "Proxy client started");
        if params.data_mode {
            self.shared.data_mode.enter(DataModeTarget::Proxy)?;
        }
        Ok(remote)
    }

    /// Stops the running session.
    ///
    /// Waits up to the stop timeout for the worker to exit, then aborts
    /// it; the worker's teardown runs either way. Returns `false` if no
    /// session was running.
    pub async fn stop(&mut self) -> bool {
        self.reap();
        let Some(session) = self.session.take() else {
            debug!("Proxy stop with no session");
            return false;
        };
        let Session {
            role,
            control,
            mut handle,
            ..
        } = session;
        let limit = self.config.proxy_stop_timeout();

        if let Err(e) = control.try_send(ControlEvent::CloseSession) {
            debug!(error = %e, "Close event not queued");
        }

        match timeout(limit, &mut handle).await {
            Ok(Ok(())) => debug!(%role, "Proxy worker exited"),
            Ok(Err(e)) => warn!(%role, error = %e, "Proxy worker ended abnormally"),
            Err(_) => {
                warn!(
                    %role,
                    timeout_ms = limit.as_millis() as u64,
                    "Proxy worker did not exit, aborting"
                );
                handle.abort();
                let _ = handle.await;
            }
        }

        true
    }

    /// Drops the tracked peer of a server session; the listener keeps
    /// running.
    ///
    /// # Errors
    ///
    /// - [`Error::NoSession`] if no session is running
    /// - [`Error::InvalidRole`] for client sessions
    /// - [`Error::SocketNotFound`] if `id` is not the tracked peer
    pub async fn hangup(&mut self, id: SocketId) -> Result<()> {
        let status = self.status().ok_or(Error::NoSession)?;
        if status.role != SocketRole::Server {
            return Err(Error::invalid_role(status.id, status.role, "proxyHangup"));
        }
        if status.peer.map(|peer| peer.id) != Some(id) {
            return Err(Error::socket_not_found(id));
        }

        self.control()?
            .send(ControlEvent::ClosePeer(id))
            .await
            .map_err(|_| Error::NoSession)?;
        debug!(%id, "Proxy hangup requested");
        Ok(())
    }
}

// ============================================================================
// Proxy - Data
// ============================================================================

impl Proxy {
    /// Writes `data` to the peer or outbound connection.
    ///
    /// # Errors
    ///
    /// - [`Error::NoSession`] if no session is running
    /// - [`Error::NotConnected`] if a server has no peer
    /// - [`Error::Transport`] with the written count if the write stopped
    pub async fn send(&mut self, data: &[u8]) -> Result<usize> {
        self.write(data).await?.into_result("proxySend")
    }

    /// Writes `data` and returns the raw report.
    pub(crate) async fn write(&mut self, data: &[u8]) -> Result<WriteReport> {
        let (reply, response) = oneshot::channel();
        self.control()?
            .send(ControlEvent::Send {
                data: data.to_vec(),
                reply,
            })
            .await
            .map_err(|_| Error::NoSession)?;
        response.await?
    }
}

// ============================================================================
// Proxy - Queries & Allow-list
// ============================================================================

impl Proxy {
    /// Returns `true` while a worker is running.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.session
            .as_ref()
            .is_some_and(|session| !session.handle.is_finished())
    }

    /// Snapshot of the running session.
    #[must_use]
    pub fn status(&self) -> Option<ProxyStatus> {
        let mut status = self.session.as_ref()?.status.borrow().clone()?;
        status.data_mode = self.shared.data_mode.targets_proxy();
        Some(status)
    }

    /// Enables the peer allow-list. Applies to the next accepted peer.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] for an empty or oversized list.
    pub fn set_allowlist(&self, addrs: &[IpAddr]) -> Result<()> {
        self.shared.allowlist.write().set(addrs)
    }

    /// Disables the peer allow-list.
    pub fn clear_allowlist(&self) {
        self.shared.allowlist.write().clear();
    }

    /// Addresses on the allow-list; empty when disabled.
    #[must_use]
    pub fn allowlist(&self) -> Vec<IpAddr> {
        self.shared.allowlist.read().addrs().to_vec()
    }
}

// ============================================================================
// Proxy - Internal
// ============================================================================

impl Proxy {
    /// Forgets a session whose worker already ended.
    fn reap(&mut self) {
        if self
            .session
            .as_ref()
            .is_some_and(|session| session.handle.is_finished())
        {
            self.session = None;
            debug!("Finished proxy session reaped");
        }
    }

    fn ensure_idle(&mut self, data_mode: bool) -> Result<()> {
        self.reap();
        if self.session.is_some() {
            return Err(Error::SessionActive);
        }
        if data_mode && self.shared.data_mode.is_active() {
            return Err(Error::data_mode("already active"));
        }
        Ok(())
    }

    fn stage(&self, tag: Option<SecTag>) -> Result<Option<Staged>> {
        tag.map(|tag| Staged::new(Arc::clone(&self.credentials), tag))
            .transpose()
    }

    fn control(&mut self) -> Result<&mpsc::Sender<ControlEvent>> {
        self.reap();
        self.session
            .as_ref()
            .map(|session| &session.control)
            .ok_or(Error::NoSession)
    }
}

/// Opens a reusable listener with a backlog of one.
fn listen(family: AddressFamily, addr: SocketAddr) -> Result<TcpListener> {
    let op = |e| Error::transport("proxyServerStart", 0, e);
    let socket = family.tcp_socket().map_err(op)?;
    socket.set_reuseaddr(true).map_err(op)?;
    socket.bind(addr).map_err(op)?;
    socket.listen(1).map_err(op)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;
    use std::time::Duration;

    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;

    use crate::protocol::{DisconnectCause, ExitCause, Notification, Notifications, StopCause};
    use crate::transport::tls::tests::self_signed;
    use crate::transport::{Credentials, HostNetwork, MemoryCredentialStore};

    const WAIT: Duration = Duration::from_secs(2);
    const QUIET: Duration = Duration::from_millis(150);

    fn proxy_with(config: Config) -> (Proxy, Notifications, Arc<MemoryCredentialStore>) {
        let store = Arc::new(MemoryCredentialStore::new());
        store.insert(SecTag::new(1), self_signed());
        let (notifier, notifications) = Notifier::channel();
        let data_mode = DataMode::new(notifier.clone());
        let proxy = Proxy::new(
            config
                .with_connect_timeout_ms(2_000)
                .with_send_timeout_ms(2_000),
            Arc::new(HostNetwork::new()),
            store.clone(),
            notifier,
            data_mode,
        );
        (proxy, notifications, store)
    }

    fn proxy() -> (Proxy, Notifications, Arc<MemoryCredentialStore>) {
        proxy_with(Config::new())
    }

    async fn next(notifications: &mut Notifications) -> Notification {
        notifications
            .recv_timeout(WAIT)
            .await
            .expect("notification in time")
    }

    /// Credentials staged under `tag`, without keeping them staged.
    fn peek(store: &MemoryCredentialStore, tag: SecTag) -> Arc<Credentials> {
        let credentials = store.stage(tag).expect("stage");
        store.unstage(tag).expect("unstage");
        credentials
    }

    /// Loopback TLS server that echoes one read back to the client.
    async fn tls_echo_server(credentials: Arc<Credentials>) -> (u16, JoinHandle<()>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let port = listener.local_addr().expect("addr").port();
        let handle = tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.expect("accept");
            let config = tls::server_config(&credentials, PeerVerify::None).expect("config");
            let Ok(mut stream) = tls::handshake_server(tcp, config, WAIT).await else {
                return;
            };
            let mut buf = [0u8; 4];
            if stream.read_exact(&mut buf).await.is_ok() {
                let _ = stream.write_all(&buf).await;
                let _ = stream.flush().await;
            }
        });
        (port, handle)
    }

    async fn expect_closed(stream: &mut TcpStream) {
        let mut buf = [0u8; 8];
        let read = timeout(WAIT, stream.read(&mut buf)).await.expect("read in time");
        assert!(matches!(read, Ok(0) | Err(_)), "connection should be closed");
    }

    #[tokio::test]
    async fn test_server_reports_peer_then_data() {
        let (mut proxy, mut notifications, _) = proxy();
        let local = proxy.start_server(&ServerParams::new(0)).expect("start");

        let mut client = TcpStream::connect(local).await.expect("connect");
        let client_addr = client.local_addr().expect("addr");
        let Notification::PeerConnected { id, addr } = next(&mut notifications).await else {
            panic!("expected peerConnected");
        };
        assert_eq!(addr, client_addr);

        client.write_all(b"HELLO").await.expect("write");
        assert_eq!(
            next(&mut notifications).await,
            Notification::DataReceived { len: 5 }
        );
        assert_eq!(
            next(&mut notifications).await,
            Notification::Data {
                data: b"HELLO".to_vec()
            }
        );

        let status = proxy.status().expect("status");
        assert_eq!(status.role, SocketRole::Server);
        assert_eq!(status.peer.map(|p| p.id), Some(id));

        assert_eq!(proxy.send(b"WORLD").await.expect("send"), 5);
        let mut buf = [0u8; 5];
        client.read_exact(&mut buf).await.expect("read");
        assert_eq!(&buf, b"WORLD");

        assert!(proxy.stop().await);
    }

    #[tokio::test]
    async fn test_second_connection_closed_untracked() {
        let (mut proxy, mut notifications, _) = proxy();
        let local = proxy.start_server(&ServerParams::new(0)).expect("start");

        let _first = TcpStream::connect(local).await.expect("connect");
        assert!(matches!(
            next(&mut notifications).await,
            Notification::PeerConnected { .. }
        ));

        let mut second = TcpStream::connect(local).await.expect("connect");
        expect_closed(&mut second).await;
        assert_eq!(notifications.recv_timeout(QUIET).await, None);

        proxy.stop().await;
    }

    #[tokio::test]
    async fn test_second_start_rejected() {
        let (mut proxy, _notifications, _) = proxy();
        proxy.start_server(&ServerParams::new(0)).expect("start");
        let before = proxy.status().expect("status");

        let err = proxy.start_server(&ServerParams::new(0)).unwrap_err();
        assert!(matches!(err, Error::SessionActive));
        let err = proxy
            .start_client(&ClientParams::new("127.0.0.1", 9))
            .await
            .unwrap_err();
        assert!(err.is_capacity());
        assert_eq!(proxy.status(), Some(before));

        proxy.stop().await;
    }

    #[tokio::test]
    async fn test_stop_then_restart() {
        let (mut proxy, mut notifications, _) = proxy();
        proxy.start_server(&ServerParams::new(0)).expect("start");

        assert!(proxy.stop().await);
        assert_eq!(
            next(&mut notifications).await,
            Notification::ProxyStopped {
                role: SocketRole::Server,
                cause: StopCause::Requested
            }
        );
        assert!(!proxy.is_active());
        assert!(!proxy.stop().await);

        proxy.start_server(&ServerParams::new(0)).expect("restart");
        assert!(proxy.is_active());
        proxy.stop().await;
    }

    #[tokio::test]
    async fn test_stop_with_peer_reports_disconnect_first() {
        let (mut proxy, mut notifications, _) = proxy();
        let local = proxy.start_server(&ServerParams::new(0)).expect("start");
        let mut client = TcpStream::connect(local).await.expect("connect");
        let Notification::PeerConnected { id, .. } = next(&mut notifications).await else {
            panic!("expected peerConnected");
        };

        proxy.stop().await;
        assert_eq!(
            next(&mut notifications).await,
            Notification::PeerDisconnected {
                id,
                cause: DisconnectCause::Stopped
            }
        );
        assert!(matches!(
            next(&mut notifications).await,
            Notification::ProxyStopped { .. }
        ));
        expect_closed(&mut client).await;
    }

    #[tokio::test]
    async fn test_hangup_keeps_listener() {
        let (mut proxy, mut notifications, _) = proxy();
        let local = proxy.start_server(&ServerParams::new(0)).expect("start");

        let mut first = TcpStream::connect(local).await.expect("connect");
        let Notification::PeerConnected { id, .. } = next(&mut notifications).await else {
            panic!("expected peerConnected");
        };

        let err = proxy.hangup(SocketId::next()).await.unwrap_err();
        assert!(matches!(err, Error::SocketNotFound { .. }));

        proxy.hangup(id).await.expect("hangup");
        assert_eq!(
            next(&mut notifications).await,
            Notification::PeerDisconnected {
                id,
                cause: DisconnectCause::HungUp
            }
        );
        expect_closed(&mut first).await;

        let _second = TcpStream::connect(local).await.expect("connect");
        assert!(matches!(
            next(&mut notifications).await,
            Notification::PeerConnected { .. }
        ));
        proxy.stop().await;
    }

    #[tokio::test]
    async fn test_peer_close_keeps_server_running() {
        let (mut proxy, mut notifications, _) = proxy();
        let local = proxy.start_server(&ServerParams::new(0)).expect("start");

        let client = TcpStream::connect(local).await.expect("connect");
        let Notification::PeerConnected { id, .. } = next(&mut notifications).await else {
            panic!("expected peerConnected");
        };
        drop(client);

        assert_eq!(
            next(&mut notifications).await,
            Notification::PeerDisconnected {
                id,
                cause: DisconnectCause::PeerClosed
            }
        );
        assert!(proxy.is_active());
        assert_eq!(proxy.status().and_then(|s| s.peer), None);
        proxy.stop().await;
    }

    #[tokio::test]
    async fn test_allowlist_rejects_unlisted_peer() {
        let (mut proxy, mut notifications, _) = proxy();
        proxy
            .set_allowlist(&[IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2))])
            .expect("allow-list");
        let local = proxy.start_server(&ServerParams::new(0)).expect("start");

        let mut rejected = TcpStream::connect(local).await.expect("connect");
        expect_closed(&mut rejected).await;
        assert_eq!(notifications.recv_timeout(QUIET).await, None);

        proxy.clear_allowlist();
        assert!(proxy.allowlist().is_empty());
        let _accepted = TcpStream::connect(local).await.expect("connect");
        assert!(matches!(
            next(&mut notifications).await,
            Notification::PeerConnected { .. }
        ));
        proxy.stop().await;
    }

    #[tokio::test]
    async fn test_idle_peer_disconnected() {
        let (mut proxy, mut notifications, _) =
            proxy_with(Config::new().with_proxy_idle_timeout_ms(100));
        let local = proxy.start_server(&ServerParams::new(0)).expect("start");

        let _client = TcpStream::connect(local).await.expect("connect");
        let Notification::PeerConnected { id, .. } = next(&mut notifications).await else {
            panic!("expected peerConnected");
        };
        assert_eq!(
            next(&mut notifications).await,
            Notification::PeerDisconnected {
                id,
                cause: DisconnectCause::IdleTimeout
            }
        );
        assert!(proxy.is_active());
        proxy.stop().await;
    }

    #[tokio::test]
    async fn test_client_session_lifecycle() {
        let (mut proxy, mut notifications, _) = proxy();
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let port = listener.local_addr().expect("addr").port();

        let remote = proxy
            .start_client(&ClientParams::new("127.0.0.1", port))
            .await
            .expect("start");
        assert_eq!(remote.port(), port);
        let (mut server, _) = listener.accept().await.expect("accept");

        server.write_all(b"PING").await.expect("write");
        assert_eq!(
            next(&mut notifications).await,
            Notification::DataReceived { len: 4 }
        );
        assert_eq!(
            next(&mut notifications).await,
            Notification::Data {
                data: b"PING".to_vec()
            }
        );

        assert_eq!(proxy.send(b"PONG").await.expect("send"), 4);
        let mut buf = [0u8; 4];
        server.read_exact(&mut buf).await.expect("read");
        assert_eq!(&buf, b"PONG");

        let status = proxy.status().expect("status");
        assert_eq!(status.role, SocketRole::Client);
        assert_eq!(status.remote, Some(remote));

        drop(server);
        assert!(matches!(
            next(&mut notifications).await,
            Notification::PeerDisconnected {
                cause: DisconnectCause::PeerClosed,
                ..
            }
        ));
        assert_eq!(
            next(&mut notifications).await,
            Notification::ProxyStopped {
                role: SocketRole::Client,
                cause: StopCause::ConnectionLost
            }
        );
        assert_eq!(proxy.status(), None);

        // The ended session no longer blocks a new start.
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let port = listener.local_addr().expect("addr").port();
        proxy
            .start_client(&ClientParams::new("127.0.0.1", port))
            .await
            .expect("restart");
        proxy.stop().await;
    }

    #[tokio::test]
    async fn test_client_connect_failure_unstages() {
        let (mut proxy, _notifications, store) = proxy();
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let port = listener.local_addr().expect("addr").port();
        drop(listener);

        let tag = SecTag::new(1);
        let err = proxy
            .start_client(&ClientParams::new("127.0.0.1", port).secured(tag, None))
            .await
            .unwrap_err();
        assert!(err.is_transport() || err.is_timeout());
        assert_eq!(store.staged_count(tag), 0);
        assert!(!proxy.is_active());
    }

    #[tokio::test]
    async fn test_secure_server_session() {
        let (mut proxy, mut notifications, store) = proxy();
        let tag = SecTag::new(1);
        let local = proxy
            .start_server(&ServerParams::new(0).secured(tag, None))
            .expect("start");
        assert_eq!(store.staged_count(tag), 1);
        assert!(proxy.status().expect("status").secure);

        let settings = TlsSettings {
            peer_verify: PeerVerify::Required,
            hostname: Some("localhost".to_string()),
            session_cache: false,
        };
        let tcp = TcpStream::connect(local).await.expect("connect");
        let roots = store.stage(tag).expect("stage");
        store.unstage(tag).expect("unstage");
        let mut client = tls::handshake_client(tcp, &roots, &settings, WAIT)
            .await
            .expect("handshake");
        assert!(matches!(
            next(&mut notifications).await,
            Notification::PeerConnected { .. }
        ));

        client.write_all(b"HELLO").await.expect("write");
        client.flush().await.expect("flush");
        assert_eq!(
            next(&mut notifications).await,
            Notification::DataReceived { len: 5 }
        );

        proxy.stop().await;
        assert_eq!(store.staged_count(tag), 0);
    }

    #[tokio::test]
    async fn test_queries_without_session() {
        let (mut proxy, _notifications, _) = proxy();
        assert_eq!(proxy.status(), None);
        assert!(matches!(
            proxy.hangup(SocketId::next()).await,
            Err(Error::NoSession)
        ));
        assert!(matches!(proxy.send(b"x").await, Err(Error::NoSession)));
    }

    #[tokio::test]
    async fn test_send_without_peer() {
        let (mut proxy, _notifications, _) = proxy();
        proxy.start_server(&ServerParams::new(0)).expect("start");
        assert!(matches!(
            proxy.send(b"x").await,
            Err(Error::NotConnected)
        ));
        proxy.stop().await;
    }

    #[tokio::test]
    async fn test_stop_timeout_aborts_worker() {
        let (mut proxy, mut notifications, store) =
            proxy_with(Config::new().with_proxy_stop_timeout_ms(50));
        let tag = SecTag::new(1);
        let local = proxy
            .start_server(&ServerParams::new(0).secured(tag, None))
            .expect("start");

        // A client that never handshakes keeps the worker busy.
        let _stalled = TcpStream::connect(local).await.expect("connect");
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert!(proxy.stop().await);
        assert_eq!(
            next(&mut notifications).await,
            Notification::ProxyStopped {
                role: SocketRole::Server,
                cause: StopCause::Aborted
            }
        );
        assert_eq!(notifications.recv_timeout(QUIET).await, None);
        assert_eq!(store.staged_count(tag), 0);
        assert!(!proxy.is_active());
        assert!(TcpStream::connect(local).await.is_err());
    }

    #[tokio::test]
    async fn test_stalled_handshake_is_bounded() {
        let (mut proxy, mut notifications, _) =
            proxy_with(Config::new().with_proxy_handshake_timeout_ms(100));
        let local = proxy
            .start_server(&ServerParams::new(0).secured(SecTag::new(1), None))
            .expect("start");

        let mut stalled = TcpStream::connect(local).await.expect("connect");
        expect_closed(&mut stalled).await;
        assert_eq!(notifications.recv_timeout(QUIET).await, None);

        // The worker is back in its loop and exits on request.
        assert!(proxy.stop().await);
        assert_eq!(
            next(&mut notifications).await,
            Notification::ProxyStopped {
                role: SocketRole::Server,
                cause: StopCause::Requested
            }
        );
    }

    #[tokio::test]
    async fn test_data_mode_delivers_without_count() {
        let (mut proxy, mut notifications, _) = proxy();
        let local = proxy.start_server(&ServerParams::new(0)).expect("start");
        let mut client = TcpStream::connect(local).await.expect("connect");
        assert!(matches!(
            next(&mut notifications).await,
            Notification::PeerConnected { .. }
        ));

        proxy
            .shared
            .data_mode
            .enter(DataModeTarget::Proxy)
            .expect("enter");
        client.write_all(b"RAW").await.expect("write");
        assert_eq!(
            next(&mut notifications).await,
            Notification::Data {
                data: b"RAW".to_vec()
            }
        );
        assert_eq!(notifications.recv_timeout(QUIET).await, None);

        assert!(proxy.shared.data_mode.exit(ExitCause::Requested));
        proxy.stop().await;
    }

    #[tokio::test]
    async fn test_server_enters_data_mode_on_accept() {
        let (mut proxy, mut notifications, _) = proxy();
        let local = proxy
            .start_server(&ServerParams::new(0).with_data_mode())
            .expect("start");
        assert!(!proxy.shared.data_mode.is_active());

        let client = TcpStream::connect(local).await.expect("connect");
        assert!(matches!(
            next(&mut notifications).await,
            Notification::PeerConnected { .. }
        ));
        assert!(proxy.shared.data_mode.targets_proxy());
        assert!(proxy.status().expect("status").data_mode);

        drop(client);
        assert_eq!(
            next(&mut notifications).await,
            Notification::DataModeExited {
                cause: ExitCause::ConnectionLost
            }
        );
        assert_eq!(notifications.recv_timeout(QUIET).await, None);
        assert!(!proxy.shared.data_mode.is_active());
        assert!(proxy.is_active());
        proxy.stop().await;
    }

    #[tokio::test]
    async fn test_client_enters_data_mode_once_connected() {
        let (mut proxy, mut notifications, _) = proxy();
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let port = listener.local_addr().expect("addr").port();

        proxy
            .start_client(&ClientParams::new("127.0.0.1", port).with_data_mode())
            .await
            .expect("start");
        assert!(proxy.shared.data_mode.targets_proxy());
        let (server, _) = listener.accept().await.expect("accept");

        drop(server);
        assert_eq!(
            next(&mut notifications).await,
            Notification::DataModeExited {
                cause: ExitCause::ConnectionLost
            }
        );
        assert_eq!(
            next(&mut notifications).await,
            Notification::ProxyStopped {
                role: SocketRole::Client,
                cause: StopCause::ConnectionLost
            }
        );
        assert_eq!(notifications.recv_timeout(QUIET).await, None);
        assert!(!proxy.shared.data_mode.is_active());
    }

    #[tokio::test]
    async fn test_secure_client_session() {
        let (mut proxy, mut notifications, store) = proxy();
        let tag = SecTag::new(1);
        let (port, server) = tls_echo_server(peek(&store, tag)).await;

        proxy
            .start_client(&ClientParams::new("localhost", port).secured(tag, None))
            .await
            .expect("start");
        assert!(proxy.status().expect("status").secure);
        assert_eq!(store.staged_count(tag), 1);

        assert_eq!(proxy.send(b"PING").await.expect("send"), 4);
        assert_eq!(
            next(&mut notifications).await,
            Notification::DataReceived { len: 4 }
        );
        assert_eq!(
            next(&mut notifications).await,
            Notification::Data {
                data: b"PING".to_vec()
            }
        );

        proxy.stop().await;
        assert_eq!(store.staged_count(tag), 0);
        server.await.expect("server task");
    }

    #[tokio::test]
    async fn test_secure_client_checks_hostname() {
        let (mut proxy, _notifications, store) = proxy();
        let tag = SecTag::new(1);
        let (port, _server) = tls_echo_server(peek(&store, tag)).await;

        // The certificate names `localhost`, not the address.
        let err = proxy
            .start_client(
                &ClientParams::new("127.0.0.1", port).secured(tag, Some(PeerVerify::Required)),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Tls { .. }));
        assert_eq!(store.staged_count(tag), 0);
        assert!(!proxy.is_active());
    }
}
