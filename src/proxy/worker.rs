//! Proxy worker loop.
//!
//! The worker is a spawned task that owns every resource of a running
//! session: the listener (server), the tracked peer or outbound
//! connection, the staged credentials and the receiving end of the
//! control channel. Nothing else touches them while it runs.
//!
//! # Event Loop
//!
//! Each iteration waits on, in priority order:
//!
//! 1. Listener accept (server)
//! 2. Peer or outbound read
//! 3. Control events
//! 4. Liveness tick (also drives the peer idle timeout)
//!
//! Teardown lives in `Drop`, so it runs the same way whether the loop
//! returns or the task is aborted.

// ============================================================================
// Imports
// ============================================================================

use std::future::pending;
use std::io::{self, ErrorKind};
use std::net::SocketAddr;
use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use rustls::ServerConfig;
use tokio::io::AsyncReadExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep};
use tracing::{debug, error, info, trace, warn};

use crate::config::Config;
use crate::datamode::{DataMode, DataModeTarget};
use crate::error::{Error, Result};
use crate::identifiers::SocketId;
use crate::protocol::{DisconnectCause, ExitCause, Notification, Notifier, StopCause};
use crate::socket::{PeerInfo, SocketRole};
use crate::transport::{NetStream, Staged, WriteReport, tls, write_bounded};

use super::control::{CONTROL_DEPTH, ControlEvent, ProxyStatus};
use super::filter::AllowList;

// ============================================================================
// Types
// ============================================================================

/// Control sender and status receiver handed back to the session.
pub(super) type WorkerHandles = (
    mpsc::Sender<ControlEvent>,
    watch::Receiver<Option<ProxyStatus>>,
);

/// State shared between the session owner and its worker.
#[derive(Debug, Clone)]
pub(super) struct Shared {
    pub notifier: Notifier,
    pub data_mode: DataMode,
    pub allowlist: Arc<RwLock<AllowList>>,
}

/// Timing and buffering of one worker.
#[derive(Debug, Clone, Copy)]
pub(super) struct WorkerSettings {
    pub send_timeout: Duration,
    pub handshake_timeout: Duration,
    pub poll_interval: Duration,
    pub idle_timeout: Option<Duration>,
    pub buffer_size: usize,
    /// Enter data mode when a peer is accepted (server).
    pub data_mode_on_accept: bool,
}

impl WorkerSettings {
    pub(super) fn from_config(config: &Config) -> Self {
        Self {
            send_timeout: config.send_timeout(),
            handshake_timeout: config.proxy_handshake_timeout(),
            poll_interval: config.proxy_poll_interval(),
            idle_timeout: config.proxy_idle_timeout(),
            buffer_size: config.recv_buffer_size,
            data_mode_on_accept: false,
        }
    }
}

/// The connection the worker reads from: server peer or client outbound.
struct Link {
    id: SocketId,
    addr: SocketAddr,
    stream: NetStream,
    last_active: Instant,
}

impl Link {
    fn new(id: SocketId, addr: SocketAddr, stream: NetStream) -> Self {
        Self {
            id,
            addr,
            stream,
            last_active: Instant::now(),
        }
    }
}

// ============================================================================
// Worker
// ============================================================================

/// Owner of a running proxy session.
pub(super) struct Worker {
    role: SocketRole,
    id: SocketId,
    local: SocketAddr,
    secure: bool,
    listener: Option<TcpListener>,
    tls: Option<Arc<ServerConfig>>,
    link: Option<Link>,
    staged: Option<Staged>,
    control: mpsc::Receiver<ControlEvent>,
    status: watch::Sender<Option<ProxyStatus>>,
    shared: Shared,
    settings: WorkerSettings,
    cause: StopCause,
}

impl Worker {
    /// Creates a worker with its control channel and status watch.
    ///
    /// Nothing fallible may follow this: dropping a worker reports the
    /// session as stopped.
    pub(super) fn new(
        role: SocketRole,
        id: SocketId,
        local: SocketAddr,
        staged: Option<Staged>,
        shared: Shared,
        settings: WorkerSettings,
    ) -> (Self, WorkerHandles) {
        let (control_tx, control_rx) = mpsc::channel(CONTROL_DEPTH);
        let (status_tx, status_rx) = watch::channel(None);

        let worker = Self {
            role,
            id,
            local,
            secure: staged.is_some(),
            listener: None,
            tls: None,
            link: None,
            staged,
            control: control_rx,
            status: status_tx,
            shared,
            settings,
            cause: StopCause::Aborted,
        };

        (worker, (control_tx, status_rx))
    }

    /// Attaches the listening socket of a server session.
    pub(super) fn with_listener(
        mut self,
        listener: TcpListener,
        tls: Option<Arc<ServerConfig>>,
    ) -> Self {
        self.listener = Some(listener);
        self.tls = tls;
        self
    }

    /// Attaches the outbound connection of a client session.
    pub(super) fn with_outbound(mut self, remote: SocketAddr, stream: NetStream) -> Self {
        self.link = Some(Link::new(self.id, remote, stream));
        self
    }

    /// Publishes the first status snapshot and starts the loop.
    pub(super) fn spawn(self) -> JoinHandle<()> {
        self.publish();
        tokio::spawn(self.run())
    }
}

// ============================================================================
// Worker - Event Loop
// ============================================================================

impl Worker {
    async fn run(mut self) {
        info!(
            role = %self.role,
            id = %self.id,
            local = %self.local,
            secure = self.secure,
            "Proxy worker started"
        );
        let mut buf = vec![0u8; self.settings.buffer_size];

        loop {
            let tick = self.next_tick();

            let flow = tokio::select! {
                biased;

                accepted = accept_from(self.listener.as_ref()) => {
                    self.on_accept(accepted).await
                }

                read = read_from(self.link.as_mut(), &mut buf) => {
                    self.on_read(read, &buf)
                }

                event = self.control.recv() => {
                    self.on_control(event).await
                }

                () = sleep(tick) => self.on_tick(),
            };

            if flow.is_break() {
                break;
            }
        }

        debug!(id = %self.id, cause = %self.cause, "Proxy worker loop exited");
    }

    async fn on_accept(
        &mut self,
        accepted: io::Result<(TcpStream, SocketAddr)>,
    ) -> ControlFlow<()> {
        let (tcp, addr) = match accepted {
            Ok(pair) => pair,
            Err(e) if is_transient_accept(&e) => {
                debug!(error = %e, "Transient accept failure");
                return ControlFlow::Continue(());
            }
            Err(e) => {
                error!(id = %self.id, error = %e, "Proxy listener failed");
                self.cause = StopCause::ListenerFailed;
                return ControlFlow::Break(());
            }
        };

        if let Some(link) = &self.link {
            debug!(tracked = %link.id, %addr, "Peer already tracked, closing new connection");
            return ControlFlow::Continue(());
        }

        if !self.shared.allowlist.read().permits(addr.ip()) {
            warn!(%addr, "Peer not on allow-list, closing");
            return ControlFlow::Continue(());
        }

        let stream = match &self.tls {
            Some(config) => {
                match tls::handshake_server(
                    tcp,
                    Arc::clone(config),
                    self.settings.handshake_timeout,
                )
                .await
                {
                    Ok(stream) => stream,
                    Err(e) => {
                        warn!(%addr, error = %e, "Proxy peer handshake failed");
                        return ControlFlow::Continue(());
                    }
                }
            }
            None => NetStream::Plain(tcp),
        };

        let id = SocketId::next();
        self.link = Some(Link::new(id, addr, stream));
        self.publish();
        info!(%id, %addr, "Proxy peer connected");
        self.shared
            .notifier
            .emit(Notification::PeerConnected { id, addr });

        if self.settings.data_mode_on_accept
            && let Err(e) = self.shared.data_mode.enter(DataModeTarget::Proxy)
        {
            warn!(%id, error = %e, "Could not enter data mode for peer");
        }
        ControlFlow::Continue(())
    }

    fn on_read(&mut self, read: io::Result<usize>, buf: &[u8]) -> ControlFlow<()> {
        match read {
            Ok(0) => self.lose_link(DisconnectCause::PeerClosed),
            Ok(n) => {
                if let Some(link) = &mut self.link {
                    link.last_active = Instant::now();
                    trace!(id = %link.id, len = n, "Proxy data received");
                }
                self.deliver(&buf[..n]);
                ControlFlow::Continue(())
            }
            Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::Interrupted) => {
                ControlFlow::Continue(())
            }
            Err(e) => {
                warn!(error = %e, "Proxy read failed");
                self.lose_link(DisconnectCause::Error)
            }
        }
    }

    async fn on_control(&mut self, event: Option<ControlEvent>) -> ControlFlow<()> {
        let Some(first) = event else {
            debug!("Control channel closed");
            self.cause = StopCause::Requested;
            return ControlFlow::Break(());
        };

        let mut events = vec![first];
        while let Ok(event) = self.control.try_recv() {
            events.push(event);
        }

        let mut stop = false;
        for event in events {
            match event {
                ControlEvent::CloseSession => stop = true,
                ControlEvent::ClosePeer(id) => {
                    if self.link.as_ref().is_some_and(|link| link.id == id) {
                        self.close_link(DisconnectCause::HungUp);
                    } else {
                        debug!(%id, "Hangup for untracked peer ignored");
                    }
                }
                ControlEvent::Send { data, reply } => {
                    let result = self.write(&data).await;
                    let _ = reply.send(result);
                }
            }
        }

        if stop {
            debug!(id = %self.id, "Close session requested");
            self.cause = StopCause::Requested;
            return ControlFlow::Break(());
        }
        ControlFlow::Continue(())
    }

    fn on_tick(&mut self) -> ControlFlow<()> {
        let idle = self.idle_remaining();
        if idle == Some(Duration::ZERO) {
            info!(id = ?self.link.as_ref().map(|l| l.id), "Proxy peer idle, closing");
            self.close_link(DisconnectCause::IdleTimeout);
        } else {
            trace!(id = %self.id, "Proxy liveness tick");
        }
        ControlFlow::Continue(())
    }
}

// ============================================================================
// Worker - Helpers
// ============================================================================

impl Worker {
    /// Time until the next tick: the poll interval, shortened to the
    /// remaining peer idle time when an idle timeout applies.
    fn next_tick(&self) -> Duration {
        let poll = self.settings.poll_interval;
        self.idle_remaining().map_or(poll, |left| left.min(poll))
    }

    fn idle_remaining(&self) -> Option<Duration> {
        if self.role != SocketRole::Server {
            return None;
        }
        let idle = self.settings.idle_timeout?;
        let link = self.link.as_ref()?;
        Some(idle.saturating_sub(link.last_active.elapsed()))
    }

    /// Forwards received bytes to the host.
    fn deliver(&self, data: &[u8]) {
        if !self.shared.data_mode.targets_proxy() {
            self.shared
                .notifier
                .emit(Notification::DataReceived { len: data.len() });
        }
        self.shared.notifier.emit(Notification::Data {
            data: data.to_vec(),
        });
    }

    async fn write(&mut self, data: &[u8]) -> Result<WriteReport> {
        let link = self.link.as_mut().ok_or(Error::NotConnected)?;
        let report = write_bounded(&mut link.stream, data, self.settings.send_timeout).await;
        link.last_active = Instant::now();
        trace!(id = %link.id, written = report.written, "Proxy data sent");
        Ok(report)
    }

    /// Closes the link after a read-side loss. Ends the loop for clients.
    fn lose_link(&mut self, cause: DisconnectCause) -> ControlFlow<()> {
        self.close_link(cause);
        match self.role {
            SocketRole::Server => ControlFlow::Continue(()),
            SocketRole::Client => {
                self.cause = StopCause::ConnectionLost;
                ControlFlow::Break(())
            }
        }
    }

    /// Drops the link and reports it, through data mode when active.
    fn close_link(&mut self, cause: DisconnectCause) {
        let Some(link) = self.link.take() else {
            return;
        };
        let (id, addr) = (link.id, link.addr);
        drop(link);
        self.publish();

        info!(%id, %addr, %cause, "Proxy peer disconnected");
        if !self.shared.data_mode.exit_proxy(ExitCause::ConnectionLost) {
            self.shared
                .notifier
                .emit(Notification::PeerDisconnected { id, cause });
        }
    }

    fn publish(&self) {
        let link = self.link.as_ref();
        let (remote, peer) = match self.role {
            SocketRole::Client => (link.map(|l| l.addr), None),
            SocketRole::Server => (
                None,
                link.map(|l| PeerInfo {
                    id: l.id,
                    addr: l.addr,
                }),
            ),
        };

        self.status.send_replace(Some(ProxyStatus {
            role: self.role,
            id: self.id,
            local: self.local,
            remote,
            peer,
            secure: self.secure,
            data_mode: false,
        }));
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        self.close_link(DisconnectCause::Stopped);
        if self.listener.take().is_some() {
            debug!(id = %self.id, "Proxy listener closed");
        }
        self.status.send_replace(None);

        info!(role = %self.role, id = %self.id, cause = %self.cause, "Proxy session stopped");
        self.shared.notifier.emit(Notification::ProxyStopped {
            role: self.role,
            cause: self.cause,
        });

        self.staged.take();
    }
}

// ============================================================================
// Sources
// ============================================================================

/// Accepts from `listener`, or never completes without one.
async fn accept_from(listener: Option<&TcpListener>) -> io::Result<(TcpStream, SocketAddr)> {
    match listener {
        Some(listener) => listener.accept().await,
        None => pending().await,
    }
}

/// Reads once from `link`, or never completes without one.
async fn read_from(link: Option<&mut Link>, buf: &mut [u8]) -> io::Result<usize> {
    match link {
        Some(link) => link.stream.read(buf).await,
        None => pending().await,
    }
}

/// Accept errors that concern one connection rather than the listener.
fn is_transient_accept(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        ErrorKind::ConnectionAborted
            | ErrorKind::ConnectionReset
            | ErrorKind::Interrupted
            | ErrorKind::WouldBlock
    )
}
