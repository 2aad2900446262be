//! Readiness polling across table sockets.
//!
//! Polling waits until at least one socket is readable (or the timeout
//! elapses), then sweeps the rest without waiting. A listener that turns
//! readable has its pending connection accepted and parked on the entry,
//! where the next [`Sockets::accept`] claims it.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::net::SocketAddr;
use std::ops::{BitOr, BitOrAssign};
use std::time::Duration;

use futures_util::FutureExt;
use futures_util::future::{BoxFuture, select_all};
use serde::Serialize;
use tokio::io::Interest;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tracing::{debug, trace};

use crate::identifiers::SocketId;

use super::core::Sockets;
use super::entry::{Endpoint, SocketEntry};

// ============================================================================
// PollFlags
// ============================================================================

/// Event bitmask reported per socket.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct PollFlags(u16);

impl PollFlags {
    /// No events.
    pub const EMPTY: Self = Self(0);
    /// Data (or a connection) is ready.
    pub const IN: Self = Self(0x01);
    /// Error on the socket.
    pub const ERR: Self = Self(0x08);
    /// Peer hung up.
    pub const HUP: Self = Self(0x10);
    /// Identity is not live.
    pub const NVAL: Self = Self(0x20);

    /// Raw bits.
    #[inline]
    #[must_use]
    pub const fn bits(&self) -> u16 {
        self.0
    }

    /// Returns `true` if every bit of `other` is set.
    #[inline]
    #[must_use]
    pub const fn contains(&self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Returns `true` if no bit is set.
    #[inline]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.0 == 0
    }
}

impl BitOr for PollFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for PollFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl fmt::Display for PollFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#04x}", self.0)
    }
}

/// Events of one polled socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PollEvent {
    /// Polled identity.
    pub id: SocketId,
    /// Reported events.
    pub events: PollFlags,
}

// ============================================================================
// Readiness
// ============================================================================

/// What a readiness probe observed.
enum Readiness {
    Readable,
    HungUp,
    Failed,
    Accepted(TcpStream, SocketAddr),
}

type Probe<'a> = BoxFuture<'a, (SocketId, Readiness)>;

/// Builds the readiness probes for one entry.
///
/// A listener with a tracked peer gets one probe for each; both report
/// under the listener's identity. TLS streams are probed at the TCP level.
fn entry_probes(entry: &SocketEntry) -> Vec<Probe<'_>> {
    let id = entry.id;
    match &entry.endpoint {
        Endpoint::Connected { stream, .. } => vec![stream_probe(id, stream.tcp())],
        Endpoint::Listening {
            listener,
            peer,
            queued,
        } => {
            let pending: Probe<'_> = match queued {
                Some(_) => async move { (id, Readiness::Readable) }.boxed(),
                None => accept_probe(id, listener),
            };
            let mut out = vec![pending];
            if let Some(peer) = peer {
                out.push(stream_probe(id, peer.stream.tcp()));
            }
            out
        }
        Endpoint::Datagram {
            socket: Some(udp), ..
        } => vec![
            async move {
                match udp.ready(Interest::READABLE).await {
                    Ok(_) => (id, Readiness::Readable),
                    Err(_) => (id, Readiness::Failed),
                }
            }
            .boxed(),
        ],
        _ => Vec::new(),
    }
}

fn accept_probe(id: SocketId, listener: &TcpListener) -> Probe<'_> {
    async move {
        match listener.accept().await {
            Ok((tcp, addr)) => (id, Readiness::Accepted(tcp, addr)),
            Err(_) => (id, Readiness::Failed),
        }
    }
    .boxed()
}

fn stream_probe(id: SocketId, tcp: &TcpStream) -> Probe<'_> {
    async move {
        match tcp.ready(Interest::READABLE).await {
            Ok(ready) if ready.is_read_closed() => (id, Readiness::HungUp),
            Ok(_) => (id, Readiness::Readable),
            Err(_) => (id, Readiness::Failed),
        }
    }
    .boxed()
}

/// Waits for the first probe, then sweeps the others without waiting.
async fn gather(probes: Vec<Probe<'_>>, wait: Option<Duration>) -> Vec<(SocketId, Readiness)> {
    if probes.is_empty() {
        return Vec::new();
    }

    let first = match wait {
        Some(limit) => match timeout(limit, select_all(probes)).await {
            Ok(first) => first,
            Err(_) => return Vec::new(),
        },
        None => select_all(probes).await,
    };

    let (ready, _, rest) = first;
    let mut out = vec![ready];
    out.extend(rest.into_iter().filter_map(FutureExt::now_or_never));
    out
}

// ============================================================================
// Sockets - Poll
// ============================================================================

impl Sockets {
    /// Polls sockets for readability.
    ///
    /// Polls `ids` (or every live socket when `None`) for up to `wait`
    /// (forever when `None`). Every requested identity gets one event
    /// entry; unknown identities report [`PollFlags::NVAL`] and socket
    /// errors report [`PollFlags::ERR`] rather than failing the call.
    pub async fn poll(
        &mut self,
        wait: Option<Duration>,
        ids: Option<&[SocketId]>,
    ) -> Vec<PollEvent> {
        let mut targets: Vec<SocketId> = Vec::new();
        for id in ids.map_or_else(|| self.table.ids(), <[SocketId]>::to_vec) {
            if !targets.contains(&id) {
                targets.push(id);
            }
        }

        let mut events: Vec<PollEvent> = targets
            .iter()
            .map(|&id| PollEvent {
                id,
                events: if self.table.is_live(id) {
                    PollFlags::EMPTY
                } else {
                    PollFlags::NVAL
                },
            })
            .collect();

        let observed = {
            let probes: Vec<Probe<'_>> = targets
                .iter()
                .filter_map(|&id| self.table.get(id))
                .flat_map(entry_probes)
                .collect();
            gather(probes, wait).await
        };

        for (id, readiness) in observed {
            let flags = match readiness {
                Readiness::Readable => PollFlags::IN,
                Readiness::HungUp => PollFlags::IN | PollFlags::HUP,
                Readiness::Failed => PollFlags::ERR,
                Readiness::Accepted(tcp, addr) => {
                    if let Some(entry) = self.table.get_mut(id)
                        && let Endpoint::Listening { queued, .. } = &mut entry.endpoint
                    {
                        debug!(%id, %addr, "Connection parked for accept");
                        *queued = Some((tcp, addr));
                    }
                    PollFlags::IN
                }
            };
            if let Some(event) = events.iter_mut().find(|event| event.id == id) {
                event.events |= flags;
            }
        }

        trace!(count = events.len(), "Poll complete");
        events
    }
}

// ============================================================================
// Tests
// ============================================================================
