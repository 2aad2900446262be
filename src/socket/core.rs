//! Core `Sockets` struct: open, close and selection.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;

use tracing::{debug, info};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::identifiers::SocketId;
use crate::transport::{CredentialStore, Network, Staged, TlsSettings};

use super::entry::{
    Endpoint, EntryOptions, OpenParams, Security, SocketEntry, SocketInfo, SocketType,
};
use super::table::SocketTable;

// ============================================================================
// Sockets
// ============================================================================

/// The socket table and every operation on its entries.
///
/// Single-target operations act on the current entry. Only the command
/// context owns this value; the proxy worker never touches it.
pub struct Sockets {
    pub(super) table: SocketTable<SocketEntry>,
    pub(super) network: Arc<dyn Network>,
    pub(super) credentials: Arc<dyn CredentialStore>,
    pub(super) config: Config,
    /// Shared receive buffer.
    pub(super) buffer: Vec<u8>,
}

impl fmt::Debug for Sockets {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Sockets")
            .field("live", &self.table.len())
            .field("capacity", &self.table.capacity())
            .field("current", &self.table.current())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Sockets - Constructor
// ============================================================================

impl Sockets {
    /// Creates an empty table sized by `config`.
    #[must_use]
    pub fn new(
        config: Config,
        network: Arc<dyn Network>,
        credentials: Arc<dyn CredentialStore>,
    ) -> Self {
        Self {
            table: SocketTable::new(config.socket_capacity),
            buffer: vec![0; config.recv_buffer_size],
            network,
            credentials,
            config,
        }
    }
}

// ============================================================================
// Sockets - Lifecycle
// ============================================================================

impl Sockets {
    /// Opens a socket and makes it current.
    ///
    /// Secured sockets stage their credentials before the socket exists;
    /// any later failure unstages them again.
    ///
    /// # Errors
    ///
    /// - [`Error::NotSupported`] for raw or secured datagram sockets
    /// - [`Error::TableFull`] if no slot is free
    /// - [`Error::Credential`] if the security tag cannot be staged
    /// - [`Error::Transport`] if the socket cannot be created
    pub fn open(&mut self, params: OpenParams) -> Result<SocketId> {
        match (params.kind, params.security) {
            (SocketType::Raw, _) => return Err(Error::not_supported("raw sockets")),
            (SocketType::Datagram, Some(_)) => {
                return Err(Error::not_supported("secured datagram sockets"));
            }
            _ => {}
        }

        let slot = self.table.allocate()?;
        let id = SocketId::next();

        let security = params
            .security
            .map(|sec| -> Result<Security> {
                let staged = Staged::new(Arc::clone(&self.credentials), sec.tag)?;
                let peer_verify = sec
                    .peer_verify
                    .unwrap_or_else(|| params.role.default_peer_verify());
                Ok(Security {
                    staged,
                    tls: TlsSettings::new(peer_verify),
                })
            })
            .transpose()?;

        let endpoint = match params.kind {
            SocketType::Stream => Endpoint::Unconnected {
                socket: Some(
                    params
                        .family
                        .tcp_socket()
                        .map_err(|e| Error::transport("open", 0, e))?,
                ),
                bound: None,
            },
            _ => Endpoint::Datagram {
                socket: None,
                connected: None,
            },
        };

        let entry = SocketEntry {
            id,
            kind: params.kind,
            role: params.role,
            family: params.family,
            bearer: params.bearer,
            endpoint,
            security,
            options: EntryOptions::default(),
        };
        let rank = self.table.fill(slot, id, entry);

        info!(
            %id,
            kind = %params.kind,
            role = %params.role,
            family = %params.family,
            secure = params.security.is_some(),
            rank,
            "Socket opened"
        );
        Ok(id)
    }

    /// Closes `id`, releasing its peer and security binding.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SocketNotFound`] if `id` is not live.
    pub fn close(&mut self, id: SocketId) -> Result<()> {
        let entry = self
            .table
            .remove(id)
            .ok_or_else(|| Error::socket_not_found(id))?;
        entry.close();
        info!(%id, current = ?self.table.current(), "Socket closed");
        Ok(())
    }

    /// Closes the current socket.
    ///
    /// Returns the closed identity; `None` when there was no current
    /// socket, which is not an error.
    ///
    /// # Errors
    ///
    /// Propagates [`close`](Self::close) errors.
    pub fn close_current(&mut self) -> Result<Option<SocketId>> {
        let Some(id) = self.table.current() else {
            debug!("Close with no current socket");
            return Ok(None);
        };
        self.close(id)?;
        Ok(Some(id))
    }

    /// Makes `id` current.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SocketNotFound`] if `id` is not live.
    pub fn select(&mut self, id: SocketId) -> Result<()> {
        self.table.select(id)?;
        debug!(%id, "Socket selected");
        Ok(())
    }
}

// ============================================================================
// Sockets - Queries
// ============================================================================

impl Sockets {
    /// Current identity, if any.
    #[inline]
    #[must_use]
    pub fn current(&self) -> Option<SocketId> {
        self.table.current()
    }

    /// Returns `true` if `id` is live.
    #[inline]
    #[must_use]
    pub fn is_live(&self, id: SocketId) -> bool {
        self.table.is_live(id)
    }

    /// Number of live sockets.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.table.len()
    }

    /// Returns `true` if no socket is live.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    /// Snapshot of `id`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SocketNotFound`] if `id` is not live.
    pub fn info(&self, id: SocketId) -> Result<SocketInfo> {
        let entry = self
            .table
            .get(id)
            .ok_or_else(|| Error::socket_not_found(id))?;
        let rank = self.table.rank(id).unwrap_or_default();
        Ok(entry.info(rank, self.table.current() == Some(id)))
    }

    /// Snapshot of the current socket.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoCurrentSocket`] if nothing is selected.
    pub fn current_info(&self) -> Result<SocketInfo> {
        self.info(self.current_id()?)
    }

    /// Snapshots of every live socket in slot order.
    #[must_use]
    pub fn list(&self) -> Vec<SocketInfo> {
        let current = self.table.current();
        self.table
            .iter()
            .map(|(id, rank, entry)| entry.info(rank, current == Some(id)))
            .collect()
    }
}

// ============================================================================
// Sockets - Internal Lookup
// ============================================================================

impl Sockets {
    /// Current identity or [`Error::NoCurrentSocket`].
    pub(super) fn current_id(&self) -> Result<SocketId> {
        self.table.current().ok_or(Error::NoCurrentSocket)
    }

    /// Entry lookup that borrows only the table.
    pub(super) fn entry_in(
        table: &mut SocketTable<SocketEntry>,
        id: SocketId,
    ) -> Result<&mut SocketEntry> {
        table.get_mut(id).ok_or_else(|| Error::socket_not_found(id))
    }

    /// Immutable entry lookup.
    pub(super) fn entry(&self, id: SocketId) -> Result<&SocketEntry> {
        self.table.get(id).ok_or_else(|| Error::socket_not_found(id))
    }
}

// ============================================================================
// Tests
// ============================================================================
