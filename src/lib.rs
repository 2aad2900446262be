//! cellsock - Socket multiplexing and TCP/TLS proxy core for a cellular
//! modem command processor.
//!
//! This library implements the socket side of a modem's command set:
//! a bounded table of TCP/UDP/TLS sockets addressed by identity, one
//! singleton TCP/TLS proxy session running in its own task, and a
//! data-mode bridge that forwards raw host bytes to a socket or the
//! proxy.
//!
//! # Architecture
//!
//! - **Command context**: the host feeds parsed [`Command`]s to
//!   [`Modem::execute`] one at a time and gets a [`Reply`] back
//! - **Proxy worker**: owns the proxy's listener and connection, reports
//!   through the notification channel
//! - **Notifications**: unsolicited events ([`Notification`]) reach the
//!   host on the [`Notifications`] receiver
//!
//! Key design principles:
//!
//! - The socket table only holds live entries; identities are never reused
//! - Every worker-owned resource is released in one teardown path
//! - Writes report partial progress instead of losing it
//! - Secured endpoints stage their credentials for exactly their lifetime
//!
//! # Quick Start
//!
//! ```no_run
//! use cellsock::{Command, Config, Modem, Reply, Result, ServerParams};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let (mut modem, mut notifications) = Modem::builder()
//!         .config(Config::new().with_proxy_idle_timeout_ms(60_000))
//!         .build()?;
//!
//!     let reply = modem
//!         .execute(Command::ProxyServerStart(ServerParams::new(3442)))
//!         .await?;
//!     if let Reply::ProxyStarted { addr } = reply {
//!         println!("Proxy listening on {addr}");
//!     }
//!
//!     while let Some(notification) = notifications.recv().await {
//!         println!("{}", serde_json::to_string(&notification)?);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`modem`] | [`Modem`] facade and builder |
//! | [`socket`] | Socket table and socket operations |
//! | [`proxy`] | Singleton TCP/TLS proxy session |
//! | [`datamode`] | Data-mode bridge state |
//! | [`protocol`] | Commands, replies and notifications |
//! | [`transport`] | Network, credential and TLS seams |
//! | [`config`] | Runtime configuration |
//! | [`error`] | Error types and [`Result`] alias |
//! | [`identifiers`] | Type-safe ID wrappers |

// ============================================================================
// Modules
// ============================================================================

/// Runtime configuration.
pub mod config;

/// Data-mode bridge state.
pub mod datamode;

/// Error types and result aliases.
///
/// All fallible operations return [`Result<T>`] which uses [`Error`].
pub mod error;

/// Type-safe identifiers for sockets, bearers and credentials.
pub mod identifiers;

/// Command surface.
///
/// Use [`Modem::builder()`] to create a configured modem.
pub mod modem;

/// Command, reply and notification types.
pub mod protocol;

/// Singleton proxy session.
pub mod proxy;

/// Socket table and operations.
pub mod socket;

/// Network, credential and TLS plumbing.
pub mod transport;

// ============================================================================
// Re-exports
// ============================================================================

// Modem types
pub use modem::{Modem, ModemBuilder};

// Configuration
pub use config::Config;

// Data mode
pub use datamode::{DataMode, DataModeTarget};

// Error types
pub use error::{Error, Result};

// Identifier types
pub use identifiers::{BearerId, SecTag, SocketId};

// Protocol types
pub use protocol::{
    Command, DisconnectCause, ExitCause, Notification, Notifications, Reply, StopCause,
};

// Proxy types
pub use proxy::{ClientParams, Proxy, ProxyStatus, ServerParams};

// Socket types
pub use socket::{
    AddressFamily, OpenParams, PeerInfo, PollEvent, PollFlags, RecvFlags, SocketInfo,
    SocketOption, SocketRole, SocketState, SocketType, Sockets, TlsOption,
};

// Transport types
pub use transport::{
    CredentialStore, Credentials, HostNetwork, MemoryCredentialStore, Network, PeerVerify,
};
