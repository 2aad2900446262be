//! Socket table and basic socket operations.
//!
//! [`Sockets`] owns a fixed-capacity table of entries plus one "current"
//! entry that single-target operations act on. Opening a socket makes it
//! current; closing the current socket reselects the survivor with the
//! highest recency rank.
//!
//! # State Machine
//!
//! ```text
//! open ──► Open ──► Bound ──► Connected ─────────────► close
//!           │         │
//!           └─────────┴─────► Listening ──► Accepted ─► close
//! ```
//!
//! `send`/`receive` are legal from `Connected` and `Accepted`;
//! `listen`/`accept` from `Open`, `Bound` and `Listening`.
//!
//! # Module Structure
//!
//! | Module | Description |
//! |--------|-------------|
//! | `table` | Slot arena, recency ranks, current selection |
//! | `entry` | Socket classification, endpoints, snapshots |
//! | `core` | `Sockets` struct, open/close/select |
//! | `connection` | bind, connect, listen, accept |
//! | `io` | send, receive |
//! | `poll` | Readiness polling |
//! | `options` | Socket and TLS options |
//!
//! # Example
//!
//! ```ignore
//! let id = sockets.open(OpenParams::stream(SocketRole::Client, AddressFamily::Ipv4))?;
//! sockets.connect("127.0.0.1", 7).await?;
//! sockets.send(b"PING").await?;
//! let echo = sockets.receive(Some(Duration::from_secs(5)), RecvFlags::default()).await?;
//! sockets.close(id)?;
//! ```

// ============================================================================
// Submodules
// ============================================================================

mod connection;
mod core;
mod entry;
mod io;
mod options;
mod poll;

/// Slot arena with recency ranking.
pub mod table;

// ============================================================================
// Re-exports
// ============================================================================

pub use self::core::Sockets;
pub use entry::{
    AddressFamily, OpenParams, PeerInfo, SecureOpen, SocketInfo, SocketRole, SocketState,
    SocketType,
};
pub use io::{Received, RecvFlags};
pub use options::{SocketOption, SocketOptionName, TlsOption, TlsOptionName};
pub use poll::{PollEvent, PollFlags};
pub use table::{SlotIndex, SocketTable};
