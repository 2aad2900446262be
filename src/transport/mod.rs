//! Network collaborators and stream plumbing.
//!
//! This module holds everything the socket core needs from below:
//! addresses, credentials, TLS and the byte stream itself.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐   local_addr / resolve   ┌──────────────┐
//! │   Sockets    │─────────────────────────►│   Network    │
//! │   Proxy      │   stage / unstage        ├──────────────┤
//! │              │─────────────────────────►│ Credentials  │
//! │              │   handshake              ├──────────────┤
//! │              │─────────────────────────►│  TLS (rustls)│
//! └──────┬───────┘                          └──────────────┘
//!        │ read / write_bounded
//!        ▼
//!   NetStream (plain | client TLS | server TLS)
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `network` | Bearer addresses and peer resolution |
//! | `credentials` | Security tag staging |
//! | `tls` | rustls configs and handshakes |
//! | `stream` | Plain/TLS stream and bounded writes |

// ============================================================================
// Submodules
// ============================================================================

/// Security tag staging.
pub mod credentials;

/// Bearer addresses and peer resolution.
pub mod network;

/// Plain/TLS stream and bounded writes.
pub mod stream;

/// rustls configs and handshakes.
pub mod tls;

// ============================================================================
// Re-exports
// ============================================================================

pub use credentials::{CredentialStore, Credentials, MemoryCredentialStore, Staged};
pub use network::{HostNetwork, Network};
pub use stream::{NetStream, WriteReport, write_bounded};
pub use tls::{PeerVerify, TlsSettings};
