//! Singleton TCP/TLS proxy session.
//!
//! A proxy session bridges one external connection to the host's
//! notification channel. The command context sets the session up and
//! then hands every socket to a worker task; from then on it talks to
//! the worker only through the control channel.
//!
//! # Architecture
//!
//! ```text
//!  command context                         worker task
//! ┌───────────────┐  ControlEvent (mpsc)  ┌──────────────────────────┐
//! │    Proxy      │──────────────────────►│ listener / peer / link   │
//! │               │◄──────────────────────│ staged credentials       │
//! └───────────────┘  ProxyStatus (watch)  └────────────┬─────────────┘
//!                                                      │ Notification
//!                                                      ▼
//!                                                  Notifier
//! ```
//!
//! # Module Structure
//!
//! | Module | Description |
//! |--------|-------------|
//! | `session` | `Proxy`, start/stop/hangup/send |
//! | `worker` | Event loop and teardown |
//! | `control` | Control events and status snapshot |
//! | `filter` | Peer allow-list |

// ============================================================================
// Submodules
// ============================================================================

mod control;
mod filter;
mod session;
mod worker;

// ============================================================================
// Re-exports
// ============================================================================

pub use control::ProxyStatus;
pub use filter::AllowList;
pub use session::{ClientParams, Proxy, ServerParams};
