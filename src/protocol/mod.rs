//! Host-facing message types.
//!
//! This module defines what crosses the boundary to the host's command
//! processor. Framing and encoding belong to the host; these are the
//! typed values it hands over and gets back.
//!
//! # Protocol Overview
//!
//! | Message Type | Direction | Purpose |
//! |--------------|-----------|---------|
//! | `Command` | Host → Core | Parsed operation |
//! | `Reply` | Core → Host | Synchronous result of one command |
//! | `Notification` | Core → Host | Unsolicited proxy and data-mode events |
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `command` | Command and Reply types |
//! | `notification` | Notification types and channel |

// ============================================================================
// Submodules
// ============================================================================

/// Command and Reply types.
pub mod command;

/// Notification types and channel.
pub mod notification;

// ============================================================================
// Re-exports
// ============================================================================

pub use command::{Command, Reply};
pub use notification::{
    DisconnectCause, ExitCause, Notification, Notifications, Notifier, StopCause,
};
