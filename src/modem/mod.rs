//! Command surface over sockets, proxy and data mode.
//!
//! # Components
//!
//! | Type | Description |
//! |------|-------------|
//! | [`Modem`] | Owns the socket table, proxy session and data-mode bridge |
//! | [`ModemBuilder`] | Fluent configuration builder |
//!
//! # Example
//!
//! ```no_run
//! use cellsock::{Command, Modem, Reply, Result};
//!
//! # async fn example() -> Result<()> {
//! let (mut modem, mut notifications) = Modem::builder().build()?;
//!
//! modem
//!     .execute(Command::from_json(r#"{"op":"open","type":"stream","role":"client"}"#)?)
//!     .await?;
//! modem
//!     .execute(Command::from_json(r#"{"op":"connect","host":"example.com","port":7}"#)?)
//!     .await?;
//!
//! if let Reply::Sent { len } = modem
//!     .execute(Command::from_json(r#"{"op":"send","data":"PING"}"#)?)
//!     .await?
//! {
//!     println!("sent {len} bytes");
//! }
//!
//! while let Some(notification) = notifications.try_recv() {
//!     println!("{}", notification.name());
//! }
//! # Ok(())
//! # }
//! ```

// ============================================================================
// Submodules
// ============================================================================

/// Fluent builder.
pub mod builder;

/// Modem state and data forwarding.
pub mod core;

/// Command dispatch.
mod execute;

// ============================================================================
// Re-exports
// ============================================================================

pub use self::core::Modem;
pub use builder::ModemBuilder;
