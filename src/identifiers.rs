//! Type-safe identifiers for sockets, credentials and bearers.
//!
//! Newtype wrappers prevent mixing incompatible IDs at compile time.
//!
//! # ID Types
//!
//! | Type | Source | Description |
//! |------|--------|-------------|
//! | [`SocketId`] | Process counter | Identity of an open endpoint |
//! | [`SecTag`] | Host | Security tag naming a credential set |
//! | [`BearerId`] | Host | Device binding (0 = primary bearer) |

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::num::NonZeroU32;
use std::sync::atomic::{AtomicU32, Ordering};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

// ============================================================================
// Constants
// ============================================================================

/// Highest bearer id accepted.
pub const MAX_BEARER_ID: u8 = 10;

/// Next socket identity. Starts at 1 so ids fit `NonZeroU32`.
static NEXT_SOCKET_ID: AtomicU32 = AtomicU32::new(1);

// ============================================================================
// SocketId
// ============================================================================

/// Opaque identity of an open network endpoint.
///
/// Ids are never reused within a process, so a stale id held by the host
/// can never alias a newer socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SocketId(NonZeroU32);

impl SocketId {
    /// Allocates a fresh identity.
    ///
    /// Skips zero on wrap-around.
    #[must_use]
    pub fn next() -> Self {
        loop {
            let raw = NEXT_SOCKET_ID.fetch_add(1, Ordering::Relaxed);
            if let Some(id) = NonZeroU32::new(raw) {
                return Self(id);
            }
        }
    }

    /// Creates an identity from a raw host value.
    ///
    /// Returns `None` for zero.
    #[inline]
    #[must_use]
    pub fn from_raw(raw: u32) -> Option<Self> {
        NonZeroU32::new(raw).map(Self)
    }

    /// Returns the raw value.
    #[inline]
    #[must_use]
    pub fn get(&self) -> u32 {
        self.0.get()
    }
}

impl fmt::Display for SocketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// SecTag
// ============================================================================

/// Security tag referencing a credential set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SecTag(u32);

impl SecTag {
    /// Creates a new security tag.
    #[inline]
    #[must_use]
    pub const fn new(tag: u32) -> Self {
        Self(tag)
    }

    /// Returns the raw tag.
    #[inline]
    #[must_use]
    pub const fn get(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for SecTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for SecTag {
    fn from(tag: u32) -> Self {
        Self(tag)
    }
}

// ============================================================================
// BearerId
// ============================================================================

/// Device binding selecting the bearer a socket uses.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(try_from = "u8", into = "u8")]
pub struct BearerId(u8);

impl BearerId {
    /// The primary (default) bearer.
    pub const PRIMARY: Self = Self(0);

    /// Creates a bearer id, validating the range `0..=10`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] when out of range.
    pub fn new(id: u8) -> Result<Self> {
        if id > MAX_BEARER_ID {
            return Err(Error::invalid_argument(format!(
                "bearer {id} out of range 0..={MAX_BEARER_ID}"
            )));
        }
        Ok(Self(id))
    }

    /// Returns the raw bearer number.
    #[inline]
    #[must_use]
    pub const fn get(&self) -> u8 {
        self.0
    }

    /// Returns `true` for the primary bearer.
    #[inline]
    #[must_use]
    pub const fn is_primary(&self) -> bool {
        self.0 == 0
    }
}

impl TryFrom<u8> for BearerId {
    type Error = Error;

    fn try_from(id: u8) -> Result<Self> {
        Self::new(id)
    }
}

impl From<BearerId> for u8 {
    fn from(id: BearerId) -> Self {
        id.0
    }
}

impl fmt::Display for BearerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_socket_ids_are_unique() {
        let a = SocketId::next();
        let b = SocketId::next();
        assert_ne!(a, b);
        assert!(b.get() > a.get());
    }

    #[test]
    fn test_socket_id_from_raw() {
        assert!(SocketId::from_raw(0).is_none());
        assert_eq!(SocketId::from_raw(7).map(|id| id.get()), Some(7));
    }

    #[test]
    fn test_socket_id_serde_transparent() {
        let id = SocketId::from_raw(42).expect("non-zero");
        assert_eq!(serde_json::to_string(&id).expect("serialize"), "42");
        let parsed: SocketId = serde_json::from_str("42").expect("parse");
        assert_eq!(parsed, id);
        assert!(serde_json::from_str::<SocketId>("0").is_err());
    }

    #[test]
    fn test_bearer_range() {
        assert!(BearerId::new(0).expect("primary").is_primary());
        assert_eq!(BearerId::new(10).expect("max").get(), 10);
        assert!(BearerId::new(11).is_err());
        assert!(serde_json::from_str::<BearerId>("11").is_err());
        let parsed: BearerId = serde_json::from_str("3").expect("parse");
        assert_eq!(parsed.get(), 3);
    }

    #[test]
    fn test_sec_tag_display() {
        assert_eq!(SecTag::new(16842753).to_string(), "16842753");
        assert_eq!(SecTag::from(5).get(), 5);
    }
}
