//! Peer allow-list for the proxy server.

// ============================================================================
// Imports
// ============================================================================

use std::net::IpAddr;

use tracing::debug;

use crate::error::{Error, Result};

// ============================================================================
// AllowList
// ============================================================================

/// Fixed-capacity set of peer addresses a proxy server accepts.
///
/// A disabled list permits everyone. IPv4-mapped IPv6 peers match their
/// IPv4 entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllowList {
    capacity: usize,
    addrs: Vec<IpAddr>,
    enabled: bool,
}

impl AllowList {
    /// Creates a disabled list holding up to `capacity` addresses.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            addrs: Vec::with_capacity(capacity),
            enabled: false,
        }
    }

    /// Replaces the list and enables filtering.
    ///
    /// Duplicates are collapsed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if `addrs` is empty or holds more
    /// distinct addresses than the capacity.
    pub fn set(&mut self, addrs: &[IpAddr]) -> Result<()> {
        let mut unique: Vec<IpAddr> = Vec::with_capacity(addrs.len());
        for addr in addrs.iter().map(IpAddr::to_canonical) {
            if !unique.contains(&addr) {
                unique.push(addr);
            }
        }

        if unique.is_empty() {
            return Err(Error::invalid_argument("allow-list needs at least one address"));
        }
        if unique.len() > self.capacity {
            return Err(Error::invalid_argument(format!(
                "allow-list holds at most {} addresses, got {}",
                self.capacity,
                unique.len()
            )));
        }

        debug!(count = unique.len(), "Allow-list enabled");
        self.addrs = unique;
        self.enabled = true;
        Ok(())
    }

    /// Disables filtering and forgets every address.
    pub fn clear(&mut self) {
        self.addrs.clear();
        self.enabled = false;
        debug!("Allow-list cleared");
    }

    /// Returns `true` if filtering is on.
    #[inline]
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Listed addresses.
    #[inline]
    #[must_use]
    pub fn addrs(&self) -> &[IpAddr] {
        &self.addrs
    }

    /// Returns `true` if a peer at `ip` may be tracked.
    #[must_use]
    pub fn permits(&self, ip: IpAddr) -> bool {
        !self.enabled || self.addrs.contains(&ip.to_canonical())
    }
}

// ============================================================================
// Tests
// ============================================================================
