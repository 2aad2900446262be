//! Address collaborator: own bearer addresses and peer resolution.
//!
//! The socket core never talks to a modem directly. It asks a [`Network`]
//! for the device's own address on a bearer and for peer addresses.
//! [`HostNetwork`] answers from the host's IP stack.

// ============================================================================
// Imports
// ============================================================================

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use async_trait::async_trait;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use tokio::net::lookup_host;
use tracing::{debug, trace};

use crate::error::{Error, Result};
use crate::identifiers::BearerId;
use crate::socket::AddressFamily;

// ============================================================================
// Network Trait
// ============================================================================

/// Address resolution and bearer addressing.
#[async_trait]
pub trait Network: Send + Sync {
    /// Own address on `bearer` for `family`.
    ///
    /// `None` means the bearer is not attached.
    fn local_addr(&self, bearer: BearerId, family: AddressFamily) -> Option<IpAddr>;

    /// Resolves `host` to a peer address of `family`.
    async fn resolve(
        &self,
        bearer: BearerId,
        host: &str,
        port: u16,
        family: AddressFamily,
    ) -> Result<SocketAddr>;
}

// ============================================================================
// HostNetwork
// ============================================================================

/// Addresses configured for one bearer.
#[derive(Debug, Clone, Copy, Default)]
struct BearerAddrs {
    v4: Option<Ipv4Addr>,
    v6: Option<Ipv6Addr>,
}

/// [`Network`] backed by the host IP stack.
///
/// The primary bearer starts attached on loopback. Other bearers are
/// detached until [`HostNetwork::attach`] assigns them an address.
#[derive(Debug)]
pub struct HostNetwork {
    bearers: RwLock<FxHashMap<BearerId, BearerAddrs>>,
}

impl Default for HostNetwork {
    fn default() -> Self {
        Self::new()
    }
}

impl HostNetwork {
    /// Creates a network with the primary bearer on loopback.
    #[must_use]
    pub fn new() -> Self {
        let mut bearers = FxHashMap::default();
        bearers.insert(
            BearerId::PRIMARY,
            BearerAddrs {
                v4: Some(Ipv4Addr::LOCALHOST),
                v6: Some(Ipv6Addr::LOCALHOST),
            },
        );
        Self {
            bearers: RwLock::new(bearers),
        }
    }

    /// Creates a network with no attached bearers.
    #[must_use]
    pub fn detached() -> Self {
        Self {
            bearers: RwLock::new(FxHashMap::default()),
        }
    }

    /// Assigns an own address to `bearer` (one per family).
    pub fn attach(&self, bearer: BearerId, addr: IpAddr) {
        let mut bearers = self.bearers.write();
        let entry = bearers.entry(bearer).or_default();
        match addr {
            IpAddr::V4(v4) => entry.v4 = Some(v4),
            IpAddr::V6(v6) => entry.v6 = Some(v6),
        }
        debug!(%bearer, %addr, "Bearer attached");
    }

    /// Removes all addresses of `bearer`.
    pub fn detach(&self, bearer: BearerId) {
        self.bearers.write().remove(&bearer);
        debug!(%bearer, "Bearer detached");
    }
}

#[async_trait]
impl Network for HostNetwork {
    fn local_addr(&self, bearer: BearerId, family: AddressFamily) -> Option<IpAddr> {
        let bearers = self.bearers.read();
        let addrs = bearers.get(&bearer)?;
        match family {
            AddressFamily::Ipv4 => addrs.v4.map(IpAddr::V4),
            AddressFamily::Ipv6 => addrs.v6.map(IpAddr::V6),
        }
    }

    async fn resolve(
        &self,
        bearer: BearerId,
        host: &str,
        port: u16,
        family: AddressFamily,
    ) -> Result<SocketAddr> {
        if let Ok(ip) = host.parse::<IpAddr>() {
            if !family.matches(&ip) {
                return Err(Error::resolve(host, format!("not an {family} address")));
            }
            return Ok(SocketAddr::new(ip, port));
        }

        let addrs = lookup_host((host, port))
            .await
            .map_err(|e| Error::resolve(host, e.to_string()))?;

        let found = addrs
            .into_iter()
            .find(|addr| family.matches(&addr.ip()))
            .ok_or_else(|| Error::resolve(host, format!("no {family} address")))?;

        trace!(%bearer, host, %found, "Resolved");
        Ok(found)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_primary_bearer_is_loopback() {
        let net = HostNetwork::new();
        assert_eq!(
            net.local_addr(BearerId::PRIMARY, AddressFamily::Ipv4),
            Some(IpAddr::V4(Ipv4Addr::LOCALHOST))
        );
        let secondary = BearerId::new(2).expect("valid bearer");
        assert!(net.local_addr(secondary, AddressFamily::Ipv4).is_none());
    }

    #[test]
    fn test_attach_and_detach() {
        let net = HostNetwork::detached();
        let bearer = BearerId::new(1).expect("valid bearer");
        net.attach(bearer, IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2)));
        assert!(net.local_addr(bearer, AddressFamily::Ipv4).is_some());
        assert!(net.local_addr(bearer, AddressFamily::Ipv6).is_none());
        net.detach(bearer);
        assert!(net.local_addr(bearer, AddressFamily::Ipv4).is_none());
    }

    #[tokio::test]
    async fn test_resolve_literal() {
        let net = HostNetwork::new();
        let addr = net
            .resolve(BearerId::PRIMARY, "127.0.0.1", 7, AddressFamily::Ipv4)
            .await
            .expect("literal resolves");
        assert_eq!(addr, "127.0.0.1:7".parse::<SocketAddr>().expect("addr"));
    }

    #[tokio::test]
    async fn test_resolve_family_mismatch() {
        let net = HostNetwork::new();
        let err = net
            .resolve(BearerId::PRIMARY, "::1", 7, AddressFamily::Ipv4)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Resolve { .. }));
    }

    #[tokio::test]
    async fn test_resolve_localhost_name() {
        let net = HostNetwork::new();
        let addr = net
            .resolve(BearerId::PRIMARY, "localhost", 80, AddressFamily::Ipv4)
            .await
            .expect("localhost resolves");
        assert!(addr.ip().is_loopback());
    }
}
