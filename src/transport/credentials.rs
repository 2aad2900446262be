//! Credential collaborator: security tag to certificate material.
//!
//! Secured sockets stage their credential set on open and unstage it on
//! close. [`Staged`] ties the two together so a dropped socket or proxy
//! session can never leak a staged tag.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashMap;
use rustls_pki_types::{CertificateDer, PrivateKeyDer};
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::identifiers::SecTag;

// ============================================================================
// Credentials
// ============================================================================

/// Certificate material bound to a security tag.
#[derive(Default)]
pub struct Credentials {
    /// Trust anchors used to verify the remote end.
    pub ca_certs: Vec<CertificateDer<'static>>,
    /// Own certificate chain (leaf first).
    pub chain: Vec<CertificateDer<'static>>,
    /// Private key for `chain`.
    pub key: Option<PrivateKeyDer<'static>>,
}

impl Credentials {
    /// Parses credentials from PEM text.
    ///
    /// Each part is optional; a server needs `cert_pem` and `key_pem`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Credential`] if a PEM block cannot be parsed.
    pub fn from_pem(
        tag: SecTag,
        ca_pem: Option<&str>,
        cert_pem: Option<&str>,
        key_pem: Option<&str>,
    ) -> Result<Self> {
        let parse_certs = |pem: &str| {
            rustls_pemfile::certs(&mut pem.as_bytes())
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(|e| Error::credential(tag, format!("bad certificate PEM: {e}")))
        };

        let ca_certs = ca_pem.map(parse_certs).transpose()?.unwrap_or_default();
        let chain = cert_pem.map(parse_certs).transpose()?.unwrap_or_default();

        let key = match key_pem {
            Some(pem) => Some(
                rustls_pemfile::private_key(&mut pem.as_bytes())
                    .map_err(|e| Error::credential(tag, format!("bad key PEM: {e}")))?
                    .ok_or_else(|| Error::credential(tag, "no private key in PEM"))?,
            ),
            None => None,
        };

        Ok(Self {
            ca_certs,
            chain,
            key,
        })
    }

    /// Returns `true` if both a chain and a key are present.
    #[inline]
    #[must_use]
    pub fn has_identity(&self) -> bool {
        !self.chain.is_empty() && self.key.is_some()
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("ca_certs", &self.ca_certs.len())
            .field("chain", &self.chain.len())
            .field("key", &self.key.is_some())
            .finish()
    }
}

// ============================================================================
// CredentialStore Trait
// ============================================================================

/// Loads and unloads credential sets by security tag.
pub trait CredentialStore: Send + Sync {
    /// Loads the credential set for `tag`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Credential`] for an unknown tag.
    fn stage(&self, tag: SecTag) -> Result<Arc<Credentials>>;

    /// Releases one staging of `tag`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Credential`] if `tag` is not staged.
    fn unstage(&self, tag: SecTag) -> Result<()>;
}

// ============================================================================
// Staged
// ============================================================================

/// A staged credential set, unstaged on drop.
pub struct Staged {
    store: Arc<dyn CredentialStore>,
    tag: SecTag,
    credentials: Arc<Credentials>,
}

impl Staged {
    /// Stages `tag` in `store`.
    ///
    /// # Errors
    ///
    /// Propagates the store's staging error.
    pub fn new(store: Arc<dyn CredentialStore>, tag: SecTag) -> Result<Self> {
        let credentials = store.stage(tag)?;
        debug!(%tag, "Credentials staged");
        Ok(Self {
            store,
            tag,
            credentials,
        })
    }

    /// Security tag of this binding.
    #[inline]
    #[must_use]
    pub fn tag(&self) -> SecTag {
        self.tag
    }

    /// Staged credential material.
    #[inline]
    #[must_use]
    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }
}

impl fmt::Debug for Staged {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Staged").field("tag", &self.tag).finish()
    }
}

impl Drop for Staged {
    fn drop(&mut self) {
        match self.store.unstage(self.tag) {
            Ok(()) => debug!(tag = %self.tag, "Credentials unstaged"),
            Err(e) => warn!(tag = %self.tag, error = %e, "Failed to unstage credentials"),
        }
    }
}

// ============================================================================
// MemoryCredentialStore
// ============================================================================

/// In-memory [`CredentialStore`] with staging counts.
#[derive(Default)]
pub struct MemoryCredentialStore {
    sets: RwLock<FxHashMap<SecTag, Arc<Credentials>>>,
    staged: Mutex<FxHashMap<SecTag, usize>>,
}

impl MemoryCredentialStore {
    /// Creates an empty store.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a credential set under `tag`, replacing any previous one.
    pub fn insert(&self, tag: SecTag, credentials: Credentials) {
        self.sets.write().insert(tag, Arc::new(credentials));
    }

    /// Parses PEM material and stores it under `tag`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Credential`] if the PEM cannot be parsed.
    pub fn insert_pem(
        &self,
        tag: SecTag,
        ca_pem: Option<&str>,
        cert_pem: Option<&str>,
        key_pem: Option<&str>,
    ) -> Result<()> {
        let credentials = Credentials::from_pem(tag, ca_pem, cert_pem, key_pem)?;
        self.insert(tag, credentials);
        Ok(())
    }

    /// Removes the set stored under `tag`.
    pub fn remove(&self, tag: SecTag) -> bool {
        self.sets.write().remove(&tag).is_some()
    }

    /// Number of outstanding stagings of `tag`.
    #[must_use]
    pub fn staged_count(&self, tag: SecTag) -> usize {
        self.staged.lock().get(&tag).copied().unwrap_or(0)
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn stage(&self, tag: SecTag) -> Result<Arc<Credentials>> {
        let credentials = self
            .sets
            .read()
            .get(&tag)
            .cloned()
            .ok_or_else(|| Error::credential(tag, "unknown security tag"))?;

        *self.staged.lock().entry(tag).or_insert(0) += 1;
        Ok(credentials)
    }

    fn unstage(&self, tag: SecTag) -> Result<()> {
        let mut staged = self.staged.lock();
        match staged.get_mut(&tag) {
            Some(count) if *count > 1 => {
                *count -= 1;
                Ok(())
            }
            Some(_) => {
                staged.remove(&tag);
                Ok(())
            }
            None => Err(Error::credential(tag, "not staged")),
        }
    }
}

impl fmt::Debug for MemoryCredentialStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryCredentialStore")
            .field("sets", &self.sets.read().len())
            .field("staged", &self.staged.lock().len())
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn store_with(tag: SecTag) -> Arc<MemoryCredentialStore> {
        let store = Arc::new(MemoryCredentialStore::new());
        store.insert(tag, Credentials::default());
        store
    }

    #[test]
    fn test_stage_unknown_tag() {
        let store = MemoryCredentialStore::new();
        let err = store.stage(SecTag::new(9)).unwrap_err();
        assert!(matches!(err, Error::Credential { .. }));
    }

    #[test]
    fn test_staging_is_counted() {
        let tag = SecTag::new(1);
        let store = store_with(tag);
        store.stage(tag).expect("stage");
        store.stage(tag).expect("stage");
        assert_eq!(store.staged_count(tag), 2);
        store.unstage(tag).expect("unstage");
        store.unstage(tag).expect("unstage");
        assert_eq!(store.staged_count(tag), 0);
        assert!(store.unstage(tag).is_err());
    }

    #[test]
    fn test_staged_unstages_on_drop() {
        let tag = SecTag::new(3);
        let store = store_with(tag);
        let staged = Staged::new(store.clone(), tag).expect("stage");
        assert_eq!(staged.tag(), tag);
        assert_eq!(store.staged_count(tag), 1);
        drop(staged);
        assert_eq!(store.staged_count(tag), 0);
    }

    #[test]
    fn test_from_pem_rejects_missing_key() {
        let err = Credentials::from_pem(SecTag::new(1), None, None, Some("not a key")).unwrap_err();
        assert!(matches!(err, Error::Credential { .. }));
    }

    #[test]
    fn test_from_pem_self_signed() {
        let cert = rcgen::generate_simple_self_signed(vec!["localhost".to_string()])
            .expect("self-signed cert");
        let cert_pem = cert.cert.pem();
        let key_pem = cert.key_pair.serialize_pem();

        let creds = Credentials::from_pem(
            SecTag::new(1),
            Some(&cert_pem),
            Some(&cert_pem),
            Some(&key_pem),
        )
        .expect("valid PEM");
        assert_eq!(creds.ca_certs.len(), 1);
        assert!(creds.has_identity());
    }
}
