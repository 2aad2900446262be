//! TLS configuration for secured sockets and proxy sessions.
//!
//! Builds rustls client and server configs from staged [`Credentials`]
//! and runs handshakes over established TCP connections.
//!
//! # Peer Verification
//!
//! | Level | Client | Server |
//! |-------|--------|--------|
//! | [`PeerVerify::None`] | Any server certificate accepted | No client certificate requested |
//! | [`PeerVerify::Optional`] | Verified; failures logged and accepted | Client certificate verified if sent |
//! | [`PeerVerify::Required`] | Verified; failures abort the handshake | Client certificate required |
//!
//! Hostname checking on the client is separate: without a hostname only
//! the chain is verified.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use rustls::client::Resumption;
use rustls::client::WebPkiServerVerifier;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{CryptoProvider, aws_lc_rs, verify_tls12_signature, verify_tls13_signature};
use rustls::server::WebPkiClientVerifier;
use rustls::{
    CertificateError, ClientConfig, DigitallySignedStruct, RootCertStore, ServerConfig,
    SignatureScheme,
};
use rustls_pki_types::{CertificateDer, ServerName, UnixTime};
use serde::{Deserialize, Serialize};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_rustls::{TlsAcceptor, TlsConnector};
use tracing::{debug, warn};

use crate::error::{Error, Result};

use super::credentials::Credentials;
use super::stream::NetStream;

// ============================================================================
// PeerVerify
// ============================================================================

/// Remote certificate verification level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PeerVerify {
    /// No verification.
    None,
    /// Verify, but continue on failure.
    Optional,
    /// Verify and abort on failure.
    Required,
}

impl PeerVerify {
    /// Level from its numeric form (0, 1, 2).
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] for other values.
    pub fn from_level(level: u8) -> Result<Self> {
        match level {
            0 => Ok(Self::None),
            1 => Ok(Self::Optional),
            2 => Ok(Self::Required),
            other => Err(Error::invalid_argument(format!(
                "peer verify level {other} not in 0..=2"
            ))),
        }
    }
}

impl fmt::Display for PeerVerify {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => write!(f, "none"),
            Self::Optional => write!(f, "optional"),
            Self::Required => write!(f, "required"),
        }
    }
}

// ============================================================================
// TlsSettings
// ============================================================================

/// Per-connection TLS settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsSettings {
    /// Verification level for the remote certificate.
    pub peer_verify: PeerVerify,
    /// Hostname checked against the server certificate, if any.
    pub hostname: Option<String>,
    /// Whether client session resumption is enabled.
    pub session_cache: bool,
}

impl TlsSettings {
    /// Settings with the given verification level and nothing else.
    #[inline]
    #[must_use]
    pub fn new(peer_verify: PeerVerify) -> Self {
        Self {
            peer_verify,
            hostname: None,
            session_cache: false,
        }
    }
}

// ============================================================================
// Server Certificate Verifier
// ============================================================================

/// Applies the verification level on top of webpki.
#[derive(Debug)]
struct ModemCertVerifier {
    /// `None` when no chain verification happens.
    inner: Option<Arc<WebPkiServerVerifier>>,
    peer_verify: PeerVerify,
    check_name: bool,
    provider: Arc<CryptoProvider>,
}

impl ServerCertVerifier for ModemCertVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        ocsp_response: &[u8],
        now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        let Some(inner) = &self.inner else {
            return Ok(ServerCertVerified::assertion());
        };

        match inner.verify_server_cert(end_entity, intermediates, server_name, ocsp_response, now)
        {
            Ok(verified) => Ok(verified),
            Err(rustls::Error::InvalidCertificate(
                CertificateError::NotValidForName | CertificateError::NotValidForNameContext { .. },
            )) if !self.check_name => Ok(ServerCertVerified::assertion()),
            Err(e) if self.peer_verify == PeerVerify::Optional => {
                warn!(error = %e, "Server certificate not verified, continuing");
                Ok(ServerCertVerified::assertion())
            }
            Err(e) => Err(e),
        }
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls12_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider
            .signature_verification_algorithms
            .supported_schemes()
    }
}

// ============================================================================
// Config Builders
// ============================================================================

/// Crypto provider shared by all configs.
fn provider() -> Arc<CryptoProvider> {
    Arc::new(aws_lc_rs::default_provider())
}

/// Root store from the credential set's CA certificates.
fn root_store(credentials: &Credentials) -> Result<RootCertStore> {
    let mut roots = RootCertStore::empty();
    for cert in &credentials.ca_certs {
        roots
            .add(cert.clone())
            .map_err(|e| Error::tls(format!("bad CA certificate: {e}")))?;
    }
    Ok(roots)
}

/// Builds a client config.
///
/// # Errors
///
/// Returns [`Error::Tls`] if verification is required without CA
/// certificates, or the client certificate is rejected.
pub fn client_config(credentials: &Credentials, settings: &TlsSettings) -> Result<Arc<ClientConfig>> {
    let provider = provider();
    let roots = root_store(credentials)?;

    let inner = match settings.peer_verify {
        PeerVerify::None => None,
        PeerVerify::Optional if roots.is_empty() => {
            debug!("No CA certificates, server certificate accepted unverified");
            None
        }
        PeerVerify::Optional | PeerVerify::Required => Some(
            WebPkiServerVerifier::builder_with_provider(Arc::new(roots), Arc::clone(&provider))
                .build()
                .map_err(|e| Error::tls(format!("server verifier: {e}")))?,
        ),
    };

    let verifier = ModemCertVerifier {
        inner,
        peer_verify: settings.peer_verify,
        check_name: settings.hostname.is_some(),
        provider: Arc::clone(&provider),
    };

    let builder = ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .map_err(|e| Error::tls(e.to_string()))?
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(verifier));

    let mut config = match (&credentials.key, credentials.chain.is_empty()) {
        (Some(key), false) => builder
            .with_client_auth_cert(credentials.chain.clone(), key.clone_key())
            .map_err(|e| Error::tls(format!("client certificate: {e}")))?,
        _ => builder.with_no_client_auth(),
    };

    config.resumption = if settings.session_cache {
        Resumption::default()
    } else {
        Resumption::disabled()
    };

    Ok(Arc::new(config))
}

/// Builds a server config.
///
/// # Errors
///
/// Returns [`Error::Tls`] if the credential set lacks a certificate chain
/// and key, or client verification is required without CA certificates.
pub fn server_config(credentials: &Credentials, peer_verify: PeerVerify) -> Result<Arc<ServerConfig>> {
    let provider = provider();
    let key = match (&credentials.key, credentials.chain.is_empty()) {
        (Some(key), false) => key.clone_key(),
        _ => return Err(Error::tls("server requires a certificate chain and key")),
    };

    let builder = ServerConfig::builder_with_provider(Arc::clone(&provider))
        .with_safe_default_protocol_versions()
        .map_err(|e| Error::tls(e.to_string()))?;

    let roots = root_store(credentials)?;
    let builder = match peer_verify {
        PeerVerify::None => builder.with_no_client_auth(),
        PeerVerify::Optional if roots.is_empty() => builder.with_no_client_auth(),
        PeerVerify::Optional | PeerVerify::Required => {
            let mut verifier = WebPkiClientVerifier::builder_with_provider(Arc::new(roots), provider);
            if peer_verify == PeerVerify::Optional {
                verifier = verifier.allow_unauthenticated();
            }
            let verifier = verifier
                .build()
                .map_err(|e| Error::tls(format!("client verifier: {e}")))?;
            builder.with_client_cert_verifier(verifier)
        }
    };

    let config = builder
        .with_single_cert(credentials.chain.clone(), key)
        .map_err(|e| Error::tls(format!("server certificate: {e}")))?;

    Ok(Arc::new(config))
}

/// Name presented to the server.
///
/// Falls back to the peer IP when no hostname is configured.
///
/// # Errors
///
/// Returns [`Error::Tls`] for an invalid DNS name.
pub fn server_name(hostname: Option<&str>, peer: IpAddr) -> Result<ServerName<'static>> {
    match hostname {
        Some(name) => ServerName::try_from(name.to_string())
            .map_err(|_| Error::tls(format!("invalid server name: {name}"))),
        None => Ok(ServerName::IpAddress(peer.into())),
    }
}

// ============================================================================
// Handshakes
// ============================================================================

/// Runs a client handshake over `tcp`.
///
/// # Errors
///
/// - [`Error::Timeout`] if the handshake exceeds `limit`
/// - [`Error::Tls`] if the handshake fails
pub async fn handshake_client(
    tcp: TcpStream,
    credentials: &Credentials,
    settings: &TlsSettings,
    limit: Duration,
) -> Result<NetStream> {
    let peer = tcp.peer_addr()?;
    let config = client_config(credentials, settings)?;
    let name = server_name(settings.hostname.as_deref(), peer.ip())?;

    let stream = timeout(limit, TlsConnector::from(config).connect(name, tcp))
        .await
        .map_err(|_| Error::timeout("tls handshake", limit))?
        .map_err(|e| Error::tls(format!("handshake with {peer}: {e}")))?;

    debug!(%peer, "TLS client handshake complete");
    Ok(NetStream::ClientTls(Box::new(stream)))
}

/// Runs a server handshake over an accepted `tcp`.
///
/// # Errors
///
/// - [`Error::Timeout`] if the handshake exceeds `limit`
/// - [`Error::Tls`] if the handshake fails
pub async fn handshake_server(
    tcp: TcpStream,
    config: Arc<ServerConfig>,
    limit: Duration,
) -> Result<NetStream> {
    let peer = tcp.peer_addr()?;
    let stream = timeout(limit, TlsAcceptor::from(config).accept(tcp))
        .await
        .map_err(|_| Error::timeout("tls handshake", limit))?
        .map_err(|e| Error::tls(format!("handshake with {peer}: {e}")))?;

    debug!(%peer, "TLS server handshake complete");
    Ok(NetStream::ServerTls(Box::new(stream)))
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::identifiers::SecTag;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Self-signed credentials for `localhost`, trusted by themselves.
    pub(crate) fn self_signed() -> Credentials {
        let cert = rcgen::generate_simple_self_signed(vec!["localhost".to_string()])
            .expect("self-signed cert");
        let cert_pem = cert.cert.pem();
        let key_pem = cert.key_pair.serialize_pem();
        Credentials::from_pem(
            SecTag::new(1),
            Some(&cert_pem),
            Some(&cert_pem),
            Some(&key_pem),
        )
        .expect("valid PEM")
    }

    #[test]
    fn test_peer_verify_levels() {
        assert_eq!(PeerVerify::from_level(0).expect("valid"), PeerVerify::None);
        assert_eq!(PeerVerify::from_level(2).expect("valid"), PeerVerify::Required);
        assert!(PeerVerify::from_level(3).is_err());
        assert_eq!(PeerVerify::Optional.to_string(), "optional");
    }

    #[test]
    fn test_required_without_roots_fails() {
        let err = client_config(&Credentials::default(), &TlsSettings::new(PeerVerify::Required))
            .unwrap_err();
        assert!(matches!(err, Error::Tls { .. }));
    }

    #[test]
    fn test_server_requires_identity() {
        let err = server_config(&Credentials::default(), PeerVerify::None).unwrap_err();
        assert!(matches!(err, Error::Tls { .. }));
        assert!(server_config(&self_signed(), PeerVerify::None).is_ok());
    }

    #[test]
    fn test_server_name_fallback() {
        let ip: IpAddr = "127.0.0.1".parse().expect("ip");
        assert!(matches!(
            server_name(None, ip).expect("ip name"),
            ServerName::IpAddress(_)
        ));
        assert!(matches!(
            server_name(Some("localhost"), ip).expect("dns name"),
            ServerName::DnsName(_)
        ));
    }

    #[tokio::test]
    async fn test_handshake_verified_loopback() {
        let creds = Arc::new(self_signed());
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");

        let server_creds = Arc::clone(&creds);
        let server = tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.expect("accept");
            let config = server_config(&server_creds, PeerVerify::None).expect("config");
            let mut stream = handshake_server(tcp, config, Duration::from_secs(5))
                .await
                .expect("server handshake");
            let mut buf = [0u8; 4];
            stream.read_exact(&mut buf).await.expect("read");
            stream.write_all(&buf).await.expect("echo");
            stream.flush().await.expect("flush");
        });

        let settings = TlsSettings {
            peer_verify: PeerVerify::Required,
            hostname: Some("localhost".to_string()),
            session_cache: false,
        };
        let tcp = TcpStream::connect(addr).await.expect("connect");
        let mut stream = handshake_client(tcp, &creds, &settings, Duration::from_secs(5))
            .await
            .expect("client handshake");
        assert!(stream.is_secure());
        assert!(stream.cipher_suite().is_some());

        stream.write_all(b"PING").await.expect("write");
        stream.flush().await.expect("flush");
        let mut buf = [0u8; 4];
        stream.read_exact(&mut buf).await.expect("read");
        assert_eq!(&buf, b"PING");
        server.await.expect("server task");
    }

    #[tokio::test]
    async fn test_wrong_hostname_rejected_when_required() {
        let creds = Arc::new(self_signed());
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");

        let server_creds = Arc::clone(&creds);
        tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.expect("accept");
            let config = server_config(&server_creds, PeerVerify::None).expect("config");
            let _ = handshake_server(tcp, config, Duration::from_secs(5)).await;
        });

        let settings = TlsSettings {
            peer_verify: PeerVerify::Required,
            hostname: Some("example.com".to_string()),
            session_cache: false,
        };
        let tcp = TcpStream::connect(addr).await.expect("connect");
        let err = handshake_client(tcp, &creds, &settings, Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Tls { .. }));
    }
}
