//! Mutual TLS session setup.
//!
//! `agent-edge-rs` talked to its speech backend over plain `wss://` via
//! `tokio-tungstenite`'s bundled `native-tls` support. This firmware
//! target instead terminates a private mutual-TLS link to a fleet
//! controller, so the session is built by hand on `rustls` and driven
//! through `tokio_rustls::TlsConnector` directly, with the custom
//! verifier shape grounded on the
//! cert-pinning `ServerCertVerifier` in
//! `other_examples/9939b2f8_Duocast-TSOD` — generalized here to pin the
//! provisioning CA rather than a single leaf cert hash, since the CA is
//! rotated per fleet rather than per device.
//!
//! Resolved open question: the device's `expected_common_name` is
//! passed straight through as the TLS `ServerName` at connect time
//! (see `ws::WebSocketClient::connect`, which drives the handshake
//! through `tokio_rustls::TlsConnector` directly rather than letting
//! `tokio-tungstenite` derive the name from the URL host), so
//! hostname/CN verification is done by rustls's standard webpki checks
//! rather than by hand-parsing the peer certificate's `Subject` field.

use crate::config::TlsConfig;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::client::WebPkiServerVerifier;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};
use secrecy::ExposeSecret;
use std::io::BufReader;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TlsError {
    #[error("failed to parse certificate material: {0}")]
    CertParse(String),
    #[error("failed to build client TLS config: {0}")]
    ConfigBuild(String),
    #[error("invalid server name: {0}")]
    InvalidServerName(String),
    #[error("client certificate and private key do not form a matching pair")]
    KeyCertMismatch,
}

/// Delegates to the standard webpki verifier built from a pinned CA
/// root store; the device never trusts the system/OS trust store for
/// this connection.
#[derive(Debug)]
struct PinnedCaVerifier {
    inner: Arc<WebPkiServerVerifier>,
}

impl ServerCertVerifier for PinnedCaVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        ocsp_response: &[u8],
        now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        self.inner
            .verify_server_cert(end_entity, intermediates, server_name, ocsp_response, now)
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        self.inner.verify_tls12_signature(message, cert, dss)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        self.inner.verify_tls13_signature(message, cert, dss)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.inner.supported_verify_schemes()
    }
}

/// `ClientConfig::builder()` panics without a process-wide default
/// crypto provider installed. `main.rs` installs one at startup; this
/// covers library callers (tests, embedders) that build a config without
/// going through `main`.
fn ensure_crypto_provider() {
    static INIT: std::sync::Once = std::sync::Once::new();
    INIT.call_once(|| {
        let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();
    });
}

/// Build a `rustls::ClientConfig` for mutual TLS from PEM-encoded CA,
/// client certificate, and client key material held in the config.
pub fn build_client_config(tls: &TlsConfig) -> Result<Arc<ClientConfig>, TlsError> {
    ensure_crypto_provider();
    let mut root_store = RootCertStore::empty();
    let mut ca_reader = BufReader::new(tls.ca_cert_pem.as_bytes());
    for cert in rustls_pemfile::certs(&mut ca_reader) {
        let cert = cert.map_err(|e| TlsError::CertParse(e.to_string()))?;
        root_store
            .add(cert)
            .map_err(|e| TlsError::CertParse(e.to_string()))?;
    }

    let mut client_cert_reader = BufReader::new(tls.client_cert_pem.as_bytes());
    let client_certs: Vec<CertificateDer<'static>> = rustls_pemfile::certs(&mut client_cert_reader)
        .collect::<Result<_, _>>()
        .map_err(|e| TlsError::CertParse(e.to_string()))?;

    let mut key_reader = BufReader::new(tls.client_key_pem.expose().as_bytes());
    let client_key: PrivateKeyDer<'static> = rustls_pemfile::private_key(&mut key_reader)
        .map_err(|e| TlsError::CertParse(e.to_string()))?
        .ok_or_else(|| TlsError::CertParse("no private key found in client_key_pem".into()))?;

    verify_key_matches_cert(&client_certs, &client_key)?;

    let builder = ClientConfig::builder().with_root_certificates(root_store.clone());

    let mut config = if tls.verify_peer {
        let verifier = WebPkiServerVerifier::builder(Arc::new(root_store))
            .build()
            .map_err(|e| TlsError::ConfigBuild(e.to_string()))?;
        ClientConfig::builder()
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(PinnedCaVerifier { inner: verifier }))
            .with_client_auth_cert(client_certs, client_key)
            .map_err(|e| TlsError::ConfigBuild(e.to_string()))?
    } else {
        builder
            .with_client_auth_cert(client_certs, client_key)
            .map_err(|e| TlsError::ConfigBuild(e.to_string()))?
    };

    config.alpn_protocols = vec![];
    Ok(Arc::new(config))
}

/// Cryptographically confirm the client private key signs for the leaf
/// certificate's public key — two PEM blocks that each parse fine can
/// still be an unrelated cert and key. `rustls::sign::CertifiedKey`
/// already carries this check internally; we just surface it before the
/// config is built instead of failing later, deep inside a handshake,
/// with a confusing signature error.
fn verify_key_matches_cert(
    certs: &[CertificateDer<'static>],
    key: &PrivateKeyDer<'static>,
) -> Result<(), TlsError> {
    let leaf = certs
        .first()
        .ok_or_else(|| TlsError::CertParse("client certificate chain is empty".into()))?;
    let provider = rustls::crypto::CryptoProvider::get_default()
        .ok_or_else(|| TlsError::ConfigBuild("no crypto provider installed".into()))?;
    let signing_key = provider
        .key_provider
        .load_private_key(key.clone_key())
        .map_err(|e| TlsError::ConfigBuild(format!("unusable client private key: {e}")))?;
    let certified = rustls::sign::CertifiedKey::new(vec![leaf.clone()], signing_key);
    certified.keys_match().map_err(|_| TlsError::KeyCertMismatch)
}

pub fn server_name(tls: &TlsConfig) -> Result<ServerName<'static>, TlsError> {
    ServerName::try_from(tls.expected_common_name.clone())
        .map_err(|e| TlsError::InvalidServerName(e.to_string()))
}
