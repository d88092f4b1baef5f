//! TLS transport for the HTTPS listener.
//!
//! The proxy does not terminate CONNECT traffic; this only wraps the
//! client-facing socket of the second listener when `includeHttps` is set.

use super::error::ProxyError;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use std::sync::Arc;
use tokio_rustls::TlsAcceptor;

/// Create TLS acceptor from certificate and key files.
pub fn create_tls_acceptor(cert_path: &str, key_path: &str) -> Result<TlsAcceptor, ProxyError> {
    let certs = load_certs(cert_path)?;
    let key = load_private_key(key_path)?;

    let config = rustls::ServerConfig::builder_with_provider(Arc::new(
        rustls::crypto::ring::default_provider(),
    ))
    .with_safe_default_protocol_versions()?
    .with_no_client_auth()
    .with_single_cert(certs, key)?;

    Ok(TlsAcceptor::from(Arc::new(config)))
}

fn load_certs(cert_path: &str) -> Result<Vec<CertificateDer<'static>>, ProxyError> {
    let cert_file = std::fs::File::open(cert_path).map_err(|e| {
        ProxyError::Tls(format!("Failed to open certificate file '{cert_path}': {e}"))
    })?;
    let mut cert_reader = std::io::BufReader::new(cert_file);
    let certs: Vec<CertificateDer> = rustls_pemfile::certs(&mut cert_reader)
        .collect::<Result<_, _>>()
        .map_err(|e| ProxyError::Tls(format!("Failed to parse certificate file: {e}")))?;

    if certs.is_empty() {
        return Err(ProxyError::Tls(format!(
            "No certificates found in certificate file: {cert_path}"
        )));
    }
    Ok(certs)
}

fn load_private_key(key_path: &str) -> Result<PrivateKeyDer<'static>, ProxyError> {
    let key_file = std::fs::File::open(key_path).map_err(|e| {
        ProxyError::Tls(format!("Failed to open private key file '{key_path}': {e}"))
    })?;
    let mut key_reader = std::io::BufReader::new(key_file);

    // PKCS8, RSA or SEC1 keys
    rustls_pemfile::private_key(&mut key_reader)
        .map_err(|e| ProxyError::Tls(format!("Failed to parse private key file: {e}")))?
        .ok_or_else(|| ProxyError::Tls(format!("No private key found in key file: {key_path}")))
}
