//! TLS identity and certificate loading.
//!
//! Everything here runs at startup (or, with identity reload enabled, right
//! before a reconnect). A failure is a [`CertificateLoadError`] and the caller
//! is expected to abort: a partially loaded identity is never returned.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

use axum_server::tls_rustls::RustlsConfig;
use rustls::crypto::CryptoProvider;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName};
use rustls::server::WebPkiClientVerifier;
use rustls::{ClientConfig, RootCertStore, ServerConfig};
use tokio_rustls::TlsConnector;

use crate::config::{ListenerTlsConfig, TlsConfig};
use crate::error::CertificateLoadError;

/// Loaded client identity for the upstream mTLS hop. Immutable.
#[derive(Debug)]
pub struct TlsIdentity {
    server_name: ServerName<'static>,
    chain_len: usize,
    ca_count: usize,
    client_config: Arc<ClientConfig>,
}

impl TlsIdentity {
    /// Load the certificate chain, private key and CA bundle and build the
    /// client configuration that presents them.
    ///
    /// Fails if any file is missing or malformed, the CA bundle is empty, the
    /// key does not match the leaf certificate, or `server_name` is not a
    /// valid DNS name / IP address.
    pub fn load(
        cert_path: &Path,
        key_path: &Path,
        ca_path: &Path,
        server_name: &str,
    ) -> Result<Self, CertificateLoadError> {
        let chain = load_certs(cert_path, "certificate")?;
        let key = load_private_key(key_path)?;
        let roots = load_roots(ca_path)?;
        let ca_count = roots.len();

        let server_name = ServerName::try_from(server_name.to_string())
            .map_err(|e| CertificateLoadError::Invalid(format!("server name '{}': {}", server_name, e)))?;

        let chain_len = chain.len();
        let client_config = ClientConfig::builder_with_provider(provider())
            .with_safe_default_protocol_versions()
            .map_err(|e| CertificateLoadError::Invalid(e.to_string()))?
            .with_root_certificates(roots)
            .with_client_auth_cert(chain, key)
            .map_err(|e| CertificateLoadError::Invalid(format!("certificate/key pair rejected: {}", e)))?;

        tracing::info!(
            cert = %cert_path.display(),
            ca = %ca_path.display(),
            chain_len,
            ca_count,
            server_name = ?server_name,
            "TLS identity loaded"
        );

        Ok(Self {
            server_name,
            chain_len,
            ca_count,
            client_config: Arc::new(client_config),
        })
    }

    /// Load using the paths of a [`TlsConfig`]; `default_server_name` is used
    /// when the config does not override it.
    pub fn from_config(config: &TlsConfig, default_server_name: &str) -> Result<Self, CertificateLoadError> {
        Self::load(
            &config.cert_path,
            &config.key_path,
            &config.ca_path,
            config.server_name_or(default_server_name),
        )
    }

    pub fn connector(&self) -> TlsConnector {
        TlsConnector::from(Arc::clone(&self.client_config))
    }

    pub fn server_name(&self) -> ServerName<'static> {
        self.server_name.clone()
    }

    pub fn chain_len(&self) -> usize {
        self.chain_len
    }

    pub fn ca_count(&self) -> usize {
        self.ca_count
    }
}

/// Server configuration that *requires* a client certificate signed by the
/// CA bundle. Used by the backend.
pub fn mtls_server_config(
    cert_path: &Path,
    key_path: &Path,
    ca_path: &Path,
) -> Result<Arc<ServerConfig>, CertificateLoadError> {
    let chain = load_certs(cert_path, "certificate")?;
    let key = load_private_key(key_path)?;
    let roots = load_roots(ca_path)?;

    let verifier = WebPkiClientVerifier::builder_with_provider(Arc::new(roots), provider())
        .build()
        .map_err(|e| CertificateLoadError::Invalid(format!("client verifier: {}", e)))?;

    let mut config = ServerConfig::builder_with_provider(provider())
        .with_safe_default_protocol_versions()
        .map_err(|e| CertificateLoadError::Invalid(e.to_string()))?
        .with_client_cert_verifier(verifier)
        .with_single_cert(chain, key)
        .map_err(|e| CertificateLoadError::Invalid(format!("certificate/key pair rejected: {}", e)))?;
    config.alpn_protocols = vec![b"http/1.1".to_vec()];

    Ok(Arc::new(config))
}

/// Server configuration without client authentication.
pub fn server_config(cert_path: &Path, key_path: &Path) -> Result<Arc<ServerConfig>, CertificateLoadError> {
    let chain = load_certs(cert_path, "certificate")?;
    let key = load_private_key(key_path)?;

    let mut config = ServerConfig::builder_with_provider(provider())
        .with_safe_default_protocol_versions()
        .map_err(|e| CertificateLoadError::Invalid(e.to_string()))?
        .with_no_client_auth()
        .with_single_cert(chain, key)
        .map_err(|e| CertificateLoadError::Invalid(format!("certificate/key pair rejected: {}", e)))?;
    config.alpn_protocols = vec![b"h2".to_vec(), b"http/1.1".to_vec()];

    Ok(Arc::new(config))
}

/// TLS configuration for the inbound edge listener.
pub fn load_listener_tls(config: &ListenerTlsConfig) -> Result<RustlsConfig, CertificateLoadError> {
    let server = server_config(&config.cert_path, &config.key_path)?;
    Ok(RustlsConfig::from_config(server))
}

fn provider() -> Arc<CryptoProvider> {
    Arc::new(rustls::crypto::ring::default_provider())
}

fn open(path: &Path, kind: &'static str) -> Result<BufReader<File>, CertificateLoadError> {
    if !path.exists() {
        return Err(CertificateLoadError::Missing {
            kind,
            path: path.to_path_buf(),
        });
    }
    let file = File::open(path).map_err(|source| CertificateLoadError::Io {
        kind,
        path: path.to_path_buf(),
        source,
    })?;
    Ok(BufReader::new(file))
}

fn load_certs(path: &Path, kind: &'static str) -> Result<Vec<CertificateDer<'static>>, CertificateLoadError> {
    let mut reader = open(path, kind)?;
    let certs = rustls_pemfile::certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| CertificateLoadError::Parse {
            kind,
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;

    if certs.is_empty() {
        return Err(CertificateLoadError::Empty {
            kind,
            path: path.to_path_buf(),
        });
    }
    Ok(certs)
}

fn load_private_key(path: &Path) -> Result<PrivateKeyDer<'static>, CertificateLoadError> {
    let mut reader = open(path, "private key")?;
    rustls_pemfile::private_key(&mut reader)
        .map_err(|e| CertificateLoadError::Parse {
            kind: "private key",
            path: path.to_path_buf(),
            message: e.to_string(),
        })?
        .ok_or_else(|| CertificateLoadError::Empty {
            kind: "private key",
            path: path.to_path_buf(),
        })
}

fn load_roots(path: &Path) -> Result<RootCertStore, CertificateLoadError> {
    let mut roots = RootCertStore::empty();
    for cert in load_certs(path, "CA bundle")? {
        roots
            .add(cert)
            .map_err(|e| CertificateLoadError::Invalid(format!("CA certificate in {}: {}", path.display(), e)))?;
    }
    Ok(roots)
}
