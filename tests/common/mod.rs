//! Shared utilities for the integration tests: a throwaway PKI, an mTLS
//! backend and an edge bound to an ephemeral port.

#![allow(dead_code)]

use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use rcgen::{BasicConstraints, Certificate, CertificateParams, DnType, IsCa, KeyPair};
use tempfile::TempDir;
use tokio::net::TcpListener;

use mtls_relay::backend::{BackendOptions, BackendServer};
use mtls_relay::config::{ReconnectPolicy, RelayConfig};
use mtls_relay::lifecycle::{bootstrap, Shutdown};
use mtls_relay::net::tls::mtls_server_config;
use mtls_relay::upstream::ConnectionStateMachine;

/// Certificates written as PEM files into a temp dir.
pub struct Pki {
    _dir: TempDir,
    pub ca: PathBuf,
    pub server_cert: PathBuf,
    pub server_key: PathBuf,
    pub client_cert: PathBuf,
    pub client_key: PathBuf,
    /// Server certificate signed by a CA nobody trusts.
    pub rogue_server_cert: PathBuf,
    pub rogue_server_key: PathBuf,
    /// Client certificate signed by a CA the backend does not trust.
    pub rogue_client_cert: PathBuf,
    pub rogue_client_key: PathBuf,
    /// Server certificate from the trusted CA, issued for `other.example`.
    pub misnamed_server_cert: PathBuf,
    pub misnamed_server_key: PathBuf,
}

struct Authority {
    cert: Certificate,
    key: KeyPair,
}

fn authority(name: &str) -> Authority {
    let key = KeyPair::generate().unwrap();
    let mut params = CertificateParams::new(Vec::<String>::new()).unwrap();
    params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    params.distinguished_name.push(DnType::CommonName, name);
    let cert = params.self_signed(&key).unwrap();
    Authority { cert, key }
}

fn leaf(ca: &Authority, common_name: &str, sans: &[&str]) -> (String, String) {
    let key = KeyPair::generate().unwrap();
    let mut params = CertificateParams::new(sans.iter().map(|s| s.to_string()).collect::<Vec<_>>()).unwrap();
    params.distinguished_name.push(DnType::CommonName, common_name);
    let cert = params.signed_by(&key, &ca.cert, &ca.key).unwrap();
    (cert.pem(), key.serialize_pem())
}

pub fn pki() -> Pki {
    let dir = tempfile::tempdir().unwrap();
    let write = |name: &str, pem: &str| -> PathBuf {
        let path = dir.path().join(name);
        fs::write(&path, pem).unwrap();
        path
    };

    let ca = authority("relay test CA");
    let rogue = authority("rogue CA");

    let (server_cert, server_key) = leaf(&ca, "backend", &["localhost"]);
    let (client_cert, client_key) = leaf(&ca, "edge", &["edge"]);
    let (rogue_server_cert, rogue_server_key) = leaf(&rogue, "impostor", &["localhost"]);
    let (rogue_client_cert, rogue_client_key) = leaf(&rogue, "intruder", &["edge"]);
    let (misnamed_server_cert, misnamed_server_key) = leaf(&ca, "misnamed", &["other.example"]);

    Pki {
        ca: write("ca.crt", &ca.cert.pem()),
        server_cert: write("server.crt", &server_cert),
        server_key: write("server.key", &server_key),
        client_cert: write("client.crt", &client_cert),
        client_key: write("client.key", &client_key),
        rogue_server_cert: write("rogue-server.crt", &rogue_server_cert),
        rogue_server_key: write("rogue-server.key", &rogue_server_key),
        rogue_client_cert: write("rogue-client.crt", &rogue_client_cert),
        rogue_client_key: write("rogue-client.key", &rogue_client_key),
        misnamed_server_cert: write("misnamed-server.crt", &misnamed_server_cert),
        misnamed_server_key: write("misnamed-server.key", &misnamed_server_key),
        _dir: dir,
    }
}

/// mTLS backend presenting `cert`/`key` and trusting `pki.ca` for clients.
pub async fn start_backend_with(pki: &Pki, addr: &str, cert: &Path, key: &Path, options: BackendOptions) -> BackendServer {
    let tls = mtls_server_config(cert, key, &pki.ca).unwrap();
    BackendServer::bind(addr, Some(tls), options).await.unwrap()
}

pub async fn start_backend(pki: &Pki, addr: &str) -> BackendServer {
    start_backend_with(pki, addr, &pki.server_cert, &pki.server_key, BackendOptions::mtls()).await
}

/// Edge config talking mTLS to `127.0.0.1:<backend_port>` as `localhost`.
pub fn relay_config(pki: &Pki, backend_port: u16, policy: ReconnectPolicy) -> RelayConfig {
    let mut config = RelayConfig::default();
    config.listener.host = "127.0.0.1".into();
    config.listener.port = 0;
    config.upstream.host = "127.0.0.1".into();
    config.upstream.port = backend_port;
    config.upstream.policy = policy;
    config.tls.cert_path = pki.client_cert.clone();
    config.tls.key_path = pki.client_key.clone();
    config.tls.ca_path = pki.ca.clone();
    config.tls.server_name = Some("localhost".into());
    config
}

pub struct Edge {
    pub addr: SocketAddr,
    pub machine: Arc<ConnectionStateMachine>,
    pub shutdown: Shutdown,
}

impl Edge {
    pub fn url(&self) -> String {
        format!("http://{}/", self.addr)
    }
}

/// Bootstrap the relay (eager connect included) and serve it on an
/// ephemeral port.
pub async fn start_edge(config: RelayConfig) -> Edge {
    let relay = bootstrap(config).await.unwrap();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let shutdown = Shutdown::new();
    let machine = Arc::clone(&relay.machine);
    let server = relay.edge_server();
    let signal = shutdown.subscribe();
    tokio::spawn(async move {
        let _ = server.run(listener, signal).await;
    });
    tokio::time::sleep(Duration::from_millis(50)).await;

    Edge { addr, machine, shutdown }
}

pub fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .no_proxy()
        .timeout(Duration::from_secs(10))
        .build()
        .unwrap()
}

/// GET through the edge with an `X-Request-ID`; returns status and body.
pub async fn get(client: &reqwest::Client, edge: &Edge, request_id: &str) -> (u16, String) {
    let res = client
        .get(edge.url())
        .header("X-Request-ID", request_id)
        .send()
        .await
        .expect("edge unreachable");
    let status = res.status().as_u16();
    (status, res.text().await.unwrap())
}
