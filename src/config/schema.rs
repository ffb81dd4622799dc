//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the relay.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Root configuration for the relay edge.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct RelayConfig {
    /// Inbound listener (bind address, optional TLS).
    pub listener: ListenerConfig,

    /// The single backend reached over the persistent connection.
    pub upstream: UpstreamConfig,

    /// Client identity used for the upstream mTLS hop.
    pub tls: TlsConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Waiting for certificate files at startup.
    pub cert_wait: CertWaitConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    pub admin: AdminConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    pub host: String,

    pub port: u16,

    /// Serve inbound traffic over TLS when set.
    pub tls: Option<ListenerTlsConfig>,

    /// Maximum inbound body size in bytes.
    pub max_body_bytes: usize,
}

impl ListenerConfig {
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            tls: None,
            max_body_bytes: 64 * 1024,
        }
    }
}

/// Server certificate for the inbound listener (PEM).
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ListenerTlsConfig {
    pub cert_path: PathBuf,
    pub key_path: PathBuf,
}

/// What the edge does after the upstream connection breaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconnectPolicy {
    /// Never reconnect; every later request is rejected until restart.
    FailPermanent,
    /// The next request that finds the connection down rebuilds it inline.
    FailAndReconnect,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        ReconnectPolicy::FailPermanent
    }
}

impl fmt::Display for ReconnectPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReconnectPolicy::FailPermanent => write!(f, "fail_permanent"),
            ReconnectPolicy::FailAndReconnect => write!(f, "fail_and_reconnect"),
        }
    }
}

impl FromStr for ReconnectPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "fail_permanent" | "permanent" => Ok(ReconnectPolicy::FailPermanent),
            "fail_and_reconnect" | "reconnect" => Ok(ReconnectPolicy::FailAndReconnect),
            other => Err(format!("unknown reconnect policy '{}'", other)),
        }
    }
}

/// How the correlation id travels to the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WireFormat {
    /// `GET /`, empty body, id in `X-Request-ID` only.
    Header,
    /// `POST /` with `{"request_id": "..."}`.
    Json,
}

impl Default for WireFormat {
    fn default() -> Self {
        WireFormat::Header
    }
}

impl FromStr for WireFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "header" => Ok(WireFormat::Header),
            "json" => Ok(WireFormat::Json),
            other => Err(format!("unknown wire format '{}'", other)),
        }
    }
}

/// Upstream (backend) configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct UpstreamConfig {
    pub host: String,

    pub port: u16,

    /// mTLS when true, plaintext HTTP otherwise.
    pub use_mtls: bool,

    pub policy: ReconnectPolicy,

    pub wire_format: WireFormat,

    /// Send an `INIT` request right after each connect.
    pub warmup: bool,

    /// Re-read certificate files before every reconnect attempt.
    pub reload_identity_on_reconnect: bool,
}

impl UpstreamConfig {
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 8443,
            use_mtls: true,
            policy: ReconnectPolicy::FailPermanent,
            wire_format: WireFormat::Header,
            warmup: false,
            reload_identity_on_reconnect: false,
        }
    }
}

/// Client identity for the upstream hop (PEM files).
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TlsConfig {
    pub cert_path: PathBuf,
    pub key_path: PathBuf,
    pub ca_path: PathBuf,

    /// Name the backend certificate must carry. Defaults to the upstream host.
    pub server_name: Option<String>,
}

impl TlsConfig {
    pub fn server_name_or<'a>(&'a self, host: &'a str) -> &'a str {
        self.server_name.as_deref().unwrap_or(host)
    }

    pub fn paths(&self) -> [&std::path::Path; 3] {
        [&self.cert_path, &self.key_path, &self.ca_path]
    }
}

impl Default for TlsConfig {
    fn default() -> Self {
        Self {
            cert_path: PathBuf::from("certs/client.crt"),
            key_path: PathBuf::from("certs/client.key"),
            ca_path: PathBuf::from("certs/ca.crt"),
            server_name: None,
        }
    }
}

/// Timeout configuration for various operations.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// TCP connect plus TLS handshake, in milliseconds.
    pub connect_ms: u64,

    /// One upstream request/response exchange, in milliseconds.
    pub request_ms: u64,

    /// Wait for the shared connection while earlier requests hold it, in
    /// milliseconds.
    pub queue_ms: u64,

    /// Total inbound request budget in seconds.
    pub inbound_secs: u64,
}

impl TimeoutConfig {
    pub fn connect(&self) -> Duration {
        Duration::from_millis(self.connect_ms)
    }

    pub fn request(&self) -> Duration {
        Duration::from_millis(self.request_ms)
    }

    pub fn queue(&self) -> Duration {
        Duration::from_millis(self.queue_ms)
    }

    pub fn inbound(&self) -> Duration {
        Duration::from_secs(self.inbound_secs)
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect_ms: 1000,
            request_ms: 2000,
            queue_ms: 5000,
            inbound_secs: 30,
        }
    }
}

/// Bounded wait for certificate files to appear (e.g. a secret being mounted).
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CertWaitConfig {
    pub enabled: bool,
    pub interval_ms: u64,
    pub max_wait_ms: u64,
}

impl Default for CertWaitConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval_ms: 3000,
            max_wait_ms: 60_000,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

/// Admin status endpoint configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AdminConfig {
    pub enabled: bool,

    /// API key for authentication (Bearer token).
    pub api_key: String,

    pub bind_address: String,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            // WARNING: This is a placeholder! Change this in production.
            api_key: "CHANGE_ME_IN_PRODUCTION".to_string(),
            bind_address: "127.0.0.1:8081".to_string(),
        }
    }
}
