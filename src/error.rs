//! Error taxonomy for the relay.
//!
//! | Error | When | Effect |
//! |---|---|---|
//! | [`CertificateLoadError`] | startup only | process aborts |
//! | [`ConnectError`] | TCP connect, TLS handshake, warm-up | machine stays `Down` |
//! | [`TransportError`] | mid-session I/O | machine goes `Down` |
//!
//! Certificate errors never reach a request handler. The other two are
//! converted into a [`ForwardOutcome`](crate::upstream::ForwardOutcome) at the
//! forwarder boundary.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::config::loader::ConfigError;

/// Failure to load TLS identity material. Always fatal.
#[derive(Error, Debug)]
pub enum CertificateLoadError {
    #[error("{kind} file not found: {}", path.display())]
    Missing { kind: &'static str, path: PathBuf },

    #[error("failed to read {kind} file {}: {source}", path.display())]
    Io {
        kind: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {kind} file {}: {message}", path.display())]
    Parse {
        kind: &'static str,
        path: PathBuf,
        message: String,
    },

    #[error("no {kind} found in {}", path.display())]
    Empty { kind: &'static str, path: PathBuf },

    #[error("invalid TLS identity: {0}")]
    Invalid(String),

    #[error("certificate material still missing after {waited:?}: {}", path.display())]
    NotAvailable { path: PathBuf, waited: Duration },
}

/// Failure to build a new upstream connection.
#[derive(Error, Debug)]
pub enum ConnectError {
    #[error("connect to {address} timed out after {timeout:?}")]
    Timeout { address: String, timeout: Duration },

    #[error("TCP connect to {address} failed: {source}")]
    Tcp {
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("TLS handshake with {address} failed: {source}")]
    Handshake {
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid TLS server name: {0}")]
    InvalidServerName(String),

    #[error("HTTP/1.1 handshake with {address} failed: {source}")]
    Http {
        address: String,
        #[source]
        source: hyper::Error,
    },

    #[error("warm-up request failed: {0}")]
    Warmup(String),

    #[error("reloading TLS identity failed: {0}")]
    Identity(#[from] CertificateLoadError),
}

/// Failure on an established connection. Terminal for the handle.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("upstream request timed out after {0:?}")]
    Timeout(Duration),

    #[error("upstream connection closed")]
    Closed,

    #[error("handle is not connected")]
    NotConnected,

    #[error("upstream HTTP error: {0}")]
    Http(String),

    #[error("failed to read upstream response body: {0}")]
    Body(String),

    #[error("failed to build upstream request: {0}")]
    Request(String),
}

impl TransportError {
    /// False only for errors raised before anything touched the socket.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TransportError::Request(_))
    }

    pub(crate) fn from_hyper(err: hyper::Error) -> Self {
        if err.is_closed() || err.is_canceled() || err.is_incomplete_message() {
            TransportError::Closed
        } else {
            TransportError::Http(err.to_string())
        }
    }
}

/// Anything that prevents the edge from starting.
#[derive(Error, Debug)]
pub enum StartupError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Certificate(#[from] CertificateLoadError),

    #[error("failed to bind {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
