//! A single upstream connection (plain HTTP/1.1 or HTTP/1.1 over mTLS).
//!
//! # Responsibilities
//! - Establish the transport (TCP, optional TLS handshake, HTTP/1.1 handshake)
//! - Send one request and wait for its response
//! - Track liveness (Unconnected → Connected → Failed)
//!
//! # Design Decisions
//! - No internal retry: any failed I/O call permanently invalidates the handle
//! - Not safe for concurrent use; the state machine serializes access
//! - The hyper connection driver runs in its own task and is aborted on close

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::client::conn::http1::{self, SendRequest};
use hyper::header;
use hyper::{Method, Request, StatusCode};
use hyper_util::rt::TokioIo;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;

use crate::config::{RelayConfig, WireFormat};
use crate::error::{ConnectError, TransportError};
use crate::http::request::{header_safe, X_REQUEST_ID};
use crate::net::TlsIdentity;
use crate::resilience::timeouts::bounded;

/// Correlation id used by the warm-up probe.
pub const WARMUP_REQUEST_ID: &str = "INIT";

/// Global atomic counter for connection IDs.
static CONNECTION_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Process-unique identifier for an upstream connection, for logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    fn next() -> Self {
        Self(CONNECTION_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "upstream-{}", self.0)
    }
}

/// Socket state for lifecycle tracking.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketState {
    /// Closed (or never opened).
    Unconnected,
    /// Transport established and not yet observed broken.
    Connected,
    /// A request failed; the handle must be discarded.
    Failed,
}

/// Where and how to connect.
#[derive(Debug, Clone)]
pub struct ConnectOptions {
    pub host: String,
    pub port: u16,
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
    /// Longest a request waits for the connection while others use it.
    pub queue_timeout: Duration,
    pub wire_format: WireFormat,
    pub warmup: bool,
}

impl ConnectOptions {
    pub fn from_config(config: &RelayConfig) -> Self {
        Self {
            host: config.upstream.host.clone(),
            port: config.upstream.port,
            connect_timeout: config.timeouts.connect(),
            request_timeout: config.timeouts.request(),
            queue_timeout: config.timeouts.queue(),
            wire_format: config.upstream.wire_format,
            warmup: config.upstream.warmup,
        }
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Backend answer to one forwarded request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpstreamResponse {
    pub status: StatusCode,
    pub body: String,
    /// `X-Request-ID` echoed by the backend, if any.
    pub request_id: Option<String>,
}

/// One logical connection to the backend.
pub struct UpstreamHandle {
    id: ConnectionId,
    state: SocketState,
    remote: String,
    tls: bool,
    wire_format: WireFormat,
    sender: Option<SendRequest<Full<Bytes>>>,
    driver: Option<JoinHandle<()>>,
}

impl fmt::Debug for UpstreamHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UpstreamHandle")
            .field("id", &self.id)
            .field("state", &self.state)
            .field("remote", &self.remote)
            .field("tls", &self.tls)
            .finish()
    }
}

impl UpstreamHandle {
    /// Open a connection. mTLS when `identity` is given, plaintext otherwise.
    ///
    /// TCP connect and both handshakes share the connect timeout. When the
    /// options ask for a warm-up, one `INIT` request is sent and a failure
    /// there fails the whole connect.
    pub async fn connect(
        options: &ConnectOptions,
        identity: Option<Arc<TlsIdentity>>,
    ) -> Result<Self, ConnectError> {
        let address = options.address();
        let id = ConnectionId::next();
        let tls = identity.is_some();

        tracing::debug!(connection_id = %id, address = %address, tls, "Connecting to upstream");

        let (sender, driver) = bounded(
            options.connect_timeout,
            establish(&address, identity.as_deref(), id),
            |timeout| ConnectError::Timeout {
                address: address.clone(),
                timeout,
            },
        )
        .await?;

        let mut handle = Self {
            id,
            state: SocketState::Connected,
            remote: address,
            tls,
            wire_format: options.wire_format,
            sender: Some(sender),
            driver: Some(driver),
        };

        tracing::info!(
            connection_id = %handle.id,
            address = %handle.remote,
            mode = handle.mode(),
            "Upstream connection established"
        );

        if options.warmup {
            handle.warm_up(options.request_timeout).await?;
        }

        Ok(handle)
    }

    async fn warm_up(&mut self, timeout: Duration) -> Result<(), ConnectError> {
        match self.send_and_receive(WARMUP_REQUEST_ID, timeout).await {
            Ok(response) if response.status.is_success() => {
                tracing::info!(
                    connection_id = %self.id,
                    status = %response.status,
                    "Initial upstream request OK"
                );
                Ok(())
            }
            Ok(response) => {
                self.close();
                Err(ConnectError::Warmup(format!("backend answered {}", response.status)))
            }
            Err(e) => {
                self.close();
                Err(ConnectError::Warmup(e.to_string()))
            }
        }
    }

    /// Send one request carrying `request_id` and wait for the full response.
    ///
    /// Every error except [`TransportError::Request`] leaves the handle
    /// `Failed`.
    pub async fn send_and_receive(
        &mut self,
        request_id: &str,
        timeout: Duration,
    ) -> Result<UpstreamResponse, TransportError> {
        if self.state != SocketState::Connected {
            return Err(TransportError::NotConnected);
        }
        let request = build_request(&self.remote, self.wire_format, request_id)?;
        let sender = self.sender.as_mut().ok_or(TransportError::NotConnected)?;

        let result = bounded(timeout, exchange(sender, request), TransportError::Timeout).await;
        if let Err(e) = &result {
            tracing::debug!(connection_id = %self.id, error = %e, "Upstream exchange failed");
            self.state = SocketState::Failed;
        }
        result
    }

    /// Best-effort shutdown. Never fails.
    pub fn close(&mut self) {
        if let Some(driver) = self.driver.take() {
            driver.abort();
        }
        if self.sender.take().is_some() {
            tracing::debug!(connection_id = %self.id, previous = ?self.state, "Upstream connection closed");
        }
        self.state = SocketState::Unconnected;
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn state(&self) -> SocketState {
        self.state
    }

    pub fn mode(&self) -> &'static str {
        if self.tls { "mTLS" } else { "PLAINTEXT" }
    }
}

impl Drop for UpstreamHandle {
    fn drop(&mut self) {
        if let Some(driver) = self.driver.take() {
            driver.abort();
        }
    }
}

async fn establish(
    address: &str,
    identity: Option<&TlsIdentity>,
    id: ConnectionId,
) -> Result<(SendRequest<Full<Bytes>>, JoinHandle<()>), ConnectError> {
    let tcp = TcpStream::connect(address)
        .await
        .map_err(|source| ConnectError::Tcp {
            address: address.to_string(),
            source,
        })?;
    let _ = tcp.set_nodelay(true);

    match identity {
        Some(identity) => {
            let stream = identity
                .connector()
                .connect(identity.server_name(), tcp)
                .await
                .map_err(|source| ConnectError::Handshake {
                    address: address.to_string(),
                    source,
                })?;
            http_handshake(stream, address, id).await
        }
        None => http_handshake(tcp, address, id).await,
    }
}

async fn http_handshake<S>(
    stream: S,
    address: &str,
    id: ConnectionId,
) -> Result<(SendRequest<Full<Bytes>>, JoinHandle<()>), ConnectError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (sender, conn) = http1::handshake(TokioIo::new(stream))
        .await
        .map_err(|source| ConnectError::Http {
            address: address.to_string(),
            source,
        })?;

    let driver = tokio::spawn(async move {
        match conn.await {
            Ok(()) => tracing::debug!(connection_id = %id, "Upstream connection closed by peer"),
            Err(e) => tracing::debug!(connection_id = %id, error = %e, "Upstream connection terminated"),
        }
    });

    Ok((sender, driver))
}

fn build_request(
    remote: &str,
    wire_format: WireFormat,
    request_id: &str,
) -> Result<Request<Full<Bytes>>, TransportError> {
    let builder = Request::builder()
        .uri("/")
        .header(header::HOST, remote)
        .header(X_REQUEST_ID, header_safe(request_id));

    let request = match wire_format {
        WireFormat::Header => builder.method(Method::GET).body(Full::new(Bytes::new())),
        WireFormat::Json => {
            let payload = serde_json::to_vec(&serde_json::json!({ "request_id": request_id }))
                .map_err(|e| TransportError::Request(e.to_string()))?;
            builder
                .method(Method::POST)
                .header(header::CONTENT_TYPE, "application/json")
                .body(Full::new(Bytes::from(payload)))
        }
    };
    request.map_err(|e| TransportError::Request(e.to_string()))
}

async fn exchange(
    sender: &mut SendRequest<Full<Bytes>>,
    request: Request<Full<Bytes>>,
) -> Result<UpstreamResponse, TransportError> {
    sender.ready().await.map_err(TransportError::from_hyper)?;
    let response = sender
        .send_request(request)
        .await
        .map_err(TransportError::from_hyper)?;

    let status = response.status();
    let request_id = response
        .headers()
        .get(X_REQUEST_ID)
        .and_then(|v| std::str::from_utf8(v.as_bytes()).ok())
        .map(str::to_string);
    let body = response
        .into_body()
        .collect()
        .await
        .map_err(|e| TransportError::Body(e.to_string()))?
        .to_bytes();

    Ok(UpstreamResponse {
        status,
        body: String::from_utf8_lossy(&body).into_owned(),
        request_id,
    })
}
