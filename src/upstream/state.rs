//! Connection state machine for the single persistent upstream connection.
//!
//! # States
//! - Up: a handle is present and assumed healthy
//! - Down: no handle (never built, torn down after failure, or shut down)
//!
//! # State Transitions
//! ```text
//! Down → Up:   connect succeeds (eagerly at startup, or inline on the
//!              request path under FailAndReconnect)
//! Down → Down: connect fails
//! Up → Down:   a request observes a transport error
//! ```
//!
//! # Design Decisions
//! - One tokio mutex serializes every use of the handle; a lease holds it
//!   for the whole request/response exchange
//! - Waiting for that lock is bounded; a request queued too long is refused
//!   with `Busy` while the machine stays `Up`
//! - A broken handle is closed and removed before the lease is released
//! - The failing request never reconnects; only the next one may
//! - No background timer: reconnects happen only on the request path

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::fmt;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tokio::sync::{Mutex, MutexGuard};

use crate::config::{ReconnectPolicy, TlsConfig};
use crate::error::{ConnectError, TransportError};
use crate::net::TlsIdentity;
use crate::observability::metrics;
use crate::resilience::timeouts::{within, Deadline};
use crate::upstream::handle::{ConnectOptions, ConnectionId, UpstreamHandle, UpstreamResponse};

/// Why the machine is `Down`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownReason {
    /// The eager startup connect failed (or was never attempted).
    NeverConnected(String),
    /// An established connection failed mid-session.
    Failed(String),
    /// An inline reconnect attempt failed.
    ReconnectFailed(String),
    /// The machine was shut down.
    ShutDown,
    /// Earlier requests held the connection for the whole queue wait. Not a
    /// state change; the connection stays up.
    Busy(Duration),
}

impl fmt::Display for DownReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DownReason::NeverConnected(e) => write!(f, "never connected: {}", e),
            DownReason::Failed(e) => write!(f, "connection failed: {}", e),
            DownReason::ReconnectFailed(e) => write!(f, "reconnect failed: {}", e),
            DownReason::ShutDown => write!(f, "shut down"),
            DownReason::Busy(waited) => write!(f, "connection busy for {:?} serving earlier requests", waited),
        }
    }
}

/// No connection could be handed out.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("upstream unavailable ({reason})")]
pub struct Unavailable {
    pub reason: DownReason,
}

/// Builds new handles. Holds the loaded identity, or reloads it from disk
/// before each reconnect when configured to.
#[derive(Debug)]
pub struct Connector {
    options: ConnectOptions,
    identity: Option<Arc<TlsIdentity>>,
    reload_from: Option<TlsConfig>,
}

impl Connector {
    pub fn new(options: ConnectOptions, identity: Option<Arc<TlsIdentity>>) -> Self {
        Self {
            options,
            identity,
            reload_from: None,
        }
    }

    /// Re-read the identity from `tls` before every reconnect (mTLS only).
    pub fn reload_identity_from(mut self, tls: TlsConfig) -> Self {
        self.reload_from = Some(tls);
        self
    }

    pub fn options(&self) -> &ConnectOptions {
        &self.options
    }

    pub fn is_mtls(&self) -> bool {
        self.identity.is_some()
    }

    async fn connect(&self, reconnect: bool) -> Result<UpstreamHandle, ConnectError> {
        let identity = match (&self.identity, &self.reload_from) {
            (Some(_), Some(tls)) if reconnect => {
                tracing::info!("Reloading TLS identity before reconnect");
                Some(Arc::new(TlsIdentity::from_config(tls, &self.options.host)?))
            }
            (identity, _) => identity.clone(),
        };
        UpstreamHandle::connect(&self.options, identity).await
    }
}

/// Serializable snapshot of the machine.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ConnectionStatus {
    pub state: &'static str,
    pub policy: String,
    pub mode: &'static str,
    pub remote: String,
    pub connection_id: Option<u64>,
    pub connect_attempts: u64,
    pub connects_succeeded: u64,
    pub transport_failures: u64,
    pub requests_forwarded: u64,
    pub down_reason: Option<String>,
}

#[derive(Debug, Default)]
struct Counters {
    connect_attempts: AtomicU64,
    connects_succeeded: AtomicU64,
    transport_failures: AtomicU64,
    requests_forwarded: AtomicU64,
}

#[derive(Debug)]
struct Slot {
    handle: Option<UpstreamHandle>,
    shut_down: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Attempt {
    Initial,
    Reconnect,
}

/// Owner of the one upstream connection.
#[derive(Debug)]
pub struct ConnectionStateMachine {
    policy: ReconnectPolicy,
    connector: Connector,
    slot: Mutex<Slot>,
    up: AtomicBool,
    current_id: AtomicU64,
    down_reason: StdMutex<Option<DownReason>>,
    counters: Counters,
}

impl ConnectionStateMachine {
    /// A machine in `Down` that has not attempted to connect yet.
    pub fn new(policy: ReconnectPolicy, connector: Connector) -> Self {
        metrics::set_upstream_up(false);
        Self {
            policy,
            connector,
            slot: Mutex::new(Slot {
                handle: None,
                shut_down: false,
            }),
            up: AtomicBool::new(false),
            current_id: AtomicU64::new(0),
            down_reason: StdMutex::new(Some(DownReason::NeverConnected("not attempted".into()))),
            counters: Counters::default(),
        }
    }

    /// Build a machine and perform the eager initial connect.
    #[cfg(test)]
    pub(crate) async fn start(policy: ReconnectPolicy, connector: Connector) -> Self {
        let machine = Self::new(policy, connector);
        // Outcome is recorded in the machine's status; callers wanting the
        // error use `connect_initial` directly.
        let _ = machine.connect_initial().await;
        machine
    }

    /// The eager startup connect. Must be called before serving requests.
    pub async fn connect_initial(&self) -> Result<ConnectionId, ConnectError> {
        let mut slot = self.slot.lock().await;
        if let Some(handle) = &slot.handle {
            return Ok(handle.id());
        }
        match self.try_connect(&mut slot, Attempt::Initial).await {
            Ok(id) => Ok(id),
            Err(e) => {
                tracing::error!(
                    policy = %self.policy,
                    error = %e,
                    "Initial upstream connection failed"
                );
                Err(e)
            }
        }
    }

    /// Obtain exclusive use of the live connection.
    ///
    /// When `Down`, FailPermanent refuses immediately; FailAndReconnect makes
    /// exactly one connect attempt first. Gives up with `Busy` if the lock is
    /// not free within the queue timeout.
    pub async fn acquire(&self) -> Result<ConnectionLease<'_>, Unavailable> {
        let queue_timeout = self.connector.options().queue_timeout;
        let mut slot = match within(queue_timeout, self.slot.lock()).await {
            Deadline::Completed(slot) => slot,
            Deadline::Elapsed(waited) => {
                tracing::warn!(waited = ?waited, "Upstream connection busy, request not queued further");
                return Err(Unavailable { reason: DownReason::Busy(waited) });
            }
        };

        if slot.handle.is_none() {
            if slot.shut_down {
                return Err(Unavailable { reason: DownReason::ShutDown });
            }
            match self.policy {
                ReconnectPolicy::FailPermanent => {
                    return Err(Unavailable { reason: self.current_down_reason() });
                }
                ReconnectPolicy::FailAndReconnect => {
                    tracing::warn!(previous = %self.current_down_reason(), "Upstream connection down, reconnecting");
                    if self.try_connect(&mut slot, Attempt::Reconnect).await.is_err() {
                        return Err(Unavailable { reason: self.current_down_reason() });
                    }
                }
            }
        }

        Ok(ConnectionLease { slot, machine: self })
    }

    async fn try_connect(&self, slot: &mut Slot, attempt: Attempt) -> Result<ConnectionId, ConnectError> {
        self.counters.connect_attempts.fetch_add(1, Ordering::Relaxed);

        match self.connector.connect(attempt == Attempt::Reconnect).await {
            Ok(handle) => {
                let id = handle.id();
                slot.handle = Some(handle);
                self.counters.connects_succeeded.fetch_add(1, Ordering::Relaxed);
                self.current_id.store(id.as_u64(), Ordering::Relaxed);
                self.up.store(true, Ordering::SeqCst);
                *self.down_reason.lock().unwrap_or_else(|e| e.into_inner()) = None;
                metrics::record_connect("success");
                metrics::set_upstream_up(true);
                tracing::info!(connection_id = %id, attempt = ?attempt, "Upstream is up");
                Ok(id)
            }
            Err(e) => {
                let reason = match attempt {
                    Attempt::Initial => DownReason::NeverConnected(e.to_string()),
                    Attempt::Reconnect => DownReason::ReconnectFailed(e.to_string()),
                };
                self.mark_down(reason);
                metrics::record_connect("failure");
                tracing::warn!(attempt = ?attempt, error = %e, "Upstream connect failed");
                Err(e)
            }
        }
    }

    fn mark_down(&self, reason: DownReason) {
        self.up.store(false, Ordering::SeqCst);
        self.current_id.store(0, Ordering::Relaxed);
        *self.down_reason.lock().unwrap_or_else(|e| e.into_inner()) = Some(reason);
        metrics::set_upstream_up(false);
    }

    fn current_down_reason(&self) -> DownReason {
        self.down_reason
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
            .unwrap_or_else(|| DownReason::NeverConnected("unknown".into()))
    }

    /// Close the live connection and refuse all further use.
    pub async fn shutdown(&self) {
        let mut slot = self.slot.lock().await;
        slot.shut_down = true;
        if let Some(mut handle) = slot.handle.take() {
            handle.close();
        }
        self.mark_down(DownReason::ShutDown);
        tracing::info!("Upstream connection state machine shut down");
    }

    pub fn is_up(&self) -> bool {
        self.up.load(Ordering::SeqCst)
    }

    /// `"mTLS"` or `"PLAINTEXT"`.
    pub fn mode(&self) -> &'static str {
        if self.connector.is_mtls() { "mTLS" } else { "PLAINTEXT" }
    }

    /// Lock-free snapshot; never waits behind an in-flight request.
    pub fn status(&self) -> ConnectionStatus {
        let id = self.current_id.load(Ordering::Relaxed);
        ConnectionStatus {
            state: if self.is_up() { "up" } else { "down" },
            policy: self.policy.to_string(),
            mode: self.mode(),
            remote: self.connector.options().address(),
            connection_id: (id != 0).then_some(id),
            connect_attempts: self.counters.connect_attempts.load(Ordering::Relaxed),
            connects_succeeded: self.counters.connects_succeeded.load(Ordering::Relaxed),
            transport_failures: self.counters.transport_failures.load(Ordering::Relaxed),
            requests_forwarded: self.counters.requests_forwarded.load(Ordering::Relaxed),
            down_reason: self
                .down_reason
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .as_ref()
                .map(ToString::to_string),
        }
    }
}

/// Exclusive use of the live connection. Holding a lease holds the machine's
/// lock, so no other request can touch the socket.
pub struct ConnectionLease<'a> {
    slot: MutexGuard<'a, Slot>,
    machine: &'a ConnectionStateMachine,
}

impl ConnectionLease<'_> {
    pub fn connection_id(&self) -> Option<ConnectionId> {
        self.slot.handle.as_ref().map(|h| h.id())
    }

    pub async fn send_and_receive(&mut self, request_id: &str) -> Result<UpstreamResponse, TransportError> {
        let timeout = self.machine.connector.options().request_timeout;
        let handle = self.slot.handle.as_mut().ok_or(TransportError::NotConnected)?;
        let response = handle.send_and_receive(request_id, timeout).await?;
        self.machine
            .counters
            .requests_forwarded
            .fetch_add(1, Ordering::Relaxed);
        Ok(response)
    }

    /// Record a transport failure: close the handle and go `Down` before the
    /// lock is released.
    pub fn fail(mut self, cause: &TransportError) {
        let connection_id = self.connection_id();
        if let Some(mut handle) = self.slot.handle.take() {
            handle.close();
        }
        self.machine
            .counters
            .transport_failures
            .fetch_add(1, Ordering::Relaxed);
        self.machine.mark_down(DownReason::Failed(cause.to_string()));
        metrics::record_transport_failure();

        match self.machine.policy {
            ReconnectPolicy::FailPermanent => tracing::error!(
                connection_id = ?connection_id.map(|id| id.to_string()),
                error = %cause,
                "Persistent upstream connection FAILED; it will NOT be rebuilt. All further requests are dropped until restart"
            ),
            ReconnectPolicy::FailAndReconnect => tracing::warn!(
                connection_id = ?connection_id.map(|id| id.to_string()),
                error = %cause,
                "Upstream connection failed; the next request will reconnect"
            ),
        }
    }
}
