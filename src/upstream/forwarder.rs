//! Request forwarding over the shared upstream connection.
//!
//! # Responsibilities
//! - Acquire a lease from the state machine (applying its policy)
//! - Send the request and collect the backend answer
//! - Convert every failure into a [`ForwardOutcome`]; nothing escapes as an
//!   error or a panic
//!
//! # Design Decisions
//! - A terminal transport error fails the lease before it is dropped, so the
//!   next request already sees `Down`
//! - `forward_detached` runs the exchange in its own task; an inbound request
//!   that goes away does not cancel the upstream call halfway

use std::sync::Arc;
use std::time::Instant;

use hyper::StatusCode;

use crate::error::TransportError;
use crate::http::request::RequestEnvelope;
use crate::observability::metrics;
use crate::upstream::state::{ConnectionStateMachine, DownReason};

/// Result of one forward attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ForwardOutcome {
    /// The backend answered (any status).
    Success {
        status: StatusCode,
        body: String,
        /// `X-Request-ID` echoed by the backend.
        request_id: Option<String>,
    },
    /// No connection could be obtained; nothing was sent.
    UpstreamDown { reason: DownReason },
    /// The connection broke during this request.
    TransportError(TransportError),
}

impl ForwardOutcome {
    /// Metric label.
    pub fn label(&self) -> &'static str {
        match self {
            ForwardOutcome::Success { status, .. } if status.is_success() => "success",
            ForwardOutcome::Success { .. } => "backend_error",
            ForwardOutcome::UpstreamDown { reason: DownReason::Busy(_) } => "upstream_busy",
            ForwardOutcome::UpstreamDown { .. } => "upstream_down",
            ForwardOutcome::TransportError(_) => "transport_error",
        }
    }
}

pub struct Forwarder {
    machine: Arc<ConnectionStateMachine>,
}

impl Forwarder {
    pub fn new(machine: Arc<ConnectionStateMachine>) -> Self {
        Self { machine }
    }

    pub fn machine(&self) -> &Arc<ConnectionStateMachine> {
        &self.machine
    }

    /// `"mTLS"` or `"PLAINTEXT"`, for response bodies.
    pub fn mode(&self) -> &'static str {
        self.machine.mode()
    }

    pub async fn forward(&self, envelope: &RequestEnvelope) -> ForwardOutcome {
        let start = Instant::now();
        let request_id = envelope.request_id.as_str();

        let outcome = match self.machine.acquire().await {
            Err(unavailable) => {
                tracing::warn!(
                    request_id,
                    reason = %unavailable.reason,
                    "Upstream down, request not forwarded"
                );
                ForwardOutcome::UpstreamDown {
                    reason: unavailable.reason,
                }
            }
            Ok(mut lease) => match lease.send_and_receive(request_id).await {
                Ok(response) => {
                    tracing::info!(
                        request_id,
                        status = %response.status,
                        "Upstream responded"
                    );
                    ForwardOutcome::Success {
                        status: response.status,
                        body: response.body,
                        request_id: response.request_id,
                    }
                }
                Err(e) => {
                    tracing::error!(request_id, error = %e, "Upstream request failed");
                    if e.is_terminal() {
                        lease.fail(&e);
                    }
                    ForwardOutcome::TransportError(e)
                }
            },
        };

        metrics::record_forward(outcome.label(), start);
        outcome
    }

    /// Same as [`forward`](Self::forward), but the exchange survives the
    /// caller being dropped.
    pub async fn forward_detached(self: &Arc<Self>, envelope: RequestEnvelope) -> ForwardOutcome {
        let forwarder = Arc::clone(self);
        let task = tokio::spawn(async move { forwarder.forward(&envelope).await });
        match task.await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::error!(error = %e, "Forward task aborted");
                ForwardOutcome::TransportError(TransportError::Closed)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{BackendOptions, BackendServer};
    use crate::config::{ReconnectPolicy, WireFormat};
    use crate::upstream::handle::ConnectOptions;
    use crate::upstream::state::Connector;
    use std::time::Duration;

    async fn forwarder(port: u16, policy: ReconnectPolicy, wire_format: WireFormat) -> Arc<Forwarder> {
        let connector = Connector::new(
            ConnectOptions {
                host: "127.0.0.1".into(),
                port,
                connect_timeout: Duration::from_millis(500),
                request_timeout: Duration::from_millis(500),
                queue_timeout: Duration::from_millis(500),
                wire_format,
                warmup: false,
            },
            None,
        );
        let machine = ConnectionStateMachine::start(policy, connector).await;
        Arc::new(Forwarder::new(Arc::new(machine)))
    }

    #[test]
    fn outcome_labels() {
        let ok = ForwardOutcome::Success {
            status: StatusCode::OK,
            body: String::new(),
            request_id: None,
        };
        let teapot = ForwardOutcome::Success {
            status: StatusCode::IM_A_TEAPOT,
            body: String::new(),
            request_id: None,
        };
        assert_eq!(ok.label(), "success");
        assert_eq!(teapot.label(), "backend_error");
        assert_eq!(
            ForwardOutcome::UpstreamDown { reason: DownReason::ShutDown }.label(),
            "upstream_down"
        );
        assert_eq!(
            ForwardOutcome::UpstreamDown { reason: DownReason::Busy(Duration::from_secs(1)) }.label(),
            "upstream_busy"
        );
        assert_eq!(ForwardOutcome::TransportError(TransportError::Closed).label(), "transport_error");
    }

    #[tokio::test]
    async fn propagates_request_id_in_both_wire_formats() {
        let server = BackendServer::bind("127.0.0.1:0", None, BackendOptions::default())
            .await
            .unwrap();

        for wire_format in [WireFormat::Header, WireFormat::Json] {
            let forwarder = forwarder(server.port(), ReconnectPolicy::FailPermanent, wire_format).await;
            match forwarder.forward(&RequestEnvelope::new("42")).await {
                ForwardOutcome::Success { status, body, request_id } => {
                    assert_eq!(status, StatusCode::OK);
                    assert!(body.contains("ReqID 42"), "body: {body}");
                    assert_eq!(request_id.as_deref(), Some("42"));
                }
                other => panic!("unexpected outcome {other:?}"),
            }
        }
        server.kill().await;
    }

    #[tokio::test]
    async fn non_ascii_request_id_round_trips_in_both_wire_formats() {
        let server = BackendServer::bind("127.0.0.1:0", None, BackendOptions::default())
            .await
            .unwrap();

        for wire_format in [WireFormat::Header, WireFormat::Json] {
            let forwarder = forwarder(server.port(), ReconnectPolicy::FailPermanent, wire_format).await;
            match forwarder.forward(&RequestEnvelope::new("café-1")).await {
                ForwardOutcome::Success { status, body, request_id } => {
                    assert_eq!(status, StatusCode::OK);
                    assert!(body.contains("ReqID café-1."), "{wire_format:?}: {body}");
                    assert_eq!(request_id.as_deref(), Some("café-1"), "{wire_format:?}");
                }
                other => panic!("unexpected outcome {other:?}"),
            }
        }
        server.kill().await;
    }

    #[tokio::test]
    async fn backend_crash_is_transport_error_then_down() {
        let server = BackendServer::bind("127.0.0.1:0", None, BackendOptions::default())
            .await
            .unwrap();
        let forwarder = forwarder(server.port(), ReconnectPolicy::FailPermanent, WireFormat::Header).await;
        assert_eq!(forwarder.forward(&RequestEnvelope::new("1")).await.label(), "success");

        server.kill().await;
        assert!(matches!(
            forwarder.forward(&RequestEnvelope::new("2")).await,
            ForwardOutcome::TransportError(_)
        ));
        assert!(matches!(
            forwarder.forward(&RequestEnvelope::new("3")).await,
            ForwardOutcome::UpstreamDown { reason: DownReason::Failed(_) }
        ));
    }

    #[tokio::test]
    async fn concurrent_forwards_keep_their_own_ids() {
        let server = BackendServer::bind("127.0.0.1:0", None, BackendOptions::default())
            .await
            .unwrap();
        let forwarder = forwarder(server.port(), ReconnectPolicy::FailPermanent, WireFormat::Header).await;

        let mut tasks = Vec::new();
        for i in 0..32 {
            let forwarder = Arc::clone(&forwarder);
            tasks.push(tokio::spawn(async move {
                let id = format!("req-{i}");
                (id.clone(), forwarder.forward_detached(RequestEnvelope::new(id)).await)
            }));
        }

        for task in tasks {
            let (id, outcome) = task.await.unwrap();
            match outcome {
                ForwardOutcome::Success { body, request_id, .. } => {
                    assert!(body.contains(&format!("ReqID {id}.")), "body: {body}");
                    assert_eq!(request_id.as_deref(), Some(id.as_str()));
                }
                other => panic!("unexpected outcome {other:?}"),
            }
        }
        assert_eq!(forwarder.machine().status().requests_forwarded, 32);
        server.kill().await;
    }
}
