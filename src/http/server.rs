//! Edge HTTP server.
//!
//! # Responsibilities
//! - Create the Axum router with the single relay route
//! - Wire up middleware (tracing, inbound timeout, body limit)
//! - Serve on a plain TCP listener or through axum-server's rustls acceptor
//! - Stop accepting when the shutdown signal fires

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Bytes,
    error_handling::HandleErrorLayer,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    BoxError, Router,
};
use axum_server::tls_rustls::RustlsConfig;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower::ServiceBuilder;
use tower_http::{limit::RequestBodyLimitLayer, trace::TraceLayer};

use crate::config::RelayConfig;
use crate::http::request::{extract_request_id, header_safe, RequestEnvelope, X_REQUEST_ID};
use crate::http::response::{deadline_response, outcome_response};
use crate::upstream::Forwarder;

/// Grace period for in-flight requests on the TLS listener.
const TLS_DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub forwarder: Arc<Forwarder>,
}

/// Inbound side of the relay.
pub struct EdgeServer {
    router: Router,
}

impl EdgeServer {
    pub fn new(config: &RelayConfig, forwarder: Arc<Forwarder>) -> Self {
        let state = AppState { forwarder };
        Self {
            router: Self::build_router(config, state),
        }
    }

    /// Build the Axum router with all middleware layers.
    fn build_router(config: &RelayConfig, state: AppState) -> Router {
        let mode = state.forwarder.mode();
        let inbound = config.timeouts.inbound();

        Router::new()
            .route("/", get(relay_handler).post(relay_handler))
            .with_state(state)
            .layer(RequestBodyLimitLayer::new(config.listener.max_body_bytes))
            .layer(
                ServiceBuilder::new()
                    .layer(HandleErrorLayer::new(move |headers: HeaderMap, err: BoxError| async move {
                        inbound_error(&headers, err, mode, inbound)
                    }))
                    .timeout(inbound),
            )
            .layer(TraceLayer::new_for_http())
    }

    pub fn router(&self) -> Router {
        self.router.clone()
    }

    /// Serve plaintext HTTP until `shutdown` fires.
    pub async fn run(
        self,
        listener: TcpListener,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, tls = false, "Edge listening");

        axum::serve(listener, self.router)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
            })
            .await?;

        tracing::info!("Edge server stopped");
        Ok(())
    }

    /// Serve HTTPS on `addr` until `shutdown` fires.
    pub async fn run_tls(
        self,
        addr: SocketAddr,
        tls: RustlsConfig,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), std::io::Error> {
        let handle = axum_server::Handle::new();
        let signal = handle.clone();
        tokio::spawn(async move {
            let _ = shutdown.recv().await;
            signal.graceful_shutdown(Some(TLS_DRAIN_TIMEOUT));
        });

        tracing::info!(address = %addr, tls = true, "Edge listening");
        axum_server::bind_rustls(addr, tls)
            .handle(handle)
            .serve(self.router.into_make_service())
            .await?;

        tracing::info!("Edge server stopped");
        Ok(())
    }
}

/// Relay one inbound request to the backend.
async fn relay_handler(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> Response {
    let envelope = RequestEnvelope::from_parts(&headers, body);
    let request_id = envelope.request_id.clone();
    tracing::debug!(request_id = %request_id, "Relaying request");

    let outcome = state.forwarder.forward_detached(envelope).await;
    outcome_response(outcome, &request_id, state.forwarder.mode())
}

/// Map a middleware error to a response. The body is gone by now, so only
/// the header id can be echoed.
fn inbound_error(headers: &HeaderMap, err: BoxError, mode: &str, limit: Duration) -> Response {
    let request_id = extract_request_id(headers, &[]);
    if err.is::<tower::timeout::error::Elapsed>() {
        tracing::warn!(request_id = %request_id, limit = ?limit, "Inbound deadline elapsed");
        return deadline_response(&request_id, mode, limit);
    }

    tracing::error!(request_id = %request_id, error = %err, "Inbound middleware failed");
    let mut response = (StatusCode::INTERNAL_SERVER_ERROR, format!("Internal error: {err}")).into_response();
    response
        .headers_mut()
        .insert(X_REQUEST_ID, header_safe(&request_id));
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{BackendOptions, BackendServer};
    use crate::config::ReconnectPolicy;
    use crate::http::request::X_REQUEST_ID;
    use crate::upstream::{ConnectOptions, ConnectionStateMachine, Connector};
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use tower::ServiceExt;

    async fn edge_for(port: u16) -> Router {
        let mut config = RelayConfig::default();
        config.upstream.host = "127.0.0.1".into();
        config.upstream.port = port;
        edge_with(config).await
    }

    async fn edge_with(config: RelayConfig) -> Router {
        let connector = Connector::new(ConnectOptions::from_config(&config), None);
        let machine = ConnectionStateMachine::start(ReconnectPolicy::FailPermanent, connector).await;
        let forwarder = Arc::new(Forwarder::new(Arc::new(machine)));
        EdgeServer::new(&config, forwarder).router()
    }

    #[tokio::test]
    async fn relays_json_body_id() {
        let backend = BackendServer::bind("127.0.0.1:0", None, BackendOptions::default())
            .await
            .unwrap();
        let router = edge_for(backend.port()).await;

        let response = router
            .oneshot(
                Request::post("/")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"request_id": 42}"#))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[X_REQUEST_ID], "42");
        let body = to_bytes(response.into_body(), 4096).await.unwrap();
        assert_eq!(
            String::from_utf8_lossy(&body),
            "[EDGE (PLAINTEXT)]: Forwarded ReqID 42. Got: ([BACKEND (PLAINTEXT)]: Received ReqID 42.)"
        );
        backend.kill().await;
    }

    #[tokio::test]
    async fn unreachable_backend_gives_503_with_id() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let response = edge_for(port)
            .await
            .oneshot(Request::get("/").header(X_REQUEST_ID, "abc").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(response.headers()[X_REQUEST_ID], "abc");
    }

    #[tokio::test]
    async fn other_routes_are_not_found() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let response = edge_for(port)
            .await
            .oneshot(Request::get("/other").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn inbound_deadline_answers_503_with_body() {
        let backend = BackendServer::bind(
            "127.0.0.1:0",
            None,
            BackendOptions {
                delay: Some(Duration::from_millis(1500)),
                ..BackendOptions::default()
            },
        )
        .await
        .unwrap();

        let mut config = RelayConfig::default();
        config.upstream.host = "127.0.0.1".into();
        config.upstream.port = backend.port();
        config.timeouts.inbound_secs = 1;
        config.timeouts.queue_ms = 500;
        config.timeouts.request_ms = 3000;

        let response = edge_with(config)
            .await
            .oneshot(Request::get("/").header(X_REQUEST_ID, "slow-1").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(response.headers()[X_REQUEST_ID], "slow-1");
        let body = to_bytes(response.into_body(), 4096).await.unwrap();
        let body = String::from_utf8_lossy(&body);
        assert!(
            body.starts_with("503 Error: PLAINTEXT connection from edge to backend is down."),
            "{body}"
        );
        assert!(body.contains("inbound deadline"), "{body}");
        backend.kill().await;
    }
}
