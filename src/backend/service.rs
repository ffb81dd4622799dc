//! Echo handler of the backend.

use std::time::Duration;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;

use crate::http::request::{body_request_id, header_request_id, header_safe, DEFAULT_REQUEST_ID, X_REQUEST_ID};

/// How the backend answers.
#[derive(Debug, Clone)]
pub struct BackendOptions {
    /// Label in the response body, `"mTLS"` or `"PLAINTEXT"`.
    pub mode: &'static str,
    /// Status of every answer. Anything but 200 exercises the edge's
    /// backend-error path.
    pub status: StatusCode,
    /// Artificial latency before answering.
    pub delay: Option<Duration>,
}

impl Default for BackendOptions {
    fn default() -> Self {
        Self {
            mode: "PLAINTEXT",
            status: StatusCode::OK,
            delay: None,
        }
    }
}

impl BackendOptions {
    pub fn mtls() -> Self {
        Self {
            mode: "mTLS",
            ..Self::default()
        }
    }
}

pub fn router(options: BackendOptions) -> Router {
    Router::new()
        .route("/", get(echo).post(echo))
        .with_state(options)
}

pub fn response_body(mode: &str, request_id: &str) -> String {
    format!("[BACKEND ({mode})]: Received ReqID {request_id}.")
}

/// The JSON body id wins over the header: the body carries the id verbatim
/// in the JSON wire format.
async fn echo(State(options): State<BackendOptions>, headers: HeaderMap, body: Bytes) -> Response {
    let request_id = body_request_id(&body)
        .or_else(|| header_request_id(&headers))
        .unwrap_or_else(|| DEFAULT_REQUEST_ID.to_string());
    tracing::info!(request_id = %request_id, mode = options.mode, "Backend received request");

    if let Some(delay) = options.delay {
        tokio::time::sleep(delay).await;
    }

    let mut response = (options.status, response_body(options.mode, &request_id)).into_response();
    response
        .headers_mut()
        .insert(X_REQUEST_ID, header_safe(&request_id));
    response
}
