//! Outcome-to-response mapping.
//!
//! | Outcome | Status | Body |
//! |---|---|---|
//! | backend 200 | 200 | `[EDGE (<mode>)]: Forwarded ReqID <id>. Got: (<backend body>)` |
//! | backend other | 500 | `Error from backend: <status>` |
//! | upstream down / busy / transport error | 503 | `503 Error: <mode> connection from edge to backend is down. (<reason>)` |
//! | inbound deadline elapsed | 503 | same, reason names the deadline |
//!
//! Every response echoes `X-Request-ID`.

use std::time::Duration;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use crate::http::request::{header_safe, X_REQUEST_ID};
use crate::upstream::ForwardOutcome;

pub fn outcome_response(outcome: ForwardOutcome, request_id: &str, mode: &str) -> Response {
    let (status, body) = match outcome {
        ForwardOutcome::Success { status, body, .. } if status == StatusCode::OK => (
            StatusCode::OK,
            format!("[EDGE ({mode})]: Forwarded ReqID {request_id}. Got: ({body})"),
        ),
        ForwardOutcome::Success { status, .. } => (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Error from backend: {}", status.as_u16()),
        ),
        ForwardOutcome::UpstreamDown { reason } => (
            StatusCode::SERVICE_UNAVAILABLE,
            down_message(mode, &reason.to_string()),
        ),
        ForwardOutcome::TransportError(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            down_message(mode, &e.to_string()),
        ),
    };

    let mut response = (status, body).into_response();
    response
        .headers_mut()
        .insert(X_REQUEST_ID, header_safe(request_id));
    response
}

/// Answer for a request that ran past the inbound deadline.
pub fn deadline_response(request_id: &str, mode: &str, limit: Duration) -> Response {
    let reason = format!("no answer within the {limit:?} inbound deadline");
    let mut response = (StatusCode::SERVICE_UNAVAILABLE, down_message(mode, &reason)).into_response();
    response
        .headers_mut()
        .insert(X_REQUEST_ID, header_safe(request_id));
    response
}

fn down_message(mode: &str, reason: &str) -> String {
    format!("503 Error: {mode} connection from edge to backend is down. ({reason})")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransportError;
    use crate::upstream::DownReason;
    use axum::body::to_bytes;

    async fn body_of(response: Response) -> String {
        let bytes = to_bytes(response.into_body(), 4096).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn backend_ok_is_wrapped() {
        let outcome = ForwardOutcome::Success {
            status: StatusCode::OK,
            body: "[BACKEND (mTLS)]: Received ReqID 42.".into(),
            request_id: Some("42".into()),
        };
        let response = outcome_response(outcome, "42", "mTLS");
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[X_REQUEST_ID], "42");
        assert_eq!(
            body_of(response).await,
            "[EDGE (mTLS)]: Forwarded ReqID 42. Got: ([BACKEND (mTLS)]: Received ReqID 42.)"
        );
    }

    #[tokio::test]
    async fn backend_error_status_becomes_500() {
        let outcome = ForwardOutcome::Success {
            status: StatusCode::NOT_FOUND,
            body: "nope".into(),
            request_id: None,
        };
        let response = outcome_response(outcome, "1", "mTLS");
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body_of(response).await, "Error from backend: 404");
    }

    #[tokio::test]
    async fn down_and_transport_errors_become_503() {
        let down = outcome_response(
            ForwardOutcome::UpstreamDown { reason: DownReason::Failed("upstream connection closed".into()) },
            "N/A",
            "mTLS",
        );
        assert_eq!(down.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(down.headers()[X_REQUEST_ID], "N/A");
        assert!(body_of(down)
            .await
            .starts_with("503 Error: mTLS connection from edge to backend is down."));

        let broken = outcome_response(ForwardOutcome::TransportError(TransportError::Closed), "9", "PLAINTEXT");
        assert_eq!(broken.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert!(body_of(broken).await.contains("PLAINTEXT connection"));
    }

    #[tokio::test]
    async fn deadline_is_a_503_with_body_and_id() {
        let response = deadline_response("late-1", "mTLS", Duration::from_secs(1));
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(response.headers()[X_REQUEST_ID], "late-1");
        assert_eq!(
            body_of(response).await,
            "503 Error: mTLS connection from edge to backend is down. (no answer within the 1s inbound deadline)"
        );
    }

    #[tokio::test]
    async fn busy_connection_is_a_503() {
        let response = outcome_response(
            ForwardOutcome::UpstreamDown { reason: DownReason::Busy(Duration::from_millis(500)) },
            "q",
            "PLAINTEXT",
        );
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert!(body_of(response).await.contains("connection busy for 500ms"));
    }
}
