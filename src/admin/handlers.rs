use axum::{extract::State, Json};
use serde::Serialize;

use crate::admin::AdminState;
use crate::upstream::ConnectionStatus;

#[derive(Serialize)]
pub struct VersionInfo {
    pub name: &'static str,
    pub version: &'static str,
}

pub async fn get_status(State(state): State<AdminState>) -> Json<ConnectionStatus> {
    Json(state.machine.status())
}

pub async fn get_version() -> Json<VersionInfo> {
    Json(VersionInfo {
        name: env!("CARGO_PKG_NAME"),
        version: env!("CARGO_PKG_VERSION"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::admin::setup_admin_router;
    use crate::config::{ReconnectPolicy, WireFormat};
    use crate::upstream::{ConnectOptions, ConnectionStateMachine, Connector};
    use axum::body::{to_bytes, Body};
    use axum::http::{header, Request, StatusCode};
    use std::sync::Arc;
    use std::time::Duration;
    use tower::ServiceExt;

    fn state() -> AdminState {
        let connector = Connector::new(
            ConnectOptions {
                host: "127.0.0.1".into(),
                port: 1,
                connect_timeout: Duration::from_millis(100),
                request_timeout: Duration::from_millis(100),
                queue_timeout: Duration::from_millis(100),
                wire_format: WireFormat::Header,
                warmup: false,
            },
            None,
        );
        AdminState {
            machine: Arc::new(ConnectionStateMachine::new(ReconnectPolicy::FailAndReconnect, connector)),
            api_key: Arc::from("secret"),
        }
    }

    #[tokio::test]
    async fn status_requires_bearer_token() {
        let router = setup_admin_router(state());

        let missing = router
            .clone()
            .oneshot(Request::get("/admin/status").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(missing.status(), StatusCode::UNAUTHORIZED);

        let wrong = router
            .clone()
            .oneshot(
                Request::get("/admin/status")
                    .header(header::AUTHORIZATION, "Bearer nope")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(wrong.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn status_reports_machine_snapshot() {
        let response = setup_admin_router(state())
            .oneshot(
                Request::get("/admin/status")
                    .header(header::AUTHORIZATION, "Bearer secret")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = to_bytes(response.into_body(), 4096).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["state"], "down");
        assert_eq!(json["policy"], "fail_and_reconnect");
        assert_eq!(json["mode"], "PLAINTEXT");
        assert_eq!(json["remote"], "127.0.0.1:1");
        assert_eq!(json["connect_attempts"], 0);
    }
}
