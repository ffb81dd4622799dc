//! Inbound request handling.
//!
//! # Responsibilities
//! - Extract the caller's correlation id (header first, JSON body second)
//! - Wrap it with the payload into a [`RequestEnvelope`]
//! - Produce header-safe forms of the id for outgoing requests
//!
//! # Design Decisions
//! - The id is opaque: never validated, never made unique
//! - Absent ids become `"N/A"` rather than a generated value, so logs on both
//!   hops show the same token

use axum::http::{HeaderMap, HeaderValue};
use bytes::Bytes;

/// Correlation header carried on both hops.
pub const X_REQUEST_ID: &str = "x-request-id";

/// Correlation id used when the caller supplies none.
pub const DEFAULT_REQUEST_ID: &str = "N/A";

/// One inbound request as seen by the forwarder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestEnvelope {
    pub request_id: String,
    pub payload: Bytes,
}

impl RequestEnvelope {
    pub fn new(request_id: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
            payload: Bytes::new(),
        }
    }

    pub fn from_parts(headers: &HeaderMap, payload: Bytes) -> Self {
        Self {
            request_id: extract_request_id(headers, &payload),
            payload,
        }
    }
}

/// `X-Request-ID` if present and non-empty, else the JSON body's
/// `request_id`, else [`DEFAULT_REQUEST_ID`].
pub fn extract_request_id(headers: &HeaderMap, body: &[u8]) -> String {
    header_request_id(headers)
        .or_else(|| body_request_id(body))
        .unwrap_or_else(|| DEFAULT_REQUEST_ID.to_string())
}

/// Trimmed `X-Request-ID`, decoded as UTF-8 so non-ASCII ids survive.
pub fn header_request_id(headers: &HeaderMap) -> Option<String> {
    headers
        .get(X_REQUEST_ID)
        .and_then(|v| std::str::from_utf8(v.as_bytes()).ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// `request_id` of a JSON object body, string or number.
pub fn body_request_id(body: &[u8]) -> Option<String> {
    if body.is_empty() {
        return None;
    }

    match serde_json::from_slice::<serde_json::Value>(body) {
        Ok(serde_json::Value::Object(map)) => match map.get("request_id") {
            Some(serde_json::Value::String(s)) => Some(s.clone()),
            Some(serde_json::Value::Number(n)) => Some(n.to_string()),
            _ => None,
        },
        _ => None,
    }
}

/// Header-safe form of a correlation id. UTF-8 bytes pass through; only
/// control bytes a header cannot carry become `?`.
pub fn header_safe(request_id: &str) -> HeaderValue {
    let cleaned: Vec<u8> = request_id
        .bytes()
        .map(|b| if (b < 0x20 && b != b'\t') || b == 0x7f { b'?' } else { b })
        .collect();
    HeaderValue::from_bytes(&cleaned).unwrap_or_else(|_| HeaderValue::from_static(DEFAULT_REQUEST_ID))
}
