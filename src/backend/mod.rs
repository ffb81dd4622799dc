//! Echo backend that terminates the upstream hop.
//!
//! # Data Flow
//! ```text
//! TCP accept (server.rs)
//!     → mTLS handshake, client certificate checked against the CA bundle
//!     → HTTP/1.1 (hyper) → axum router (service.rs)
//!     → "[BACKEND (<mode>)]: Received ReqID <id>." + X-Request-ID echo
//! ```
//!
//! Used by the `mtls-backend` binary and by tests, which kill and restart it
//! to simulate a backend crash.

pub mod server;
pub mod service;

pub use server::BackendServer;
pub use service::{router, BackendOptions};
