//! Edge HTTP surface.
//!
//! # Data Flow
//! ```text
//! TCP (or TLS) connection
//!     → server.rs (Axum, tracing / timeout / body-limit layers)
//!     → request.rs (correlation id: header, JSON body, or "N/A")
//!     → upstream::Forwarder
//!     → response.rs (outcome → status + body, X-Request-ID echo)
//!     → client
//! ```

pub mod request;
pub mod response;
pub mod server;

pub use request::{RequestEnvelope, X_REQUEST_ID};
pub use server::EdgeServer;
