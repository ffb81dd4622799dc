//! Two-hop request relay with a persistent mTLS upstream connection.

pub mod admin;
pub mod backend;
pub mod config;
pub mod error;
pub mod http;
pub mod lifecycle;
pub mod net;
pub mod observability;
pub mod resilience;
pub mod upstream;

pub use config::schema::RelayConfig;
pub use http::EdgeServer;
pub use lifecycle::Shutdown;
pub use upstream::{ConnectionStateMachine, Forwarder};
