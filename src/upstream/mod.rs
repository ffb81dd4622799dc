//! Upstream subsystem: the one persistent connection to the backend.
//!
//! # Data Flow
//! ```text
//! RequestEnvelope
//!     → forwarder.rs (acquire lease, send, map outcome)
//!     → state.rs (Up: hand out the handle / Down: refuse or reconnect once)
//!     → handle.rs (HTTP/1.1 over TCP or mTLS)
//!     → backend
//! ```
//!
//! # Design Decisions
//! - Exactly one upstream socket; concurrent requests queue on a mutex
//! - Failure policy is data (`ReconnectPolicy`), not two code paths

pub mod forwarder;
pub mod handle;
pub mod state;

pub use forwarder::{ForwardOutcome, Forwarder};
pub use handle::{ConnectOptions, ConnectionId, SocketState, UpstreamHandle, UpstreamResponse};
pub use state::{ConnectionLease, ConnectionStateMachine, ConnectionStatus, Connector, DownReason, Unavailable};
