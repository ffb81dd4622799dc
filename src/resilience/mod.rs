//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Upstream call (connect, send/receive):
//!     → timeouts.rs (enforce connect/request deadline)
//!     → On failure: error surfaces to the connection state machine,
//!       which applies the configured reconnect policy
//! ```
//!
//! # Design Decisions
//! - Timeouts are non-negotiable; every external call has a deadline
//! - No retries or backoff below the state machine

pub mod timeouts;
