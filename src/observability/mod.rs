//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Forwarder, state machine, handle produce:
//!     → logging.rs (structured events keyed by request_id / connection_id)
//!     → metrics.rs (counters, gauge, histogram)
//!
//! Consumers:
//!     → stdout (tracing-subscriber fmt layer)
//!     → Prometheus scrape endpoint (when enabled)
//! ```
//!
//! # Design Decisions
//! - The correlation id is a log field, never a metric label
//! - Metric updates go through the `metrics` facade; without an installed
//!   recorder they are no-ops, so library code and tests never need setup

pub mod logging;
pub mod metrics;
