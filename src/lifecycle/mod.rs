//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Config → Wait for cert files → Load identity → Eager connect
//!     → Start listeners (edge, admin)
//!
//! Shutdown (shutdown.rs):
//!     SIGINT/SIGTERM → Stop accepting → Close upstream connection → Exit
//! ```
//!
//! # Design Decisions
//! - Ordered startup: config first, then identity, then listeners
//! - A failed eager connect is not fatal; the policy decides what happens next
//! - Certificate errors are fatal before any listener is bound

pub mod shutdown;
pub mod startup;

pub use shutdown::Shutdown;
pub use startup::{bootstrap, Relay};
