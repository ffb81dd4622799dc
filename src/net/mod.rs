//! Certificate and TLS plumbing.
//!
//! # Data Flow
//! ```text
//! Startup
//!     → wait.rs (optional bounded wait for cert files to be mounted)
//!     → tls.rs (load chain, key, CA bundle → TlsIdentity)
//!     → TlsIdentity handed to the upstream connector
//!
//! Backend / TLS edge listener
//!     → tls.rs (rustls ServerConfig, client auth required for mTLS)
//! ```
//!
//! # Design Decisions
//! - Loading is all-or-nothing; no degraded identity
//! - rustls with the ring provider selected explicitly everywhere
//! - Waiting for files is bounded by a deadline

pub mod tls;
pub mod wait;

pub use tls::TlsIdentity;
