//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! relay.toml (optional)
//!     → loader.rs (parse & deserialize)
//!     → loader.rs (environment overlay: BACKEND_HOST, USE_MTLS, ...)
//!     → validation.rs (semantic checks)
//!     → RelayConfig (validated, immutable)
//!     → handed to startup, which builds every subsystem from it
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; changes require a restart
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::ConfigError;
pub use schema::{
    AdminConfig, CertWaitConfig, ListenerConfig, ListenerTlsConfig, ObservabilityConfig,
    ReconnectPolicy, RelayConfig, TimeoutConfig, TlsConfig, UpstreamConfig, WireFormat,
};
