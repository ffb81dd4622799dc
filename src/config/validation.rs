//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (timeouts > 0, ports valid)
//! - Check cross-field consistency (cert wait interval vs deadline)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: RelayConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::fmt;

use crate::config::schema::RelayConfig;

/// A single semantic problem with a configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

impl std::error::Error for ValidationError {}

pub fn validate_config(config: &RelayConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.upstream.host.trim().is_empty() {
        errors.push(ValidationError::new("upstream.host", "must not be empty"));
    }
    if config.upstream.port == 0 {
        errors.push(ValidationError::new("upstream.port", "must be non-zero"));
    }
    if config.listener.host.trim().is_empty() {
        errors.push(ValidationError::new("listener.host", "must not be empty"));
    }
    if config.timeouts.connect_ms == 0 {
        errors.push(ValidationError::new("timeouts.connect_ms", "must be greater than zero"));
    }
    if config.timeouts.request_ms == 0 {
        errors.push(ValidationError::new("timeouts.request_ms", "must be greater than zero"));
    }
    if config.timeouts.inbound_secs == 0 {
        errors.push(ValidationError::new("timeouts.inbound_secs", "must be greater than zero"));
    }
    if config.timeouts.queue_ms == 0 {
        errors.push(ValidationError::new("timeouts.queue_ms", "must be greater than zero"));
    } else if config.timeouts.queue() >= config.timeouts.inbound() {
        errors.push(ValidationError::new(
            "timeouts.queue_ms",
            format!(
                "queue wait {}ms must be shorter than inbound_secs {}s",
                config.timeouts.queue_ms, config.timeouts.inbound_secs
            ),
        ));
    }

    if config.cert_wait.enabled {
        if config.cert_wait.interval_ms == 0 {
            errors.push(ValidationError::new("cert_wait.interval_ms", "must be greater than zero"));
        } else if config.cert_wait.interval_ms > config.cert_wait.max_wait_ms {
            errors.push(ValidationError::new(
                "cert_wait.interval_ms",
                format!(
                    "interval {}ms exceeds max_wait_ms {}ms",
                    config.cert_wait.interval_ms, config.cert_wait.max_wait_ms
                ),
            ));
        }
    }

    if let Some(server_name) = &config.tls.server_name {
        if server_name.trim().is_empty() {
            errors.push(ValidationError::new("tls.server_name", "must not be empty when set"));
        }
    }

    if config.admin.enabled && config.admin.api_key.trim().is_empty() {
        errors.push(ValidationError::new("admin.api_key", "required when admin is enabled"));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(validate_config(&RelayConfig::default()).is_ok());
    }

    #[test]
    fn collects_every_error() {
        let mut config = RelayConfig::default();
        config.upstream.port = 0;
        config.timeouts.request_ms = 0;
        config.admin.enabled = true;
        config.admin.api_key = " ".into();

        let errors = validate_config(&config).unwrap_err();
        let fields: Vec<_> = errors.iter().map(|e| e.field).collect();
        assert_eq!(fields, vec!["upstream.port", "timeouts.request_ms", "admin.api_key"]);
    }

    #[test]
    fn queue_wait_must_fit_inbound_budget() {
        let mut config = RelayConfig::default();
        config.timeouts.inbound_secs = 1;
        config.timeouts.queue_ms = 1000;

        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].field, "timeouts.queue_ms");

        config.timeouts.queue_ms = 500;
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn cert_wait_interval_must_fit_deadline() {
        let mut config = RelayConfig::default();
        config.cert_wait.enabled = true;
        config.cert_wait.interval_ms = 5000;
        config.cert_wait.max_wait_ms = 1000;

        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].field, "cert_wait.interval_ms");

        // Ignored while disabled.
        config.cert_wait.enabled = false;
        assert!(validate_config(&config).is_ok());
    }
}
