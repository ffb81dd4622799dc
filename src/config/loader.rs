//! Configuration loading from disk and the environment.

use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::config::schema::RelayConfig;
use crate::config::validation::{validate_config, ValidationError};

/// Error type for configuration loading.
#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Parse(toml::de::Error),
    Env { key: &'static str, message: String },
    Validation(Vec<ValidationError>),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "IO error: {}", e),
            ConfigError::Parse(e) => write!(f, "Parse error: {}", e),
            ConfigError::Env { key, message } => write!(f, "Invalid value for {}: {}", key, message),
            ConfigError::Validation(errors) => {
                write!(f, "Validation failed: ")?;
                for (i, err) in errors.iter().enumerate() {
                    if i > 0 { write!(f, ", ")?; }
                    write!(f, "{}", err)?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for ConfigError {}

/// Build the effective configuration: the TOML file when given (defaults
/// otherwise), overlaid with process environment variables, then validated.
pub fn load_effective(path: Option<&Path>) -> Result<RelayConfig, ConfigError> {
    load_with(path, |key| std::env::var(key).ok())
}

fn load_with<F>(path: Option<&Path>, lookup: F) -> Result<RelayConfig, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let mut config = match path {
        Some(path) => {
            let content = fs::read_to_string(path).map_err(ConfigError::Io)?;
            toml::from_str(&content).map_err(ConfigError::Parse)?
        }
        None => RelayConfig::default(),
    };

    apply_env_overrides(&mut config, lookup)?;
    validate_config(&config).map_err(ConfigError::Validation)?;

    Ok(config)
}

/// Overlay environment-style keys onto `config`.
///
/// `lookup` abstracts the environment so callers (and tests) can supply any
/// key/value source.
pub fn apply_env_overrides<F>(config: &mut RelayConfig, lookup: F) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(v) = lookup("CERT_PATH") {
        config.tls.cert_path = PathBuf::from(v);
    }
    if let Some(v) = lookup("KEY_PATH") {
        config.tls.key_path = PathBuf::from(v);
    }
    if let Some(v) = lookup("CA_PATH") {
        config.tls.ca_path = PathBuf::from(v);
    }
    if let Some(v) = lookup("TLS_SERVER_NAME") {
        config.tls.server_name = Some(v);
    }
    if let Some(v) = lookup("BACKEND_HOST") {
        config.upstream.host = v;
    }
    if let Some(v) = lookup("BACKEND_PORT") {
        config.upstream.port = parse_value("BACKEND_PORT", &v)?;
    }
    if let Some(v) = lookup("LISTEN_HOST") {
        config.listener.host = v;
    }
    if let Some(v) = lookup("LISTEN_PORT") {
        config.listener.port = parse_value("LISTEN_PORT", &v)?;
    }
    if let Some(v) = lookup("USE_MTLS") {
        config.upstream.use_mtls = parse_bool("USE_MTLS", &v)?;
    }
    if let Some(v) = lookup("RECONNECT_POLICY") {
        config.upstream.policy = parse_value("RECONNECT_POLICY", &v)?;
    }
    if let Some(v) = lookup("WIRE_FORMAT") {
        config.upstream.wire_format = parse_value("WIRE_FORMAT", &v)?;
    }
    if let Some(v) = lookup("WARMUP") {
        config.upstream.warmup = parse_bool("WARMUP", &v)?;
    }
    if let Some(v) = lookup("CONNECT_TIMEOUT_MS") {
        config.timeouts.connect_ms = parse_value("CONNECT_TIMEOUT_MS", &v)?;
    }
    if let Some(v) = lookup("REQUEST_TIMEOUT_MS") {
        config.timeouts.request_ms = parse_value("REQUEST_TIMEOUT_MS", &v)?;
    }
    if let Some(v) = lookup("QUEUE_TIMEOUT_MS") {
        config.timeouts.queue_ms = parse_value("QUEUE_TIMEOUT_MS", &v)?;
    }
    if let Some(v) = lookup("WAIT_FOR_CERTS") {
        config.cert_wait.enabled = parse_bool("WAIT_FOR_CERTS", &v)?;
    }
    Ok(())
}

fn parse_value<T>(key: &'static str, raw: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim().parse().map_err(|e: T::Err| ConfigError::Env {
        key,
        message: e.to_string(),
    })
}

fn parse_bool(key: &'static str, raw: &str) -> Result<bool, ConfigError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        other => Err(ConfigError::Env {
            key,
            message: format!("expected a boolean, got '{}'", other),
        }),
    }
}
