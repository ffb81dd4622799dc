//! Echo backend terminating the upstream hop, mTLS by default.

use std::path::PathBuf;

use clap::Parser;

use mtls_relay::backend::{BackendOptions, BackendServer};
use mtls_relay::config::ObservabilityConfig;
use mtls_relay::lifecycle::shutdown::wait_for_signal;
use mtls_relay::net::tls::mtls_server_config;
use mtls_relay::observability::logging;

#[derive(Parser)]
#[command(name = "mtls-backend")]
#[command(about = "Echo backend that requires a client certificate", long_about = None)]
struct Cli {
    #[arg(long, env = "LISTEN_HOST", default_value = "0.0.0.0")]
    host: String,

    #[arg(long, env = "LISTEN_PORT", default_value_t = 8443)]
    port: u16,

    /// Server certificate chain (PEM).
    #[arg(long, env = "CERT_PATH", default_value = "certs/server.crt")]
    cert: PathBuf,

    /// Server private key (PEM).
    #[arg(long, env = "KEY_PATH", default_value = "certs/server.key")]
    key: PathBuf,

    /// CA bundle client certificates must chain to.
    #[arg(long, env = "CA_PATH", default_value = "certs/ca.crt")]
    ca: PathBuf,

    /// Serve plain HTTP instead of mTLS.
    #[arg(long, env = "USE_MTLS", default_value_t = true, action = clap::ArgAction::Set, value_parser = clap::builder::BoolishValueParser::new())]
    mtls: bool,

    #[arg(long, env = "RUST_LOG_LEVEL", default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    logging::init_logging(&ObservabilityConfig {
        log_level: cli.log_level.clone(),
        ..ObservabilityConfig::default()
    });

    let (tls, options) = if cli.mtls {
        let config = mtls_server_config(&cli.cert, &cli.key, &cli.ca)?;
        tracing::info!(cert = %cli.cert.display(), ca = %cli.ca.display(), "Server identity loaded");
        (Some(config), BackendOptions::mtls())
    } else {
        tracing::warn!("mTLS disabled, serving PLAINTEXT");
        (None, BackendOptions::default())
    };

    let server = BackendServer::bind(&format!("{}:{}", cli.host, cli.port), tls, options).await?;
    server.serve_until(wait_for_signal()).await;
    Ok(())
}
