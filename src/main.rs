//! mTLS relay edge.
//!
//! # Architecture Overview
//!
//! ```text
//!                      ┌───────────────────────────────────────────────┐
//!                      │                     EDGE                      │
//!   Client Request     │  ┌────────┐   ┌───────────┐   ┌────────────┐  │
//!   ───────────────────┼─▶│  http  │──▶│ forwarder │──▶│   state    │  │
//!                      │  │ server │   │           │   │  machine   │  │
//!                      │  └────────┘   └───────────┘   └─────┬──────┘  │
//!                      │                                     │ lease   │
//!                      │                                     ▼         │
//!   Client Response    │  ┌────────┐                   ┌────────────┐  │  one persistent
//!   ◀──────────────────┼──│response│◀──────────────────│  upstream  │◀─┼──── mTLS socket ──▶ Backend
//!                      │  │ mapping│                   │   handle   │  │
//!                      │  └────────┘                   └────────────┘  │
//!                      │                                               │
//!                      │  config · net::tls · observability · admin    │
//!                      └───────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;

use clap::Parser;

use mtls_relay::config::loader::load_effective;
use mtls_relay::lifecycle::{bootstrap, startup::serve, Shutdown};
use mtls_relay::observability::{logging, metrics};

#[derive(Parser)]
#[command(name = "mtls-relay")]
#[command(about = "Edge relay forwarding over one persistent mTLS connection", long_about = None)]
struct Cli {
    /// TOML config file; environment variables override it.
    #[arg(short, long, env = "RELAY_CONFIG")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config = load_effective(cli.config.as_deref())?;

    logging::init_logging(&config.observability);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "mtls-relay starting");
    tracing::info!(
        listen = %config.listener.bind_address(),
        backend = %config.upstream.address(),
        mtls = config.upstream.use_mtls,
        policy = %config.upstream.policy,
        wire_format = ?config.upstream.wire_format,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let relay = match bootstrap(config).await {
        Ok(relay) => relay,
        Err(e) => {
            tracing::error!(error = %e, "Startup failed");
            return Err(e.into());
        }
    };

    let shutdown = Shutdown::new();
    shutdown.listen_for_signals();
    serve(relay, &shutdown).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
