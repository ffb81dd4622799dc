//! Startup orchestration.
//!
//! # Responsibilities
//! - Wait for certificate files (when configured) and load the TLS identity
//! - Build the connection state machine and make the eager first connect
//! - Bind listeners and serve until shutdown, then close the upstream
//!
//! # Design Decisions
//! - Fail fast on certificate and bind errors
//! - Listeners start last (traffic only once the upstream has been tried)

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;

use crate::admin::{self, AdminState};
use crate::config::{ReconnectPolicy, RelayConfig};
use crate::error::StartupError;
use crate::http::EdgeServer;
use crate::lifecycle::Shutdown;
use crate::net::tls::load_listener_tls;
use crate::net::wait::wait_for_material;
use crate::net::TlsIdentity;
use crate::upstream::{ConnectOptions, ConnectionStateMachine, Connector, Forwarder};

/// A bootstrapped relay, ready to serve.
pub struct Relay {
    pub config: RelayConfig,
    pub machine: Arc<ConnectionStateMachine>,
    pub forwarder: Arc<Forwarder>,
}

impl Relay {
    pub fn edge_server(&self) -> EdgeServer {
        EdgeServer::new(&self.config, Arc::clone(&self.forwarder))
    }

    pub fn admin_state(&self) -> AdminState {
        AdminState {
            machine: Arc::clone(&self.machine),
            api_key: Arc::from(self.config.admin.api_key.as_str()),
        }
    }
}

/// Everything up to (and including) the eager upstream connect.
///
/// Only certificate problems are fatal here. A failed first connect leaves
/// the machine `Down` and the relay still serves (503 or inline reconnect,
/// depending on the policy).
pub async fn bootstrap(config: RelayConfig) -> Result<Relay, StartupError> {
    let identity = if config.upstream.use_mtls {
        if config.cert_wait.enabled {
            wait_for_material(
                &config.tls.paths(),
                Duration::from_millis(config.cert_wait.interval_ms),
                Duration::from_millis(config.cert_wait.max_wait_ms),
            )
            .await?;
        }
        Some(Arc::new(TlsIdentity::from_config(&config.tls, &config.upstream.host)?))
    } else {
        tracing::warn!("mTLS disabled, upstream hop is PLAINTEXT");
        None
    };

    let mut connector = Connector::new(ConnectOptions::from_config(&config), identity);
    if config.upstream.use_mtls && config.upstream.reload_identity_on_reconnect {
        connector = connector.reload_identity_from(config.tls.clone());
    }

    let machine = ConnectionStateMachine::new(config.upstream.policy, connector);
    match machine.connect_initial().await {
        Ok(id) => tracing::info!(
            connection_id = %id,
            backend = %config.upstream.address(),
            policy = %config.upstream.policy,
            "Persistent upstream connection ready"
        ),
        Err(_) if config.upstream.policy == ReconnectPolicy::FailPermanent => {
            tracing::error!("Upstream never came up; with fail_permanent every request will be rejected")
        }
        Err(_) => tracing::warn!("Upstream not reachable yet; the next request will try again"),
    }

    let machine = Arc::new(machine);
    let forwarder = Arc::new(Forwarder::new(Arc::clone(&machine)));
    Ok(Relay {
        config,
        machine,
        forwarder,
    })
}

/// Bind the configured listeners and serve until `shutdown` fires.
pub async fn serve(relay: Relay, shutdown: &Shutdown) -> Result<(), StartupError> {
    if relay.config.admin.enabled {
        let address = relay.config.admin.bind_address.clone();
        let listener = TcpListener::bind(&address)
            .await
            .map_err(|source| StartupError::Bind { address, source })?;
        let state = relay.admin_state();
        let signal = shutdown.subscribe();
        tokio::spawn(async move {
            if let Err(e) = admin::serve_admin(listener, state, signal).await {
                tracing::error!(error = %e, "Admin server failed");
            }
        });
    }

    let address = relay.config.listener.bind_address();
    let edge = relay.edge_server();

    match &relay.config.listener.tls {
        Some(tls) => {
            let rustls = load_listener_tls(tls)?;
            let addr = resolve(&address).await?;
            edge.run_tls(addr, rustls, shutdown.subscribe()).await?;
        }
        None => {
            let listener = TcpListener::bind(&address)
                .await
                .map_err(|source| StartupError::Bind { address, source })?;
            edge.run(listener, shutdown.subscribe()).await?;
        }
    }

    relay.machine.shutdown().await;
    Ok(())
}

async fn resolve(address: &str) -> Result<SocketAddr, StartupError> {
    tokio::net::lookup_host(address)
        .await
        .map_err(|source| StartupError::Bind {
            address: address.to_string(),
            source,
        })?
        .next()
        .ok_or_else(|| StartupError::Bind {
            address: address.to_string(),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "address did not resolve"),
        })
}
