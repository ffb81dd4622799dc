//! Bounded wait for certificate material to appear on disk.
//!
//! Certificates are often mounted after the process starts. This polls for
//! file *presence* at a fixed interval and gives up at a deadline; it never
//! retries the load itself.

use std::path::Path;
use std::time::Duration;
use tokio::time::{self, Instant};

use crate::error::CertificateLoadError;

/// Wait until every path exists, checking every `interval` for at most
/// `max_wait`.
pub async fn wait_for_material(
    paths: &[&Path],
    interval: Duration,
    max_wait: Duration,
) -> Result<(), CertificateLoadError> {
    let started = Instant::now();

    loop {
        match paths.iter().find(|p| !p.exists()) {
            None => {
                tracing::info!(files = paths.len(), "All certificate files found on disk");
                return Ok(());
            }
            Some(missing) => {
                let waited = started.elapsed();
                if waited >= max_wait {
                    tracing::error!(
                        path = %missing.display(),
                        waited_ms = waited.as_millis() as u64,
                        "Certificate files never became available"
                    );
                    return Err(CertificateLoadError::NotAvailable {
                        path: missing.to_path_buf(),
                        waited,
                    });
                }
                tracing::warn!(
                    path = %missing.display(),
                    retry_in_ms = interval.as_millis() as u64,
                    "Certificate file not yet available"
                );
                let remaining = max_wait - waited;
                time::sleep(interval.min(remaining)).await;
            }
        }
    }
}
