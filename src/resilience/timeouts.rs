//! Timeout enforcement.
//!
//! # Responsibilities
//! - Wrap every blocking upstream call with a deadline
//! - Keep "timed out" distinguishable from other failures
//!
//! # Design Decisions
//! - Uses Tokio's timeout facilities
//! - The caller maps the elapsed case into its own error type

use std::future::Future;
use std::time::Duration;

/// Result of a deadline-bounded operation.
#[derive(Debug, PartialEq, Eq)]
pub enum Deadline<T> {
    Completed(T),
    Elapsed(Duration),
}

/// Run `fut` for at most `limit`.
pub async fn within<F, T>(limit: Duration, fut: F) -> Deadline<T>
where
    F: Future<Output = T>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(value) => Deadline::Completed(value),
        Err(_) => Deadline::Elapsed(limit),
    }
}

/// Like [`within`] for fallible futures: a timeout becomes `on_elapsed(limit)`.
pub async fn bounded<F, T, E>(limit: Duration, fut: F, on_elapsed: impl FnOnce(Duration) -> E) -> Result<T, E>
where
    F: Future<Output = Result<T, E>>,
{
    match within(limit, fut).await {
        Deadline::Completed(result) => result,
        Deadline::Elapsed(limit) => Err(on_elapsed(limit)),
    }
}
