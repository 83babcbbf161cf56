//! Bounded retry for operations that hit lock conflicts.
//!
//! Each attempt must open and commit its own database transaction, so a retried
//! attempt starts from a clean slate.

use crate::config::ledger::LedgerSettings;
use crate::errors::{Error, Result};
use tracing::{debug, warn};

/// Runs `attempt` until it returns anything other than [`Error::ConcurrencyConflict`],
/// retrying at most `settings.max_retries` times with linear backoff.
pub async fn with_conflict_retry<T, F, Fut>(
    settings: &LedgerSettings,
    operation: &str,
    mut attempt: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempts: u32 = 1;
    loop {
        match attempt().await {
            Err(Error::ConcurrencyConflict { message, .. }) => {
                if attempts > settings.max_retries {
                    warn!(operation, attempts, "giving up after lock conflicts: {message}");
                    return Err(Error::ConcurrencyConflict { attempts, message });
                }
                let delay = settings.backoff_for(attempts);
                debug!(operation, attempts, ?delay, "lock conflict, retrying: {message}");
                tokio::time::sleep(delay).await;
                attempts += 1;
            }
            other => return other,
        }
    }
}
