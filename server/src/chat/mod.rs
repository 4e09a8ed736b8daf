//! Chat-side collaborators of the WebSocket engine: persistence, presence
//! notifications and new-message hints.

pub mod notify;
pub mod presence;
pub mod rooms;
pub mod store;
pub mod voice;

use std::future::Future;
use std::time::Duration;

use crate::chat::store::StoreError;

/// Run a background fan-out as a detached task bounded by `limit`.
/// Failures and timeouts are logged; nothing is reported to the caller.
pub(crate) fn spawn_bounded<F>(limit: Duration, what: &'static str, fut: F)
where
    F: Future<Output = Result<usize, StoreError>> + Send + 'static,
{
    let Ok(runtime) = tokio::runtime::Handle::try_current() else {
        tracing::warn!(task = what, "No runtime available, notification dropped");
        return;
    };

    runtime.spawn(async move {
        match tokio::time::timeout(limit, fut).await {
            Ok(Ok(delivered)) => {
                tracing::debug!(task = what, delivered, "Notification fan-out finished");
            }
            Ok(Err(e)) => {
                tracing::warn!(task = what, error = %e, "Notification fan-out failed");
            }
            Err(_) => {
                tracing::warn!(task = what, timeout = ?limit, "Notification fan-out timed out");
            }
        }
    });
}
