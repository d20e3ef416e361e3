//! Polling helpers for asynchronous reconciliation.

use std::time::Duration;

/// Default time [`wait_until`] waits before giving up.
pub const DEFAULT_WAIT: Duration = Duration::from_secs(2);

const POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Polls `condition` until it holds, for at most [`DEFAULT_WAIT`].
///
/// Returns whether the condition was met.
pub async fn wait_until(condition: impl FnMut() -> bool) -> bool {
    wait_until_for(DEFAULT_WAIT, condition).await
}

/// Polls `condition` until it holds, for at most `timeout`.
pub async fn wait_until_for(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
}

/// Lets spawned tasks run for a short while.
///
/// Used to check that something does *not* happen.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}
