//! Polling assertions for asynchronous effects.

use std::time::Duration;

use crate::error::TestError;

/// Interval between predicate checks.
pub const POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Poll `predicate` until it holds or `timeout` elapses.
///
/// Returns whether the predicate held in time.
pub async fn eventually(timeout: Duration, mut predicate: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if predicate() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
}

/// Like [`eventually`], but returns a [`TestError::Timeout`] naming what was
/// awaited.
pub async fn wait_for(
    what: &str,
    timeout: Duration,
    predicate: impl FnMut() -> bool,
) -> Result<(), TestError> {
    if eventually(timeout, predicate).await {
        Ok(())
    } else {
        Err(TestError::Timeout(format!("{what} (after {timeout:?})")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_eventually_true() {
        let calls = AtomicUsize::new(0);
        let held = eventually(Duration::from_secs(1), || {
            calls.fetch_add(1, Ordering::SeqCst) >= 3
        })
        .await;
        assert!(held);
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_wait_for_times_out() {
        let err = wait_for("never", Duration::from_millis(20), || false)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("never"));
    }
}
