//! One-shot close notification.
//!
//! A [`CloseSignal`] fires exactly once. Any number of [`Closed`] futures
//! can wait on it, whether they were created before or after it fired.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use tokio::sync::broadcast;

/// A fire-once signal observable by many waiters.
///
/// # Example
///
/// ```rust
/// use relay_ws::CloseSignal;
///
/// let signal = CloseSignal::new();
/// assert!(signal.fire());
/// assert!(!signal.fire());
/// assert!(signal.is_fired());
/// ```
#[derive(Debug, Clone)]
pub struct CloseSignal {
    fired: Arc<AtomicBool>,
    sender: broadcast::Sender<()>,
}

impl CloseSignal {
    /// Create a signal that has not fired.
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(1);
        Self {
            fired: Arc::new(AtomicBool::new(false)),
            sender,
        }
    }

    /// Fire the signal.
    ///
    /// Returns `true` only for the call that transitioned the signal; every
    /// later call is a no-op returning `false`.
    pub fn fire(&self) -> bool {
        if self
            .fired
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            // No receivers is fine: late waiters see the flag.
            let _ = self.sender.send(());
            true
        } else {
            false
        }
    }

    /// Whether the signal has fired.
    pub fn is_fired(&self) -> bool {
        self.fired.load(Ordering::SeqCst)
    }

    /// A future that completes once the signal has fired.
    pub fn notified(&self) -> Closed {
        // Subscribe before the flag is checked in `poll`, so a concurrent
        // `fire` is observed through one or the other.
        let mut receiver = self.sender.subscribe();
        Closed {
            fired: Arc::clone(&self.fired),
            wait: Box::pin(async move {
                // A dropped sender means the owner is gone, which counts as closed.
                let _ = receiver.recv().await;
            }),
        }
    }
}

impl Default for CloseSignal {
    fn default() -> Self {
        Self::new()
    }
}

/// Future returned by [`CloseSignal::notified`].
pub struct Closed {
    fired: Arc<AtomicBool>,
    wait: Pin<Box<dyn Future<Output = ()> + Send>>,
}

impl fmt::Debug for Closed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Closed")
            .field("fired", &self.is_closed())
            .finish_non_exhaustive()
    }
}

impl Closed {
    /// Whether the underlying signal has fired.
    pub fn is_closed(&self) -> bool {
        self.fired.load(Ordering::SeqCst)
    }
}

impl Future for Closed {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        if self.fired.load(Ordering::SeqCst) {
            return Poll::Ready(());
        }

        self.wait.as_mut().poll(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_fire_once() {
        let signal = CloseSignal::new();
        assert!(!signal.is_fired());
        assert!(signal.fire());
        assert!(!signal.fire());
        assert!(signal.is_fired());
    }

    #[test]
    fn test_clones_share_state() {
        let signal = CloseSignal::new();
        let clone = signal.clone();
        clone.fire();
        assert!(signal.is_fired());
    }

    #[test]
    fn test_waiter_pending_until_fired() {
        let signal = CloseSignal::new();
        let mut waiter = tokio_test::task::spawn(signal.notified());

        tokio_test::assert_pending!(waiter.poll());
        assert!(signal.fire());
        assert!(waiter.is_woken());
        tokio_test::assert_ready!(waiter.poll());
    }

    #[test]
    fn test_dropped_signal_releases_waiters() {
        let signal = CloseSignal::new();
        let mut waiter = tokio_test::task::spawn(signal.notified());

        tokio_test::assert_pending!(waiter.poll());
        drop(signal);
        tokio_test::assert_ready!(waiter.poll());
    }

    #[tokio::test]
    async fn test_waiter_created_before_fire() {
        let signal = CloseSignal::new();
        let waiter = signal.notified();
        let handle = tokio::spawn(waiter);

        tokio::time::sleep(Duration::from_millis(10)).await;
        signal.fire();

        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("waiter should complete")
            .unwrap();
    }

    #[tokio::test]
    async fn test_waiter_created_after_fire() {
        let signal = CloseSignal::new();
        signal.fire();
        let waiter = signal.notified();
        assert!(waiter.is_closed());
        tokio::time::timeout(Duration::from_millis(100), waiter)
            .await
            .expect("should complete immediately");
    }

    #[tokio::test]
    async fn test_many_waiters() {
        let signal = CloseSignal::new();
        let handles: Vec<_> = (0..8).map(|_| tokio::spawn(signal.notified())).collect();
        signal.fire();
        for handle in handles {
            tokio::time::timeout(Duration::from_secs(1), handle)
                .await
                .expect("every waiter should wake")
                .unwrap();
        }
    }

    #[tokio::test]
    async fn test_pending_until_fired() {
        let signal = CloseSignal::new();
        let result = tokio::time::timeout(Duration::from_millis(20), signal.notified()).await;
        assert!(result.is_err());
    }
}
