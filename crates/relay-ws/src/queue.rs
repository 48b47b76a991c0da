//! Serialized delivery queue.
//!
//! A [`DeliveryQueue`] accepts values from any number of producers and hands
//! them, one at a time and in submission order, to a single async consumer.
//! Producers never wait for the consumer: `enqueue` appends to an unbounded
//! buffer and, if no drain task is running, spawns one. The drain task pops
//! values until the buffer is empty and then exits; the next `enqueue`
//! starts a fresh drain.
//!
//! # Closing
//!
//! [`DeliveryQueue::close`] discards the backlog, stops a running drain
//! before its next pop and makes every later `enqueue` fail with
//! [`WsError::QueueClosed`]. A value already handed to the consumer is
//! allowed to finish.

use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tracing::{trace, warn};

use crate::error::{WsError, WsResult};

type Consumer<T> = Arc<dyn Fn(T) -> BoxFuture<'static, ()> + Send + Sync>;

/// Counters describing a queue's activity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    /// Values accepted by `enqueue`.
    pub enqueued: u64,
    /// Values handed to the consumer.
    pub delivered: u64,
    /// Values refused because the queue was closed.
    pub rejected: u64,
    /// Number of drain tasks started.
    pub drains_started: u64,
    /// Consumer invocations that panicked.
    pub consumer_panics: u64,
}

struct State<T> {
    buffer: VecDeque<T>,
    draining: bool,
    closed: bool,
}

struct Shared<T> {
    state: Mutex<State<T>>,
    consumer: Consumer<T>,
    runtime: Handle,
    enqueued: AtomicU64,
    delivered: AtomicU64,
    rejected: AtomicU64,
    drains_started: AtomicU64,
    consumer_panics: AtomicU64,
}

/// A multi-producer, single-consumer FIFO with at most one drain at a time.
///
/// Cloning yields another handle to the same queue.
///
/// # Example
///
/// ```rust
/// use relay_ws::DeliveryQueue;
/// use tokio::sync::mpsc;
///
/// # #[tokio::main]
/// # async fn main() {
/// let (tx, mut rx) = mpsc::unbounded_channel();
/// let queue = DeliveryQueue::new(move |value: u32| {
///     let tx = tx.clone();
///     async move {
///         let _ = tx.send(value);
///     }
/// });
///
/// queue.enqueue(1).unwrap();
/// queue.enqueue(2).unwrap();
/// assert_eq!(rx.recv().await, Some(1));
/// assert_eq!(rx.recv().await, Some(2));
/// # }
/// ```
pub struct DeliveryQueue<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for DeliveryQueue<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T> fmt::Debug for DeliveryQueue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.shared.state.lock();
        f.debug_struct("DeliveryQueue")
            .field("pending", &state.buffer.len())
            .field("draining", &state.draining)
            .field("closed", &state.closed)
            .finish()
    }
}

impl<T: Send + 'static> DeliveryQueue<T> {
    /// Create a queue delivering to `consumer`, spawning drains on the
    /// current tokio runtime.
    ///
    /// # Panics
    ///
    /// Panics when called outside a tokio runtime.
    pub fn new<F, Fut>(consumer: F) -> Self
    where
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        Self::with_handle(Handle::current(), consumer)
    }

    /// Create a queue that spawns its drains on the given runtime.
    ///
    /// Values may then be enqueued from threads outside the runtime.
    pub fn with_handle<F, Fut>(runtime: Handle, consumer: F) -> Self
    where
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let consumer: Consumer<T> = Arc::new(move |value| consumer(value).boxed());
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(State {
                    buffer: VecDeque::new(),
                    draining: false,
                    closed: false,
                }),
                consumer,
                runtime,
                enqueued: AtomicU64::new(0),
                delivered: AtomicU64::new(0),
                rejected: AtomicU64::new(0),
                drains_started: AtomicU64::new(0),
                consumer_panics: AtomicU64::new(0),
            }),
        }
    }

    /// Append a value to the tail of the queue.
    ///
    /// Never waits for the consumer. Starts a drain if none is running.
    pub fn enqueue(&self, value: T) -> WsResult<()> {
        let start_drain = {
            let mut state = self.shared.state.lock();
            if state.closed {
                self.shared.rejected.fetch_add(1, Ordering::Relaxed);
                return Err(WsError::QueueClosed);
            }
            state.buffer.push_back(value);
            self.shared.enqueued.fetch_add(1, Ordering::Relaxed);
            !std::mem::replace(&mut state.draining, true)
        };

        if start_drain {
            self.shared.drains_started.fetch_add(1, Ordering::Relaxed);
            let shared = Arc::clone(&self.shared);
            self.shared.runtime.spawn(drain(shared));
        }

        Ok(())
    }

    /// Stop the queue and discard any backlog.
    ///
    /// Returns the number of discarded values.
    pub fn close(&self) -> usize {
        let discarded = {
            let mut state = self.shared.state.lock();
            state.closed = true;
            std::mem::take(&mut state.buffer)
        };
        discarded.len()
    }

    /// Whether the queue has been closed.
    pub fn is_closed(&self) -> bool {
        self.shared.state.lock().closed
    }

    /// Whether a drain task is currently running.
    pub fn is_draining(&self) -> bool {
        self.shared.state.lock().draining
    }

    /// Number of values waiting to be delivered.
    pub fn len(&self) -> usize {
        self.shared.state.lock().buffer.len()
    }

    /// Whether no values are waiting.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of the queue counters.
    pub fn stats(&self) -> QueueStats {
        QueueStats {
            enqueued: self.shared.enqueued.load(Ordering::Relaxed),
            delivered: self.shared.delivered.load(Ordering::Relaxed),
            rejected: self.shared.rejected.load(Ordering::Relaxed),
            drains_started: self.shared.drains_started.load(Ordering::Relaxed),
            consumer_panics: self.shared.consumer_panics.load(Ordering::Relaxed),
        }
    }
}

async fn drain<T: Send + 'static>(shared: Arc<Shared<T>>) {
    loop {
        // `draining` is cleared under the same lock that observes the empty
        // buffer, so a concurrent enqueue either lands before this check or
        // starts its own drain.
        let value = {
            let mut state = shared.state.lock();
            if state.closed {
                state.draining = false;
                return;
            }
            match state.buffer.pop_front() {
                Some(value) => value,
                None => {
                    state.draining = false;
                    trace!("delivery queue drained");
                    return;
                }
            }
        };

        shared.delivered.fetch_add(1, Ordering::Relaxed);
        let delivery = (shared.consumer)(value);
        if AssertUnwindSafe(delivery).catch_unwind().await.is_err() {
            shared.consumer_panics.fetch_add(1, Ordering::Relaxed);
            warn!("delivery queue consumer panicked; continuing with next value");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::sync::mpsc;

    fn collecting_queue() -> (DeliveryQueue<u32>, mpsc::UnboundedReceiver<u32>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let queue = DeliveryQueue::new(move |value| {
            let tx = tx.clone();
            async move {
                let _ = tx.send(value);
            }
        });
        (queue, rx)
    }

    async fn recv(rx: &mut mpsc::UnboundedReceiver<u32>) -> u32 {
        tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("value should be delivered")
            .expect("channel open")
    }

    #[tokio::test]
    async fn test_delivers_in_submission_order() {
        let (queue, mut rx) = collecting_queue();
        for i in 0..100 {
            queue.enqueue(i).unwrap();
        }
        for i in 0..100 {
            assert_eq!(recv(&mut rx).await, i);
        }
    }

    #[tokio::test]
    async fn test_slow_first_value_keeps_order() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let queue = DeliveryQueue::new(move |value: u32| {
            let tx = tx.clone();
            async move {
                if value == 0 {
                    tokio::time::sleep(Duration::from_millis(50)).await;
                }
                let _ = tx.send(value);
            }
        });

        queue.enqueue(0).unwrap();
        queue.enqueue(1).unwrap();
        queue.enqueue(2).unwrap();

        assert_eq!(recv(&mut rx).await, 0);
        assert_eq!(recv(&mut rx).await, 1);
        assert_eq!(recv(&mut rx).await, 2);
    }

    #[tokio::test]
    async fn test_enqueue_after_drain_starts_new_drain() {
        let (queue, mut rx) = collecting_queue();

        queue.enqueue(1).unwrap();
        assert_eq!(recv(&mut rx).await, 1);

        // Let the drain observe the empty buffer and exit.
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!queue.is_draining());

        queue.enqueue(2).unwrap();
        assert_eq!(recv(&mut rx).await, 2);
        assert_eq!(queue.stats().drains_started, 2);
    }

    #[tokio::test]
    async fn test_at_most_one_drain_while_busy() {
        let (release_tx, release_rx) = tokio::sync::watch::channel(false);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let queue = DeliveryQueue::new(move |value: u32| {
            let tx = tx.clone();
            let mut release = release_rx.clone();
            async move {
                let _ = release.wait_for(|open| *open).await;
                let _ = tx.send(value);
            }
        });

        for i in 0..10 {
            queue.enqueue(i).unwrap();
        }
        assert_eq!(queue.stats().drains_started, 1);

        release_tx.send_replace(true);
        for i in 0..10 {
            assert_eq!(recv(&mut rx).await, i);
        }
        assert_eq!(queue.stats().drains_started, 1);
    }

    #[tokio::test]
    async fn test_enqueue_after_close_is_rejected() {
        let (queue, _rx) = collecting_queue();
        queue.close();

        let err = queue.enqueue(7).unwrap_err();
        assert!(matches!(err, WsError::QueueClosed));
        assert!(queue.is_closed());
        assert_eq!(queue.stats().rejected, 1);
        assert_eq!(queue.stats().enqueued, 0);
    }

    #[tokio::test]
    async fn test_close_discards_backlog() {
        let (release_tx, release_rx) = tokio::sync::watch::channel(false);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let queue = DeliveryQueue::new(move |value: u32| {
            let tx = tx.clone();
            let mut release = release_rx.clone();
            async move {
                let _ = release.wait_for(|open| *open).await;
                let _ = tx.send(value);
            }
        });

        for i in 0..5 {
            queue.enqueue(i).unwrap();
        }
        // Give the drain time to take the first value.
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(queue.close(), 4);
        release_tx.send_replace(true);

        assert_eq!(recv(&mut rx).await, 0);
        let extra = tokio::time::timeout(Duration::from_millis(50), rx.recv()).await;
        assert!(extra.is_err() || extra.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_consumer_panic_does_not_stop_drain() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let queue = DeliveryQueue::new(move |value: u32| {
            let tx = tx.clone();
            async move {
                assert!(value != 1, "boom");
                let _ = tx.send(value);
            }
        });

        queue.enqueue(0).unwrap();
        queue.enqueue(1).unwrap();
        queue.enqueue(2).unwrap();

        assert_eq!(recv(&mut rx).await, 0);
        assert_eq!(recv(&mut rx).await, 2);
        assert_eq!(queue.stats().consumer_panics, 1);
    }

    #[test]
    fn test_enqueue_from_plain_threads() {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_all()
            .build()
            .unwrap();
        let (tx, rx) = std::sync::mpsc::channel();
        let queue = DeliveryQueue::with_handle(runtime.handle().clone(), move |value: u32| {
            let tx = tx.clone();
            async move {
                let _ = tx.send(value);
            }
        });

        let producers: Vec<_> = (0..4u32)
            .map(|p| {
                let queue = queue.clone();
                std::thread::spawn(move || {
                    for i in 0..250 {
                        queue.enqueue(p * 1000 + i).unwrap();
                    }
                })
            })
            .collect();
        for producer in producers {
            producer.join().unwrap();
        }

        let mut seen: Vec<u32> = (0..1000)
            .map(|_| rx.recv_timeout(Duration::from_secs(2)).unwrap())
            .collect();
        seen.sort_unstable();
        seen.dedup();
        assert_eq!(seen.len(), 1000);
    }

    proptest::proptest! {
        #[test]
        fn prop_single_producer_order_is_preserved(values in proptest::collection::vec(proptest::num::u32::ANY, 0..64)) {
            let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
            let observed = runtime.block_on(async {
                let (queue, mut rx) = collecting_queue();
                for value in &values {
                    queue.enqueue(*value).unwrap();
                }
                let mut observed = Vec::with_capacity(values.len());
                for _ in 0..values.len() {
                    observed.push(recv(&mut rx).await);
                }
                observed
            });
            proptest::prop_assert_eq!(observed, values);
        }
    }
}
