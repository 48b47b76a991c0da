//! Connection workers.
//!
//! A [`Worker`] owns one live socket. Creating a worker starts its read
//! loop, the only task that ever reads the socket. Every inbound data frame
//! becomes an [`Envelope`] and is pushed through the worker's
//! [`DeliveryQueue`], which hands envelopes one at a time, in arrival order,
//! to every subscriber ([`Worker::subscribe`], one per hub) and to the pull
//! stream ([`Worker::messages`]).
//!
//! The pull stream buffers envelopes while nothing subscribes. Once a
//! subscription exists it only receives envelopes while a [`Messages`]
//! handle is alive.
//!
//! Any read failure is terminal: a close frame, the end of the stream, a
//! protocol error or an idle timeout all close the worker. Write failures
//! are returned to the caller and leave the worker open.
//!
//! # Example
//!
//! ```ignore
//! use futures_util::StreamExt;
//! use relay_ws::{Worker, WorkerConfig};
//!
//! let worker = Worker::new(stream, WorkerConfig::default());
//! let mut messages = worker.messages()?;
//! while let Some(envelope) = messages.next().await {
//!     envelope.reply(envelope.payload()).await?;
//! }
//! ```

use std::collections::HashMap;
use std::fmt;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use bytes::Bytes;
use futures_util::{SinkExt, Stream, StreamExt};
use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;
use tracing::{debug, instrument, trace};
use uuid::Uuid;

use crate::codec::{BasicCodec, Codec};
use crate::config::WorkerConfig;
use crate::envelope::Envelope;
use crate::error::{CloseCode, WsError, WsResult};
use crate::message::{CloseFrame, FrameType, Message};
use crate::queue::{DeliveryQueue, QueueStats};
use crate::signal::{CloseSignal, Closed};
use crate::socket::{FrameReader, FrameSocket, FrameWriter};

/// A unique identifier for a WebSocket connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    /// Create a new time-ordered connection ID.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Create a connection ID from a UUID.
    pub fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    /// Get the underlying UUID.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for ConnectionId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl From<ConnectionId> for Uuid {
    fn from(id: ConnectionId) -> Self {
        id.0
    }
}

/// Where the queue consumer sends each envelope.
struct Routes {
    /// Sending side of the pull stream.
    outbox: Option<mpsc::Sender<Envelope>>,
    /// A [`Messages`] handle holds the receiving side.
    pulling: bool,
    subscribers: Vec<(u64, mpsc::Sender<Envelope>)>,
    next_key: u64,
}

impl Routes {
    fn targets(&self) -> Vec<mpsc::Sender<Envelope>> {
        let mut targets: Vec<_> = self.subscribers.iter().map(|(_, s)| s.clone()).collect();
        if self.pulling || self.subscribers.is_empty() {
            targets.extend(self.outbox.clone());
        }
        targets
    }

    fn subscribe(&mut self, sender: mpsc::Sender<Envelope>) -> u64 {
        let key = self.next_key;
        self.next_key += 1;
        self.subscribers.push((key, sender));
        key
    }

    fn unsubscribe(&mut self, key: u64) {
        self.subscribers.retain(|(k, _)| *k != key);
    }

    fn clear(&mut self) {
        self.outbox = None;
        self.subscribers.clear();
    }
}

struct Inner {
    id: ConnectionId,
    config: WorkerConfig,
    codec: Arc<dyn Codec>,
    writer: tokio::sync::Mutex<FrameWriter>,
    queue: DeliveryQueue<Envelope>,
    routes: Arc<Mutex<Routes>>,
    /// Receiving side, parked here while no [`Messages`] handle holds it.
    inbox: Mutex<Option<mpsc::Receiver<Envelope>>>,
    signal: CloseSignal,
    connected_at: Instant,
    last_activity: Mutex<Instant>,
    frames_received: AtomicU64,
    client_id: RwLock<Option<String>>,
    attributes: RwLock<HashMap<String, String>>,
}

/// The owner of one live socket and its read loop.
///
/// `Worker` is a cheap handle: clones refer to the same connection, and two
/// handles are equal when they refer to the same connection.
#[derive(Clone)]
pub struct Worker {
    inner: Arc<Inner>,
}

impl Worker {
    /// Wrap a socket with the pass-through codec and start its read loop.
    ///
    /// # Panics
    ///
    /// Panics when called outside a tokio runtime.
    pub fn new<S: FrameSocket>(socket: S, config: WorkerConfig) -> Self {
        Self::with_codec(socket, config, Arc::new(BasicCodec))
    }

    /// Wrap a socket with the given codec and start its read loop.
    ///
    /// # Panics
    ///
    /// Panics when called outside a tokio runtime.
    pub fn with_codec<S: FrameSocket>(socket: S, config: WorkerConfig, codec: Arc<dyn Codec>) -> Self {
        let (reader, writer) = socket.into_split();
        let (sender, receiver) = mpsc::channel(config.message_buffer.max(1));
        let routes = Arc::new(Mutex::new(Routes {
            outbox: Some(sender),
            pulling: false,
            subscribers: Vec::new(),
            next_key: 0,
        }));
        let signal = CloseSignal::new();

        let queue = DeliveryQueue::new({
            let routes = Arc::clone(&routes);
            let signal = signal.clone();
            move |envelope: Envelope| {
                let targets = routes.lock().targets();
                let closed = signal.notified();
                async move {
                    if targets.is_empty() {
                        return;
                    }
                    tokio::select! {
                        biased;
                        () = closed => {}
                        () = fan_out(targets, envelope) => {}
                    }
                }
            }
        });

        let now = Instant::now();
        let worker = Self {
            inner: Arc::new(Inner {
                id: ConnectionId::new(),
                config,
                codec,
                writer: tokio::sync::Mutex::new(writer),
                queue,
                routes,
                inbox: Mutex::new(Some(receiver)),
                signal,
                connected_at: now,
                last_activity: Mutex::new(now),
                frames_received: AtomicU64::new(0),
                client_id: RwLock::new(None),
                attributes: RwLock::new(HashMap::new()),
            }),
        };

        debug!(connection_id = %worker.inner.id, "worker started");
        tokio::spawn(read_loop(worker.clone(), reader));
        worker
    }

    /// Attach a client identifier.
    pub fn with_client_id(self, client_id: impl Into<String>) -> Self {
        *self.inner.client_id.write() = Some(client_id.into());
        self
    }

    /// Attach a string attribute, such as a request parameter.
    pub fn with_attribute(self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.set_attribute(key, value);
        self
    }

    /// Set a string attribute on a running worker.
    pub fn set_attribute(&self, key: impl Into<String>, value: impl Into<String>) {
        self.inner.attributes.write().insert(key.into(), value.into());
    }

    /// Get an attribute value.
    pub fn attribute(&self, key: &str) -> Option<String> {
        self.inner.attributes.read().get(key).cloned()
    }

    /// Snapshot of all attributes.
    pub fn attributes(&self) -> HashMap<String, String> {
        self.inner.attributes.read().clone()
    }

    /// Get the client identifier, if one was attached.
    pub fn client_id(&self) -> Option<String> {
        self.inner.client_id.read().clone()
    }

    /// Get the connection ID.
    pub fn id(&self) -> ConnectionId {
        self.inner.id
    }

    /// Get the worker configuration.
    pub fn config(&self) -> &WorkerConfig {
        &self.inner.config
    }

    /// Get the codec attached to this worker.
    pub fn codec(&self) -> Arc<dyn Codec> {
        Arc::clone(&self.inner.codec)
    }

    /// Get when the worker was created.
    pub fn connected_at(&self) -> Instant {
        self.inner.connected_at
    }

    /// Get when the last frame was read.
    pub fn last_activity(&self) -> Instant {
        *self.inner.last_activity.lock()
    }

    /// Get how long this worker has been open.
    pub fn connection_duration(&self) -> Duration {
        self.inner.connected_at.elapsed()
    }

    /// Get how long since the last frame was read.
    pub fn idle_duration(&self) -> Duration {
        self.last_activity().elapsed()
    }

    /// Number of frames read from the socket.
    pub fn frames_received(&self) -> u64 {
        self.inner.frames_received.load(Ordering::Relaxed)
    }

    /// Counters of the worker's delivery queue.
    pub fn queue_stats(&self) -> QueueStats {
        self.inner.queue.stats()
    }

    /// Check if the worker has been closed.
    pub fn is_closed(&self) -> bool {
        self.inner.signal.is_fired()
    }

    /// A future that completes once the worker is closed.
    pub fn close_notify(&self) -> Closed {
        self.inner.signal.notified()
    }

    /// Take the stream of delivered envelopes.
    ///
    /// Only one [`Messages`] handle exists at a time; dropping it hands the
    /// stream back to the worker.
    ///
    /// # Errors
    ///
    /// Returns [`WsError::MessagesInUse`] while another handle is alive and
    /// [`WsError::ConnectionClosed`] once the worker is closed.
    pub fn messages(&self) -> WsResult<Messages> {
        if self.is_closed() {
            return Err(closed_error());
        }
        let mut inbox = self.inner.inbox.lock();
        match inbox.take() {
            Some(receiver) => {
                self.inner.routes.lock().pulling = true;
                Ok(Messages {
                    worker: self.clone(),
                    receiver: Some(receiver),
                })
            }
            None if self.is_closed() => Err(closed_error()),
            None => Err(WsError::messages_in_use(self.inner.id)),
        }
    }

    /// Open a separate envelope stream for one more consumer.
    ///
    /// Every live subscription sees every envelope read after it was opened,
    /// in arrival order. A slow subscriber holds back the others once its
    /// buffer is full. Dropping the subscription detaches it.
    ///
    /// # Errors
    ///
    /// Returns [`WsError::ConnectionClosed`] once the worker is closed.
    pub fn subscribe(&self) -> WsResult<Subscription> {
        if self.is_closed() {
            return Err(closed_error());
        }
        let (sender, receiver) = mpsc::channel(self.inner.config.message_buffer.max(1));
        let key = {
            let mut routes = self.inner.routes.lock();
            // Close fires the signal before it clears the routes.
            if self.is_closed() {
                return Err(closed_error());
            }
            routes.subscribe(sender)
        };
        Ok(Subscription {
            worker: self.clone(),
            key,
            receiver,
        })
    }

    /// Write a message to the socket.
    ///
    /// Failures are returned and do not close the worker.
    #[instrument(skip(self, message), fields(connection_id = %self.inner.id, frame_type = %message.frame_type()))]
    pub async fn write(&self, message: Message) -> WsResult<()> {
        if message.is_close() {
            return Err(WsError::invalid_type(
                "close frames are written with Worker::close_with",
            ));
        }
        if self.is_closed() {
            return Err(closed_error());
        }

        let mut guard = self.inner.writer.lock().await;
        if self.is_closed() {
            return Err(closed_error());
        }
        let writer = &mut *guard;
        writer
            .send(message)
            .await
            .map_err(|e| WsError::send_failed(e.to_string()))
    }

    /// Write a raw payload as a frame of the given type.
    pub async fn write_frame(&self, frame_type: FrameType, payload: impl Into<Vec<u8>>) -> WsResult<()> {
        self.write(Message::from_frame(frame_type, payload)?).await
    }

    /// Write a text message.
    pub async fn write_text(&self, text: impl Into<String>) -> WsResult<()> {
        self.write(Message::text(text)).await
    }

    /// Write a binary message.
    pub async fn write_binary(&self, data: impl Into<Vec<u8>>) -> WsResult<()> {
        self.write(Message::binary(data)).await
    }

    /// Write a JSON text message.
    pub async fn write_json<T: serde::Serialize>(&self, value: &T) -> WsResult<()> {
        self.write(Message::from_json(value)?).await
    }

    /// Close the worker and its socket.
    ///
    /// The first call returns `Ok(())`. Every later call returns
    /// [`WsError::AlreadyClosed`] and leaves the socket alone.
    pub async fn close(&self) -> WsResult<()> {
        self.shutdown(None).await
    }

    /// Send a close frame with the given code and reason, then close.
    pub async fn close_with(&self, code: CloseCode, reason: impl Into<String>) -> WsResult<()> {
        self.shutdown(Some(CloseFrame::new(code, reason))).await
    }

    async fn shutdown(&self, frame: Option<CloseFrame>) -> WsResult<()> {
        if !self.inner.signal.fire() {
            return Err(WsError::AlreadyClosed);
        }

        let discarded = self.inner.queue.close();
        self.inner.routes.lock().clear();
        let parked = self.inner.inbox.lock().take();
        drop(parked);
        debug!(connection_id = %self.inner.id, discarded, "closing worker");

        let mut guard = self.inner.writer.lock().await;
        let writer = &mut *guard;
        if let Some(frame) = frame {
            if let Err(e) = writer.send(Message::Close(Some(frame))).await {
                debug!(connection_id = %self.inner.id, error = %e, "failed to send close frame");
            }
        }
        // The peer may already be gone; the worker is closed either way.
        if let Err(e) = writer.close().await {
            debug!(connection_id = %self.inner.id, error = %e, "socket close reported an error");
        }
        Ok(())
    }

    fn handle_frame(&self, message: Message) -> bool {
        *self.inner.last_activity.lock() = Instant::now();
        self.inner.frames_received.fetch_add(1, Ordering::Relaxed);
        metrics::counter!(
            "relay_worker_frames_received_total",
            "frame_type" => message.frame_type().to_string()
        )
        .increment(1);

        match message {
            Message::Close(frame) => {
                debug!(code = ?frame.as_ref().map(|f| f.code), "peer sent close frame");
                false
            }
            Message::Ping(data) => {
                if self.inner.config.deliver_control_frames {
                    self.deliver(FrameType::Ping, Bytes::from(data));
                }
                true
            }
            Message::Pong(data) => {
                if self.inner.config.deliver_control_frames {
                    self.deliver(FrameType::Pong, Bytes::from(data));
                }
                true
            }
            data => {
                let (frame_type, payload) = data.into_frame();
                self.deliver(frame_type, payload);
                true
            }
        }
    }

    fn deliver(&self, frame_type: FrameType, payload: Bytes) {
        let envelope = Envelope::new(self.clone(), frame_type, payload);
        if let Err(e) = self.inner.queue.enqueue(envelope) {
            trace!(error = %e, "dropping frame read after close");
        }
    }
}

impl PartialEq for Worker {
    fn eq(&self, other: &Self) -> bool {
        self.inner.id == other.inner.id
    }
}

impl Eq for Worker {}

impl std::hash::Hash for Worker {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.inner.id.hash(state);
    }
}

impl fmt::Debug for Worker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Worker")
            .field("id", &self.inner.id)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

fn closed_error() -> WsError {
    WsError::connection_closed(None, "worker is closed")
}

async fn fan_out(targets: Vec<mpsc::Sender<Envelope>>, envelope: Envelope) {
    for sender in targets {
        if sender.send(envelope.clone()).await.is_err() {
            trace!("envelope consumer dropped, skipping");
        }
    }
}

enum ReadOutcome {
    Frame(Message),
    Ended,
    Failed(WsError),
    TimedOut,
}

async fn next_frame(reader: &mut FrameReader, idle_timeout: Option<Duration>) -> ReadOutcome {
    let next = match idle_timeout {
        Some(limit) => match tokio::time::timeout(limit, reader.next()).await {
            Ok(next) => next,
            Err(_) => return ReadOutcome::TimedOut,
        },
        None => reader.next().await,
    };
    match next {
        Some(Ok(message)) => ReadOutcome::Frame(message),
        Some(Err(e)) => ReadOutcome::Failed(e),
        None => ReadOutcome::Ended,
    }
}

#[instrument(name = "read_loop", skip_all, fields(connection_id = %worker.inner.id))]
async fn read_loop(worker: Worker, mut reader: FrameReader) {
    let mut closed = worker.close_notify();
    let idle_timeout = worker.inner.config.idle_timeout;

    loop {
        let outcome = tokio::select! {
            biased;
            () = &mut closed => {
                trace!("worker closed, read loop exiting");
                return;
            }
            outcome = next_frame(&mut reader, idle_timeout) => outcome,
        };

        match outcome {
            ReadOutcome::Frame(message) => {
                if !worker.handle_frame(message) {
                    break;
                }
            }
            ReadOutcome::Ended => {
                debug!("socket stream ended");
                break;
            }
            ReadOutcome::Failed(e) => {
                debug!(error = %e, "read failed");
                break;
            }
            ReadOutcome::TimedOut => {
                debug!(?idle_timeout, "idle timeout elapsed");
                break;
            }
        }
    }

    drop(reader);
    if worker.close().await.is_err() {
        trace!("worker was closed concurrently");
    }
}

/// Stream of envelopes delivered by a worker, in arrival order.
///
/// Ends once the worker is closed. Dropping it before then returns the
/// stream to the worker so [`Worker::messages`] can hand it out again.
pub struct Messages {
    worker: Worker,
    receiver: Option<mpsc::Receiver<Envelope>>,
}

impl Messages {
    /// The worker this stream belongs to.
    pub fn worker(&self) -> &Worker {
        &self.worker
    }

    /// Receive the next envelope, or `None` once the worker is closed.
    pub async fn recv(&mut self) -> Option<Envelope> {
        self.next().await
    }
}

impl Stream for Messages {
    type Item = Envelope;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.worker.is_closed() {
            return Poll::Ready(None);
        }
        match self.receiver.as_mut() {
            Some(receiver) => receiver.poll_recv(cx),
            None => Poll::Ready(None),
        }
    }
}

impl Drop for Messages {
    fn drop(&mut self) {
        let Some(receiver) = self.receiver.take() else {
            return;
        };
        let rejected = {
            let mut inbox = self.worker.inner.inbox.lock();
            if self.worker.is_closed() {
                Some(receiver)
            } else {
                *inbox = Some(receiver);
                self.worker.inner.routes.lock().pulling = false;
                None
            }
        };
        drop(rejected);
    }
}

impl fmt::Debug for Messages {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Messages")
            .field("connection_id", &self.worker.id())
            .finish_non_exhaustive()
    }
}

/// One consumer's view of a worker's envelopes, from [`Worker::subscribe`].
///
/// Ends once the worker is closed.
pub struct Subscription {
    worker: Worker,
    key: u64,
    receiver: mpsc::Receiver<Envelope>,
}

impl Subscription {
    /// The worker this subscription belongs to.
    pub fn worker(&self) -> &Worker {
        &self.worker
    }

    /// Receive the next envelope, or `None` once the worker is closed.
    pub async fn recv(&mut self) -> Option<Envelope> {
        self.next().await
    }
}

impl Stream for Subscription {
    type Item = Envelope;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.worker.is_closed() {
            return Poll::Ready(None);
        }
        self.receiver.poll_recv(cx)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.worker.inner.routes.lock().unsubscribe(self.key);
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("connection_id", &self.worker.id())
            .field("key", &self.key)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::socket::testing::channel_socket as socket;

    async fn wait_until(condition: impl Fn() -> bool) {
        tokio::time::timeout(Duration::from_secs(1), async {
            while !condition() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("condition not reached in time");
    }

    async fn next(messages: &mut Messages) -> Envelope {
        tokio::time::timeout(Duration::from_secs(1), messages.recv())
            .await
            .expect("envelope should arrive")
            .expect("stream open")
    }

    #[test]
    fn test_connection_id_new() {
        let id1 = ConnectionId::new();
        let id2 = ConnectionId::new();
        assert_ne!(id1, id2);
    }

    #[test]
    fn test_connection_id_from_uuid() {
        let uuid = Uuid::now_v7();
        let id = ConnectionId::from_uuid(uuid);
        assert_eq!(id.as_uuid(), uuid);
        assert_eq!(id.to_string(), uuid.to_string());
        let back: Uuid = id.into();
        assert_eq!(back, uuid);
    }

    #[tokio::test]
    async fn test_frames_become_envelopes_in_order() {
        let (tx, _recorder, socket) = socket();
        let worker = Worker::new(socket, WorkerConfig::default());
        let mut messages = worker.messages().unwrap();

        tx.send(Ok(Message::text("one"))).unwrap();
        tx.send(Ok(Message::binary(vec![2]))).unwrap();
        tx.send(Ok(Message::text("three"))).unwrap();

        let first = next(&mut messages).await;
        assert_eq!(first.frame_type(), FrameType::Text);
        assert_eq!(first.payload(), &Bytes::from_static(b"one"));
        assert_eq!(first.worker(), &worker);

        let second = next(&mut messages).await;
        assert_eq!(second.frame_type(), FrameType::Binary);
        assert_eq!(&second.payload()[..], &[2]);

        assert_eq!(next(&mut messages).await.as_text(), Some("three"));
        assert_eq!(worker.frames_received(), 3);
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let (_tx, recorder, socket) = socket();
        let worker = Worker::new(socket, WorkerConfig::default());

        assert!(worker.close().await.is_ok());
        let err = worker.close().await.unwrap_err();
        assert!(err.is_already_closed());
        assert!(worker.is_closed());
        assert_eq!(recorder.closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_close_notify_fires() {
        let (_tx, _recorder, socket) = socket();
        let worker = Worker::new(socket, WorkerConfig::default());
        let notified = worker.close_notify();
        let handle = tokio::spawn(notified);

        worker.close().await.unwrap();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("close notification should fire")
            .unwrap();
    }

    #[tokio::test]
    async fn test_close_with_sends_close_frame() {
        let (_tx, recorder, socket) = socket();
        let worker = Worker::new(socket, WorkerConfig::default());

        worker.close_with(CloseCode::GoingAway, "bye").await.unwrap();
        let sent = recorder.sent.lock().clone();
        assert_eq!(sent, vec![Message::close(CloseCode::GoingAway, "bye")]);
        assert!(worker.close_with(CloseCode::Normal, "again").await.is_err());
    }

    #[tokio::test]
    async fn test_messages_single_consumer() {
        let (_tx, _recorder, socket) = socket();
        let worker = Worker::new(socket, WorkerConfig::default());

        let messages = worker.messages().unwrap();
        assert!(matches!(worker.messages(), Err(WsError::MessagesInUse { .. })));

        drop(messages);
        assert!(worker.messages().is_ok());
    }

    #[tokio::test]
    async fn test_messages_end_after_close() {
        let (_tx, _recorder, socket) = socket();
        let worker = Worker::new(socket, WorkerConfig::default());
        let mut messages = worker.messages().unwrap();

        worker.close().await.unwrap();
        assert!(messages.recv().await.is_none());
        assert!(matches!(
            worker.messages(),
            Err(WsError::ConnectionClosed { .. })
        ));
    }

    #[tokio::test]
    async fn test_peer_close_frame_closes_worker() {
        let (tx, recorder, socket) = socket();
        let worker = Worker::new(socket, WorkerConfig::default());

        tx.send(Ok(Message::close(CloseCode::Normal, "done"))).unwrap();
        wait_until(|| worker.is_closed()).await;
        wait_until(|| recorder.closes.load(Ordering::SeqCst) == 1).await;
    }

    #[tokio::test]
    async fn test_read_error_closes_worker() {
        let (tx, _recorder, socket) = socket();
        let worker = Worker::new(socket, WorkerConfig::default());

        tx.send(Err(WsError::receive_failed("reset by peer"))).unwrap();
        wait_until(|| worker.is_closed()).await;
    }

    #[tokio::test]
    async fn test_end_of_stream_closes_worker() {
        let (tx, _recorder, socket) = socket();
        let worker = Worker::new(socket, WorkerConfig::default());

        drop(tx);
        wait_until(|| worker.is_closed()).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_timeout_closes_worker() {
        let (_tx, _recorder, socket) = socket();
        let config = WorkerConfig::default().idle_timeout(Duration::from_secs(30));
        let worker = Worker::new(socket, config);

        let started = tokio::time::Instant::now();
        worker.close_notify().await;
        assert!(worker.is_closed());
        assert!(started.elapsed() >= Duration::from_secs(30));
    }

    #[tokio::test]
    async fn test_ping_is_not_delivered_or_answered() {
        let (tx, recorder, socket) = socket();
        let worker = Worker::new(socket, WorkerConfig::default());
        let mut messages = worker.messages().unwrap();

        tx.send(Ok(Message::ping(vec![7]))).unwrap();
        tx.send(Ok(Message::text("after"))).unwrap();

        assert_eq!(next(&mut messages).await.as_text(), Some("after"));
        assert!(recorder.sent.lock().is_empty());
    }

    #[tokio::test]
    async fn test_control_frames_delivered_when_enabled() {
        let (tx, recorder, socket) = socket();
        let config = WorkerConfig::default().deliver_control_frames(true);
        let worker = Worker::new(socket, config);
        let mut messages = worker.messages().unwrap();

        tx.send(Ok(Message::ping(vec![1]))).unwrap();
        tx.send(Ok(Message::pong(vec![2]))).unwrap();

        assert_eq!(next(&mut messages).await.frame_type(), FrameType::Ping);
        assert_eq!(next(&mut messages).await.frame_type(), FrameType::Pong);
        assert!(recorder.sent.lock().is_empty());
    }

    #[tokio::test]
    async fn test_write_after_close_fails() {
        let (_tx, recorder, socket) = socket();
        let worker = Worker::new(socket, WorkerConfig::default());

        worker.write_text("hello").await.unwrap();
        worker.close().await.unwrap();

        let err = worker.write_text("late").await.unwrap_err();
        assert!(matches!(err, WsError::ConnectionClosed { .. }));
        assert_eq!(recorder.sent.lock().clone(), vec![Message::text("hello")]);
    }

    #[tokio::test]
    async fn test_write_rejects_close_messages() {
        let (_tx, _recorder, socket) = socket();
        let worker = Worker::new(socket, WorkerConfig::default());

        let err = worker.write(Message::close_empty()).await.unwrap_err();
        assert!(matches!(err, WsError::InvalidType(_)));
        assert!(!worker.is_closed());
    }

    #[tokio::test]
    async fn test_write_variants() {
        let (_tx, recorder, socket) = socket();
        let worker = Worker::new(socket, WorkerConfig::default());

        worker.write_frame(FrameType::Binary, vec![1, 2]).await.unwrap();
        worker.write_binary(vec![3]).await.unwrap();
        worker.write_json(&serde_json::json!({"ok": true})).await.unwrap();

        assert_eq!(
            recorder.sent.lock().clone(),
            vec![
                Message::binary(vec![1, 2]),
                Message::binary(vec![3]),
                Message::text(r#"{"ok":true}"#),
            ]
        );
    }

    #[tokio::test]
    async fn test_metadata() {
        let (_tx, _recorder, socket) = socket();
        let worker = Worker::new(socket, WorkerConfig::default())
            .with_client_id("client-1")
            .with_attribute("room", "lobby");

        assert_eq!(worker.client_id().as_deref(), Some("client-1"));
        assert_eq!(worker.attribute("room").as_deref(), Some("lobby"));
        worker.set_attribute("room", "kitchen");
        assert_eq!(worker.attributes().get("room").map(String::as_str), Some("kitchen"));
        assert!(worker.attribute("missing").is_none());
    }

    #[tokio::test]
    async fn test_clones_are_equal() {
        let (_tx, _recorder, socket) = socket();
        let worker = Worker::new(socket, WorkerConfig::default());
        let (_tx2, _recorder2, socket2) = self::socket();
        let other = Worker::new(socket2, WorkerConfig::default());

        assert_eq!(worker.clone(), worker);
        assert_ne!(worker, other);
    }

    async fn next_from(subscription: &mut Subscription) -> Envelope {
        tokio::time::timeout(Duration::from_secs(1), subscription.recv())
            .await
            .expect("envelope should arrive")
            .expect("subscription open")
    }

    #[tokio::test]
    async fn test_subscriptions_each_see_every_frame() {
        let (tx, _recorder, socket) = socket();
        let worker = Worker::new(socket, WorkerConfig::default());
        let mut first = worker.subscribe().unwrap();
        let mut second = worker.subscribe().unwrap();

        for text in ["a", "b", "c"] {
            tx.send(Ok(Message::text(text))).unwrap();
        }

        for subscription in [&mut first, &mut second] {
            assert_eq!(next_from(subscription).await.as_text(), Some("a"));
            assert_eq!(next_from(subscription).await.as_text(), Some("b"));
            assert_eq!(next_from(subscription).await.as_text(), Some("c"));
        }
        assert_eq!(worker.queue_stats().delivered, 3);
    }

    #[tokio::test]
    async fn test_pull_stream_only_fed_while_held_when_subscribed() {
        let (tx, _recorder, socket) = socket();
        let worker = Worker::new(socket, WorkerConfig::default());
        let mut subscription = worker.subscribe().unwrap();

        tx.send(Ok(Message::text("before"))).unwrap();
        assert_eq!(next_from(&mut subscription).await.as_text(), Some("before"));

        let mut messages = worker.messages().unwrap();
        tx.send(Ok(Message::text("after"))).unwrap();
        assert_eq!(next_from(&mut subscription).await.as_text(), Some("after"));
        assert_eq!(next(&mut messages).await.as_text(), Some("after"));
    }

    #[tokio::test]
    async fn test_dropped_subscription_detaches() {
        let (tx, _recorder, socket) = socket();
        let worker = Worker::new(socket, WorkerConfig::default());
        drop(worker.subscribe().unwrap());

        tx.send(Ok(Message::text("buffered"))).unwrap();
        let mut messages = worker.messages().unwrap();
        assert_eq!(next(&mut messages).await.as_text(), Some("buffered"));
    }

    #[tokio::test]
    async fn test_subscription_ends_after_close() {
        let (_tx, _recorder, socket) = socket();
        let worker = Worker::new(socket, WorkerConfig::default());
        let mut subscription = worker.subscribe().unwrap();

        worker.close().await.unwrap();
        assert!(subscription.recv().await.is_none());
        assert!(matches!(
            worker.subscribe(),
            Err(WsError::ConnectionClosed { .. })
        ));
    }
}
