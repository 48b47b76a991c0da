//! In-memory frame sockets.

use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use futures_util::{Sink, StreamExt};
use parking_lot::Mutex;
use relay_ws::{CloseCode, FrameReader, FrameSocket, FrameWriter, Message, WsError, WsResult};
use tokio::sync::mpsc;

#[derive(Default)]
struct Outbound {
    sent: Mutex<Vec<Message>>,
    closes: AtomicUsize,
    fail_writes: AtomicBool,
}

/// A scripted socket for driving a worker without a network.
///
/// Frames pushed through the paired [`SocketHandle`] are what the worker
/// reads; frames the worker writes are recorded on the handle.
pub struct MemorySocket {
    inbound: mpsc::UnboundedReceiver<WsResult<Message>>,
    outbound: Arc<Outbound>,
}

/// Test-side control of a [`MemorySocket`].
#[derive(Clone)]
pub struct SocketHandle {
    inbound: Arc<Mutex<Option<mpsc::UnboundedSender<WsResult<Message>>>>>,
    outbound: Arc<Outbound>,
}

/// Create a connected socket and its handle.
pub fn memory_socket() -> (MemorySocket, SocketHandle) {
    let (tx, rx) = mpsc::unbounded_channel();
    let outbound = Arc::new(Outbound::default());
    (
        MemorySocket {
            inbound: rx,
            outbound: Arc::clone(&outbound),
        },
        SocketHandle {
            inbound: Arc::new(Mutex::new(Some(tx))),
            outbound,
        },
    )
}

impl FrameSocket for MemorySocket {
    fn into_split(self) -> (FrameReader, FrameWriter) {
        let reader = futures_util::stream::unfold(self.inbound, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        })
        .boxed();
        let writer: FrameWriter = Box::pin(RecordingWriter {
            outbound: self.outbound,
        });
        (reader, writer)
    }
}

struct RecordingWriter {
    outbound: Arc<Outbound>,
}

impl Sink<Message> for RecordingWriter {
    type Error = WsError;

    fn poll_ready(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<WsResult<()>> {
        Poll::Ready(Ok(()))
    }

    fn start_send(self: Pin<&mut Self>, item: Message) -> WsResult<()> {
        if self.outbound.fail_writes.load(Ordering::SeqCst) {
            return Err(WsError::send_failed("injected write failure"));
        }
        self.outbound.sent.lock().push(item);
        Ok(())
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<WsResult<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_close(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<WsResult<()>> {
        self.outbound.closes.fetch_add(1, Ordering::SeqCst);
        Poll::Ready(Ok(()))
    }
}

impl SocketHandle {
    fn push_item(&self, item: WsResult<Message>) -> bool {
        self.inbound
            .lock()
            .as_ref()
            .is_some_and(|tx| tx.send(item).is_ok())
    }

    /// Deliver a frame to the worker's read loop.
    ///
    /// Returns `false` once the read side is gone.
    pub fn push(&self, message: Message) -> bool {
        self.push_item(Ok(message))
    }

    /// Deliver a text frame.
    pub fn push_text(&self, text: &str) -> bool {
        self.push(Message::text(text))
    }

    /// Deliver a binary frame.
    pub fn push_binary(&self, data: impl Into<Vec<u8>>) -> bool {
        self.push(Message::binary(data))
    }

    /// Deliver a ping frame.
    pub fn push_ping(&self, data: impl Into<Vec<u8>>) -> bool {
        self.push(Message::ping(data))
    }

    /// Deliver a close frame from the peer.
    pub fn push_close(&self, code: CloseCode, reason: &str) -> bool {
        self.push(Message::close(code, reason))
    }

    /// Make the next read fail.
    pub fn fail_read(&self, reason: &str) -> bool {
        self.push_item(Err(WsError::receive_failed(reason)))
    }

    /// End the inbound stream, as if the peer went away.
    pub fn hang_up(&self) {
        self.inbound.lock().take();
    }

    /// Make every following write fail (or succeed again).
    pub fn fail_writes(&self, fail: bool) {
        self.outbound.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Frames written by the worker so far.
    pub fn sent(&self) -> Vec<Message> {
        self.outbound.sent.lock().clone()
    }

    /// Number of frames written by the worker.
    pub fn sent_count(&self) -> usize {
        self.outbound.sent.lock().len()
    }

    /// How many times the worker closed the socket.
    pub fn close_count(&self) -> usize {
        self.outbound.closes.load(Ordering::SeqCst)
    }
}
