//! The narrow read/write contract a worker needs from a socket.
//!
//! A [`FrameSocket`] splits into a [`FrameReader`] (the only way frames are
//! read) and a [`FrameWriter`] (frames written, and `close` to shut the
//! socket). Any framed transport can back a worker by implementing it; the
//! crate provides an implementation for `tokio_tungstenite::WebSocketStream`.

use std::pin::Pin;

use futures_util::future;
use futures_util::stream::{BoxStream, SplitSink, SplitStream};
use futures_util::{Sink, SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_tungstenite::WebSocketStream;

use crate::error::{WsError, WsResult};
use crate::message::Message;

/// Inbound half of a socket.
pub type FrameReader = BoxStream<'static, WsResult<Message>>;

/// Outbound half of a socket. Closing the sink closes the socket.
pub type FrameWriter = Pin<Box<dyn Sink<Message, Error = WsError> + Send>>;

/// A bidirectional framed-message socket.
///
/// The transport owns protocol-level ping replies; the worker never writes
/// pongs itself. `WebSocketStream` queues a pong for every ping it reads.
pub trait FrameSocket: Send + 'static {
    /// Split the socket into its read and write halves.
    fn into_split(self) -> (FrameReader, FrameWriter);
}

impl<S> FrameSocket for WebSocketStream<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    fn into_split(self) -> (FrameReader, FrameWriter) {
        let (sink, stream): (
            SplitSink<WebSocketStream<S>, tungstenite::Message>,
            SplitStream<WebSocketStream<S>>,
        ) = self.split();

        let reader = stream
            .map(|frame| frame.map(Message::from).map_err(WsError::from))
            .boxed();

        let writer = sink
            .sink_map_err(WsError::from)
            .with(|msg: Message| future::ready(Ok::<_, WsError>(tungstenite::Message::from(msg))));

        (reader, Box::pin(writer))
    }
}

impl FrameSocket for (FrameReader, FrameWriter) {
    fn into_split(self) -> (FrameReader, FrameWriter) {
        self
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::task::{Context, Poll};

    use parking_lot::Mutex;
    use tokio::sync::mpsc;

    use super::*;

    /// Writer half that records every frame and counts `close` calls.
    #[derive(Clone, Default)]
    pub(crate) struct Recorder {
        pub(crate) sent: Arc<Mutex<Vec<Message>>>,
        pub(crate) closes: Arc<AtomicUsize>,
    }

    impl Sink<Message> for Recorder {
        type Error = WsError;

        fn poll_ready(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<WsResult<()>> {
            Poll::Ready(Ok(()))
        }

        fn start_send(self: Pin<&mut Self>, item: Message) -> WsResult<()> {
            self.sent.lock().push(item);
            Ok(())
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<WsResult<()>> {
            Poll::Ready(Ok(()))
        }

        fn poll_close(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<WsResult<()>> {
            self.closes.fetch_add(1, Ordering::SeqCst);
            Poll::Ready(Ok(()))
        }
    }

    /// A socket fed by an unbounded channel. Dropping the sender ends the
    /// stream.
    pub(crate) fn channel_socket() -> (
        mpsc::UnboundedSender<WsResult<Message>>,
        Recorder,
        (FrameReader, FrameWriter),
    ) {
        let (tx, rx) = mpsc::unbounded_channel();
        let reader = futures_util::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        })
        .boxed();
        let recorder = Recorder::default();
        let writer: FrameWriter = Box::pin(recorder.clone());
        (tx, recorder, (reader, writer))
    }
}
