//! Inbound frame envelopes.

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use serde::de::DeserializeOwned;

use crate::codec::Codec;
use crate::error::{WsError, WsResult};
use crate::message::FrameType;
use crate::worker::{ConnectionId, Worker};

/// One inbound frame together with the worker it arrived on.
///
/// Envelopes are immutable once built by a worker's read loop; cloning one
/// is cheap and shares the payload.
#[derive(Clone)]
pub struct Envelope {
    payload: Bytes,
    frame_type: FrameType,
    worker: Worker,
    codec: Arc<dyn Codec>,
    received_at: Instant,
}

impl Envelope {
    pub(crate) fn new(worker: Worker, frame_type: FrameType, payload: Bytes) -> Self {
        Self {
            payload,
            frame_type,
            codec: worker.codec(),
            worker,
            received_at: Instant::now(),
        }
    }

    /// The raw frame payload.
    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// The frame type tag.
    pub fn frame_type(&self) -> FrameType {
        self.frame_type
    }

    /// The worker that read this frame.
    pub fn worker(&self) -> &Worker {
        &self.worker
    }

    /// ID of the worker that read this frame.
    pub fn connection_id(&self) -> ConnectionId {
        self.worker.id()
    }

    /// When the frame was read.
    pub fn received_at(&self) -> Instant {
        self.received_at
    }

    /// Payload length in bytes.
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    /// Whether the payload is empty.
    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    /// The payload as UTF-8 text, if it is valid UTF-8.
    pub fn as_text(&self) -> Option<&str> {
        std::str::from_utf8(&self.payload).ok()
    }

    /// The payload decoded by the worker's codec.
    pub fn message(&self) -> WsResult<Bytes> {
        self.codec.decode(self.frame_type, &self.payload)
    }

    /// Decode the payload and deserialize it from JSON.
    pub fn json<T: DeserializeOwned>(&self) -> WsResult<T> {
        let decoded = self.message()?;
        serde_json::from_slice(&decoded).map_err(|e| WsError::decode_failed(e.to_string()))
    }

    /// Encode `data` with this envelope's frame type and write it back to
    /// the originating worker.
    ///
    /// Returns the number of payload bytes written. A failed write is
    /// returned and leaves the worker open.
    pub async fn reply(&self, data: impl AsRef<[u8]>) -> WsResult<usize> {
        let message = self.codec.encode(self.frame_type, data.as_ref())?;
        let written = message.len();
        self.worker.write(message).await?;
        Ok(written)
    }
}

impl fmt::Debug for Envelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Envelope")
            .field("connection_id", &self.worker.id())
            .field("frame_type", &self.frame_type)
            .field("len", &self.payload.len())
            .finish_non_exhaustive()
    }
}
