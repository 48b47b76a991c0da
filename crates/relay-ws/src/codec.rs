//! Payload codecs attached to workers.
//!
//! The core treats payloads as opaque bytes. A [`Codec`] lets the
//! surrounding application interpret them: `decode` runs when a handler
//! asks an [`Envelope`](crate::Envelope) for its message, `encode` runs when
//! a reply is written.

use std::fmt;

use bytes::Bytes;

use crate::error::{WsError, WsResult};
use crate::message::{FrameType, Message};

/// Converts between raw frame payloads and application payloads.
pub trait Codec: fmt::Debug + Send + Sync + 'static {
    /// Encode `data` into a frame of the given type.
    fn encode(&self, frame_type: FrameType, data: &[u8]) -> WsResult<Message>;

    /// Decode the payload of an inbound frame.
    fn decode(&self, frame_type: FrameType, payload: &Bytes) -> WsResult<Bytes>;
}

/// Pass-through codec: payloads are written and read unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct BasicCodec;

impl Codec for BasicCodec {
    fn encode(&self, frame_type: FrameType, data: &[u8]) -> WsResult<Message> {
        Message::from_frame(frame_type, data)
    }

    fn decode(&self, _frame_type: FrameType, payload: &Bytes) -> WsResult<Bytes> {
        Ok(payload.clone())
    }
}

/// JSON codec: payloads must be JSON documents and are sent as text frames.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn encode(&self, frame_type: FrameType, data: &[u8]) -> WsResult<Message> {
        if !frame_type.is_data() {
            return Message::from_frame(frame_type, data);
        }
        serde_json::from_slice::<serde::de::IgnoredAny>(data)
            .map_err(|e| WsError::encode_failed(format!("payload is not JSON: {e}")))?;
        Message::from_frame(FrameType::Text, data)
    }

    fn decode(&self, frame_type: FrameType, payload: &Bytes) -> WsResult<Bytes> {
        if !frame_type.is_data() {
            return Err(WsError::invalid_type(format!(
                "cannot decode {frame_type} frame as JSON"
            )));
        }
        serde_json::from_slice::<serde::de::IgnoredAny>(payload)
            .map_err(|e| WsError::decode_failed(format!("payload is not JSON: {e}")))?;
        Ok(payload.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_codec_passes_through() {
        let codec = BasicCodec;
        let payload = Bytes::from_static(b"\x00\x01raw");
        assert_eq!(codec.decode(FrameType::Binary, &payload).unwrap(), payload);

        let msg = codec.encode(FrameType::Text, b"hello").unwrap();
        assert_eq!(msg, Message::text("hello"));

        let msg = codec.encode(FrameType::Binary, &[1, 2, 3]).unwrap();
        assert_eq!(msg, Message::binary(vec![1, 2, 3]));
    }

    #[test]
    fn test_basic_codec_rejects_invalid_text() {
        let err = BasicCodec.encode(FrameType::Text, &[0xff, 0xfe]).unwrap_err();
        assert!(matches!(err, WsError::EncodeFailed(_)));
    }

    #[test]
    fn test_basic_codec_rejects_close_type() {
        let err = BasicCodec.encode(FrameType::Close, b"").unwrap_err();
        assert!(matches!(err, WsError::InvalidType(_)));
    }

    #[test]
    fn test_json_codec_validates() {
        let codec = JsonCodec;
        let ok = Bytes::from_static(br#"{"a":1}"#);
        assert_eq!(codec.decode(FrameType::Text, &ok).unwrap(), ok);

        let bad = Bytes::from_static(b"{not json");
        assert!(matches!(
            codec.decode(FrameType::Text, &bad),
            Err(WsError::DecodeFailed(_))
        ));
        assert!(matches!(
            codec.encode(FrameType::Text, b"nope"),
            Err(WsError::EncodeFailed(_))
        ));
    }

    #[test]
    fn test_json_codec_writes_text_frames() {
        let msg = JsonCodec.encode(FrameType::Binary, b"[1,2]").unwrap();
        assert_eq!(msg, Message::text("[1,2]"));
    }

    #[test]
    fn test_json_codec_rejects_control_decode() {
        let err = JsonCodec
            .decode(FrameType::Ping, &Bytes::from_static(b"{}"))
            .unwrap_err();
        assert!(matches!(err, WsError::InvalidType(_)));
    }
}
