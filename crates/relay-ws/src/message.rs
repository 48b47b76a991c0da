//! WebSocket frame and message types.
//!
//! [`FrameType`] is the integer tag carried by every envelope; [`Message`]
//! is a full frame as read from or written to a socket.

use std::borrow::Cow;
use std::fmt;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::{CloseCode, WsError, WsResult};

/// The type tag of a WebSocket frame.
///
/// Values are the RFC 6455 opcodes, so they can be exchanged with code that
/// expects the raw integer tags (`1` for text, `2` for binary, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FrameType {
    /// UTF-8 text data.
    Text = 1,
    /// Binary data.
    Binary = 2,
    /// Connection close.
    Close = 8,
    /// Ping.
    Ping = 9,
    /// Pong.
    Pong = 10,
}

impl FrameType {
    /// Convert from a raw opcode.
    pub fn from_u8(tag: u8) -> Option<Self> {
        match tag {
            1 => Some(Self::Text),
            2 => Some(Self::Binary),
            8 => Some(Self::Close),
            9 => Some(Self::Ping),
            10 => Some(Self::Pong),
            _ => None,
        }
    }

    /// Get the raw opcode.
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Whether this is a control frame (close, ping or pong).
    pub fn is_control(self) -> bool {
        matches!(self, Self::Close | Self::Ping | Self::Pong)
    }

    /// Whether this is a data frame (text or binary).
    pub fn is_data(self) -> bool {
        !self.is_control()
    }
}

impl fmt::Display for FrameType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Text => "text",
            Self::Binary => "binary",
            Self::Close => "close",
            Self::Ping => "ping",
            Self::Pong => "pong",
        };
        f.write_str(name)
    }
}

/// A WebSocket message.
///
/// Messages can be text, binary, ping, pong, or close frames.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// A text message (UTF-8 encoded).
    Text(String),
    /// A binary message.
    Binary(Vec<u8>),
    /// A ping frame with optional payload.
    Ping(Vec<u8>),
    /// A pong frame with optional payload.
    Pong(Vec<u8>),
    /// A close frame with optional code and reason.
    Close(Option<CloseFrame>),
}

impl Message {
    /// Create a new text message.
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text(text.into())
    }

    /// Create a new binary message.
    pub fn binary(data: impl Into<Vec<u8>>) -> Self {
        Self::Binary(data.into())
    }

    /// Create a new ping message.
    pub fn ping(data: impl Into<Vec<u8>>) -> Self {
        Self::Ping(data.into())
    }

    /// Create a new pong message.
    pub fn pong(data: impl Into<Vec<u8>>) -> Self {
        Self::Pong(data.into())
    }

    /// Create a close message with a code and reason.
    pub fn close(code: CloseCode, reason: impl Into<String>) -> Self {
        Self::Close(Some(CloseFrame::new(code, reason)))
    }

    /// Create an empty close message.
    pub fn close_empty() -> Self {
        Self::Close(None)
    }

    /// Build a message from a frame type and raw payload.
    ///
    /// Text payloads must be valid UTF-8. Close frames carry structured
    /// data and cannot be built this way.
    pub fn from_frame(frame_type: FrameType, payload: impl Into<Vec<u8>>) -> WsResult<Self> {
        let payload = payload.into();
        match frame_type {
            FrameType::Text => String::from_utf8(payload)
                .map(Self::Text)
                .map_err(|e| WsError::encode_failed(format!("text frame is not UTF-8: {e}"))),
            FrameType::Binary => Ok(Self::Binary(payload)),
            FrameType::Ping => Ok(Self::Ping(payload)),
            FrameType::Pong => Ok(Self::Pong(payload)),
            FrameType::Close => Err(WsError::invalid_type(
                "close frames are written with Worker::close_with",
            )),
        }
    }

    /// Get the frame type of this message.
    pub fn frame_type(&self) -> FrameType {
        match self {
            Self::Text(_) => FrameType::Text,
            Self::Binary(_) => FrameType::Binary,
            Self::Ping(_) => FrameType::Ping,
            Self::Pong(_) => FrameType::Pong,
            Self::Close(_) => FrameType::Close,
        }
    }

    /// Check if this is a text message.
    pub fn is_text(&self) -> bool {
        matches!(self, Self::Text(_))
    }

    /// Check if this is a binary message.
    pub fn is_binary(&self) -> bool {
        matches!(self, Self::Binary(_))
    }

    /// Check if this is a close message.
    pub fn is_close(&self) -> bool {
        matches!(self, Self::Close(_))
    }

    /// Check if this is a data message (text or binary).
    pub fn is_data(&self) -> bool {
        self.frame_type().is_data()
    }

    /// Get the message payload as text.
    ///
    /// Returns `None` if this is not a text message.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Get the message payload as bytes.
    ///
    /// Returns `None` for close messages.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Self::Text(s) => Some(s.as_bytes()),
            Self::Binary(b) | Self::Ping(b) | Self::Pong(b) => Some(b),
            Self::Close(_) => None,
        }
    }

    /// Get the close frame if this is a close message.
    pub fn close_frame(&self) -> Option<&CloseFrame> {
        match self {
            Self::Close(frame) => frame.as_ref(),
            _ => None,
        }
    }

    /// Split the message into its frame type and payload bytes.
    ///
    /// Close frames yield an empty payload.
    pub fn into_frame(self) -> (FrameType, Bytes) {
        let frame_type = self.frame_type();
        let payload = match self {
            Self::Text(s) => Bytes::from(s),
            Self::Binary(b) | Self::Ping(b) | Self::Pong(b) => Bytes::from(b),
            Self::Close(_) => Bytes::new(),
        };
        (frame_type, payload)
    }

    /// Try to parse the text message as JSON.
    pub fn json<T: for<'de> Deserialize<'de>>(&self) -> WsResult<T> {
        let text = self
            .as_text()
            .ok_or_else(|| WsError::decode_failed("not a text message"))?;
        serde_json::from_str(text).map_err(|e| WsError::decode_failed(e.to_string()))
    }

    /// Create a text message from a JSON-serializable value.
    pub fn from_json<T: Serialize>(value: &T) -> WsResult<Self> {
        let text = serde_json::to_string(value).map_err(|e| WsError::encode_failed(e.to_string()))?;
        Ok(Self::Text(text))
    }

    /// Get the length of the message payload in bytes.
    pub fn len(&self) -> usize {
        match self {
            Self::Text(s) => s.len(),
            Self::Binary(b) | Self::Ping(b) | Self::Pong(b) => b.len(),
            Self::Close(Some(frame)) => 2 + frame.reason.len(),
            Self::Close(None) => 0,
        }
    }

    /// Check if the message payload is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl From<String> for Message {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<&str> for Message {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<Vec<u8>> for Message {
    fn from(b: Vec<u8>) -> Self {
        Self::Binary(b)
    }
}

impl From<Bytes> for Message {
    fn from(b: Bytes) -> Self {
        Self::Binary(b.to_vec())
    }
}

/// Convert from tungstenite Message.
impl From<tungstenite::Message> for Message {
    fn from(msg: tungstenite::Message) -> Self {
        match msg {
            tungstenite::Message::Text(s) => Self::Text(s.to_string()),
            tungstenite::Message::Binary(b) => Self::Binary(b.to_vec()),
            tungstenite::Message::Ping(b) => Self::Ping(b.to_vec()),
            tungstenite::Message::Pong(b) => Self::Pong(b.to_vec()),
            tungstenite::Message::Close(frame) => Self::Close(frame.map(CloseFrame::from)),
            tungstenite::Message::Frame(_) => Self::Binary(vec![]),
        }
    }
}

/// Convert to tungstenite Message.
impl From<Message> for tungstenite::Message {
    fn from(msg: Message) -> Self {
        match msg {
            Message::Text(s) => Self::Text(s.into()),
            Message::Binary(b) => Self::Binary(b.into()),
            Message::Ping(b) => Self::Ping(b.into()),
            Message::Pong(b) => Self::Pong(b.into()),
            Message::Close(frame) => Self::Close(frame.map(tungstenite::protocol::CloseFrame::from)),
        }
    }
}

/// A WebSocket close frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseFrame {
    /// The close code.
    pub code: u16,
    /// The close reason.
    pub reason: Cow<'static, str>,
}

impl CloseFrame {
    /// Create a new close frame.
    pub fn new(code: CloseCode, reason: impl Into<String>) -> Self {
        Self {
            code: code.as_u16(),
            reason: Cow::Owned(reason.into()),
        }
    }

    /// Create a normal close frame.
    pub fn normal(reason: impl Into<String>) -> Self {
        Self::new(CloseCode::Normal, reason)
    }

    /// Create a close frame for going away.
    pub fn going_away(reason: impl Into<String>) -> Self {
        Self::new(CloseCode::GoingAway, reason)
    }

    /// Get the close code enum value if it's a standard code.
    pub fn close_code(&self) -> Option<CloseCode> {
        CloseCode::from_u16(self.code)
    }
}

impl From<tungstenite::protocol::CloseFrame> for CloseFrame {
    fn from(frame: tungstenite::protocol::CloseFrame) -> Self {
        Self {
            code: frame.code.into(),
            reason: Cow::Owned(frame.reason.to_string()),
        }
    }
}

impl From<CloseFrame> for tungstenite::protocol::CloseFrame {
    fn from(frame: CloseFrame) -> Self {
        Self {
            code: frame.code.into(),
            reason: frame.reason.to_string().into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_type_tags() {
        assert_eq!(FrameType::Text.as_u8(), 1);
        assert_eq!(FrameType::Binary.as_u8(), 2);
        assert_eq!(FrameType::from_u8(9), Some(FrameType::Ping));
        assert_eq!(FrameType::from_u8(3), None);
        assert!(FrameType::Pong.is_control());
        assert!(FrameType::Binary.is_data());
        assert_eq!(FrameType::Close.to_string(), "close");
    }

    #[test]
    fn test_message_text() {
        let msg = Message::text("hello");
        assert!(msg.is_text());
        assert!(msg.is_data());
        assert_eq!(msg.frame_type(), FrameType::Text);
        assert_eq!(msg.as_text(), Some("hello"));
        assert_eq!(msg.len(), 5);
    }

    #[test]
    fn test_from_frame_rejects_invalid_utf8() {
        let err = Message::from_frame(FrameType::Text, vec![0xff, 0xfe]).unwrap_err();
        assert!(matches!(err, WsError::EncodeFailed(_)));
    }

    #[test]
    fn test_from_frame_rejects_close() {
        let err = Message::from_frame(FrameType::Close, Vec::new()).unwrap_err();
        assert!(matches!(err, WsError::InvalidType(_)));
    }

    #[test]
    fn test_into_frame() {
        let (frame_type, payload) = Message::binary(vec![1, 2, 3]).into_frame();
        assert_eq!(frame_type, FrameType::Binary);
        assert_eq!(&payload[..], &[1, 2, 3]);

        let (frame_type, payload) = Message::close_empty().into_frame();
        assert_eq!(frame_type, FrameType::Close);
        assert!(payload.is_empty());
    }

    #[test]
    fn test_message_close() {
        let msg = Message::close(CloseCode::Normal, "goodbye");
        assert!(msg.is_close());
        let frame = msg.close_frame().unwrap();
        assert_eq!(frame.code, 1000);
        assert_eq!(frame.reason, "goodbye");
        assert_eq!(msg.len(), 2 + "goodbye".len());
    }

    #[test]
    fn test_message_json() {
        #[derive(Serialize, Deserialize, Debug, PartialEq)]
        struct Data {
            value: i32,
        }

        let msg = Message::from_json(&Data { value: 42 }).unwrap();
        assert!(msg.is_text());
        let parsed: Data = msg.json().unwrap();
        assert_eq!(parsed, Data { value: 42 });

        assert!(Message::binary(vec![1]).json::<Data>().is_err());
    }

    #[test]
    fn test_tungstenite_conversion_keeps_close_reason() {
        let msg = Message::close(CloseCode::GoingAway, "restart");
        let wire = tungstenite::Message::from(msg.clone());
        assert_eq!(Message::from(wire), msg);
    }

    #[test]
    fn test_close_frame_close_code() {
        assert_eq!(CloseFrame::normal("").close_code(), Some(CloseCode::Normal));
        let frame = CloseFrame {
            code: 4999,
            reason: Cow::Borrowed(""),
        };
        assert_eq!(frame.close_code(), None);
    }
}
