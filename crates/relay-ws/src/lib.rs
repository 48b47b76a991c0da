//! Concurrent WebSocket workers and broadcast hubs.
//!
//! This crate is the connection core of Relay: it owns live WebSocket
//! sockets, delivers their inbound frames in order, and fans messages out
//! across many connections.
//!
//! # Features
//!
//! - **Workers**: one read loop per socket, the only reader of that socket
//! - **Serialized delivery**: frames from one connection reach the handler
//!   strictly in arrival order, even when the handler is slow
//! - **Hubs**: concurrency-safe registries with per-message handlers,
//!   `distribute`/`broadcast` fan-out and automatic deregistration; a worker
//!   may belong to several hubs at once
//! - **Idempotent close** with one-shot close notification
//! - **Pluggable codecs** for payload interpretation
//! - **HTTP upgrade** over `hyper` with subprotocol selection and CORS
//!
//! # Example
//!
//! ```ignore
//! use relay_ws::{upgrade_request, Envelope, Hub, UpgradeOptions, WorkerConfig};
//!
//! // Tell everyone but the sender.
//! let hub = Hub::new(|hub: Hub, envelope: Envelope| async move {
//!     if let Some(text) = envelope.as_text() {
//!         hub.broadcast(relay_ws::Message::text(text), Some(envelope.worker()));
//!     }
//! });
//!
//! // Inside a hyper service:
//! let response = upgrade_request(
//!     &mut request,
//!     &UpgradeOptions::default(),
//!     WorkerConfig::default(),
//!     hub.clone(),
//! );
//! ```
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │  HTTP Request ──► upgrade_request() ──► 101 response          │
//! │                          │                                   │
//! │                          ▼                                   │
//! │  socket ──► Worker read loop ──► Envelope ──► DeliveryQueue  │
//! │                                                  │           │
//! │                                                  ▼           │
//! │                  Subscription per hub, or Messages stream    │
//! │                                                  │           │
//! │                                                  ▼           │
//! │             Hub supervisor ──► HubHandler(hub, envelope)     │
//! │                                                  │           │
//! │                                                  ▼           │
//! │                      hub.distribute() / envelope.reply()     │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Closing
//!
//! [`Worker::close`] succeeds once and returns [`WsError::AlreadyClosed`]
//! afterwards; the socket is closed exactly once. Any read failure closes
//! the worker, and a hub drops a worker as soon as it closes. Closing a
//! [`Hub`] releases its workers without closing their sockets.

pub mod codec;
pub mod config;
pub mod envelope;
pub mod error;
pub mod hub;
pub mod message;
pub mod queue;
pub mod signal;
pub mod socket;
pub mod upgrade;
pub mod worker;

// Re-exports for convenience
pub use codec::{BasicCodec, Codec, JsonCodec};
pub use config::{HubConfig, WorkerConfig};
pub use envelope::Envelope;
pub use error::{CloseCode, WsError, WsResult};
pub use hub::{Hub, HubHandler, HubStats};
pub use message::{CloseFrame, FrameType, Message};
pub use queue::{DeliveryQueue, QueueStats};
pub use signal::{CloseSignal, Closed};
pub use socket::{FrameReader, FrameSocket, FrameWriter};
pub use upgrade::{
    complete_upgrade, compute_accept_key, get_websocket_protocols, is_websocket_request,
    prepare_upgrade, upgrade_request, validate_upgrade_request, UpgradeOptions, WebSocketUpgrade,
    WorkerHandler, PROTOCOL_ATTRIBUTE,
};
pub use worker::{ConnectionId, Messages, Subscription, Worker};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exports() {
        let _worker_config = WorkerConfig::default();
        let _hub_config = HubConfig::default();
        let _id = ConnectionId::new();
        let _msg = Message::text("hello");
        let _close = CloseCode::Normal;
        let _signal = CloseSignal::new();
        let _options = UpgradeOptions::default();
        assert_eq!(FrameType::Text.as_u8(), 1);
    }
}
