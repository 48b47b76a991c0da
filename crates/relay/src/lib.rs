//! # Relay
//!
//! **Concurrent WebSocket hubs for tokio**
//!
//! Relay owns live WebSocket connections and fans messages out across them:
//!
//! - **Workers** read one socket each and deliver its frames strictly in
//!   arrival order
//! - **Hubs** register workers, run a handler per message and forget a
//!   connection as soon as it closes
//! - **Upgrade helpers** turn a `hyper` request into a registered worker
//! - **Configuration** from TOML/JSON files, `.env` and environment variables
//! - **Observability** through `tracing` and Prometheus metrics
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use relay::prelude::*;
//!
//! let hub = Hub::new(|hub: Hub, envelope: Envelope| async move {
//!     if let Some(text) = envelope.as_text() {
//!         hub.broadcast(Message::text(text), Some(envelope.worker()));
//!     }
//! });
//!
//! // In a hyper service, for requests to the WebSocket path:
//! let response = upgrade_request(&mut request, &options, WorkerConfig::default(), hub.clone());
//! ```
//!
//! ## Architecture
//!
//! ```text
//! HTTP upgrade → Worker read loop → DeliveryQueue → Subscription (per hub)
//!                                                      ↓
//!          Hub::distribute ← HubHandler(hub, envelope) ← Hub supervisor
//! ```

#![doc(html_root_url = "https://docs.rs/relay/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

// Re-export the connection core
pub use relay_ws as ws;

// Re-export configuration types
pub use relay_config as config;

// Re-export observability setup
pub use relay_telemetry as telemetry;

/// Prelude module for convenient imports.
///
/// # Example
///
/// ```rust,ignore
/// use relay::prelude::*;
/// ```
pub mod prelude {
    pub use relay_ws::{
        upgrade_request, CloseCode, Codec, ConnectionId, Envelope, FrameType, Hub, HubConfig,
        HubHandler, JsonCodec, Message, Messages, Subscription, UpgradeOptions, Worker,
        WorkerConfig, WorkerHandler, WsError, WsResult,
    };

    pub use relay_config::{ConfigError, ConfigLoader, RelayConfig};

    pub use relay_telemetry::{init_logging, init_metrics, init_telemetry, LogConfig, MetricsConfig};
}

#[cfg(test)]
mod tests {
    use super::prelude::*;

    #[test]
    fn test_prelude_exports() {
        let config = RelayConfig::default();
        let worker: WorkerConfig = config.worker.to_worker_config();
        let hub: HubConfig = config.hub.to_hub_config();

        assert_eq!(worker.message_buffer, 16);
        assert_eq!(hub.name, "default");
        assert_eq!(FrameType::Binary.as_u8(), 2);
    }
}
