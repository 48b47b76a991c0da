//! Worker and hub configuration.
//!
//! This module defines the runtime options for connection workers and
//! the hubs they are registered with.

use std::time::Duration;

/// Configuration for a connection worker.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Maximum message size in bytes (default: 64 MB).
    pub max_message_size: usize,
    /// Maximum frame size in bytes (default: 16 MB).
    pub max_frame_size: usize,
    /// Write buffer size (default: 128 KB).
    pub write_buffer_size: usize,
    /// Read buffer size (default: 128 KB).
    pub read_buffer_size: usize,
    /// Whether to accept unmasked frames from clients (default: false).
    pub accept_unmasked_frames: bool,
    /// Close the worker when no frame arrives for this long (default: none).
    pub idle_timeout: Option<Duration>,
    /// Envelopes buffered between the delivery queue and its consumer
    /// (default: 16).
    pub message_buffer: usize,
    /// Deliver ping and pong frames as envelopes (default: false).
    pub deliver_control_frames: bool,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            max_message_size: 64 * 1024 * 1024, // 64 MB
            max_frame_size: 16 * 1024 * 1024,   // 16 MB
            write_buffer_size: 128 * 1024,      // 128 KB
            read_buffer_size: 128 * 1024,       // 128 KB
            accept_unmasked_frames: false,
            idle_timeout: None,
            message_buffer: 16,
            deliver_control_frames: false,
        }
    }
}

impl WorkerConfig {
    /// Create a new default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the maximum message size.
    pub fn max_message_size(mut self, size: usize) -> Self {
        self.max_message_size = size;
        self
    }

    /// Set the maximum frame size.
    pub fn max_frame_size(mut self, size: usize) -> Self {
        self.max_frame_size = size;
        self
    }

    /// Set the write buffer size.
    pub fn write_buffer_size(mut self, size: usize) -> Self {
        self.write_buffer_size = size;
        self
    }

    /// Set the read buffer size.
    pub fn read_buffer_size(mut self, size: usize) -> Self {
        self.read_buffer_size = size;
        self
    }

    /// Set whether to accept unmasked frames from clients.
    pub fn accept_unmasked_frames(mut self, accept: bool) -> Self {
        self.accept_unmasked_frames = accept;
        self
    }

    /// Close the worker after this much read inactivity.
    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = Some(timeout);
        self
    }

    /// Disable the idle timeout.
    pub fn without_idle_timeout(mut self) -> Self {
        self.idle_timeout = None;
        self
    }

    /// Set the envelope buffer between queue and consumer (minimum 1).
    pub fn message_buffer(mut self, size: usize) -> Self {
        self.message_buffer = size.max(1);
        self
    }

    /// Set whether ping/pong frames are delivered as envelopes.
    pub fn deliver_control_frames(mut self, enabled: bool) -> Self {
        self.deliver_control_frames = enabled;
        self
    }

    /// Build the protocol configuration used by tungstenite.
    pub fn protocol_config(&self) -> tungstenite::protocol::WebSocketConfig {
        let mut config = tungstenite::protocol::WebSocketConfig::default();
        config.max_message_size = Some(self.max_message_size);
        config.max_frame_size = Some(self.max_frame_size);
        config.read_buffer_size = self.read_buffer_size;
        config.write_buffer_size = self.write_buffer_size;
        config.accept_unmasked_frames = self.accept_unmasked_frames;
        config
    }
}

/// Configuration for a connection hub.
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Name used in logs and metric labels (default: "default").
    pub name: String,
    /// Maximum registered connections (default: 10000).
    pub max_connections: usize,
    /// Maximum registered connections sharing one client ID (default: 100).
    pub max_per_client: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
            max_connections: 10_000,
            max_per_client: 100,
        }
    }
}

impl HubConfig {
    /// Create a new default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the hub name.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Set the maximum registered connections.
    pub fn max_connections(mut self, max: usize) -> Self {
        self.max_connections = max;
        self
    }

    /// Set the maximum registered connections per client ID.
    pub fn max_per_client(mut self, max: usize) -> Self {
        self.max_per_client = max;
        self
    }
}
