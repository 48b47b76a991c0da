//! Typed configuration for Relay.
//!
//! - TOML and JSON configuration files
//! - Environment variable overrides (`PREFIX__SECTION__KEY`)
//! - `.env` files through `dotenvy`
//! - Strict validation (fails on unknown fields)
//! - Layered configuration (defaults → file → env)
//!
//! # Overview
//!
//! [`RelayConfig`] holds one section per concern, each convertible into the
//! runtime type that consumes it:
//!
//! | Section | Type | Converts into |
//! |---------|------|---------------|
//! | `server` | [`ServerSettings`] | bind address, upgrade path |
//! | `worker` | [`WorkerSettings`] | [`relay_ws::WorkerConfig`] |
//! | `hub` | [`HubSettings`] | [`relay_ws::HubConfig`] |
//! | `upgrade` | [`UpgradeSettings`] | [`relay_ws::UpgradeOptions`] |
//! | `logging` | [`LoggingSettings`] | [`relay_telemetry::LogConfig`] |
//! | `metrics` | [`MetricsSettings`] | [`relay_telemetry::MetricsConfig`] |
//!
//! # Example
//!
//! ```no_run
//! use relay_config::ConfigLoader;
//!
//! # fn main() -> Result<(), relay_config::ConfigError> {
//! let config = ConfigLoader::new()
//!     .with_optional_file("relay.toml")?
//!     .with_env_prefix("RELAY")
//!     .load()?;
//!
//! let worker = config.worker.to_worker_config();
//! println!("listening on {}{}", config.server.http_addr, config.server.path);
//! # Ok(())
//! # }
//! ```
//!
//! # Configuration File Format
//!
//! ```toml
//! [server]
//! http_addr = "0.0.0.0:8080"
//! path = "/ws"
//!
//! [worker]
//! max_message_size = 67108864
//! idle_timeout_secs = 300
//! message_buffer = 16
//!
//! [hub]
//! name = "chat"
//! max_connections = 10000
//!
//! [upgrade]
//! protocols = ["chat.v1"]
//! cors = true
//!
//! [logging]
//! level = "info,relay_ws=debug"
//! format = "json"
//!
//! [metrics]
//! addr = "0.0.0.0:9090"
//! ```

#![warn(missing_docs)]

mod config;
mod error;
mod loader;
mod schema;

pub use config::{RelayConfig, RelayConfigBuilder};
pub use error::ConfigError;
pub use loader::ConfigLoader;
pub use schema::{
    HubSettings, LoggingSettings, MetricsSettings, ServerSettings, UpgradeSettings,
    WorkerSettings,
};
