//! Main configuration type.
//!
//! This module provides the top-level [`RelayConfig`] struct and its builder.

use std::net::SocketAddr;

use serde::{Deserialize, Serialize};

use crate::{
    ConfigError, HubSettings, LoggingSettings, MetricsSettings, ServerSettings, UpgradeSettings,
    WorkerSettings,
};
use relay_telemetry::LogFormat;

/// Complete Relay configuration.
///
/// Use [`ConfigLoader`](crate::ConfigLoader) to load it from files and
/// environment variables.
///
/// # Example
///
/// ```
/// use relay_config::RelayConfig;
///
/// let config = RelayConfig::default();
/// assert_eq!(config.server.http_addr, "0.0.0.0:8080");
/// assert_eq!(config.hub.max_connections, 10_000);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(deny_unknown_fields)]
pub struct RelayConfig {
    /// HTTP listener.
    #[serde(default)]
    pub server: ServerSettings,

    /// Per-connection workers.
    #[serde(default)]
    pub worker: WorkerSettings,

    /// Connection hub.
    #[serde(default)]
    pub hub: HubSettings,

    /// Upgrade handshake.
    #[serde(default)]
    pub upgrade: UpgradeSettings,

    /// Logging.
    #[serde(default)]
    pub logging: LoggingSettings,

    /// Metrics.
    #[serde(default)]
    pub metrics: MetricsSettings,
}

impl RelayConfig {
    /// Create a new configuration builder.
    #[must_use]
    pub fn builder() -> RelayConfigBuilder {
        RelayConfigBuilder::new()
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` for the first field that is out
    /// of range or unparsable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.http_addr.parse::<SocketAddr>().is_err() {
            return Err(ConfigError::invalid_value(
                "server.http_addr",
                format!("invalid socket address: {}", self.server.http_addr),
            ));
        }

        if !self.server.path.starts_with('/') {
            return Err(ConfigError::invalid_value(
                "server.path",
                format!("must start with '/': {}", self.server.path),
            ));
        }

        if self.metrics.enabled {
            if let Some(addr) = &self.metrics.addr {
                if addr.parse::<SocketAddr>().is_err() {
                    return Err(ConfigError::invalid_value(
                        "metrics.addr",
                        format!("invalid socket address: {addr}"),
                    ));
                }
            }
        }

        if self.worker.message_buffer == 0 {
            return Err(ConfigError::invalid_value(
                "worker.message_buffer",
                "must be at least 1",
            ));
        }

        if self.worker.max_frame_size > self.worker.max_message_size {
            return Err(ConfigError::invalid_value(
                "worker.max_frame_size",
                "must not exceed worker.max_message_size",
            ));
        }

        if self.worker.idle_timeout_secs == Some(0) {
            return Err(ConfigError::invalid_value(
                "worker.idle_timeout_secs",
                "must be positive; omit it to disable the timeout",
            ));
        }

        if self.hub.max_connections == 0 {
            return Err(ConfigError::invalid_value(
                "hub.max_connections",
                "must be at least 1",
            ));
        }

        if self.hub.max_per_client == 0 {
            return Err(ConfigError::invalid_value(
                "hub.max_per_client",
                "must be at least 1",
            ));
        }

        if self.upgrade.protocols.iter().any(String::is_empty) {
            return Err(ConfigError::invalid_value(
                "upgrade.protocols",
                "protocol names must not be empty",
            ));
        }

        relay_telemetry::logging::create_env_filter(&self.logging.level)
            .map_err(|e| ConfigError::invalid_value("logging.level", e.to_string()))?;

        Ok(())
    }

    /// Development preset: pretty debug logs, no metrics endpoint.
    #[must_use]
    pub fn development() -> Self {
        Self {
            logging: LoggingSettings {
                level: "info,relay_ws=debug".to_string(),
                format: LogFormat::Pretty,
                file_line_info: true,
                ..LoggingSettings::default()
            },
            metrics: MetricsSettings {
                addr: None,
                ..MetricsSettings::default()
            },
            ..Self::default()
        }
    }

    /// Production preset: JSON logs and an idle timeout.
    #[must_use]
    pub fn production() -> Self {
        Self {
            worker: WorkerSettings {
                idle_timeout_secs: Some(300),
                ..WorkerSettings::default()
            },
            logging: LoggingSettings {
                format: LogFormat::Json,
                ..LoggingSettings::default()
            },
            ..Self::default()
        }
    }
}

/// Builder for [`RelayConfig`].
#[derive(Debug, Default)]
pub struct RelayConfigBuilder {
    config: RelayConfig,
}

impl RelayConfigBuilder {
    /// Create a new builder with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the server section.
    #[must_use]
    pub fn server(mut self, server: ServerSettings) -> Self {
        self.config.server = server;
        self
    }

    /// Set the worker section.
    #[must_use]
    pub fn worker(mut self, worker: WorkerSettings) -> Self {
        self.config.worker = worker;
        self
    }

    /// Set the hub section.
    #[must_use]
    pub fn hub(mut self, hub: HubSettings) -> Self {
        self.config.hub = hub;
        self
    }

    /// Set the upgrade section.
    #[must_use]
    pub fn upgrade(mut self, upgrade: UpgradeSettings) -> Self {
        self.config.upgrade = upgrade;
        self
    }

    /// Set the logging section.
    #[must_use]
    pub fn logging(mut self, logging: LoggingSettings) -> Self {
        self.config.logging = logging;
        self
    }

    /// Set the metrics section.
    #[must_use]
    pub fn metrics(mut self, metrics: MetricsSettings) -> Self {
        self.config.metrics = metrics;
        self
    }

    /// Build the configuration without validating it.
    #[must_use]
    pub fn build(self) -> RelayConfig {
        self.config
    }

    /// Build and validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns the first validation failure.
    pub fn build_validated(self) -> Result<RelayConfig, ConfigError> {
        self.config.validate()?;
        Ok(self.config)
    }
}
