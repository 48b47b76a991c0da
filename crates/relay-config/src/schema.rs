//! Configuration schema types.
//!
//! One struct per file section. Every field has a default, so a section can
//! be omitted or given partially; unknown fields are rejected.

use std::time::Duration;

use relay_telemetry::{LogConfig, LogFormat, MetricsConfig};
use relay_ws::{HubConfig, UpgradeOptions, WorkerConfig};
use serde::{Deserialize, Serialize};

/// Server configuration section.
///
/// # Example
///
/// ```
/// use relay_config::ServerSettings;
///
/// let server = ServerSettings::default();
/// assert_eq!(server.http_addr, "0.0.0.0:8080");
/// assert_eq!(server.path, "/ws");
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ServerSettings {
    /// HTTP bind address.
    #[serde(default = "default_http_addr")]
    pub http_addr: String,

    /// Request path that accepts WebSocket upgrades.
    #[serde(default = "default_path")]
    pub path: String,

    /// Graceful shutdown timeout in seconds.
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_secs: u64,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            http_addr: default_http_addr(),
            path: default_path(),
            shutdown_timeout_secs: default_shutdown_timeout(),
        }
    }
}

impl ServerSettings {
    /// The shutdown timeout as a duration.
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

fn default_http_addr() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_path() -> String {
    "/ws".to_string()
}

fn default_shutdown_timeout() -> u64 {
    30
}

/// Per-connection worker section.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct WorkerSettings {
    /// Largest accepted message in bytes.
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,

    /// Largest accepted frame in bytes.
    #[serde(default = "default_max_frame_size")]
    pub max_frame_size: usize,

    /// Socket write buffer in bytes.
    #[serde(default = "default_buffer_size")]
    pub write_buffer_size: usize,

    /// Socket read buffer in bytes.
    #[serde(default = "default_buffer_size")]
    pub read_buffer_size: usize,

    /// Accept frames a client sent without masking.
    #[serde(default)]
    pub accept_unmasked_frames: bool,

    /// Close a connection after this many idle seconds. `None` disables it.
    #[serde(default)]
    pub idle_timeout_secs: Option<u64>,

    /// Envelopes buffered between the queue and the consumer.
    #[serde(default = "default_message_buffer")]
    pub message_buffer: usize,

    /// Hand ping and pong frames to the consumer.
    #[serde(default)]
    pub deliver_control_frames: bool,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            max_message_size: default_max_message_size(),
            max_frame_size: default_max_frame_size(),
            write_buffer_size: default_buffer_size(),
            read_buffer_size: default_buffer_size(),
            accept_unmasked_frames: false,
            idle_timeout_secs: None,
            message_buffer: default_message_buffer(),
            deliver_control_frames: false,
        }
    }
}

impl WorkerSettings {
    /// Build the runtime worker configuration.
    pub fn to_worker_config(&self) -> WorkerConfig {
        let config = WorkerConfig::new()
            .max_message_size(self.max_message_size)
            .max_frame_size(self.max_frame_size)
            .write_buffer_size(self.write_buffer_size)
            .read_buffer_size(self.read_buffer_size)
            .accept_unmasked_frames(self.accept_unmasked_frames)
            .message_buffer(self.message_buffer)
            .deliver_control_frames(self.deliver_control_frames);
        match self.idle_timeout_secs {
            Some(secs) => config.idle_timeout(Duration::from_secs(secs)),
            None => config.without_idle_timeout(),
        }
    }
}

fn default_max_message_size() -> usize {
    64 << 20
}

fn default_max_frame_size() -> usize {
    16 << 20
}

fn default_buffer_size() -> usize {
    128 * 1024
}

fn default_message_buffer() -> usize {
    16
}

/// Hub section.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct HubSettings {
    /// Hub name used in logs and metric labels.
    #[serde(default = "default_hub_name")]
    pub name: String,

    /// Maximum registered connections.
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,

    /// Maximum registered connections per client ID.
    #[serde(default = "default_max_per_client")]
    pub max_per_client: usize,
}

impl Default for HubSettings {
    fn default() -> Self {
        Self {
            name: default_hub_name(),
            max_connections: default_max_connections(),
            max_per_client: default_max_per_client(),
        }
    }
}

impl HubSettings {
    /// Build the runtime hub configuration.
    pub fn to_hub_config(&self) -> HubConfig {
        HubConfig::new()
            .name(self.name.clone())
            .max_connections(self.max_connections)
            .max_per_client(self.max_per_client)
    }
}

fn default_hub_name() -> String {
    "default".to_string()
}

fn default_max_connections() -> usize {
    10_000
}

fn default_max_per_client() -> usize {
    100
}

/// Upgrade handshake section.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct UpgradeSettings {
    /// Subprotocols the server speaks.
    #[serde(default)]
    pub protocols: Vec<String>,

    /// Extra headers on the 101 response.
    #[serde(default)]
    pub headers: Vec<(String, String)>,

    /// Add CORS headers to the 101 response.
    #[serde(default)]
    pub cors: bool,
}

impl UpgradeSettings {
    /// Build the runtime upgrade options.
    pub fn to_upgrade_options(&self) -> UpgradeOptions {
        self.headers.iter().fold(
            UpgradeOptions::new()
                .protocols(self.protocols.iter().cloned())
                .cors(self.cors),
            |options, (name, value)| options.header(name.clone(), value.clone()),
        )
    }
}

/// Logging section.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct LoggingSettings {
    /// Enable logging.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Filter directives.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format.
    #[serde(default)]
    pub format: LogFormat,

    /// Include source file and line.
    #[serde(default)]
    pub file_line_info: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            level: default_log_level(),
            format: LogFormat::Json,
            file_line_info: false,
        }
    }
}

impl LoggingSettings {
    /// Build the logging configuration.
    pub fn to_log_config(&self) -> LogConfig {
        LogConfig {
            enabled: self.enabled,
            level: self.level.clone(),
            format: self.format,
            file_line_info: self.file_line_info,
            ..LogConfig::default()
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Metrics section.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct MetricsSettings {
    /// Enable metrics collection.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Prometheus scrape endpoint. `None` records without serving.
    #[serde(default = "default_metrics_addr")]
    pub addr: Option<String>,

    /// Value of the `service` label.
    #[serde(default = "default_service_name")]
    pub service_name: String,
}

impl Default for MetricsSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            addr: default_metrics_addr(),
            service_name: default_service_name(),
        }
    }
}

impl MetricsSettings {
    /// Build the metrics configuration.
    pub fn to_metrics_config(&self) -> MetricsConfig {
        MetricsConfig {
            enabled: self.enabled,
            addr: self.addr.clone(),
            service_name: self.service_name.clone(),
        }
    }
}

#[allow(clippy::unnecessary_wraps)]
fn default_metrics_addr() -> Option<String> {
    Some("0.0.0.0:9090".to_string())
}

fn default_service_name() -> String {
    "relay".to_string()
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_worker_settings_match_runtime_defaults() {
        let config = WorkerSettings::default().to_worker_config();
        let runtime = WorkerConfig::default();

        assert_eq!(config.max_message_size, runtime.max_message_size);
        assert_eq!(config.max_frame_size, runtime.max_frame_size);
        assert_eq!(config.message_buffer, runtime.message_buffer);
        assert_eq!(config.deliver_control_frames, runtime.deliver_control_frames);
        assert!(config.idle_timeout.is_none());
    }

    #[test]
    fn test_worker_settings_idle_timeout() {
        let settings = WorkerSettings {
            idle_timeout_secs: Some(45),
            ..WorkerSettings::default()
        };
        assert_eq!(
            settings.to_worker_config().idle_timeout,
            Some(Duration::from_secs(45))
        );
    }

    #[test]
    fn test_hub_settings_conversion() {
        let settings = HubSettings {
            name: "chat".to_string(),
            max_connections: 5,
            max_per_client: 2,
        };
        let config = settings.to_hub_config();
        assert_eq!(config.name, "chat");
        assert_eq!(config.max_connections, 5);
        assert_eq!(config.max_per_client, 2);
    }

    #[test]
    fn test_upgrade_settings_conversion() {
        let settings = UpgradeSettings {
            protocols: vec!["chat.v1".to_string()],
            headers: vec![("X-Node".to_string(), "a".to_string())],
            cors: true,
        };
        let options = settings.to_upgrade_options();
        assert_eq!(options.allowed_protocols, vec!["chat.v1".to_string()]);
        assert_eq!(options.headers, vec![("X-Node".to_string(), "a".to_string())]);
        assert!(options.cors);
    }

    #[test]
    fn test_partial_section_uses_defaults() {
        let settings: WorkerSettings = toml::from_str("message_buffer = 4").unwrap();
        assert_eq!(settings.message_buffer, 4);
        assert_eq!(settings.max_frame_size, default_max_frame_size());
        assert!(!settings.deliver_control_frames);
    }

    #[test]
    fn test_unknown_field_rejected() {
        let result: Result<HubSettings, _> = toml::from_str("max_conections = 3");
        assert!(result.is_err());
    }

    #[test]
    fn test_logging_conversion() {
        let settings: LoggingSettings = toml::from_str("format = \"pretty\"\nlevel = \"debug\"").unwrap();
        let config = settings.to_log_config();
        assert_eq!(config.format, LogFormat::Pretty);
        assert_eq!(config.level, "debug");
    }

    #[test]
    fn test_metrics_without_endpoint() {
        let settings: MetricsSettings = serde_json::from_str(r#"{"addr": null}"#).unwrap();
        assert!(settings.to_metrics_config().addr.is_none());
    }
}
