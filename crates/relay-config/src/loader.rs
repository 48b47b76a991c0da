//! Configuration loader with layered approach.
//!
//! This module provides the [`ConfigLoader`] for loading configuration from
//! multiple sources: defaults, files, and environment variables.

use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::Path;
use std::str::FromStr;

use relay_telemetry::LogFormat;

use crate::{ConfigError, RelayConfig};

/// Configuration loader with layered approach.
///
/// Later layers override earlier ones:
/// 1. Default values (or a preset)
/// 2. Configuration file or string (TOML or JSON)
/// 3. Environment variables
///
/// # Example
///
/// ```no_run
/// use relay_config::ConfigLoader;
///
/// # fn main() -> Result<(), relay_config::ConfigError> {
/// let config = ConfigLoader::new()
///     .with_optional_file("relay.toml")?
///     .with_dotenv()?
///     .with_env_prefix("RELAY")
///     .load()?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct ConfigLoader {
    config: RelayConfig,
    env_prefix: Option<String>,
    file_loaded: bool,
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigLoader {
    /// Create a new configuration loader starting from defaults.
    #[must_use]
    pub fn new() -> Self {
        Self {
            config: RelayConfig::default(),
            env_prefix: None,
            file_loaded: false,
        }
    }

    /// Start with the development preset.
    ///
    /// ```
    /// use relay_config::ConfigLoader;
    ///
    /// let config = ConfigLoader::new().with_development().load().unwrap();
    /// assert!(config.metrics.addr.is_none());
    /// ```
    #[must_use]
    pub fn with_development(mut self) -> Self {
        self.config = RelayConfig::development();
        self
    }

    /// Start with the production preset.
    #[must_use]
    pub fn with_production(mut self) -> Self {
        self.config = RelayConfig::production();
        self
    }

    /// Load configuration from a file.
    ///
    /// The format follows the extension: `.toml` or `.json`.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the file is missing, unreadable, malformed or
    /// contains unknown fields.
    pub fn with_file<P: AsRef<Path>>(mut self, path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(ConfigError::file_not_found(path));
        }

        let content = fs::read_to_string(path).map_err(|e| ConfigError::read_error(path, e))?;

        self.config = Self::parse_file(&content, path)?;
        self.file_loaded = true;

        Ok(self)
    }

    /// Load configuration from a file if it exists.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the file exists but cannot be loaded.
    pub fn with_optional_file<P: AsRef<Path>>(self, path: P) -> Result<Self, ConfigError> {
        if path.as_ref().exists() {
            self.with_file(path)
        } else {
            Ok(self)
        }
    }

    /// Load configuration from a string in the given format ("toml" or
    /// "json").
    ///
    /// ```
    /// use relay_config::ConfigLoader;
    ///
    /// let config = ConfigLoader::new()
    ///     .with_string("[hub]\nname = \"chat\"", "toml")
    ///     .unwrap()
    ///     .load()
    ///     .unwrap();
    ///
    /// assert_eq!(config.hub.name, "chat");
    /// ```
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if parsing fails or the format is unknown.
    pub fn with_string(mut self, content: &str, format: &str) -> Result<Self, ConfigError> {
        self.config = match format.to_lowercase().as_str() {
            "toml" => toml::from_str(content)?,
            "json" => serde_json::from_str(content)?,
            _ => {
                return Err(ConfigError::validation_error(format!(
                    "unsupported configuration format: {format}"
                )))
            }
        };
        Ok(self)
    }

    /// Apply environment overrides of the form `PREFIX__SECTION__KEY`.
    ///
    /// For example, with prefix "RELAY":
    /// - `RELAY__SERVER__HTTP_ADDR=0.0.0.0:9000`
    /// - `RELAY__HUB__MAX_CONNECTIONS=500`
    /// - `RELAY__UPGRADE__PROTOCOLS=chat.v2,chat.v1`
    #[must_use]
    pub fn with_env_prefix(mut self, prefix: &str) -> Self {
        self.env_prefix = Some(prefix.to_uppercase());
        self
    }

    /// Load variables from `.env` in the current directory, if present.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Dotenv` if the file exists but is malformed.
    pub fn with_dotenv(self) -> Result<Self, ConfigError> {
        match dotenvy::dotenv() {
            Ok(_) => Ok(self),
            Err(e) if e.not_found() => Ok(self),
            Err(e) => Err(e.into()),
        }
    }

    /// Load variables from a specific env file.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Dotenv` if the file is missing or malformed.
    pub fn with_dotenv_file<P: AsRef<Path>>(self, path: P) -> Result<Self, ConfigError> {
        dotenvy::from_path(path)?;
        Ok(self)
    }

    /// Whether a configuration file was loaded.
    pub fn file_loaded(&self) -> bool {
        self.file_loaded
    }

    /// Apply environment overrides and validate.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if an override does not parse or validation
    /// fails.
    pub fn load(mut self) -> Result<RelayConfig, ConfigError> {
        if let Some(prefix) = self.env_prefix.take() {
            self.apply_env_overrides(&prefix)?;
        }

        self.config.validate()?;

        Ok(self.config)
    }

    /// Finalize without environment overrides or validation.
    #[must_use]
    pub fn load_unvalidated(self) -> RelayConfig {
        self.config
    }

    fn parse_file(content: &str, path: &Path) -> Result<RelayConfig, ConfigError> {
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_lowercase);

        match extension.as_deref() {
            Some("toml") => Ok(toml::from_str(content)?),
            Some("json") => Ok(serde_json::from_str(content)?),
            _ => Err(ConfigError::validation_error(format!(
                "unsupported configuration file format: {}",
                path.display()
            ))),
        }
    }

    fn apply_env_overrides(&mut self, prefix: &str) -> Result<(), ConfigError> {
        let marker = format!("{prefix}__");
        let env_vars: BTreeMap<String, String> = env::vars()
            .filter(|(k, _)| k.starts_with(&marker))
            .collect();

        for (key, value) in env_vars {
            self.apply_env_var(&key, &value, prefix)?;
        }

        Ok(())
    }

    fn apply_env_var(&mut self, key: &str, value: &str, prefix: &str) -> Result<(), ConfigError> {
        let key_without_prefix = key
            .strip_prefix(prefix)
            .and_then(|k| k.strip_prefix("__"))
            .ok_or_else(|| ConfigError::env_parse_error(key, "invalid key format"))?;

        let parts: Vec<&str> = key_without_prefix.split("__").collect();
        let config = &mut self.config;

        match parts.as_slice() {
            ["SERVER", "HTTP_ADDR"] => config.server.http_addr = value.to_string(),
            ["SERVER", "PATH"] => config.server.path = value.to_string(),
            ["SERVER", "SHUTDOWN_TIMEOUT_SECS"] => {
                config.server.shutdown_timeout_secs = parse(key, value, "expected integer")?;
            }

            ["WORKER", "MAX_MESSAGE_SIZE"] => {
                config.worker.max_message_size = parse(key, value, "expected integer")?;
            }
            ["WORKER", "MAX_FRAME_SIZE"] => {
                config.worker.max_frame_size = parse(key, value, "expected integer")?;
            }
            ["WORKER", "WRITE_BUFFER_SIZE"] => {
                config.worker.write_buffer_size = parse(key, value, "expected integer")?;
            }
            ["WORKER", "READ_BUFFER_SIZE"] => {
                config.worker.read_buffer_size = parse(key, value, "expected integer")?;
            }
            ["WORKER", "ACCEPT_UNMASKED_FRAMES"] => {
                config.worker.accept_unmasked_frames = parse_bool_var(key, value)?;
            }
            ["WORKER", "IDLE_TIMEOUT_SECS"] => {
                config.worker.idle_timeout_secs = if value.eq_ignore_ascii_case("none") {
                    None
                } else {
                    Some(parse(key, value, "expected integer or 'none'")?)
                };
            }
            ["WORKER", "MESSAGE_BUFFER"] => {
                config.worker.message_buffer = parse(key, value, "expected integer")?;
            }
            ["WORKER", "DELIVER_CONTROL_FRAMES"] => {
                config.worker.deliver_control_frames = parse_bool_var(key, value)?;
            }

            ["HUB", "NAME"] => config.hub.name = value.to_string(),
            ["HUB", "MAX_CONNECTIONS"] => {
                config.hub.max_connections = parse(key, value, "expected integer")?;
            }
            ["HUB", "MAX_PER_CLIENT"] => {
                config.hub.max_per_client = parse(key, value, "expected integer")?;
            }

            ["UPGRADE", "PROTOCOLS"] => {
                config.upgrade.protocols = value
                    .split(',')
                    .map(str::trim)
                    .filter(|p| !p.is_empty())
                    .map(str::to_string)
                    .collect();
            }
            ["UPGRADE", "CORS"] => config.upgrade.cors = parse_bool_var(key, value)?,

            ["LOGGING", "ENABLED"] => config.logging.enabled = parse_bool_var(key, value)?,
            ["LOGGING", "LEVEL"] => config.logging.level = value.to_string(),
            ["LOGGING", "FORMAT"] => {
                config.logging.format = match value.to_lowercase().as_str() {
                    "json" => LogFormat::Json,
                    "pretty" => LogFormat::Pretty,
                    _ => {
                        return Err(ConfigError::env_parse_error(
                            key,
                            "expected 'json' or 'pretty'",
                        ))
                    }
                };
            }
            ["LOGGING", "FILE_LINE_INFO"] => {
                config.logging.file_line_info = parse_bool_var(key, value)?;
            }

            ["METRICS", "ENABLED"] => config.metrics.enabled = parse_bool_var(key, value)?,
            ["METRICS", "ADDR"] => {
                config.metrics.addr = if value.is_empty() || value.eq_ignore_ascii_case("none") {
                    None
                } else {
                    Some(value.to_string())
                };
            }
            ["METRICS", "SERVICE_NAME"] => config.metrics.service_name = value.to_string(),

            _ => {}
        }

        Ok(())
    }
}

fn parse<T: FromStr>(key: &str, value: &str, expected: &str) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::env_parse_error(key, expected))
}

fn parse_bool_var(key: &str, value: &str) -> Result<bool, ConfigError> {
    parse_bool(value).ok_or_else(|| ConfigError::env_parse_error(key, "expected boolean"))
}

/// Parse a boolean from a string.
fn parse_bool(s: &str) -> Option<bool> {
    match s.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}
