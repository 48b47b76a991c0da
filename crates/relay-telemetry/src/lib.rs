//! Observability for Relay.
//!
//! - **Logging**: structured JSON or pretty output through
//!   `tracing-subscriber`, filtered with `EnvFilter` directives
//! - **Metrics**: a Prometheus recorder behind the `metrics` facade that
//!   `relay-ws` records hub and worker series through
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────┐
//! │                  relay-ws                      │
//! │   tracing::debug!/warn!     metrics::gauge!    │
//! └──────────┬──────────────────────────┬──────────┘
//!            │                          │
//!            ▼                          ▼
//!     ┌─────────────┐           ┌──────────────┐
//!     │   Logging   │           │   Metrics    │
//!     │ (JSON/pretty)│          │ (Prometheus) │
//!     └──────┬──────┘           └──────┬───────┘
//!            ▼                          ▼
//!      stdout/stderr              GET /metrics
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use relay_telemetry::{TelemetryConfig, init_telemetry};
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = TelemetryConfig::builder()
//!         .service_name("chat")
//!         .metrics_addr("0.0.0.0:9090")
//!         .build();
//!
//!     init_telemetry(&config).expect("Failed to init telemetry");
//! }
//! ```

#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod logging;
pub mod metrics;

pub use config::{TelemetryConfig, TelemetryConfigBuilder};
pub use error::TelemetryError;
pub use logging::{init_logging, LogConfig, LogFormat};
pub use metrics::{
    describe_metrics, init_metrics, metrics_registry, render_metrics, MetricsConfig,
    MetricsRegistry,
};

/// Result type for telemetry operations.
pub type TelemetryResult<T> = Result<T, TelemetryError>;

/// Initializes logging, then metrics.
///
/// # Errors
///
/// Returns `TelemetryError` if either subsystem fails to initialize.
pub fn init_telemetry(config: &TelemetryConfig) -> TelemetryResult<()> {
    init_logging(&config.logging)?;
    init_metrics(&config.metrics)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_with_everything_disabled() {
        let mut config = TelemetryConfig::builder().service_name("test").build();
        config.logging.enabled = false;
        config.metrics.enabled = false;

        assert!(init_telemetry(&config).is_ok());
        assert!(render_metrics().is_none());
    }
}
