//! Prometheus metrics for Relay.
//!
//! The connection core records through the `metrics` facade; this module
//! installs the Prometheus recorder, serves the scrape endpoint and
//! describes the standard series.
//!
//! # Standard Metrics
//!
//! | Metric | Type | Labels | Description |
//! |--------|------|--------|-------------|
//! | `relay_hub_connections` | Gauge | `hub` | Workers registered with a hub |
//! | `relay_hub_messages_total` | Counter | `hub` | Envelopes handed to hub handlers |
//! | `relay_hub_handler_panics_total` | Counter | `hub` | Hub handler calls that panicked |
//! | `relay_worker_frames_received_total` | Counter | `frame_type` | Frames read from sockets |
//!
//! # Example
//!
//! ```rust,ignore
//! use relay_telemetry::metrics::{MetricsConfig, init_metrics, render_metrics};
//!
//! init_metrics(&MetricsConfig::default())?;
//! let text = render_metrics().unwrap_or_default();
//! ```

use std::net::SocketAddr;
use std::sync::OnceLock;

use metrics::{describe_counter, describe_gauge, Unit};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use crate::error::TelemetryError;
use crate::TelemetryResult;

/// Names of the series recorded by the relay crates.
pub mod names {
    /// Gauge of workers registered with a hub.
    pub const HUB_CONNECTIONS: &str = "relay_hub_connections";

    /// Counter of envelopes dispatched to hub handlers.
    pub const HUB_MESSAGES: &str = "relay_hub_messages_total";

    /// Counter of hub handler panics.
    pub const HUB_HANDLER_PANICS: &str = "relay_hub_handler_panics_total";

    /// Counter of frames read by workers.
    pub const WORKER_FRAMES_RECEIVED: &str = "relay_worker_frames_received_total";
}

/// Global metrics handle for rendering.
static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Metrics configuration.
#[derive(Debug, Clone)]
pub struct MetricsConfig {
    /// Whether metrics are enabled.
    pub enabled: bool,

    /// Address of the scrape endpoint. `None` records without serving.
    pub addr: Option<String>,

    /// Value of the `service` label added to every series.
    pub service_name: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            addr: Some("0.0.0.0:9090".to_string()),
            service_name: "relay".to_string(),
        }
    }
}

/// Renders the metrics recorded by one Prometheus recorder.
#[derive(Debug, Clone)]
pub struct MetricsRegistry {
    handle: PrometheusHandle,
}

impl MetricsRegistry {
    /// Creates a new metrics registry with the given handle.
    #[must_use]
    pub fn new(handle: PrometheusHandle) -> Self {
        Self { handle }
    }

    /// Renders all metrics in Prometheus text format.
    #[must_use]
    pub fn render(&self) -> String {
        self.handle.render()
    }
}

/// Installs the global Prometheus recorder.
///
/// When `config.addr` is set the scrape endpoint is spawned on the current
/// tokio runtime.
///
/// # Errors
///
/// Returns `TelemetryError::InvalidAddress` for an unparsable address and
/// `TelemetryError::MetricsInit` when the exporter cannot be built, no
/// runtime is available for the listener, or a recorder is already
/// installed.
pub fn init_metrics(config: &MetricsConfig) -> TelemetryResult<()> {
    if !config.enabled {
        return Ok(());
    }

    let builder = PrometheusBuilder::new().add_global_label("service", config.service_name.clone());

    let handle = match &config.addr {
        Some(addr) => {
            let addr: SocketAddr = addr
                .parse()
                .map_err(|e| TelemetryError::InvalidAddress(format!("{addr}: {e}")))?;
            let runtime = tokio::runtime::Handle::try_current()
                .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?;
            let (recorder, exporter) = {
                let _entered = runtime.enter();
                builder
                    .with_http_listener(addr)
                    .build()
                    .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?
            };
            let handle = recorder.handle();
            metrics::set_global_recorder(recorder)
                .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?;
            runtime.spawn(async move {
                if let Err(e) = exporter.await {
                    tracing::warn!(error = ?e, "metrics exporter stopped");
                }
            });
            tracing::info!(%addr, "metrics endpoint listening");
            handle
        }
        None => builder
            .install_recorder()
            .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?,
    };

    let _ = METRICS_HANDLE.set(handle);
    describe_metrics();

    Ok(())
}

/// Returns the global metrics registry if initialized.
pub fn metrics_registry() -> Option<MetricsRegistry> {
    METRICS_HANDLE.get().cloned().map(MetricsRegistry::new)
}

/// Renders metrics in Prometheus format.
///
/// Returns `None` if metrics are not initialized.
#[must_use]
pub fn render_metrics() -> Option<String> {
    METRICS_HANDLE.get().map(PrometheusHandle::render)
}

/// Registers descriptions for the standard series with the current recorder.
pub fn describe_metrics() {
    describe_gauge!(
        names::HUB_CONNECTIONS,
        Unit::Count,
        "Number of workers registered with a hub"
    );
    describe_counter!(
        names::HUB_MESSAGES,
        Unit::Count,
        "Total envelopes handed to hub handlers"
    );
    describe_counter!(
        names::HUB_HANDLER_PANICS,
        Unit::Count,
        "Total hub handler calls that panicked"
    );
    describe_counter!(
        names::WORKER_FRAMES_RECEIVED,
        Unit::Count,
        "Total frames read from WebSocket connections"
    );
}
