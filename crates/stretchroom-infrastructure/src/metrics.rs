//! Prometheus metrics infrastructure for StretchRoom services.
//!
//! This module provides:
//! - [`MetricsConfig`]: Configuration for the metrics system
//! - [`init_metrics`]: Initialize the Prometheus metrics recorder
//! - [`render_metrics`]: Prometheus exposition text for `/service/metrics`
//! - Helpers for the command, client, messaging and scheduling metrics
//!
//! # Example
//!
//! ```no_run
//! use stretchroom_infrastructure::metrics::{MetricsConfig, init_metrics};
//!
//! let config = MetricsConfig::from_env();
//! if let Err(e) = init_metrics(&config) {
//!     eprintln!("metrics disabled: {e}");
//! }
//! ```

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Content type of the Prometheus text exposition format.
pub const PROMETHEUS_CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

/// Global Prometheus handle for rendering metrics.
static PROMETHEUS_HANDLE: OnceCell<PrometheusHandle> = OnceCell::new();

/// Configuration for the metrics system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Whether metrics collection is enabled.
    pub enabled: bool,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

impl MetricsConfig {
    /// Create configuration from environment variables.
    ///
    /// - `METRICS_ENABLED`: "true" or "false" (default: true)
    pub fn from_env() -> Self {
        let enabled = std::env::var("METRICS_ENABLED")
            .map(|v| v.to_lowercase() != "false")
            .unwrap_or(true);

        Self { enabled }
    }
}

/// Errors that can occur during metrics initialization.
#[derive(Debug, Clone, Error)]
pub enum MetricsError {
    /// Metrics are disabled in configuration.
    #[error("metrics are disabled")]
    Disabled,
    /// The recorder has already been installed.
    #[error("metrics recorder already initialized")]
    AlreadyInitialized,
    /// The Prometheus builder failed to install.
    #[error("failed to install metrics recorder: {0}")]
    InstallFailed(String),
}

/// Initialize the Prometheus metrics recorder.
///
/// Must be called once per process before metrics are recorded. Subsequent
/// calls return [`MetricsError::AlreadyInitialized`].
pub fn init_metrics(config: &MetricsConfig) -> Result<(), MetricsError> {
    if !config.enabled {
        return Err(MetricsError::Disabled);
    }
    if PROMETHEUS_HANDLE.get().is_some() {
        return Err(MetricsError::AlreadyInitialized);
    }

    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| MetricsError::InstallFailed(e.to_string()))?;

    PROMETHEUS_HANDLE
        .set(handle)
        .map_err(|_| MetricsError::AlreadyInitialized)?;

    Ok(())
}

/// Get the Prometheus handle for rendering metrics.
///
/// Returns `None` if [`init_metrics`] has not been called.
pub fn prometheus_handle() -> Option<&'static PrometheusHandle> {
    PROMETHEUS_HANDLE.get()
}

/// Render the current metrics in Prometheus exposition format.
pub fn render_metrics() -> String {
    PROMETHEUS_HANDLE
        .get()
        .map(|h| h.render())
        .unwrap_or_else(|| "# Metrics not initialized\n".to_string())
}

/// Record one command execution.
///
/// Increments `stretchroom_commands_executed_total`.
pub fn record_command_executed(command: &str, outcome: &'static str) {
    metrics::counter!(
        "stretchroom_commands_executed_total",
        "command" => command.to_string(),
        "outcome" => outcome
    )
    .increment(1);
}

/// Record an outbound HTTP call made through a client.
pub fn record_outbound_request(client: &str, method: &str, status: u16, seconds: f64) {
    metrics::counter!(
        "stretchroom_client_requests_total",
        "client" => client.to_string(),
        "method" => method.to_string(),
        "status" => status.to_string()
    )
    .increment(1);

    metrics::histogram!(
        "stretchroom_client_request_duration_seconds",
        "client" => client.to_string()
    )
    .record(seconds);
}

/// Record an RPC message handled by a RabbitMQ controller.
pub fn record_rabbit_message(method: &str, outcome: &'static str) {
    metrics::counter!(
        "stretchroom_rabbit_messages_total",
        "method" => method.to_string(),
        "outcome" => outcome
    )
    .increment(1);
}

/// Record one run of a scheduled job.
pub fn record_job_run(job: &str, outcome: &'static str) {
    metrics::counter!(
        "stretchroom_job_runs_total",
        "job" => job.to_string(),
        "outcome" => outcome
    )
    .increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_config_default() {
        let config = MetricsConfig::default();
        assert!(config.enabled);
    }

    #[test]
    fn test_init_metrics_disabled() {
        let config = MetricsConfig { enabled: false };
        assert!(matches!(init_metrics(&config), Err(MetricsError::Disabled)));
    }

    #[test]
    fn test_render_metrics_returns_prometheus_format() {
        let output = render_metrics();
        assert!(
            output.contains('#') || output.is_empty() || output.contains("_total"),
            "Metrics output should be Prometheus format or indicate not initialized"
        );
    }

    #[test]
    fn test_business_helpers_record_without_recorder() {
        record_command_executed("AddEntity", "success");
        record_outbound_request("AuthServiceClient", "GET", 200, 0.01);
        record_rabbit_message("ok", "success");
        record_job_run("log-some-job", "success");
    }
}
