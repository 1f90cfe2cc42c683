//! StretchRoom auth service binary.
//!
//! # Configuration
//!
//! - `JWT_ISSUER`, `JWT_AUDIENCE`, `JWT_KEY` (base64) - Token parameters (required)
//! - `JWT_TTL_SECONDS` - Token lifetime (default: no expiry)
//! - `RABBIT_CONNECTION_STRING`, `RABBIT_EXCHANGE`, `RABBIT_QUEUE` - Enable the RabbitMQ controller
//! - `RUST_LOG` - Log level (default: info)
//! - `LOG_FORMAT` - Log format: json (default) or text
//! - `SERVICE_HOST`, `SERVICE_PORT` - Listener (default: 0.0.0.0:8080)

use stretchroom_auth_service::{AuthServiceOptions, build_app};
use stretchroom_infrastructure::{
    HostConfig, LoggingConfig, MetricsConfig, init_logging, init_metrics,
};
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let logging_config = LoggingConfig::from_env().with_service("auth-service");
    if let Err(e) = init_logging(&logging_config) {
        eprintln!("failed to initialize logging: {e}");
    }

    let metrics_config = MetricsConfig::from_env();
    if let Err(e) = init_metrics(&metrics_config) {
        // Metrics are optional
        tracing::warn!(error = %e, "failed to initialize metrics, continuing without metrics");
    }

    let host_config = HostConfig::from_env()?;
    let options = AuthServiceOptions::from_env().map_err(|e| {
        error!(error = %e, "invalid auth service configuration");
        e
    })?;

    info!(
        port = host_config.port,
        rabbit = options.rabbit.is_some(),
        "starting auth service"
    );

    let app = build_app(options)?;
    app.run(host_config).await?;
    Ok(())
}
