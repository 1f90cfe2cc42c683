//! StretchRoom test service binary.
//!
//! # Configuration
//!
//! - `DATABASE_URL` - SQLite URL (required), e.g. `sqlite://test.db`
//! - `DATABASE_MIGRATE` - Apply migrations on startup
//! - `DATABASE_TIMEOUT_SECONDS`, `DATABASE_MAX_CONNECTIONS` - Pool tuning
//! - `AUTH_SERVICE_URL` - Auth service root, e.g. `http://auth:8080/auth-service`
//! - `RUST_LOG` - Log level (default: info)
//! - `LOG_FORMAT` - Log format: json (default) or text
//! - `SERVICE_HOST`, `SERVICE_PORT` - Listener (default: 0.0.0.0:8080)

use stretchroom_infrastructure::{
    HostConfig, LoggingConfig, MetricsConfig, init_logging, init_metrics,
};
use stretchroom_test_service::contracts::SERVICE_NAME;
use stretchroom_test_service::{TestServiceOptions, build_app};
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let logging_config = LoggingConfig::from_env().with_service(SERVICE_NAME);
    if let Err(e) = init_logging(&logging_config) {
        eprintln!("failed to initialize logging: {e}");
    }

    let metrics_config = MetricsConfig::from_env();
    if let Err(e) = init_metrics(&metrics_config) {
        tracing::warn!(error = %e, "failed to initialize metrics, continuing without metrics");
    }

    let host_config = HostConfig::from_env()?;
    let options = TestServiceOptions::from_env().map_err(|e| {
        error!(error = %e, "invalid test service configuration");
        e
    })?;

    info!(
        port = host_config.port,
        auth_service = options.auth_service.is_some(),
        "starting test service"
    );

    let app = build_app(options).await?;
    app.run(host_config).await?;
    Ok(())
}
