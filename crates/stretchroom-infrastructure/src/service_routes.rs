//! Routes every service exposes next to its own API.
//!
//! ```text
//! GET {base}/service/ping            -> "pong"
//! GET {base}/service/healthz         -> 200 or 500 problem
//! GET {base}/service/healthz/status  -> HealthReport JSON
//! GET {base}/service/metrics         -> Prometheus text
//! GET {base}/health/live             -> liveness probe
//! GET {base}/health/ready            -> readiness probe
//! ```

use std::sync::Arc;

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};

use crate::api_info::ServiceApiInfo;
use crate::health::{HealthRegistry, HealthReport, HealthStatus, ProbeStatus};
use crate::metrics::{render_metrics, PROMETHEUS_CONTENT_TYPE};
use crate::problem::{ProblemDetails, PROBLEM_ABOUT_BLANK};

#[derive(Clone)]
pub(crate) struct SystemState {
    info: Arc<ServiceApiInfo>,
    health: Arc<HealthRegistry>,
}

/// Router with the system and probe routes, relative to the base address.
pub fn system_routes(info: Arc<ServiceApiInfo>, health: Arc<HealthRegistry>) -> Router {
    Router::new()
        .route("/service/ping", get(ping))
        .route("/service/healthz", get(healthz))
        .route("/service/healthz/status", get(healthz_status))
        .route("/service/metrics", get(metrics_handler))
        .route("/health/live", get(health_live))
        .route("/health/ready", get(health_ready))
        .with_state(SystemState { info, health })
}

async fn ping() -> &'static str {
    "pong"
}

fn unhealthy_problem(report: &HealthReport) -> ProblemDetails {
    ProblemDetails::new(
        PROBLEM_ABOUT_BLANK,
        report.status.to_string(),
        StatusCode::INTERNAL_SERVER_ERROR,
    )
    .with_detail(report.summary())
    .with_instance("HealthCheckService")
}

async fn healthz(State(state): State<SystemState>) -> Response {
    let report = state.health.check_all().await;
    if report.status == HealthStatus::Healthy {
        StatusCode::OK.into_response()
    } else {
        unhealthy_problem(&report).into_response()
    }
}

async fn healthz_status(State(state): State<SystemState>) -> Json<HealthReport> {
    Json(state.health.check_all().await)
}

/// Prometheus scrape endpoint.
pub async fn metrics_handler() -> impl IntoResponse {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, PROMETHEUS_CONTENT_TYPE)],
        render_metrics(),
    )
}

/// Liveness probe. Never touches dependencies.
async fn health_live(State(state): State<SystemState>) -> impl IntoResponse {
    let status = ProbeStatus::alive(&state.info.service_name, &state.info.version);
    (StatusCode::OK, Json(status))
}

/// Readiness probe backed by the registered health checks.
async fn health_ready(State(state): State<SystemState>) -> Response {
    let info = &state.info;
    let report = state.health.check_all().await;

    if report.status != HealthStatus::Healthy {
        let status = ProbeStatus::not_ready(
            &info.service_name,
            &info.version,
            &report.summary().replace('\n', ", "),
        );
        return (StatusCode::SERVICE_UNAVAILABLE, Json(status)).into_response();
    }

    let status = ProbeStatus::ready(&info.service_name, &info.version, report.entries.len());
    (StatusCode::OK, Json(status)).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::health::{HealthCheck, HealthCheckResult};
    use async_trait::async_trait;
    use axum_test::TestServer;

    struct Broken;

    #[async_trait]
    impl HealthCheck for Broken {
        async fn check(&self) -> HealthCheckResult {
            HealthCheckResult::unhealthy("connection refused")
        }
    }

    fn server(health: HealthRegistry) -> TestServer {
        let info = Arc::new(ServiceApiInfo::new("TestApp", "/test-app").with_version("1.2.3"));
        TestServer::new(system_routes(info, Arc::new(health))).unwrap()
    }

    #[tokio::test]
    async fn test_ping() {
        server(HealthRegistry::new())
            .get("/service/ping")
            .await
            .assert_text("pong");
    }

    #[tokio::test]
    async fn test_healthz_ok_without_checks() {
        let server = server(HealthRegistry::new());
        server.get("/service/healthz").await.assert_status_ok();

        let report: HealthReport = server.get("/service/healthz/status").await.json();
        assert_eq!(report.status, HealthStatus::Healthy);
    }

    #[tokio::test]
    async fn test_healthz_unhealthy_is_problem() {
        let mut registry = HealthRegistry::new();
        registry.add("db-1", Broken);
        let response = server(registry).get("/service/healthz").await;

        response.assert_status(StatusCode::INTERNAL_SERVER_ERROR);
        let problem: ProblemDetails = response.json();
        assert_eq!(problem.title, "Unhealthy");
        assert_eq!(problem.detail.as_deref(), Some("db-1 - Unhealthy"));
        assert_eq!(problem.instance.as_deref(), Some("HealthCheckService"));
    }

    #[tokio::test]
    async fn test_probes() {
        let healthy = server(HealthRegistry::new());
        let live: ProbeStatus = healthy.get("/health/live").await.json();
        assert_eq!(live.status, "ok");
        assert_eq!(live.version, "1.2.3");
        healthy.get("/health/ready").await.assert_status_ok();

        let mut registry = HealthRegistry::new();
        registry.add("rabbit-mq-1", Broken);
        server(registry)
            .get("/health/ready")
            .await
            .assert_status(StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_metrics_content_type() {
        let response = server(HealthRegistry::new()).get("/service/metrics").await;
        response.assert_status_ok();
        assert_eq!(
            response.header(header::CONTENT_TYPE).to_str().unwrap(),
            PROMETHEUS_CONTENT_TYPE
        );
    }
}
