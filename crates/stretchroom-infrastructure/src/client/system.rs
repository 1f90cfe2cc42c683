//! Client for the `/service` routes every host exposes.

use super::{append_path, ClientBase, ClientError, OperationResult};
use crate::health::HealthReport;

/// Calls `ping`, `healthz`, `healthz/status` and `metrics` on a service.
///
/// The wrapped [`ClientBase`] must point at the service base address
/// (for example `http://host:8080/auth-service`).
#[derive(Debug, Clone)]
pub struct ServiceSystemClient {
    base: ClientBase,
}

impl ServiceSystemClient {
    pub fn new(base: ClientBase) -> Self {
        Self { base }
    }

    pub async fn ping(&self) -> Result<OperationResult<String>, ClientError> {
        self.base
            .get_text(|url| append_path(url, "service/ping"), None)
            .await
    }

    pub async fn health_check(&self) -> Result<OperationResult<()>, ClientError> {
        self.base
            .get(|url| append_path(url, "service/healthz"), None)
            .await
    }

    pub async fn health_status(&self) -> Result<OperationResult<HealthReport>, ClientError> {
        self.base
            .get_json(|url| append_path(url, "service/healthz/status"), None)
            .await
    }

    pub async fn metrics(&self) -> Result<OperationResult<String>, ClientError> {
        self.base
            .get_text(|url| append_path(url, "service/metrics"), None)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::RetryPolicy;
    use crate::health::HealthStatus;
    use axum::http::StatusCode;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn system_client(server: &MockServer) -> ServiceSystemClient {
        let base = ClientBase::builder("ServiceSystemClient")
            .from_url(format!("{}/auth-service", server.uri()))
            .with_retry(RetryPolicy::none())
            .build()
            .unwrap();
        ServiceSystemClient::new(base)
    }

    #[tokio::test]
    async fn test_ping() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/auth-service/service/ping"))
            .respond_with(ResponseTemplate::new(200).set_body_string("pong"))
            .mount(&server)
            .await;

        let result = system_client(&server).await.ping().await.unwrap();
        assert_eq!(result.result().map(String::as_str), Some("pong"));
    }

    #[tokio::test]
    async fn test_health_check_failure_carries_problem() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/auth-service/service/healthz"))
            .respond_with(ResponseTemplate::new(500).set_body_json(serde_json::json!({
                "title": "Unhealthy",
                "status": 500,
                "detail": "db-1 - Unhealthy",
                "instance": "HealthCheckService"
            })))
            .mount(&server)
            .await;

        let result = system_client(&server).await.health_check().await.unwrap();
        assert_eq!(result.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(result.error().unwrap().title, "Unhealthy");
    }

    #[tokio::test]
    async fn test_health_status_decodes_report() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/auth-service/service/healthz/status"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "status": "Healthy",
                "totalDurationMs": 1.5,
                "entries": {}
            })))
            .mount(&server)
            .await;

        let result = system_client(&server).await.health_status().await.unwrap();
        assert_eq!(result.result().unwrap().status, HealthStatus::Healthy);
    }
}
