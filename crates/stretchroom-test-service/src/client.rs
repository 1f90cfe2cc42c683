//! Typed client for the test service.

use axum::http::{HeaderMap, HeaderValue, StatusCode, header::AUTHORIZATION};
use stretchroom_auth_service::contracts::GenerateTokenResponse;
use stretchroom_infrastructure::client::{
    ClientBase, OperationResult, Url, append_path, append_query,
};
use stretchroom_infrastructure::{ApiError, ApiResult, ProblemDetails};

use crate::contracts::{
    ChangeNameRequest, CommandResultResponse, SomeBodyRequest, SomeBodyResponse, routes,
};

/// The base must point at the service root, for example
/// `http://test:8080/test-app`.
#[derive(Debug, Clone)]
pub struct TestServiceClient {
    base: ClientBase,
}

fn v1(method: &'static str) -> impl FnOnce(&mut Url) {
    move |url| append_path(url, &routes::test_v1(method))
}

/// `Authorization` header carrying `token` as given.
fn authorization(token: &str) -> ApiResult<HeaderMap> {
    let value = HeaderValue::from_str(token).map_err(|e| {
        ApiError::new(
            ProblemDetails::from_status(StatusCode::BAD_REQUEST)
                .with_detail(format!("invalid authorization value: {e}")),
        )
    })?;
    let mut headers = HeaderMap::new();
    headers.insert(AUTHORIZATION, value);
    Ok(headers)
}

impl TestServiceClient {
    pub fn new(base: ClientBase) -> Self {
        Self { base }
    }

    pub async fn ok(&self) -> ApiResult<()> {
        let result: OperationResult<()> = self.base.get(v1(routes::OK), None).await?;
        result.into_api_result()
    }

    pub async fn json(&self) -> ApiResult<SomeBodyResponse> {
        let result: OperationResult<SomeBodyResponse> =
            self.base.get_json(v1(routes::JSON), None).await?;
        result.into_api_result()
    }

    /// Always fails with the service's 500 problem.
    pub async fn exception(&self) -> ApiResult<()> {
        let result: OperationResult<()> = self.base.get(v1(routes::EXCEPTION), None).await?;
        result.into_api_result()
    }

    pub async fn body(&self, request: &SomeBodyRequest) -> ApiResult<SomeBodyResponse> {
        let result: OperationResult<SomeBodyResponse> = self
            .base
            .post_json(v1(routes::BODY), request, None)
            .await?;
        result.into_api_result()
    }

    pub async fn query(&self, value: i32) -> ApiResult<SomeBodyResponse> {
        let result: OperationResult<SomeBodyResponse> = self
            .base
            .get_json(
                |url| {
                    append_path(url, &routes::test_v1(routes::QUERY));
                    append_query(url, "value", &value.to_string());
                },
                None,
            )
            .await?;
        result.into_api_result()
    }

    pub async fn add_entity(&self, name: &str) -> ApiResult<CommandResultResponse> {
        let result: OperationResult<CommandResultResponse> = self
            .base
            .post_json_empty(|url| command_url(url, Some(name)), None)
            .await?;
        result.into_api_result()
    }

    pub async fn entities(&self) -> ApiResult<CommandResultResponse> {
        let result: OperationResult<CommandResultResponse> = self
            .base
            .get_json(|url| command_url(url, None), None)
            .await?;
        result.into_api_result()
    }

    pub async fn delete_entity(&self, name: &str) -> ApiResult<()> {
        let result: OperationResult<()> = self
            .base
            .delete(|url| command_url(url, Some(name)), None)
            .await?;
        result.into_api_result()
    }

    pub async fn rename_entity(&self, name: &str, request: &ChangeNameRequest) -> ApiResult<()> {
        let result: OperationResult<()> = self
            .base
            .put(|url| command_url(url, Some(name)), request, None)
            .await?;
        result.into_api_result()
    }

    /// Token the service obtained from the auth service.
    pub async fn token(&self) -> ApiResult<GenerateTokenResponse> {
        let result: OperationResult<GenerateTokenResponse> =
            self.base.get_json(v1(routes::TOKEN), None).await?;
        result.into_api_result()
    }

    /// `token` is sent as the whole `Authorization` value, `Bearer ` included.
    pub async fn validate_token(&self, token: &str) -> ApiResult<()> {
        let result: OperationResult<()> = self
            .base
            .get(v1(routes::VALIDATE_TOKEN), Some(authorization(token)?))
            .await?;
        result.into_api_result()
    }

    pub async fn validate_auth(&self, token: &str) -> ApiResult<()> {
        let result: OperationResult<()> = self
            .base
            .get(v1(routes::VALIDATE_AUTH), Some(authorization(token)?))
            .await?;
        result.into_api_result()
    }

    pub async fn v2(&self) -> ApiResult<()> {
        let result: OperationResult<()> = self
            .base
            .get(|url| append_path(url, routes::TEST_V2), None)
            .await?;
        result.into_api_result()
    }
}

fn command_url(url: &mut Url, name: Option<&str>) {
    append_path(url, &routes::test_v1(routes::COMMAND));
    if let Some(name) = name {
        append_query(url, "name", name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use stretchroom_infrastructure::client::RetryPolicy;
    use wiremock::matchers::{body_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer) -> TestServiceClient {
        let base = ClientBase::builder("TestServiceClient")
            .from_url(format!("{}/test-app", server.uri()))
            .with_retry(RetryPolicy::none())
            .build()
            .unwrap();
        TestServiceClient::new(base)
    }

    #[tokio::test]
    async fn test_add_entity_sends_name_query() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/test-app/api/v1/test/command"))
            .and(query_param("name", "alpha"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"entities": [{"id": 1, "name": "alpha"}]})),
            )
            .mount(&server)
            .await;

        let response = client(&server).add_entity("alpha").await.unwrap();
        assert_eq!(response.entities[0].id, 1);
    }

    #[tokio::test]
    async fn test_rename_puts_new_name() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/test-app/api/v1/test/command"))
            .and(query_param("name", "old"))
            .and(body_json(json!({"newName": "new"})))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        client(&server)
            .rename_entity("old", &ChangeNameRequest::new("new"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_validate_token_sends_header() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/test-app/api/v1/test/validate/token"))
            .and(header("authorization", "Bearer abc"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        client(&server).validate_token("Bearer abc").await.unwrap();
    }

    #[tokio::test]
    async fn test_not_found_problem_is_relayed() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/test-app/api/v1/test/command"))
            .respond_with(ResponseTemplate::new(404).set_body_json(json!({
                "title": "NotFound",
                "status": 404,
                "detail": "Element not found"
            })))
            .mount(&server)
            .await;

        let error = client(&server).delete_entity("x").await.unwrap_err();
        assert_eq!(error.status(), StatusCode::NOT_FOUND);
        assert_eq!(error.problem().detail.as_deref(), Some("Element not found"));
    }
}
