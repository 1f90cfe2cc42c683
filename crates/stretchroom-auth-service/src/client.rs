//! Typed clients for the auth service.

use stretchroom_infrastructure::ApiResult;
use stretchroom_infrastructure::client::{ClientBase, OperationResult, append_path};
use stretchroom_infrastructure::rabbitmq::{RabbitMqClient, RabbitMqError, SimpleRabbitMqConfiguration};

use crate::contracts::{GenerateTokenRequest, GenerateTokenResponse, rabbit_methods, routes};

/// HTTP client. The base must point at the service root, for example
/// `http://auth:8080/auth-service`.
#[derive(Debug, Clone)]
pub struct AuthServiceClient {
    base: ClientBase,
}

impl AuthServiceClient {
    pub fn new(base: ClientBase) -> Self {
        Self { base }
    }

    pub async fn generate_token(&self, request: &GenerateTokenRequest) -> ApiResult<GenerateTokenResponse> {
        let result: OperationResult<GenerateTokenResponse> = self
            .base
            .post_json(|url| append_path(url, &routes::auth_v1(routes::TOKEN)), request, None)
            .await?;
        result.into_api_result()
    }

    /// Succeeds when the forwarded `Authorization` names a user.
    pub async fn validate_token(&self) -> ApiResult<()> {
        let result: OperationResult<()> = self
            .base
            .post_raw(
                |url| append_path(url, &routes::auth_v1(routes::VALIDATE_TOKEN)),
                Default::default(),
                None,
            )
            .await?;
        result.into_api_result()
    }

    /// Succeeds when the forwarded `Authorization` is a valid bearer token.
    pub async fn validate_auth(&self) -> ApiResult<()> {
        let result: OperationResult<()> = self
            .base
            .get(|url| append_path(url, &routes::auth_v1(routes::VALIDATE_AUTH)), None)
            .await?;
        result.into_api_result()
    }
}

/// RPC client for the auth controller's RabbitMQ methods.
///
/// The configuration needs a callback exchange and queue for replies.
pub struct AuthRabbitClient {
    client: RabbitMqClient,
}

impl AuthRabbitClient {
    pub async fn connect(configuration: SimpleRabbitMqConfiguration) -> Result<Self, RabbitMqError> {
        Ok(Self {
            client: RabbitMqClient::connect(configuration).await?,
        })
    }

    pub async fn get_ok(&self) -> Result<String, RabbitMqError> {
        self.client.send_request(rabbit_methods::OK).await
    }

    pub async fn generate_token(
        &self,
        request: &GenerateTokenRequest,
    ) -> Result<GenerateTokenResponse, RabbitMqError> {
        self.client
            .send_request_with(rabbit_methods::GET_JSON, request)
            .await
    }

    pub async fn close(&self) -> Result<(), RabbitMqError> {
        self.client.close().await
    }
}
