//! StretchRoom auth service.
//!
//! Issues bearer tokens naming a user and validates them, over HTTP and over
//! RabbitMQ RPC.
//!
//! # Endpoints
//!
//! - `POST /auth-service/api/v1/auth/token` - Issue a token for `{userName}`
//! - `POST /auth-service/api/v1/auth/validate/token` - Check the `Authorization` header names a user
//! - `GET /auth-service/api/v1/auth/validate/auth` - Requires a valid bearer token
//! - `/auth-service/service/*` and `/auth-service/health/*` - System routes
//!
//! # RabbitMQ methods
//!
//! - `ok` - Returns `"Ok"`
//! - `getjson` - `GenerateTokenRequest` in, `GenerateTokenResponse` out

pub mod api;
pub mod client;
pub mod contracts;
pub mod jobs;
pub mod rabbit;

use std::sync::Arc;

use stretchroom_infrastructure::config::env_var;
use stretchroom_infrastructure::jwt::JwtError;
use stretchroom_infrastructure::rabbitmq::SimpleRabbitMqConfiguration;
use stretchroom_infrastructure::scheduling::SchedulerError;
use stretchroom_infrastructure::{
    ConfigError, ConfiguredApp, JwtGenerator, JwtOptions, JwtValidator, ServiceApiInfo,
    ServiceHost,
};
use thiserror::Error;

use crate::api::AuthState;
use crate::contracts::{BASE_PATH, SERVICE_NAME};

/// Prefix of the RabbitMQ environment variables, as in `RABBIT_CONNECTION_STRING`.
pub const RABBIT_ENV_PREFIX: &str = "RABBIT";

#[derive(Debug, Error)]
pub enum AuthServiceError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Jwt(#[from] JwtError),

    #[error(transparent)]
    Scheduler(#[from] SchedulerError),
}

#[derive(Debug, Clone)]
pub struct AuthServiceOptions {
    pub jwt: JwtOptions,
    /// The RabbitMQ controller is hosted only when this is set.
    pub rabbit: Option<SimpleRabbitMqConfiguration>,
    pub enable_jobs: bool,
}

impl AuthServiceOptions {
    pub fn new(jwt: JwtOptions) -> Self {
        Self {
            jwt,
            rabbit: None,
            enable_jobs: true,
        }
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        let rabbit = match env_var(&format!("{RABBIT_ENV_PREFIX}_CONNECTION_STRING")) {
            Some(_) => Some(SimpleRabbitMqConfiguration::from_env(RABBIT_ENV_PREFIX)?),
            None => None,
        };
        Ok(Self {
            jwt: JwtOptions::from_env()?,
            rabbit,
            enable_jobs: true,
        })
    }
}

pub fn api_info() -> ServiceApiInfo {
    ServiceApiInfo::new(SERVICE_NAME, BASE_PATH)
        .with_description("TestAuthService")
        .with_version(env!("CARGO_PKG_VERSION"))
}

/// Wire the auth service onto a [`ServiceHost`].
pub fn build_app(options: AuthServiceOptions) -> Result<ConfiguredApp, AuthServiceError> {
    let generator = Arc::new(JwtGenerator::new(options.jwt.clone())?);
    let validator = JwtValidator::new(&options.jwt)?;

    let state = AuthState {
        generator: generator.clone(),
        validator: Arc::new(validator.clone()),
    };

    let mut host = ServiceHost::builder(api_info())
        .routes(api::router(state))
        .with_jwt(validator);

    if let Some(rabbit) = options.rabbit {
        rabbit.validate()?;
        host = host.with_rabbit_mq_controller(rabbit::controller(rabbit, generator));
    }
    if options.enable_jobs {
        host = host.with_hosted(Arc::new(jobs::scheduler()?));
    }

    Ok(host.build())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum_test::TestServer;
    use stretchroom_infrastructure::test_utils::test_jwt_options;

    #[tokio::test]
    async fn test_routes_are_under_base_path() {
        let mut options = AuthServiceOptions::new(test_jwt_options());
        options.enable_jobs = false;
        let app = build_app(options).unwrap();
        let server = TestServer::new(app.into_router()).unwrap();

        server.get("/auth-service/service/ping").await.assert_text("pong");
        server
            .post("/auth-service/api/v1/auth/token")
            .json(&serde_json::json!({"userName": "Vitalik"}))
            .await
            .assert_status_ok();
    }

    #[test]
    fn test_invalid_rabbit_configuration_is_rejected() {
        let mut options = AuthServiceOptions::new(test_jwt_options());
        options.rabbit = Some(SimpleRabbitMqConfiguration::new("http://nope", "ex", "q"));
        assert!(matches!(build_app(options), Err(AuthServiceError::Config(_))));
    }
}
