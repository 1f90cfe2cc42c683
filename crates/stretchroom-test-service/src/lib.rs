//! StretchRoom test service.
//!
//! A small CRUD service over one SQLite table, exercising the infrastructure
//! crate end to end: commands, validation, problem responses, body logging
//! policies and calls to the auth service with a forwarded `Authorization`.
//!
//! # Endpoints
//!
//! All under `/test-app`:
//!
//! - `GET /api/v1/test/ok`, `GET /api/v1/test/json`, `GET /api/v1/test/exception`
//! - `POST /api/v1/test/body` - Echo a validated `{message}`
//! - `GET /api/v1/test/query?value=` - Echo an integer
//! - `POST|GET|PUT|DELETE /api/v1/test/command` - CRUD over `test_table`
//! - `GET /api/v1/test/token`, `GET /api/v1/test/validate/{token,auth}` - Auth service relay
//! - `GET /api/v2/testv2`

pub mod api;
pub mod client;
pub mod commands;
pub mod contracts;
pub mod dal;

use axum::http::Method;
use stretchroom_auth_service::client::AuthServiceClient;
use stretchroom_infrastructure::client::{ClientBase, ClientError, ForwardedAuthorization};
use stretchroom_infrastructure::{
    BodyLoggingPolicy, ClientConfiguration, CommandExecutor, CommandRegistry, ConfigError,
    ConfiguredApp, DbContextOptions, DbError, ServiceApiInfo, ServiceHost,
};
use thiserror::Error;

use crate::api::TestState;
use crate::contracts::{BASE_PATH, SERVICE_NAME, routes};
use crate::dal::MIGRATOR;

/// Service name used to look up `AUTH_SERVICE_URL`.
pub const AUTH_SERVICE: &str = "auth-service";

#[derive(Debug, Error)]
pub enum TestServiceError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Db(#[from] DbError),

    #[error(transparent)]
    Client(#[from] ClientError),
}

#[derive(Debug, Clone)]
pub struct TestServiceOptions {
    pub db: DbContextOptions,
    /// Token routes answer 503 when this is unset.
    pub auth_service: Option<ClientConfiguration>,
}

impl TestServiceOptions {
    pub fn new(db: DbContextOptions) -> Self {
        Self {
            db,
            auth_service: None,
        }
    }

    pub fn with_auth_service(mut self, configuration: ClientConfiguration) -> Self {
        self.auth_service = Some(configuration);
        self
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        let auth_service = match ClientConfiguration::from_env(AUTH_SERVICE) {
            Ok(configuration) => {
                configuration.validate()?;
                Some(configuration)
            }
            Err(ConfigError::Missing { .. }) => None,
            Err(e) => return Err(e),
        };
        Ok(Self {
            db: DbContextOptions::from_env()?,
            auth_service,
        })
    }
}

pub fn api_info() -> ServiceApiInfo {
    ServiceApiInfo::new(SERVICE_NAME, BASE_PATH)
        .with_api_versions(["v1", "v2"])
        .with_description("TestApplication")
        .with_version(env!("CARGO_PKG_VERSION"))
}

/// Listing responses and renamed bodies stay out of the request log.
pub fn body_logging_policy() -> BodyLoggingPolicy {
    let command = routes::test_v1(routes::COMMAND);
    BodyLoggingPolicy::new()
        .skip_response_body(Method::GET, &command)
        .skip_request_body(Method::PUT, &command)
}

fn auth_client(configuration: &ClientConfiguration) -> Result<AuthServiceClient, ClientError> {
    let base = ClientBase::builder("AuthServiceClient")
        .from_configuration(configuration)
        .with_token_resolver(ForwardedAuthorization)
        .build()?;
    Ok(AuthServiceClient::new(base))
}

/// Open the database and wire the test service onto a [`ServiceHost`].
///
/// Migrations run as a before-start step, so the schema exists once the
/// returned app has been started.
pub async fn build_app(options: TestServiceOptions) -> Result<ConfiguredApp, TestServiceError> {
    let pool = stretchroom_infrastructure::register_db(&options.db).await?;

    let mut registry = CommandRegistry::new();
    commands::register_commands(&mut registry, &pool);

    let auth = options.auth_service.as_ref().map(auth_client).transpose()?;
    let state = TestState {
        executor: CommandExecutor::new(registry),
        auth,
    };

    Ok(ServiceHost::builder(api_info())
        .routes(api::router(state))
        .with_database(pool, &MIGRATOR, &options.db)
        .with_body_logging(body_logging_policy())
        .build())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum_test::TestServer;
    use stretchroom_infrastructure::test_utils::memory_db_options;

    #[tokio::test]
    async fn test_migrations_run_before_serving() {
        let app = build_app(TestServiceOptions::new(memory_db_options()))
            .await
            .unwrap();
        app.run_before_start().await.unwrap();
        let server = TestServer::new(app.into_router()).unwrap();

        server
            .post("/test-app/api/v1/test/command")
            .add_query_param("name", "first")
            .await
            .assert_status_ok();
        server
            .get("/test-app/service/healthz")
            .await
            .assert_status_ok();
    }

    #[test]
    fn test_body_logging_policy_skips_command_bodies() {
        let policy = body_logging_policy().nested(BASE_PATH);
        let path = "/test-app/api/v1/test/command";
        assert!(!policy.logs_response_body(&Method::GET, path));
        assert!(policy.logs_request_body(&Method::GET, path));
        assert!(!policy.logs_request_body(&Method::PUT, path));
        assert!(policy.logs_response_body(&Method::PUT, path));
        assert!(policy.logs_request_body(&Method::POST, "/test-app/api/v1/test/body"));
    }

    #[test]
    fn test_api_info_lists_versions() {
        let info = api_info();
        assert_eq!(info.base_address, BASE_PATH);
        assert_eq!(info.api_versions, vec!["v1".to_string(), "v2".to_string()]);
    }
}
