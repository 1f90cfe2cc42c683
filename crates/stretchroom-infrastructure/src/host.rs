//! Service bootstrapping.
//!
//! [`ServiceHost`] collects the pieces of a service and [`ServiceHost::build`]
//! wires them into a [`ConfiguredApp`]: the router with the standard layer
//! stack plus the startup and background services to run around it.
//!
//! Layers, outermost first:
//!
//! ```text
//! CORS -> request id + metrics -> problem enrichment -> panic catcher
//!      -> request logging -> authorization propagation -> JWT validator -> routes
//! ```

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use axum::{middleware, Extension, Router};
use sqlx::{migrate::Migrator, SqlitePool};
use thiserror::Error;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};

use crate::api_info::ServiceApiInfo;
use crate::client::propagate_authorization;
use crate::config::HostConfig;
use crate::db::{DbContextOptions, MigrationApplier};
use crate::exception::{catch_panic_layer, enrich_problem_details, not_found_fallback};
use crate::health::{HealthCheck, HealthRegistry};
use crate::jwt::JwtValidator;
use crate::middleware::MetricsLayer;
use crate::rabbitmq::RabbitMqController;
use crate::request_logging::{log_requests, BodyLoggingPolicy};
use crate::service_routes::system_routes;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, Error)]
pub enum HostError {
    #[error("startup step '{name}' failed: {source}")]
    BeforeStart {
        name: String,
        #[source]
        source: BoxError,
    },

    #[error("hosted service '{name}' failed to start: {source}")]
    HostedStart {
        name: String,
        #[source]
        source: BoxError,
    },

    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("server error: {0}")]
    Serve(#[source] std::io::Error),
}

/// Work that must finish before the listener binds, such as migrations.
#[async_trait]
pub trait BeforeHostingStarted: Send + Sync {
    fn name(&self) -> &str;
    async fn run(&self) -> anyhow::Result<()>;
}

/// Background work started with the host and stopped on shutdown.
#[async_trait]
pub trait HostedService: Send + Sync {
    fn name(&self) -> &str;
    async fn start(&self) -> anyhow::Result<()>;
    async fn stop(&self) -> anyhow::Result<()>;
}

/// Builder for a service host.
///
/// ```
/// use axum::{routing::get, Router};
/// use stretchroom_infrastructure::{ServiceApiInfo, ServiceHost};
///
/// let app = ServiceHost::builder(ServiceApiInfo::new("TestApp", "/test-app"))
///     .routes(Router::new().route("/api/v1/test/ok", get(|| async {})))
///     .build();
/// assert_eq!(app.info().base_address, "/test-app");
/// ```
pub struct ServiceHost {
    info: ServiceApiInfo,
    routes: Router,
    health: HealthRegistry,
    jwt: Option<Arc<JwtValidator>>,
    before_start: Vec<Arc<dyn BeforeHostingStarted>>,
    hosted: Vec<Arc<dyn HostedService>>,
    body_logging: BodyLoggingPolicy,
}

impl ServiceHost {
    pub fn builder(info: ServiceApiInfo) -> Self {
        Self {
            info,
            routes: Router::new(),
            health: HealthRegistry::new(),
            jwt: None,
            before_start: Vec::new(),
            hosted: Vec::new(),
            body_logging: BodyLoggingPolicy::default(),
        }
    }

    /// Merge service routes, relative to the base address.
    pub fn routes(mut self, routes: Router) -> Self {
        self.routes = self.routes.merge(routes);
        self
    }

    pub fn with_health_check(mut self, name: impl Into<String>, check: impl HealthCheck + 'static) -> Self {
        self.health.add(name, check);
        self
    }

    /// Configure health checks directly on the registry.
    pub fn health_checks(mut self, configure: impl FnOnce(&mut HealthRegistry)) -> Self {
        configure(&mut self.health);
        self
    }

    /// Make the validator available to the [`Authenticated`](crate::jwt::Authenticated) extractor.
    pub fn with_jwt(mut self, validator: JwtValidator) -> Self {
        self.jwt = Some(Arc::new(validator));
        self
    }

    /// Startup steps run in registration order.
    pub fn with_before_start(mut self, service: impl BeforeHostingStarted + 'static) -> Self {
        self.before_start.push(Arc::new(service));
        self
    }

    pub fn with_hosted(mut self, service: Arc<dyn HostedService>) -> Self {
        self.hosted.push(service);
        self
    }

    /// Register the pool's health check and, when enabled, its migrations.
    pub fn with_database(mut self, pool: SqlitePool, migrator: &'static Migrator, options: &DbContextOptions) -> Self {
        self.health.add_database(pool.clone(), None);
        self.with_before_start(MigrationApplier::new(pool, migrator, options))
    }

    /// Host a RabbitMQ controller and health-check its broker.
    pub fn with_rabbit_mq_controller(mut self, controller: RabbitMqController) -> Self {
        self.health
            .add_rabbit_mq(controller.configuration().connection_string.clone(), None);
        self.with_hosted(Arc::new(controller))
    }

    /// Body logging exclusions, with paths relative to the base address.
    pub fn with_body_logging(mut self, policy: BodyLoggingPolicy) -> Self {
        self.body_logging = policy;
        self
    }

    pub fn build(self) -> ConfiguredApp {
        let info = Arc::new(self.info);
        let health = Arc::new(self.health);

        let api = self.routes.merge(system_routes(info.clone(), health));
        let app = if info.base_address == "/" {
            api
        } else {
            Router::new().nest(&info.base_address, api)
        };
        let mut app = app.fallback(not_found_fallback);

        if let Some(validator) = self.jwt {
            app = app.layer(Extension(validator));
        }

        let body_logging = Arc::new(if info.base_address == "/" {
            self.body_logging
        } else {
            self.body_logging.nested(&info.base_address)
        });

        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);

        let router = app
            .layer(middleware::from_fn(propagate_authorization))
            .layer(middleware::from_fn_with_state(body_logging, log_requests))
            .layer(catch_panic_layer())
            .layer(middleware::from_fn(enrich_problem_details))
            .layer(MetricsLayer)
            .layer(cors);

        ConfiguredApp {
            info,
            router,
            before_start: self.before_start,
            hosted: self.hosted,
        }
    }
}

/// A built service, ready to be served.
pub struct ConfiguredApp {
    info: Arc<ServiceApiInfo>,
    router: Router,
    before_start: Vec<Arc<dyn BeforeHostingStarted>>,
    hosted: Vec<Arc<dyn HostedService>>,
}

impl std::fmt::Debug for ConfiguredApp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfiguredApp")
            .field("info", &self.info)
            .field(
                "before_start",
                &self.before_start.iter().map(|s| s.name()).collect::<Vec<_>>(),
            )
            .field("hosted", &self.hosted.iter().map(|s| s.name()).collect::<Vec<_>>())
            .finish()
    }
}

impl ConfiguredApp {
    pub fn info(&self) -> &ServiceApiInfo {
        &self.info
    }

    pub fn router(&self) -> Router {
        self.router.clone()
    }

    pub fn into_router(self) -> Router {
        self.router
    }

    /// Run the startup steps in order, stopping at the first failure.
    pub async fn run_before_start(&self) -> Result<(), HostError> {
        for service in &self.before_start {
            tracing::info!(service = service.name(), "running startup step");
            service.run().await.map_err(|e| {
                tracing::error!(service = service.name(), error = %e, "startup step failed");
                HostError::BeforeStart {
                    name: service.name().to_string(),
                    source: e.into(),
                }
            })?;
        }
        Ok(())
    }

    pub async fn start_hosted(&self) -> Result<(), HostError> {
        for service in &self.hosted {
            tracing::info!(service = service.name(), "starting hosted service");
            service.start().await.map_err(|e| HostError::HostedStart {
                name: service.name().to_string(),
                source: e.into(),
            })?;
        }
        Ok(())
    }

    /// Stop hosted services in reverse order. Failures are logged.
    pub async fn stop_hosted(&self) {
        for service in self.hosted.iter().rev() {
            if let Err(e) = service.stop().await {
                tracing::warn!(service = service.name(), error = %e, "hosted service failed to stop");
            }
        }
    }

    /// Serve on `listener` until `shutdown` resolves.
    ///
    /// Starts hosted services first and stops them once the server drains.
    pub async fn serve<F>(self, listener: TcpListener, shutdown: F) -> Result<(), HostError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.start_hosted().await?;

        if let Ok(addr) = listener.local_addr() {
            tracing::info!(
                addr = %addr,
                service = %self.info.service_name,
                base = %self.info.base_address,
                "listening on"
            );
        }

        let served = axum::serve(listener, self.router.clone())
            .with_graceful_shutdown(shutdown)
            .await
            .map_err(HostError::Serve);

        self.stop_hosted().await;
        tracing::info!(service = %self.info.service_name, "service stopped");
        served
    }

    /// Run startup steps, bind `config`, and serve until ctrl-c.
    pub async fn run(self, config: HostConfig) -> Result<(), HostError> {
        self.run_before_start().await?;

        let addr = config.socket_addr();
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| HostError::Bind { addr, source })?;

        self.serve(listener, shutdown_signal()).await
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown requested");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ApiError, ApiResult};
    use crate::middleware::REQUEST_ID_HEADER;
    use crate::problem::ProblemDetails;
    use axum::http::{header, HeaderValue, StatusCode};
    use axum::routing::get;
    use axum_test::TestServer;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    fn routes() -> Router {
        async fn fail() -> ApiResult<()> {
            Err(ApiError::not_found("Entity not found"))
        }
        async fn boom() -> &'static str {
            panic!("kaboom")
        }
        Router::new()
            .route("/api/v1/test/ok", get(|| async {}))
            .route("/api/v1/test/missing", get(fail))
            .route("/api/v1/test/panic", get(boom))
    }

    fn server() -> TestServer {
        let app = ServiceHost::builder(ServiceApiInfo::new("TestApp", "/test-app"))
            .routes(routes())
            .build();
        TestServer::new(app.into_router()).unwrap()
    }

    #[tokio::test]
    async fn test_routes_are_nested_under_base() {
        let server = server();
        server.get("/test-app/api/v1/test/ok").await.assert_status_ok();
        server.get("/test-app/service/ping").await.assert_text("pong");
        server
            .get("/api/v1/test/ok")
            .await
            .assert_status(StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_problem_is_enriched() {
        let response = server()
            .get("/test-app/api/v1/test/missing")
            .add_header(REQUEST_ID_HEADER, HeaderValue::from_static("trace-42"))
            .await;

        response.assert_status(StatusCode::NOT_FOUND);
        assert_eq!(response.header(REQUEST_ID_HEADER), "trace-42");
        let problem: ProblemDetails = response.json();
        assert_eq!(problem.detail.as_deref(), Some("Entity not found"));
        assert_eq!(problem.extensions["traceId"], "trace-42");
        assert!(problem.extensions.contains_key("timestamp"));
    }

    #[tokio::test]
    async fn test_unknown_route_is_problem() {
        let response = server().get("/test-app/nowhere").await;
        response.assert_status(StatusCode::NOT_FOUND);
        let problem: ProblemDetails = response.json();
        assert_eq!(problem.instance.as_deref(), Some("GET /test-app/nowhere"));
        assert!(problem.extensions.contains_key("traceId"));
    }

    #[tokio::test]
    async fn test_panic_is_500_problem() {
        let response = server().get("/test-app/api/v1/test/panic").await;
        response.assert_status(StatusCode::INTERNAL_SERVER_ERROR);
        let problem: ProblemDetails = response.json();
        assert_eq!(problem.title, "Internal error!");
        assert!(problem.extensions.contains_key("traceId"));
    }

    #[tokio::test]
    async fn test_cors_allows_any_origin() {
        let response = server()
            .get("/test-app/api/v1/test/ok")
            .add_header(header::ORIGIN, HeaderValue::from_static("http://example.com"))
            .await;
        assert_eq!(response.header(header::ACCESS_CONTROL_ALLOW_ORIGIN), "*");
    }

    struct Step {
        name: &'static str,
        fail: bool,
        log: Arc<Mutex<Vec<&'static str>>>,
    }

    #[async_trait]
    impl BeforeHostingStarted for Step {
        fn name(&self) -> &str {
            self.name
        }

        async fn run(&self) -> anyhow::Result<()> {
            self.log.lock().unwrap().push(self.name);
            if self.fail {
                anyhow::bail!("{} failed", self.name);
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_before_start_runs_in_order_and_stops_on_failure() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let step = |name, fail| Step {
            name,
            fail,
            log: log.clone(),
        };
        let app = ServiceHost::builder(ServiceApiInfo::new("TestApp", "/test-app"))
            .with_before_start(step("first", false))
            .with_before_start(step("second", true))
            .with_before_start(step("third", false))
            .build();

        let err = app.run_before_start().await.unwrap_err();
        assert!(matches!(err, HostError::BeforeStart { ref name, .. } if name == "second"));
        assert_eq!(*log.lock().unwrap(), vec!["first", "second"]);
    }

    #[derive(Default)]
    struct Counter {
        started: AtomicUsize,
        stopped: AtomicUsize,
    }

    #[async_trait]
    impl HostedService for Counter {
        fn name(&self) -> &str {
            "counter"
        }

        async fn start(&self) -> anyhow::Result<()> {
            self.started.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn stop(&self) -> anyhow::Result<()> {
            self.stopped.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_serve_starts_and_stops_hosted_services() {
        let counter = Arc::new(Counter::default());
        let app = ServiceHost::builder(ServiceApiInfo::new("TestApp", "/test-app"))
            .with_hosted(counter.clone())
            .build();

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        let handle = tokio::spawn(app.serve(listener, async {
            let _ = rx.await;
        }));

        let body = reqwest::get(format!("http://{addr}/test-app/service/ping"))
            .await
            .unwrap()
            .text()
            .await
            .unwrap();
        assert_eq!(body, "pong");
        assert_eq!(counter.started.load(Ordering::SeqCst), 1);

        tx.send(()).unwrap();
        handle.await.unwrap().unwrap();
        assert_eq!(counter.stopped.load(Ordering::SeqCst), 1);
    }
}
