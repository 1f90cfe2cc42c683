//! Shared infrastructure for StretchRoom HTTP microservices.
//!
//! This crate provides the plumbing every StretchRoom service is built on:
//!
//! - [`ServiceHost`]: builds the router, the middleware stack and the startup
//!   lifecycle for a service mounted under its [`ServiceApiInfo`] base address
//! - [`ProblemDetails`] and [`ApiError`]: RFC 9457 error responses
//! - [`command`]: mediator-style command execution
//! - [`client`]: typed HTTP clients returning [`client::OperationResult`]
//! - [`health`], [`metrics`], [`logging`], [`middleware`]: observability
//! - [`jwt`]: token generation and validation
//! - [`rabbitmq`]: RPC-style messaging over AMQP
//! - [`scheduling`]: interval and cron jobs
//! - [`db`]: SQLite pools with embedded migrations
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │  ServiceHost                                                │
//! │  - CORS, request id, metrics                                │
//! │  - Problem enrichment, panic catcher                        │
//! │  - Request logging, authorization propagation               │
//! │  - /{base}/service/*  system routes                         │
//! │  - /{base}/api/*      service routes -> CommandExecutor     │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Startup steps (migrations)  │  Hosted services (rabbit,    │
//! │                              │  scheduler)                  │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Testing Support
//!
//! The [`test_utils`] module provides in-memory databases and JWT options for
//! tests. Enable the `test-utils` feature to access it from dependent crates.

#![deny(warnings)]

pub mod api_info;
pub mod client;
pub mod command;
pub mod config;
pub mod db;
pub mod error;
pub mod exception;
pub mod health;
pub mod host;
pub mod jwt;
pub mod logging;
pub mod metrics;
pub mod middleware;
pub mod problem;
pub mod rabbitmq;
pub mod request_logging;
pub mod scheduling;
pub mod sequence;
pub mod service_routes;
pub mod validation;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use api_info::ServiceApiInfo;
pub use command::{Command, CommandExecutor, CommandRegistry, CommandScope};
pub use config::{ClientConfiguration, ConfigError, HostConfig};
pub use db::{register_db, DbContextOptions, DbError};
pub use error::{ApiError, ApiResult};
pub use health::{HealthCheck, HealthCheckResult, HealthRegistry, HealthStatus};
pub use host::{BeforeHostingStarted, ConfiguredApp, HostError, HostedService, ServiceHost};
pub use jwt::{Authenticated, JwtClaims, JwtGenerator, JwtOptions, JwtValidator};
pub use logging::{init_logging, LogFormat, LoggingConfig};
pub use metrics::{init_metrics, MetricsConfig, MetricsError};
pub use middleware::{MetricsLayer, RequestId, REQUEST_ID_HEADER};
pub use problem::{ProblemDetails, PROBLEM_JSON};
pub use request_logging::BodyLoggingPolicy;
pub use scheduling::{Job, JobContext, Scheduler};
pub use sequence::{AtomGenerator, AtomicIntGenerator, AtomicLongGenerator};
pub use validation::{Valid, Validate, ValidationErrors};
