//! Health checks and the report served under `/service/healthz`.
//!
//! Checks are registered on a [`HealthRegistry`] under a name. Database and
//! RabbitMQ checks get generated names (`db-1`, `rabbit-mq-1`, ...) unless a
//! [`HealthCheckConfiguration`] supplies a name factory.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Outcome of a single check, ordered from worst to best.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum HealthStatus {
    Unhealthy,
    Degraded,
    Healthy,
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            HealthStatus::Unhealthy => "Unhealthy",
            HealthStatus::Degraded => "Degraded",
            HealthStatus::Healthy => "Healthy",
        };
        f.write_str(label)
    }
}

/// What a check reports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthCheckResult {
    pub status: HealthStatus,
    pub description: Option<String>,
}

impl HealthCheckResult {
    pub fn healthy() -> Self {
        Self {
            status: HealthStatus::Healthy,
            description: None,
        }
    }

    pub fn degraded(description: impl Into<String>) -> Self {
        Self {
            status: HealthStatus::Degraded,
            description: Some(description.into()),
        }
    }

    pub fn unhealthy(description: impl Into<String>) -> Self {
        Self {
            status: HealthStatus::Unhealthy,
            description: Some(description.into()),
        }
    }
}

/// A dependency probe.
#[async_trait]
pub trait HealthCheck: Send + Sync {
    async fn check(&self) -> HealthCheckResult;
}

type NameFactory = Arc<dyn Fn(usize) -> String + Send + Sync>;

/// Registration options for generated checks.
#[derive(Clone)]
pub struct HealthCheckConfiguration {
    /// Builds the check name from its 1-based index among checks of its kind.
    pub name_factory: Option<NameFactory>,
    pub tags: Vec<String>,
    /// Status reported when the check fails or times out.
    pub failure_status: HealthStatus,
    pub timeout: Option<Duration>,
}

impl Default for HealthCheckConfiguration {
    fn default() -> Self {
        Self {
            name_factory: None,
            tags: Vec::new(),
            failure_status: HealthStatus::Unhealthy,
            timeout: None,
        }
    }
}

impl HealthCheckConfiguration {
    pub fn with_name_factory(mut self, factory: impl Fn(usize) -> String + Send + Sync + 'static) -> Self {
        self.name_factory = Some(Arc::new(factory));
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_failure_status(mut self, status: HealthStatus) -> Self {
        self.failure_status = status;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

impl std::fmt::Debug for HealthCheckConfiguration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HealthCheckConfiguration")
            .field("name_factory", &self.name_factory.is_some())
            .field("tags", &self.tags)
            .field("failure_status", &self.failure_status)
            .field("timeout", &self.timeout)
            .finish()
    }
}

#[derive(Clone)]
struct RegisteredCheck {
    name: String,
    kind: &'static str,
    check: Arc<dyn HealthCheck>,
    tags: Vec<String>,
    failure_status: HealthStatus,
    timeout: Option<Duration>,
}

/// One entry of a [`HealthReport`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReportEntry {
    pub status: HealthStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub duration_ms: f64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

/// Result of running every registered check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    pub status: HealthStatus,
    pub total_duration_ms: f64,
    pub entries: BTreeMap<String, HealthReportEntry>,
}

impl HealthReport {
    /// `name - status` for each entry, one per line.
    pub fn summary(&self) -> String {
        self.entries
            .iter()
            .map(|(name, entry)| format!("{name} - {}", entry.status))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Registered health checks.
#[derive(Clone, Default)]
pub struct HealthRegistry {
    checks: Vec<RegisteredCheck>,
}

impl std::fmt::Debug for HealthRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.checks.iter().map(|c| &c.name))
            .finish()
    }
}

impl HealthRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a check under an explicit name.
    pub fn add(&mut self, name: impl Into<String>, check: impl HealthCheck + 'static) -> &mut Self {
        self.push("custom", name.into(), Arc::new(check), HealthCheckConfiguration::default());
        self
    }

    /// Register a check with tags, failure status and timeout.
    pub fn add_with(
        &mut self,
        name: impl Into<String>,
        check: impl HealthCheck + 'static,
        configuration: HealthCheckConfiguration,
    ) -> &mut Self {
        self.push("custom", name.into(), Arc::new(check), configuration);
        self
    }

    /// Register a check whose name is generated from its kind and index.
    pub(crate) fn add_generated(
        &mut self,
        kind: &'static str,
        check: Arc<dyn HealthCheck>,
        configuration: HealthCheckConfiguration,
    ) -> &mut Self {
        let index = self.checks.iter().filter(|c| c.kind == kind).count() + 1;
        let name = match &configuration.name_factory {
            Some(factory) => factory(index),
            None => format!("{kind}-{index}"),
        };
        self.push(kind, name, check, configuration);
        self
    }

    fn push(
        &mut self,
        kind: &'static str,
        name: String,
        check: Arc<dyn HealthCheck>,
        configuration: HealthCheckConfiguration,
    ) {
        self.checks.retain(|c| c.name != name);
        self.checks.push(RegisteredCheck {
            name,
            kind,
            check,
            tags: configuration.tags,
            failure_status: configuration.failure_status,
            timeout: configuration.timeout,
        });
    }

    pub fn names(&self) -> Vec<&str> {
        self.checks.iter().map(|c| c.name.as_str()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.checks.is_empty()
    }

    /// Run every check concurrently and aggregate the worst status.
    pub async fn check_all(&self) -> HealthReport {
        let started = Instant::now();
        let runs = self.checks.iter().map(|registered| async move {
            let start = Instant::now();
            let outcome = match registered.timeout {
                Some(timeout) => tokio::time::timeout(timeout, registered.check.check())
                    .await
                    .unwrap_or_else(|_| {
                        HealthCheckResult::unhealthy(format!(
                            "timed out after {}ms",
                            timeout.as_millis()
                        ))
                    }),
                None => registered.check.check().await,
            };

            let status = if outcome.status == HealthStatus::Unhealthy {
                registered.failure_status
            } else {
                outcome.status
            };
            if status != HealthStatus::Healthy {
                tracing::warn!(
                    check = %registered.name,
                    status = %status,
                    description = outcome.description.as_deref().unwrap_or("-"),
                    "health check is not healthy"
                );
            }

            (
                registered.name.clone(),
                HealthReportEntry {
                    status,
                    description: outcome.description,
                    duration_ms: start.elapsed().as_secs_f64() * 1000.0,
                    tags: registered.tags.clone(),
                },
            )
        });

        let entries: BTreeMap<_, _> = futures::future::join_all(runs).await.into_iter().collect();
        let status = entries
            .values()
            .map(|e| e.status)
            .min()
            .unwrap_or(HealthStatus::Healthy);

        HealthReport {
            status,
            total_duration_ms: started.elapsed().as_secs_f64() * 1000.0,
            entries,
        }
    }
}

/// Probe body for `/health/live` and `/health/ready`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeStatus {
    /// Status indicator: "ok" or "not_ready: ...".
    pub status: String,

    /// Service name for identification.
    pub service: String,

    /// Service version from build-time.
    pub version: String,

    /// Number of checks that ran (readiness only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checks: Option<usize>,
}

impl ProbeStatus {
    /// Create a healthy liveness status.
    pub fn alive(service: &str, version: &str) -> Self {
        Self {
            status: "ok".to_string(),
            service: service.to_string(),
            version: version.to_string(),
            checks: None,
        }
    }

    /// Create a ready status.
    pub fn ready(service: &str, version: &str, checks: usize) -> Self {
        Self {
            status: "ok".to_string(),
            service: service.to_string(),
            version: version.to_string(),
            checks: Some(checks),
        }
    }

    /// Create a not-ready status.
    pub fn not_ready(service: &str, version: &str, reason: &str) -> Self {
        Self {
            status: format!("not_ready: {}", reason),
            service: service.to_string(),
            version: version.to_string(),
            checks: None,
        }
    }
}
