//! Environment-driven configuration shared by every service.
//!
//! # Environment Variables
//!
//! - `SERVICE_HOST`: Bind address (default: `0.0.0.0`)
//! - `SERVICE_PORT`: HTTP port (default: `8080`)
//! - `<SERVICE>_URL`: Base URL of a downstream service, see [`ClientConfiguration`]

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Configuration errors, each naming the offending setting.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// A required value is absent or empty.
    #[error("{field} must not be empty")]
    Missing { field: String },

    /// A value is present but malformed.
    #[error("{field} is invalid: {reason}")]
    Invalid { field: String, reason: String },
}

impl ConfigError {
    pub fn missing(field: impl Into<String>) -> Self {
        Self::Missing {
            field: field.into(),
        }
    }

    pub fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// Read an environment variable, treating empty values as unset.
pub fn env_var(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

/// Read and parse an environment variable.
///
/// Returns `Ok(None)` when the variable is unset.
pub fn env_parse<T>(key: &str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    env_var(key)
        .map(|v| {
            v.trim()
                .parse::<T>()
                .map_err(|e| ConfigError::invalid(key, e.to_string()))
        })
        .transpose()
}

/// Read a boolean flag (`true`/`1`/`yes`).
pub fn env_flag(key: &str) -> bool {
    env_var(key)
        .map(|v| matches!(v.to_lowercase().as_str(), "true" | "1" | "yes"))
        .unwrap_or(false)
}

/// Read a duration expressed in whole seconds.
pub fn env_seconds(key: &str) -> Result<Option<Duration>, ConfigError> {
    Ok(env_parse::<u64>(key)?.map(Duration::from_secs))
}

/// Listener configuration for a service host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostConfig {
    pub host: IpAddr,
    pub port: u16,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            host: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: 8080,
        }
    }
}

impl HostConfig {
    /// Create configuration from `SERVICE_HOST` and `SERVICE_PORT`.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        Ok(Self {
            host: env_parse("SERVICE_HOST")?.unwrap_or(defaults.host),
            port: env_parse("SERVICE_PORT")?.unwrap_or(defaults.port),
        })
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }
}

/// Location of a downstream service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientConfiguration {
    pub service_url: String,
}

impl ClientConfiguration {
    /// Read `<SERVICE>_URL`, where `service` is upper-cased and dashes become underscores.
    pub fn from_env(service: &str) -> Result<Self, ConfigError> {
        let key = format!("{}_URL", service.to_uppercase().replace('-', "_"));
        env_var(&key)
            .map(|service_url| Self { service_url })
            .ok_or(ConfigError::missing(key))
    }

    /// The URL must be absolute `http` or `https`.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let url = reqwest::Url::parse(self.service_url.trim())
            .map_err(|e| ConfigError::invalid("service_url", e.to_string()))?;
        match url.scheme() {
            "http" | "https" => Ok(()),
            other => Err(ConfigError::invalid(
                "service_url",
                format!("unsupported scheme '{other}'"),
            )),
        }
    }
}
