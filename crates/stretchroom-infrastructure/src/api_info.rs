//! Identity of a hosted service.

use serde::{Deserialize, Serialize};

/// Name, base path and API versions of a service.
///
/// `base_address` is the path prefix every route of the service is nested
/// under, for example `/test-app`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceApiInfo {
    pub service_name: String,
    pub base_address: String,
    pub api_versions: Vec<String>,
    pub description: Option<String>,
    pub version: String,
}

impl ServiceApiInfo {
    pub fn new(service_name: impl Into<String>, base_address: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            base_address: normalize_base(&base_address.into()),
            api_versions: vec!["v1".to_string()],
            description: None,
            version: "0.0.0".to_string(),
        }
    }

    pub fn with_api_versions<I, S>(mut self, versions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.api_versions = versions.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    /// `base_address` joined with `path`.
    pub fn path(&self, path: &str) -> String {
        let path = path.trim_start_matches('/');
        if path.is_empty() {
            return self.base_address.clone();
        }
        format!("{}/{}", self.base_address.trim_end_matches('/'), path)
    }
}

/// Leading slash, no trailing slash. The root stays `/`.
fn normalize_base(raw: &str) -> String {
    let trimmed = raw.trim().trim_matches('/');
    format!("/{trimmed}")
}
