//! Routes, RPC method names and wire types shared with clients.

use serde::{Deserialize, Serialize};
use stretchroom_infrastructure::{Validate, ValidationErrors};

pub const SERVICE_NAME: &str = "auth-service";
pub const BASE_PATH: &str = "/auth-service";

/// HTTP routes, relative to [`BASE_PATH`].
pub mod routes {
    pub const AUTH_V1: &str = "/api/v1/auth";

    pub const TOKEN: &str = "token";
    pub const VALIDATE_TOKEN: &str = "validate/token";
    pub const VALIDATE_AUTH: &str = "validate/auth";

    pub fn auth_v1(method: &str) -> String {
        format!("{AUTH_V1}/{method}")
    }
}

/// RabbitMQ methods served by the auth controller.
pub mod rabbit_methods {
    pub const OK: &str = "ok";
    pub const GET_JSON: &str = "getjson";
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateTokenRequest {
    pub user_name: String,
}

impl GenerateTokenRequest {
    pub fn new(user_name: impl Into<String>) -> Self {
        Self {
            user_name: user_name.into(),
        }
    }
}

impl Validate for GenerateTokenRequest {
    fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();
        errors.not_empty("userName", &self.user_name);
        errors.into_result()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateTokenResponse {
    /// `Bearer <jwt>`.
    pub token: String,
}
