//! Routes and wire types shared with [`crate::client::TestServiceClient`].

use serde::{Deserialize, Serialize};
use stretchroom_infrastructure::{Validate, ValidationErrors};

pub const SERVICE_NAME: &str = "test-app";
pub const BASE_PATH: &str = "/test-app";

/// HTTP routes, relative to [`BASE_PATH`].
pub mod routes {
    pub const TEST_V1: &str = "/api/v1/test";
    pub const TEST_V2: &str = "/api/v2/testv2";

    pub const OK: &str = "ok";
    pub const JSON: &str = "json";
    pub const EXCEPTION: &str = "exception";
    pub const BODY: &str = "body";
    pub const QUERY: &str = "query";
    pub const COMMAND: &str = "command";
    pub const TOKEN: &str = "token";
    pub const VALIDATE_TOKEN: &str = "validate/token";
    pub const VALIDATE_AUTH: &str = "validate/auth";

    pub fn test_v1(method: &str) -> String {
        format!("{TEST_V1}/{method}")
    }
}

/// User name the `token` route asks the auth service for.
pub const TOKEN_USER: &str = "Vitalik";

pub const MAX_MESSAGE_LEN: usize = 10;
pub const MAX_NAME_LEN: usize = 50;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SomeBodyRequest {
    pub message: String,
}

impl Validate for SomeBodyRequest {
    fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();
        errors
            .not_empty("message", &self.message)
            .max_length("message", &self.message, MAX_MESSAGE_LEN);
        errors.into_result()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SomeBodyResponse {
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValueQuery {
    pub value: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NameQuery {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeNameRequest {
    pub new_name: String,
}

impl ChangeNameRequest {
    pub fn new(new_name: impl Into<String>) -> Self {
        Self {
            new_name: new_name.into(),
        }
    }
}

impl Validate for ChangeNameRequest {
    fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();
        errors
            .not_empty("newName", &self.new_name)
            .max_length("newName", &self.new_name, MAX_NAME_LEN);
        errors.into_result()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityResponseDto {
    pub id: i64,
    pub name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandResultResponse {
    pub entities: Vec<EntityResponseDto>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_body_message_limits() {
        let ok = SomeBodyRequest {
            message: "0123456789".to_string(),
        };
        assert!(ok.validate().is_ok());

        let long = SomeBodyRequest {
            message: "0123456789a".to_string(),
        };
        let errors = long.validate().unwrap_err();
        assert_eq!(errors.field("message").map(<[String]>::len), Some(1));

        let empty = SomeBodyRequest {
            message: String::new(),
        };
        assert!(empty.validate().is_err());
    }

    #[test]
    fn test_change_name_uses_camel_case() {
        let json = serde_json::to_value(ChangeNameRequest::new("x")).unwrap();
        assert_eq!(json, serde_json::json!({"newName": "x"}));

        let errors = ChangeNameRequest::new("").validate().unwrap_err();
        assert!(errors.field("newName").is_some());
        assert!(ChangeNameRequest::new("n".repeat(51)).validate().is_err());
    }
}
