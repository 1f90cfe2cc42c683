//! RFC 7807 Problem Details for HTTP APIs.
//!
//! Provides structured error responses following the Problem Details standard.
//! See: <https://www.rfc-editor.org/rfc/rfc7807.html>

use std::collections::BTreeMap;

use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Media type for problem details bodies.
pub const PROBLEM_JSON: &str = "application/problem+json";

/// Default problem type when none is more specific.
pub const PROBLEM_ABOUT_BLANK: &str = "about:blank";

fn about_blank() -> String {
    PROBLEM_ABOUT_BLANK.to_string()
}

/// RFC 7807 Problem Details response structure.
///
/// Every error response produced by the StretchRoom services uses this shape.
/// Extra members (`traceId`, `timestamp`, validation `errors`) are carried in
/// [`ProblemDetails::extensions`] and flattened into the JSON object.
///
/// # Example
///
/// ```
/// use stretchroom_infrastructure::ProblemDetails;
/// use axum::http::StatusCode;
///
/// let problem = ProblemDetails::from_status(StatusCode::NOT_FOUND)
///     .with_detail("Entity not found")
///     .with_instance("GET /test-app/api/v1/test/command");
/// assert_eq!(problem.status, Some(404));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProblemDetails {
    /// URI reference identifying the problem type.
    #[serde(rename = "type", default = "about_blank")]
    pub type_uri: String,

    /// Short, human-readable summary of the problem.
    #[serde(default)]
    pub title: String,

    /// HTTP status code for this problem.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,

    /// Human-readable explanation specific to this occurrence.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,

    /// URI reference identifying the specific occurrence.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance: Option<String>,

    /// Extension members.
    #[serde(flatten)]
    pub extensions: BTreeMap<String, Value>,
}

impl ProblemDetails {
    /// Create a new ProblemDetails with required fields.
    pub fn new(type_uri: impl Into<String>, title: impl Into<String>, status: StatusCode) -> Self {
        Self {
            type_uri: type_uri.into(),
            title: title.into(),
            status: Some(status.as_u16()),
            detail: None,
            instance: None,
            extensions: BTreeMap::new(),
        }
    }

    /// Create a problem titled with the canonical reason phrase of `status`.
    pub fn from_status(status: StatusCode) -> Self {
        Self::new(
            PROBLEM_ABOUT_BLANK,
            status.canonical_reason().unwrap_or("Unknown Error"),
            status,
        )
    }

    /// Add a detailed explanation of this specific problem occurrence.
    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    /// Set the occurrence identifier.
    pub fn with_instance(mut self, instance: impl Into<String>) -> Self {
        self.instance = Some(instance.into());
        self
    }

    /// Set the title.
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    /// Add an extension member.
    pub fn with_extension(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.extensions.insert(key.into(), value.into());
        self
    }

    /// Create a 400 Bad Request problem.
    pub fn bad_request(detail: impl Into<String>) -> Self {
        Self::from_status(StatusCode::BAD_REQUEST).with_detail(detail)
    }

    /// Create a 500 Internal Server Error problem.
    pub fn internal_error(detail: impl Into<String>) -> Self {
        Self::new(
            PROBLEM_ABOUT_BLANK,
            "Internal error!",
            StatusCode::INTERNAL_SERVER_ERROR,
        )
        .with_detail(detail)
    }

    /// Resolve the HTTP status, falling back to 500 for missing or invalid values.
    pub fn status_code(&self) -> StatusCode {
        self.status
            .and_then(|s| StatusCode::from_u16(s).ok())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
    }
}

impl std::fmt::Display for ProblemDetails {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}: {}",
            self.title,
            self.detail.as_deref().unwrap_or("")
        )
    }
}

impl std::error::Error for ProblemDetails {}

/// Render as `application/problem+json` with the problem's status.
///
/// A copy of the problem is kept in the response extensions so the
/// enrichment middleware can add `traceId`, `timestamp` and `instance`.
impl IntoResponse for ProblemDetails {
    fn into_response(self) -> Response {
        let status = self.status_code();

        let mut response = Json(&self).into_response();
        response
            .headers_mut()
            .insert(header::CONTENT_TYPE, HeaderValue::from_static(PROBLEM_JSON));
        *response.status_mut() = status;
        response.extensions_mut().insert(self);
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_problem_details_new() {
        let problem = ProblemDetails::new("/problems/test", "Test", StatusCode::NOT_FOUND);
        assert_eq!(problem.type_uri, "/problems/test");
        assert_eq!(problem.title, "Test");
        assert_eq!(problem.status, Some(404));
        assert!(problem.extensions.is_empty());
    }

    #[test]
    fn test_problem_details_from_status_uses_reason_phrase() {
        let problem = ProblemDetails::from_status(StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(problem.title, "Method Not Allowed");
        assert_eq!(problem.type_uri, PROBLEM_ABOUT_BLANK);
    }

    #[test]
    fn test_problem_details_serialization_flattens_extensions() {
        let problem = ProblemDetails::bad_request("Test error")
            .with_instance("POST /body")
            .with_extension("traceId", "abc");
        let json = serde_json::to_string(&problem).unwrap();

        assert!(json.contains("\"type\":\"about:blank\""));
        assert!(json.contains("\"title\":\"Bad Request\""));
        assert!(json.contains("\"status\":400"));
        assert!(json.contains("\"detail\":\"Test error\""));
        assert!(json.contains("\"instance\":\"POST /body\""));
        assert!(json.contains("\"traceId\":\"abc\""));
    }

    #[test]
    fn test_problem_details_deserializes_sparse_body() {
        let problem: ProblemDetails = serde_json::from_str(r#"{"title":"Conflict"}"#).unwrap();
        assert_eq!(problem.type_uri, PROBLEM_ABOUT_BLANK);
        assert_eq!(problem.status, None);
        assert_eq!(problem.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_problem_details_into_response() {
        let response = ProblemDetails::from_status(StatusCode::CONFLICT).into_response();
        assert_eq!(response.status(), StatusCode::CONFLICT);
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            PROBLEM_JSON
        );
        assert!(response.extensions().get::<ProblemDetails>().is_some());
    }
}
