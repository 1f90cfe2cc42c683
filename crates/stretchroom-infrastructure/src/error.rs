//! The API error type carried through handlers and commands.
//!
//! [`ApiError`] wraps a [`ProblemDetails`] payload and is the only error type
//! handlers return. Constructors mark the caller location as the problem
//! `instance` unless one is set explicitly.

use std::panic::Location;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

use crate::problem::{ProblemDetails, PROBLEM_ABOUT_BLANK};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Convenient result alias for handlers and commands.
pub type ApiResult<T> = Result<T, ApiError>;

/// Error carrying an RFC 7807 problem payload.
#[derive(Debug, Error)]
#[error("{problem}")]
pub struct ApiError {
    problem: Box<ProblemDetails>,
    #[source]
    source: Option<BoxError>,
}

#[track_caller]
fn caller() -> String {
    let location = Location::caller();
    format!("{}:{}", location.file(), location.line())
}

impl ApiError {
    /// Wrap a problem as-is.
    pub fn new(problem: ProblemDetails) -> Self {
        Self {
            problem: Box::new(problem),
            source: None,
        }
    }

    /// 404 with title `NotFound`.
    #[track_caller]
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(
            ProblemDetails::new(PROBLEM_ABOUT_BLANK, "NotFound", StatusCode::NOT_FOUND)
                .with_detail(message)
                .with_instance(caller()),
        )
    }

    /// 409 with title `Conflict`.
    #[track_caller]
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(
            ProblemDetails::new(PROBLEM_ABOUT_BLANK, "Conflict", StatusCode::CONFLICT)
                .with_detail(message)
                .with_instance(caller()),
        )
    }

    /// Validation failure built from an existing problem.
    ///
    /// Missing title falls back to `Validation`, missing status to 400.
    #[track_caller]
    pub fn validation(mut problem: ProblemDetails) -> Self {
        if problem.title.is_empty() {
            problem.title = "Validation".to_string();
        }
        if problem.status.is_none() {
            problem.status = Some(StatusCode::BAD_REQUEST.as_u16());
        }
        if problem.instance.is_none() {
            problem.instance = Some(caller());
        }
        Self::new(problem)
    }

    /// Wrap an arbitrary error, defaulting to 500 with title `Exception`.
    #[track_caller]
    pub fn from_error(error: impl Into<BoxError>, status: Option<StatusCode>) -> Self {
        let error = error.into();
        let status = status.unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let problem = ProblemDetails::new(PROBLEM_ABOUT_BLANK, "Exception", status)
            .with_detail(error.to_string())
            .with_instance(caller());
        Self {
            problem: Box::new(problem),
            source: Some(error),
        }
    }

    /// Wrap a problem that may be absent, as returned by a failed client call.
    ///
    /// A missing payload becomes `API Error` / `Null problem details`. A given
    /// `status` overrides the one in the payload.
    #[track_caller]
    pub fn from_problem(problem: Option<ProblemDetails>, status: Option<StatusCode>) -> Self {
        let status = status.map(|s| s.as_u16());
        let problem = match problem {
            Some(mut problem) => {
                if status.is_some() {
                    problem.status = status;
                }
                problem
            }
            None => ProblemDetails {
                type_uri: PROBLEM_ABOUT_BLANK.to_string(),
                title: "API Error".to_string(),
                status: status.or(Some(StatusCode::INTERNAL_SERVER_ERROR.as_u16())),
                detail: Some("Null problem details".to_string()),
                instance: Some(caller()),
                extensions: Default::default(),
            },
        };
        Self::new(problem)
    }

    /// Override the problem instance.
    pub fn with_instance(mut self, instance: impl Into<String>) -> Self {
        self.problem.instance = Some(instance.into());
        self
    }

    /// The carried problem.
    pub fn problem(&self) -> &ProblemDetails {
        &self.problem
    }

    /// The HTTP status this error renders with.
    pub fn status(&self) -> StatusCode {
        self.problem.status_code()
    }

    /// Consume the error and return its problem.
    pub fn into_problem(self) -> ProblemDetails {
        *self.problem
    }
}

impl From<ProblemDetails> for ApiError {
    fn from(problem: ProblemDetails) -> Self {
        Self::new(problem)
    }
}

impl From<anyhow::Error> for ApiError {
    #[track_caller]
    fn from(error: anyhow::Error) -> Self {
        Self::from_error(error, None)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(
                status = status.as_u16(),
                error = %self,
                source = self.source.as_ref().map(|s| s.to_string()).as_deref().unwrap_or("-"),
                "Error on request processing!"
            );
        } else {
            tracing::warn!(status = status.as_u16(), error = %self, "request rejected");
        }
        self.into_problem().into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_filled(error: &ApiError) {
        let problem = error.problem();
        assert!(problem.status.is_some());
        assert!(!problem.title.is_empty());
        assert!(problem.instance.as_deref().is_some_and(|i| !i.is_empty()));
        assert!(problem.detail.as_deref().is_some_and(|d| !d.is_empty()));
    }

    #[test]
    fn test_not_found_fills_problem() {
        let error = ApiError::not_found("Entity not found");
        assert_eq!(error.status(), StatusCode::NOT_FOUND);
        assert_eq!(error.problem().title, "NotFound");
        assert!(error.problem().instance.as_deref().unwrap().contains("error.rs"));
        assert_filled(&error);
    }

    #[test]
    fn test_conflict_fills_problem() {
        let error = ApiError::conflict("duplicate");
        assert_eq!(error.status(), StatusCode::CONFLICT);
        assert_eq!(error.problem().title, "Conflict");
        assert_filled(&error);
    }

    #[test]
    fn test_validation_falls_back_to_defaults() {
        let error = ApiError::validation(ProblemDetails {
            type_uri: PROBLEM_ABOUT_BLANK.to_string(),
            title: String::new(),
            status: None,
            detail: Some("name is empty".to_string()),
            instance: None,
            extensions: Default::default(),
        });
        assert_eq!(error.problem().title, "Validation");
        assert_eq!(error.status(), StatusCode::BAD_REQUEST);
        assert_filled(&error);
    }

    #[test]
    fn test_from_error_defaults_to_500() {
        let error = ApiError::from_error(anyhow::anyhow!("boom"), None);
        assert_eq!(error.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(error.problem().title, "Exception");
        assert_eq!(error.problem().detail.as_deref(), Some("boom"));
        assert!(std::error::Error::source(&error).is_some());
        assert_filled(&error);
    }

    #[test]
    fn test_from_error_custom_status() {
        let error = ApiError::from_error("bad gateway", Some(StatusCode::BAD_GATEWAY));
        assert_eq!(error.status(), StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn test_from_problem_none_uses_placeholder() {
        let error = ApiError::from_problem(None, Some(StatusCode::FORBIDDEN));
        assert_eq!(error.status(), StatusCode::FORBIDDEN);
        assert_eq!(error.problem().title, "API Error");
        assert_eq!(error.problem().detail.as_deref(), Some("Null problem details"));
        assert_filled(&error);
    }

    #[test]
    fn test_from_problem_overrides_status() {
        let problem = ProblemDetails::from_status(StatusCode::NOT_FOUND).with_detail("gone");
        let error = ApiError::from_problem(Some(problem), Some(StatusCode::GONE));
        assert_eq!(error.status(), StatusCode::GONE);
        assert_eq!(error.problem().detail.as_deref(), Some("gone"));
    }

    #[test]
    fn test_api_error_into_response() {
        let response = ApiError::not_found("missing").into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert!(response.extensions().get::<ProblemDetails>().is_some());
    }
}
