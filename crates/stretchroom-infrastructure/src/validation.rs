//! Request validation for JSON bodies.

use std::collections::BTreeMap;

use axum::{
    extract::{FromRequest, Request},
    http::StatusCode,
    Json,
};
use serde::de::DeserializeOwned;

use crate::error::ApiError;
use crate::problem::{ProblemDetails, PROBLEM_ABOUT_BLANK};

/// Validation trait for request types.
///
/// Implementations check every field and collect all failures instead of
/// stopping at the first one.
pub trait Validate {
    fn validate(&self) -> Result<(), ValidationErrors>;
}

/// Field-keyed validation failures.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationErrors {
    errors: BTreeMap<String, Vec<String>>,
}

impl ValidationErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.errors
            .entry(field.into())
            .or_default()
            .push(message.into());
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn field(&self, field: &str) -> Option<&[String]> {
        self.errors.get(field).map(Vec::as_slice)
    }

    /// `Ok(())` when nothing was recorded.
    pub fn into_result(self) -> Result<(), Self> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(self)
        }
    }

    /// Require a non-blank string.
    pub fn not_empty(&mut self, field: &str, value: &str) -> &mut Self {
        if value.trim().is_empty() {
            self.add(field, format!("'{field}' must not be empty."));
        }
        self
    }

    /// Require at most `max` characters.
    pub fn max_length(&mut self, field: &str, value: &str, max: usize) -> &mut Self {
        let length = value.chars().count();
        if length > max {
            self.add(
                field,
                format!("The length of '{field}' must be {max} characters or fewer. You entered {length} characters."),
            );
        }
        self
    }

    /// Render as a 400 validation problem with an `errors` extension.
    pub fn into_problem(self) -> ProblemDetails {
        let detail = self
            .errors
            .iter()
            .flat_map(|(_, messages)| messages.iter().cloned())
            .collect::<Vec<_>>()
            .join(" ");
        ProblemDetails::new(
            PROBLEM_ABOUT_BLANK,
            "One or more validation errors occurred.",
            StatusCode::BAD_REQUEST,
        )
        .with_detail(detail)
        .with_extension("errors", serde_json::json!(self.errors))
    }
}

impl std::fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (field, messages) in &self.errors {
            write!(f, "{field}: {}; ", messages.join(", "))?;
        }
        Ok(())
    }
}

impl std::error::Error for ValidationErrors {}

/// JSON body extractor that runs [`Validate`] before the handler.
///
/// Malformed JSON and failed validation both reject with a validation problem.
#[derive(Debug, Clone, Copy, Default)]
pub struct Valid<T>(pub T);

impl<S, T> FromRequest<S> for Valid<T>
where
    T: DeserializeOwned + Validate,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state)
            .await
            .map_err(|rejection| {
                ApiError::validation(
                    ProblemDetails::new(PROBLEM_ABOUT_BLANK, "Validation", rejection.status())
                        .with_detail(rejection.body_text()),
                )
            })?;

        value
            .validate()
            .map_err(|errors| ApiError::validation(errors.into_problem()))?;

        Ok(Valid(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{routing::post, Router};
    use axum_test::TestServer;
    use serde::Deserialize;

    #[derive(Debug, Deserialize)]
    struct Message {
        message: String,
    }

    impl Validate for Message {
        fn validate(&self) -> Result<(), ValidationErrors> {
            let mut errors = ValidationErrors::new();
            errors
                .not_empty("message", &self.message)
                .max_length("message", &self.message, 10);
            errors.into_result()
        }
    }

    #[test]
    fn test_not_empty_and_max_length() {
        let mut errors = ValidationErrors::new();
        errors.not_empty("a", "  ").max_length("b", "abcdef", 5);
        assert_eq!(errors.field("a").map(|m| m.len()), Some(1));
        assert!(errors.field("b").unwrap()[0].contains("6 characters"));
    }

    #[test]
    fn test_into_problem_carries_errors() {
        let mut errors = ValidationErrors::new();
        errors.add("name", "'name' must not be empty.");
        let problem = errors.into_problem();
        assert_eq!(problem.status, Some(400));
        assert_eq!(
            problem.extensions["errors"]["name"][0],
            "'name' must not be empty."
        );
    }

    #[tokio::test]
    async fn test_valid_extractor_rejects_invalid_body() {
        async fn handler(Valid(body): Valid<Message>) -> String {
            body.message
        }
        let server = TestServer::new(Router::new().route("/", post(handler))).unwrap();

        let ok = server.post("/").json(&serde_json::json!({"message": "hi"})).await;
        ok.assert_status_ok();
        ok.assert_text("hi");

        let too_long = server
            .post("/")
            .json(&serde_json::json!({"message": "more than ten chars"}))
            .await;
        too_long.assert_status(StatusCode::BAD_REQUEST);
        let problem: ProblemDetails = too_long.json();
        assert!(problem.extensions["errors"]["message"].is_array());

        let malformed = server.post("/").text("not json").await;
        assert!(malformed.status_code().is_client_error());
    }
}
