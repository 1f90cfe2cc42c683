//! Turning every failure into a problem-details response.
//!
//! - [`catch_panic_layer`]: a panicking handler becomes a 500 problem
//! - [`enrich_problem_details`]: stamps `traceId`, `timestamp` and `instance`
//!   onto problem responses, and converts bare error responses into problems.
//!   A relayed problem keeps its own trace id as `downstreamTraceId`
//! - [`not_found_fallback`]: unmatched routes become a 404 problem

use std::any::Any;

use axum::{
    body::Body,
    extract::Request,
    http::{header, HeaderValue, StatusCode, Uri},
    middleware::Next,
    response::{IntoResponse, Response},
};
use tower_http::catch_panic::CatchPanicLayer;

use crate::middleware::RequestId;
use crate::problem::{ProblemDetails, PROBLEM_JSON};

const TRACE_ID: &str = "traceId";
const DOWNSTREAM_TRACE_ID: &str = "downstreamTraceId";

/// Upper bound on error bodies read back for conversion.
const MAX_ERROR_BODY: usize = 64 * 1024;

type PanicHandler = fn(Box<dyn Any + Send + 'static>) -> Response;

/// Catch panics in handlers and answer with a 500 problem.
pub fn catch_panic_layer() -> CatchPanicLayer<PanicHandler> {
    CatchPanicLayer::custom(panic_response as PanicHandler)
}

fn panic_response(payload: Box<dyn Any + Send + 'static>) -> Response {
    let detail = if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else {
        "handler panicked".to_string()
    };

    tracing::error!(detail = %detail, "Error on request processing!");
    ProblemDetails::internal_error(detail).into_response()
}

/// Fallback for requests no route matched.
pub async fn not_found_fallback(uri: Uri) -> ProblemDetails {
    ProblemDetails::from_status(StatusCode::NOT_FOUND)
        .with_detail(format!("No endpoint matches '{}'", uri.path()))
}

/// Stamp problem responses with request context.
///
/// Problems produced by handlers carry a copy in the response extensions.
/// Error responses without one are converted, using any plain-text body as
/// the detail.
pub async fn enrich_problem_details(request: Request, next: Next) -> Response {
    let occurrence = format!("{} {}", request.method(), request.uri().path());
    let request_id = request.extensions().get::<RequestId>().cloned();

    let response = next.run(request).await;
    let status = response.status();

    let (mut parts, body) = response.into_parts();
    let mut problem = match parts.extensions.remove::<ProblemDetails>() {
        Some(problem) => problem,
        None if is_bare_error(status, &parts.headers) => {
            let text = axum::body::to_bytes(body, MAX_ERROR_BODY)
                .await
                .map(|b| String::from_utf8_lossy(&b).trim().to_string())
                .unwrap_or_default();
            let problem = ProblemDetails::from_status(status);
            if text.is_empty() {
                problem
            } else {
                problem.with_detail(text)
            }
        }
        None => return Response::from_parts(parts, body),
    };

    if problem.instance.is_none() {
        problem.instance = Some(occurrence);
    }
    if let Some(id) = request_id {
        let current = serde_json::Value::from(id.0);
        if let Some(previous) = problem.extensions.insert(TRACE_ID.to_string(), current.clone()) {
            if previous != current {
                problem
                    .extensions
                    .insert(DOWNSTREAM_TRACE_ID.to_string(), previous);
            }
        }
    }
    problem.extensions.insert(
        "timestamp".to_string(),
        chrono::Utc::now().to_rfc3339().into(),
    );

    let bytes = match serde_json::to_vec(&problem) {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::error!(error = %e, "failed to serialize problem details");
            return status.into_response();
        }
    };

    parts.headers.remove(header::CONTENT_LENGTH);
    parts
        .headers
        .insert(header::CONTENT_TYPE, HeaderValue::from_static(PROBLEM_JSON));
    parts.extensions.insert(problem);
    Response::from_parts(parts, Body::from(bytes))
}

fn is_bare_error(status: StatusCode, headers: &axum::http::HeaderMap) -> bool {
    if !(status.is_client_error() || status.is_server_error()) {
        return false;
    }
    match headers.get(header::CONTENT_TYPE).and_then(|v| v.to_str().ok()) {
        None => true,
        Some(content_type) => content_type.starts_with("text/plain"),
    }
}
