//! Request/response logging.
//!
//! Every request is logged on the way in and on the way out with its
//! [`RequestId`]. Bodies are logged at debug level unless the endpoint opted
//! out through [`BodyLoggingPolicy`]. Form bodies are never dumped.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use axum::{
    body::{Body, Bytes},
    extract::{Request, State},
    http::{header, HeaderMap, Method},
    middleware::Next,
    response::Response,
};
use http_body::Body as _;
use tracing::Level;

use crate::middleware::RequestId;

/// Bodies larger than this are not buffered for logging.
const MAX_LOGGED_BODY: u64 = 64 * 1024;

/// Endpoints whose bodies must not be logged, keyed by method and path.
#[derive(Debug, Clone, Default)]
pub struct BodyLoggingPolicy {
    skip_request: HashSet<(Method, String)>,
    skip_response: HashSet<(Method, String)>,
}

fn clean(path: &str) -> String {
    let trimmed = path.trim().trim_end_matches('/');
    if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{trimmed}")
    }
}

impl BodyLoggingPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn skip_request_body(mut self, method: Method, path: &str) -> Self {
        self.skip_request.insert((method, clean(path)));
        self
    }

    pub fn skip_response_body(mut self, method: Method, path: &str) -> Self {
        self.skip_response.insert((method, clean(path)));
        self
    }

    /// The same policy with every path prefixed by `base`.
    pub fn nested(&self, base: &str) -> Self {
        let base = base.trim_end_matches('/');
        let prefix = |set: &HashSet<(Method, String)>| {
            set.iter()
                .map(|(m, p)| (m.clone(), format!("{base}{p}")))
                .collect()
        };
        Self {
            skip_request: prefix(&self.skip_request),
            skip_response: prefix(&self.skip_response),
        }
    }

    pub fn logs_request_body(&self, method: &Method, path: &str) -> bool {
        !self.skip_request.contains(&(method.clone(), clean(path)))
    }

    pub fn logs_response_body(&self, method: &Method, path: &str) -> bool {
        !self.skip_response.contains(&(method.clone(), clean(path)))
    }
}

fn is_form(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| {
            ct.starts_with("multipart/form-data") || ct.starts_with("application/x-www-form-urlencoded")
        })
}

/// Buffer `body` when it is small enough, handing back an equivalent body.
async fn peek(body: Body) -> (Body, Option<Bytes>) {
    let small = body.size_hint().upper().is_some_and(|n| n <= MAX_LOGGED_BODY);
    if !small {
        return (body, None);
    }
    match axum::body::to_bytes(body, MAX_LOGGED_BODY as usize).await {
        Ok(bytes) => (Body::from(bytes.clone()), Some(bytes)),
        Err(e) => {
            tracing::warn!(error = %e, "failed to buffer body for logging");
            (Body::empty(), None)
        }
    }
}

fn describe(bytes: &Option<Bytes>) -> String {
    match bytes {
        Some(b) if b.is_empty() => "<empty>".to_string(),
        Some(b) => String::from_utf8_lossy(b).into_owned(),
        None => "<not buffered>".to_string(),
    }
}

/// Log the request and the response around `next`.
pub async fn log_requests(State(policy): State<Arc<BodyLoggingPolicy>>, request: Request, next: Next) -> Response {
    let started = Instant::now();
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let id = request
        .extensions()
        .get::<RequestId>()
        .map(|id| id.0.clone())
        .unwrap_or_default();
    let debug = tracing::enabled!(Level::DEBUG);

    tracing::info!("Request ==> {path} | id: {id}");

    let request = if debug && policy.logs_request_body(&method, &path) {
        if is_form(request.headers()) {
            tracing::debug!(method = %method, "Request body: FORM-DATA");
            request
        } else {
            let (parts, body) = request.into_parts();
            let (body, bytes) = peek(body).await;
            tracing::debug!(method = %method, "Request body: {}", describe(&bytes));
            Request::from_parts(parts, body)
        }
    } else {
        request
    };

    let response = next.run(request).await;
    let elapsed = started.elapsed().as_millis();
    let status = response.status().as_u16();

    let response = if debug && policy.logs_response_body(&method, &path) {
        let (parts, body) = response.into_parts();
        let (body, bytes) = peek(body).await;
        tracing::debug!(status, "Response body: {}", describe(&bytes));
        Response::from_parts(parts, body)
    } else {
        response
    };

    tracing::info!(status, "Response <== {path} | id: {id} | {elapsed}ms");
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{routing::post, Router};
    use axum_test::TestServer;

    #[test]
    fn test_policy_matches_method_and_path() {
        let policy = BodyLoggingPolicy::new()
            .skip_request_body(Method::PUT, "api/v1/test/command/")
            .skip_response_body(Method::GET, "/api/v1/test/command");

        assert!(!policy.logs_request_body(&Method::PUT, "/api/v1/test/command"));
        assert!(policy.logs_request_body(&Method::POST, "/api/v1/test/command"));
        assert!(!policy.logs_response_body(&Method::GET, "/api/v1/test/command"));
        assert!(policy.logs_response_body(&Method::GET, "/api/v1/test/json"));
    }

    #[test]
    fn test_nested_policy_prefixes_paths() {
        let policy = BodyLoggingPolicy::new()
            .skip_response_body(Method::GET, "/api/v1/test/command")
            .nested("/test-app");
        assert!(!policy.logs_response_body(&Method::GET, "/test-app/api/v1/test/command"));
        assert!(policy.logs_response_body(&Method::GET, "/api/v1/test/command"));
    }

    #[test]
    fn test_form_detection() {
        let mut headers = HeaderMap::new();
        assert!(!is_form(&headers));
        headers.insert(
            header::CONTENT_TYPE,
            "multipart/form-data; boundary=x".parse().unwrap(),
        );
        assert!(is_form(&headers));
    }

    #[tokio::test]
    async fn test_bodies_survive_logging() {
        let policy = Arc::new(BodyLoggingPolicy::new().skip_request_body(Method::POST, "/skip"));
        let app = Router::new()
            .route("/echo", post(|body: String| async move { body }))
            .route("/skip", post(|body: String| async move { body }))
            .layer(axum::middleware::from_fn_with_state(policy, log_requests));
        let server = TestServer::new(app).unwrap();

        server.post("/echo").text("hello").await.assert_text("hello");
        server.post("/skip").text("secret").await.assert_text("secret");
    }
}
