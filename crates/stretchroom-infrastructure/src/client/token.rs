//! Authorization values for outbound calls.

use async_trait::async_trait;
use axum::{
    extract::Request,
    http::{header::AUTHORIZATION, HeaderValue},
    middleware::Next,
    response::Response,
};

tokio::task_local! {
    static INCOMING_AUTHORIZATION: Option<HeaderValue>;
}

/// Supplies the `Authorization` header value for a client.
#[async_trait]
pub trait TokenResolver: Send + Sync {
    async fn resolve(&self) -> Option<String>;
}

/// Always the same value.
#[derive(Debug, Clone)]
pub struct StaticToken(pub String);

#[async_trait]
impl TokenResolver for StaticToken {
    async fn resolve(&self) -> Option<String> {
        Some(self.0.clone())
    }
}

/// The `Authorization` header of the request currently being served.
///
/// Only yields a value inside a request passing through
/// [`propagate_authorization`].
#[derive(Debug, Clone, Copy, Default)]
pub struct ForwardedAuthorization;

#[async_trait]
impl TokenResolver for ForwardedAuthorization {
    async fn resolve(&self) -> Option<String> {
        current_authorization()
    }
}

/// Authorization of the in-flight incoming request, if any.
pub fn current_authorization() -> Option<String> {
    INCOMING_AUTHORIZATION
        .try_with(|value| {
            value
                .as_ref()
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        })
        .ok()
        .flatten()
}

/// Make the incoming `Authorization` header visible to [`ForwardedAuthorization`].
pub async fn propagate_authorization(request: Request, next: Next) -> Response {
    let authorization = request.headers().get(AUTHORIZATION).cloned();
    INCOMING_AUTHORIZATION
        .scope(authorization, next.run(request))
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{routing::get, Router};
    use axum_test::TestServer;

    #[tokio::test]
    async fn test_static_token() {
        let token = StaticToken("Bearer x".to_string());
        assert_eq!(token.resolve().await.as_deref(), Some("Bearer x"));
    }

    #[tokio::test]
    async fn test_forwarded_outside_request_is_none() {
        assert_eq!(ForwardedAuthorization.resolve().await, None);
    }

    #[tokio::test]
    async fn test_forwarded_inside_request() {
        async fn handler() -> String {
            ForwardedAuthorization
                .resolve()
                .await
                .unwrap_or_else(|| "none".to_string())
        }
        let app = Router::new()
            .route("/", get(handler))
            .layer(axum::middleware::from_fn(propagate_authorization));
        let server = TestServer::new(app).unwrap();

        server
            .get("/")
            .add_header(AUTHORIZATION, HeaderValue::from_static("Bearer abc"))
            .await
            .assert_text("Bearer abc");
        server.get("/").await.assert_text("none");
    }
}
