//! Route calls aimed at virtual service addresses to in-process hosts.
//!
//! A service under test is usually configured with the URL of the services it
//! calls, for example `http://auth-service:80/auth-service`. Register a factory
//! for that origin and [`TestRoutingHandler::resolve`] rewrites the URL to a
//! [`TestWebApplication`] started on first use.

use std::collections::HashMap;

use reqwest::Url;
use stretchroom_infrastructure::ConfiguredApp;
use tokio::sync::Mutex;

use crate::web_app::{parse_url, TestHostError, TestWebApplication};

type AppFactory = Box<dyn Fn() -> ConfiguredApp + Send + Sync>;

/// `scheme://host:port/` for a URL, with the scheme's default port filled in.
fn origin_key(url: &Url) -> Option<String> {
    let host = url.host_str()?;
    let port = url.port_or_known_default()?;
    Some(format!("{}://{}:{}/", url.scheme(), host, port))
}

#[derive(Default)]
pub struct TestRoutingHandler {
    routes: HashMap<String, AppFactory>,
    hosts: Mutex<HashMap<String, TestWebApplication>>,
}

impl std::fmt::Debug for TestRoutingHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TestRoutingHandler")
            .field("routes", &self.routes.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl TestRoutingHandler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `origin` with the app built by `factory`.
    pub fn route(
        mut self,
        origin: &str,
        factory: impl Fn() -> ConfiguredApp + Send + Sync + 'static,
    ) -> Result<Self, TestHostError> {
        let url = parse_url(origin)?;
        let key = origin_key(&url).ok_or_else(|| TestHostError::Url {
            url: origin.to_string(),
            reason: "no host".to_string(),
        })?;
        self.routes.insert(key, Box::new(factory));
        Ok(self)
    }

    /// Rewrite `url` to the local host serving its origin.
    ///
    /// URLs whose origin has no route are returned unchanged.
    pub async fn resolve(&self, url: &str) -> Result<String, TestHostError> {
        let mut parsed = parse_url(url)?;
        let Some(key) = origin_key(&parsed) else {
            return Ok(url.to_string());
        };
        let Some(factory) = self.routes.get(&key) else {
            return Ok(url.to_string());
        };

        let mut hosts = self.hosts.lock().await;
        let addr = match hosts.get(&key) {
            Some(host) => host.addr(),
            None => {
                tracing::debug!(origin = %key, "starting routed test host");
                let host = TestWebApplication::start(factory()).await?;
                let addr = host.addr();
                hosts.insert(key, host);
                addr
            }
        };

        if parsed.set_scheme("http").is_err()
            || parsed.set_ip_host(addr.ip()).is_err()
            || parsed.set_port(Some(addr.port())).is_err()
        {
            return Err(TestHostError::Url {
                url: url.to_string(),
                reason: "cannot rewrite to the local host".to_string(),
            });
        }
        Ok(parsed.to_string())
    }

    /// Number of hosts started so far.
    pub async fn started(&self) -> usize {
        self.hosts.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{routing::get, Router};
    use stretchroom_infrastructure::{ServiceApiInfo, ServiceHost};

    fn auth_app() -> ConfiguredApp {
        ServiceHost::builder(ServiceApiInfo::new("AuthService", "/auth-service"))
            .routes(Router::new().route("/api/v1/auth/hello", get(|| async { "hello" })))
            .build()
    }

    #[tokio::test]
    async fn test_routes_virtual_origin_lazily() {
        let handler = TestRoutingHandler::new()
            .route("http://auth-service/", auth_app)
            .unwrap();
        assert_eq!(handler.started().await, 0);

        let url = handler
            .resolve("http://auth-service:80/auth-service/api/v1/auth/hello?x=1")
            .await
            .unwrap();
        assert!(url.starts_with("http://127.0.0.1:"));
        assert!(url.ends_with("/auth-service/api/v1/auth/hello?x=1"));
        assert_eq!(reqwest::get(&url).await.unwrap().text().await.unwrap(), "hello");

        handler
            .resolve("http://auth-service/auth-service/service/ping")
            .await
            .unwrap();
        assert_eq!(handler.started().await, 1);
    }

    #[tokio::test]
    async fn test_unrouted_urls_pass_through() {
        let handler = TestRoutingHandler::new();
        let url = "https://example.com/api";
        assert_eq!(handler.resolve(url).await.unwrap(), url);
    }
}
