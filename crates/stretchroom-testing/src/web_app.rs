//! In-process service hosts for integration tests.

use std::net::{Ipv4Addr, SocketAddr};

use reqwest::Url;
use stretchroom_infrastructure::{ConfiguredApp, HostError};
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

#[derive(Debug, Error)]
pub enum TestHostError {
    #[error(transparent)]
    Host(#[from] HostError),

    #[error("failed to bind test listener: {0}")]
    Bind(#[from] std::io::Error),

    #[error("invalid url '{url}': {reason}")]
    Url { url: String, reason: String },
}

pub(crate) fn parse_url(raw: &str) -> Result<Url, TestHostError> {
    Url::parse(raw).map_err(|e| TestHostError::Url {
        url: raw.to_string(),
        reason: e.to_string(),
    })
}

/// A [`ConfiguredApp`] served on a free localhost port.
///
/// The server shuts down when the value is dropped.
#[derive(Debug)]
pub struct TestWebApplication {
    addr: SocketAddr,
    base_address: String,
    shutdown: Option<oneshot::Sender<()>>,
    server: Option<JoinHandle<Result<(), HostError>>>,
}

impl TestWebApplication {
    /// Run the app's startup steps, then serve it in the background.
    pub async fn start(app: ConfiguredApp) -> Result<Self, TestHostError> {
        app.run_before_start().await?;

        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).await?;
        let addr = listener.local_addr()?;
        let base_address = app.info().base_address.clone();

        let (tx, rx) = oneshot::channel::<()>();
        let server = tokio::spawn(app.serve(listener, async {
            let _ = rx.await;
        }));
        tracing::debug!(addr = %addr, base = %base_address, "test host started");

        Ok(Self {
            addr,
            base_address,
            shutdown: Some(tx),
            server: Some(server),
        })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// `http://127.0.0.1:{port}/`.
    pub fn origin(&self) -> String {
        format!("http://{}/", self.addr)
    }

    /// The service root, including its base address.
    pub fn base_url(&self) -> String {
        let base = self.base_address.trim_matches('/');
        if base.is_empty() {
            self.origin()
        } else {
            format!("http://{}/{base}", self.addr)
        }
    }

    /// Stop serving and wait for hosted services to stop.
    pub async fn shutdown(mut self) -> Result<(), HostError> {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        match self.server.take() {
            Some(server) => server.await.unwrap_or_else(|e| {
                tracing::warn!(error = %e, "test host task failed");
                Ok(())
            }),
            None => Ok(()),
        }
    }
}

impl Drop for TestWebApplication {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{routing::get, Router};
    use stretchroom_infrastructure::{ServiceApiInfo, ServiceHost};

    fn app() -> ConfiguredApp {
        ServiceHost::builder(ServiceApiInfo::new("TestApp", "/test-app"))
            .routes(Router::new().route("/api/v1/test/ok", get(|| async { "ok" })))
            .build()
    }

    #[tokio::test]
    async fn test_serves_under_base_url() {
        let host = TestWebApplication::start(app()).await.unwrap();
        assert!(host.base_url().ends_with("/test-app"));

        let body = reqwest::get(format!("{}/api/v1/test/ok", host.base_url()))
            .await
            .unwrap()
            .text()
            .await
            .unwrap();
        assert_eq!(body, "ok");

        host.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_drop_stops_server() {
        let host = TestWebApplication::start(app()).await.unwrap();
        let url = format!("{}/service/ping", host.base_url());
        assert!(reqwest::get(&url).await.is_ok());

        drop(host);
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(1))
            .build()
            .unwrap();
        assert!(client.get(&url).send().await.is_err());
    }
}
