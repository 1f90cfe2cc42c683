//! Base for typed HTTP clients of other services.
//!
//! [`ClientBase`] owns a `reqwest` client bound to one service URL. Every call
//! gets a request id, is logged on send and on receive, and is retried once
//! after a fixed delay when the transport fails. HTTP error statuses are not
//! transport failures; they come back as [`OperationResult::Failure`].
//!
//! ```no_run
//! use stretchroom_infrastructure::client::{append_path, ClientBase, OperationResult};
//! use stretchroom_infrastructure::ProblemDetails;
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let client = ClientBase::builder("AuthServiceClient")
//!     .from_url("http://localhost:8081/auth-service")
//!     .build()?;
//! let result: OperationResult<(), ProblemDetails> = client
//!     .get(|url| append_path(url, "service/healthz"), None)
//!     .await?;
//! assert!(result.is_success());
//! # Ok(())
//! # }
//! ```

mod result;
mod system;
mod token;

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::http::{header::AUTHORIZATION, HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use bytes::Bytes;
pub use reqwest::Url;
use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;
use tracing::Level;
use uuid::Uuid;

use crate::config::ClientConfiguration;
use crate::error::ApiError;
use crate::metrics::record_outbound_request;

pub use result::OperationResult;
pub use system::ServiceSystemClient;
pub use token::{
    current_authorization, propagate_authorization, ForwardedAuthorization, StaticToken,
    TokenResolver,
};

use result::{decode_json, decode_raw, decode_text, decode_unit};

/// Default time to wait for a response.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Errors raised by [`ClientBase`].
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("no service url has been set for {client}")]
    MissingBaseUrl { client: String },

    #[error("invalid service url '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("failed to build http client: {0}")]
    Build(#[source] reqwest::Error),

    #[error("{method} {url} failed after {attempts} attempt(s): {source}")]
    Transport {
        method: Method,
        url: String,
        attempts: usize,
        #[source]
        source: reqwest::Error,
    },

    #[error("failed to read response body: {0}")]
    Body(#[source] reqwest::Error),

    #[error("failed to serialize request body: {0}")]
    Serialize(#[source] serde_json::Error),

    #[error("failed to decode response body: {0}")]
    Decode(#[source] serde_json::Error),
}

impl From<ClientError> for ApiError {
    #[track_caller]
    fn from(error: ClientError) -> Self {
        ApiError::from_error(error, None)
    }
}

/// Fixed-delay retry schedule for transport failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    delays: Vec<Duration>,
}

impl RetryPolicy {
    /// Retry once per listed delay.
    pub fn new(delays: Vec<Duration>) -> Self {
        Self { delays }
    }

    /// Retry once after `delay`.
    pub fn fixed(delay: Duration) -> Self {
        Self::new(vec![delay])
    }

    /// Never retry.
    pub fn none() -> Self {
        Self::new(Vec::new())
    }

    pub fn attempts(&self) -> usize {
        self.delays.len() + 1
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::fixed(Duration::from_secs(1))
    }
}

/// Only connect failures and timeouts are worth another attempt.
fn is_retryable(error: &reqwest::Error) -> bool {
    error.is_connect() || error.is_timeout()
}

/// Append `/`-separated segments to the URL path.
pub fn append_path(url: &mut Url, path: &str) {
    if let Ok(mut segments) = url.path_segments_mut() {
        segments
            .pop_if_empty()
            .extend(path.split('/').filter(|s| !s.is_empty()));
    }
}

/// Append a query pair.
pub fn append_query(url: &mut Url, key: &str, value: &str) {
    url.query_pairs_mut().append_pair(key, value);
}

type UrlResolver = Box<dyn FnOnce() -> String + Send>;

/// Builder for [`ClientBase`].
pub struct ClientBaseBuilder {
    name: String,
    base_url: Option<UrlResolver>,
    timeout: Duration,
    retry: RetryPolicy,
    token_resolver: Option<Arc<dyn TokenResolver>>,
    default_headers: HeaderMap,
}

impl ClientBaseBuilder {
    /// Use a fixed base URL.
    pub fn from_url(self, url: impl Into<String>) -> Self {
        let url = url.into();
        self.with_base_url_resolver(move || url)
    }

    /// Use the URL from a [`ClientConfiguration`].
    pub fn from_configuration(self, configuration: &ClientConfiguration) -> Self {
        self.from_url(configuration.service_url.clone())
    }

    /// Compute the base URL lazily when the client is built.
    pub fn with_base_url_resolver(mut self, resolver: impl FnOnce() -> String + Send + 'static) -> Self {
        self.base_url = Some(Box::new(resolver));
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Set `Authorization` on every request from `resolver`.
    pub fn with_token_resolver(mut self, resolver: impl TokenResolver + 'static) -> Self {
        self.token_resolver = Some(Arc::new(resolver));
        self
    }

    pub fn with_default_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.default_headers.insert(name, value);
        self
    }

    pub fn build(self) -> Result<ClientBase, ClientError> {
        let resolver = self.base_url.ok_or_else(|| ClientError::MissingBaseUrl {
            client: self.name.clone(),
        })?;
        let raw = resolver();
        let base_url = Url::parse(&raw).map_err(|e| ClientError::InvalidUrl {
            url: raw.clone(),
            reason: e.to_string(),
        })?;
        if base_url.cannot_be_a_base() {
            return Err(ClientError::InvalidUrl {
                url: raw,
                reason: "not an absolute http url".to_string(),
            });
        }

        let http = reqwest::Client::builder()
            .timeout(self.timeout)
            .build()
            .map_err(ClientError::Build)?;

        Ok(ClientBase {
            name: self.name,
            base_url,
            http,
            retry: self.retry,
            token_resolver: self.token_resolver,
            default_headers: self.default_headers,
        })
    }
}

/// Shared machinery for typed service clients.
#[derive(Clone)]
pub struct ClientBase {
    name: String,
    base_url: Url,
    http: reqwest::Client,
    retry: RetryPolicy,
    token_resolver: Option<Arc<dyn TokenResolver>>,
    default_headers: HeaderMap,
}

impl std::fmt::Debug for ClientBase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientBase")
            .field("name", &self.name)
            .field("base_url", &self.base_url.as_str())
            .field("retry", &self.retry)
            .field("token_resolver", &self.token_resolver.is_some())
            .finish()
    }
}

/// Request id for outbound calls: UUID v7, uppercase, without hyphens.
fn outbound_request_id() -> String {
    Uuid::now_v7().simple().to_string().to_uppercase()
}

impl ClientBase {
    /// Start building a client. `name` labels logs and metrics.
    pub fn builder(name: impl Into<String>) -> ClientBaseBuilder {
        ClientBaseBuilder {
            name: name.into(),
            base_url: None,
            timeout: DEFAULT_TIMEOUT,
            retry: RetryPolicy::default(),
            token_resolver: None,
            default_headers: HeaderMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    async fn headers(&self, extra: Option<HeaderMap>) -> HeaderMap {
        let mut headers = self.default_headers.clone();
        if let Some(resolver) = &self.token_resolver {
            if let Some(token) = resolver.resolve().await {
                match HeaderValue::from_str(&token) {
                    Ok(value) => {
                        headers.insert(AUTHORIZATION, value);
                    }
                    Err(e) => tracing::warn!(client = %self.name, error = %e, "token is not a valid header value"),
                }
            }
        }
        if let Some(extra) = extra {
            headers.extend(extra);
        }
        headers
    }

    /// Send one request and return the status and body.
    async fn send(
        &self,
        method: Method,
        configure: impl FnOnce(&mut Url),
        body: Option<Vec<u8>>,
        extra: Option<HeaderMap>,
    ) -> Result<(StatusCode, Bytes), ClientError> {
        let mut url = self.base_url.clone();
        configure(&mut url);
        let mut headers = self.headers(extra).await;
        if body.is_some() {
            headers
                .entry(axum::http::header::CONTENT_TYPE)
                .or_insert(HeaderValue::from_static("application/json"));
        }

        let id = outbound_request_id();
        match &body {
            Some(body) if tracing::enabled!(Level::DEBUG) => {
                tracing::debug!(client = %self.name, "[Send {id}] {method} {url} {}", String::from_utf8_lossy(body));
            }
            _ => tracing::info!(client = %self.name, "[Send {id}] {method} {url}"),
        }

        let start = Instant::now();
        let response = self.send_with_retry(&method, &url, &headers, body).await?;
        let status = response.status();
        let bytes = response.bytes().await.map_err(ClientError::Body)?;
        let elapsed = start.elapsed();

        tracing::info!(
            client = %self.name,
            "[Receive {id}] {method} {url} {} for {}ms",
            status.as_u16(),
            elapsed.as_millis()
        );
        if tracing::enabled!(Level::DEBUG) && !bytes.is_empty() {
            tracing::debug!(client = %self.name, "[Receive {id}] body: {}", String::from_utf8_lossy(&bytes));
        }
        record_outbound_request(&self.name, method.as_str(), status.as_u16(), elapsed.as_secs_f64());

        Ok((status, bytes))
    }

    async fn send_with_retry(
        &self,
        method: &Method,
        url: &Url,
        headers: &HeaderMap,
        body: Option<Vec<u8>>,
    ) -> Result<reqwest::Response, ClientError> {
        let mut attempt = 0;
        loop {
            let mut request = self
                .http
                .request(method.clone(), url.clone())
                .headers(headers.clone());
            if let Some(body) = &body {
                request = request.body(body.clone());
            }

            match request.send().await {
                Ok(response) => return Ok(response),
                Err(source) => match self.retry.delays.get(attempt) {
                    Some(delay) if is_retryable(&source) => {
                        attempt += 1;
                        tracing::warn!(
                            client = %self.name,
                            error = %source,
                            retry = attempt,
                            delay_ms = delay.as_millis() as u64,
                            "{method} {url} failed, retrying"
                        );
                        tokio::time::sleep(*delay).await;
                    }
                    _ => {
                        return Err(ClientError::Transport {
                            method: method.clone(),
                            url: url.to_string(),
                            attempts: attempt + 1,
                            source,
                        })
                    }
                },
            }
        }
    }

    fn json_body<B: Serialize + ?Sized>(body: &B) -> Result<Vec<u8>, ClientError> {
        serde_json::to_vec(body).map_err(ClientError::Serialize)
    }

    /// `GET`, decoding a JSON body.
    pub async fn get_json<T, E>(
        &self,
        configure: impl FnOnce(&mut Url),
        headers: Option<HeaderMap>,
    ) -> Result<OperationResult<T, E>, ClientError>
    where
        T: DeserializeOwned,
        E: DeserializeOwned,
    {
        let (status, body) = self.send(Method::GET, configure, None, headers).await?;
        OperationResult::from_parts(status, body, decode_json)
    }

    /// `GET`, returning the body as text.
    pub async fn get_text<E>(
        &self,
        configure: impl FnOnce(&mut Url),
        headers: Option<HeaderMap>,
    ) -> Result<OperationResult<String, E>, ClientError>
    where
        E: DeserializeOwned,
    {
        let (status, body) = self.send(Method::GET, configure, None, headers).await?;
        OperationResult::from_parts(status, body, decode_text)
    }

    /// `GET`, status only.
    pub async fn get<E>(
        &self,
        configure: impl FnOnce(&mut Url),
        headers: Option<HeaderMap>,
    ) -> Result<OperationResult<(), E>, ClientError>
    where
        E: DeserializeOwned,
    {
        let (status, body) = self.send(Method::GET, configure, None, headers).await?;
        OperationResult::from_parts(status, body, decode_unit)
    }

    /// `GET`, returning the raw body bytes.
    pub async fn get_raw<E>(
        &self,
        configure: impl FnOnce(&mut Url),
        headers: Option<HeaderMap>,
    ) -> Result<OperationResult<Bytes, E>, ClientError>
    where
        E: DeserializeOwned,
    {
        let (status, body) = self.send(Method::GET, configure, None, headers).await?;
        OperationResult::from_parts(status, body, decode_raw)
    }

    /// `DELETE`, decoding a JSON body.
    pub async fn delete_json<T, E>(
        &self,
        configure: impl FnOnce(&mut Url),
        headers: Option<HeaderMap>,
    ) -> Result<OperationResult<T, E>, ClientError>
    where
        T: DeserializeOwned,
        E: DeserializeOwned,
    {
        let (status, body) = self.send(Method::DELETE, configure, None, headers).await?;
        OperationResult::from_parts(status, body, decode_json)
    }

    /// `DELETE`, status only.
    pub async fn delete<E>(
        &self,
        configure: impl FnOnce(&mut Url),
        headers: Option<HeaderMap>,
    ) -> Result<OperationResult<(), E>, ClientError>
    where
        E: DeserializeOwned,
    {
        let (status, body) = self.send(Method::DELETE, configure, None, headers).await?;
        OperationResult::from_parts(status, body, decode_unit)
    }

    /// `POST` a JSON body, decoding a JSON response.
    pub async fn post_json<B, T, E>(
        &self,
        configure: impl FnOnce(&mut Url),
        body: &B,
        headers: Option<HeaderMap>,
    ) -> Result<OperationResult<T, E>, ClientError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
        E: DeserializeOwned,
    {
        let body = Self::json_body(body)?;
        let (status, body) = self.send(Method::POST, configure, Some(body), headers).await?;
        OperationResult::from_parts(status, body, decode_json)
    }

    /// `POST` without a body, decoding a JSON response.
    pub async fn post_json_empty<T, E>(
        &self,
        configure: impl FnOnce(&mut Url),
        headers: Option<HeaderMap>,
    ) -> Result<OperationResult<T, E>, ClientError>
    where
        T: DeserializeOwned,
        E: DeserializeOwned,
    {
        let (status, body) = self.send(Method::POST, configure, None, headers).await?;
        OperationResult::from_parts(status, body, decode_json)
    }

    /// `POST` a JSON body, status only.
    pub async fn post<B, E>(
        &self,
        configure: impl FnOnce(&mut Url),
        body: &B,
        headers: Option<HeaderMap>,
    ) -> Result<OperationResult<(), E>, ClientError>
    where
        B: Serialize + ?Sized,
        E: DeserializeOwned,
    {
        let body = Self::json_body(body)?;
        let (status, body) = self.send(Method::POST, configure, Some(body), headers).await?;
        OperationResult::from_parts(status, body, decode_unit)
    }

    /// `POST` a raw body, status only.
    pub async fn post_raw<E>(
        &self,
        configure: impl FnOnce(&mut Url),
        body: Bytes,
        headers: Option<HeaderMap>,
    ) -> Result<OperationResult<(), E>, ClientError>
    where
        E: DeserializeOwned,
    {
        let mut headers = headers.unwrap_or_default();
        headers
            .entry(axum::http::header::CONTENT_TYPE)
            .or_insert(HeaderValue::from_static("application/octet-stream"));
        let (status, body) = self
            .send(Method::POST, configure, Some(body.to_vec()), Some(headers))
            .await?;
        OperationResult::from_parts(status, body, decode_unit)
    }

    /// `PUT` a JSON body, decoding a JSON response.
    pub async fn put_json<B, T, E>(
        &self,
        configure: impl FnOnce(&mut Url),
        body: &B,
        headers: Option<HeaderMap>,
    ) -> Result<OperationResult<T, E>, ClientError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
        E: DeserializeOwned,
    {
        let body = Self::json_body(body)?;
        let (status, body) = self.send(Method::PUT, configure, Some(body), headers).await?;
        OperationResult::from_parts(status, body, decode_json)
    }

    /// `PUT` a JSON body, status only.
    pub async fn put<B, E>(
        &self,
        configure: impl FnOnce(&mut Url),
        body: &B,
        headers: Option<HeaderMap>,
    ) -> Result<OperationResult<(), E>, ClientError>
    where
        B: Serialize + ?Sized,
        E: DeserializeOwned,
    {
        let body = Self::json_body(body)?;
        let (status, body) = self.send(Method::PUT, configure, Some(body), headers).await?;
        OperationResult::from_parts(status, body, decode_unit)
    }
}
