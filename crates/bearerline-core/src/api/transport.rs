//! The process-wide HTTP transport.
//!
//! A `TransportCell` is created once at startup and handed to everything
//! that talks to the API. The first `get_client`/`create_client` call builds
//! the transport; every later call returns that same instance.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, Response, Url};
use tracing::debug;

use crate::auth::SessionJar;

use super::request::{ApiRequest, RequestBody};
use super::ApiError;

/// API origin the backend is served from
pub const DEFAULT_BASE_URL: &str = "http://localhost:8000/api";

/// HTTP request timeout in seconds.
const DEFAULT_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    pub base_url: String,
    pub timeout: Duration,
    /// Keep and forward cookies; the refresh token travels as a cookie.
    pub with_credentials: bool,
    pub headers: BTreeMap<String, String>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        let mut headers = BTreeMap::new();
        headers.insert("Content-Type".to_string(), "application/json".to_string());
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            with_credentials: true,
            headers,
        }
    }
}

/// Partial configuration applied over the defaults at construction.
#[derive(Debug, Clone, Default)]
pub struct ClientOverrides {
    pub base_url: Option<String>,
    pub timeout: Option<Duration>,
    pub with_credentials: Option<bool>,
    pub headers: BTreeMap<String, String>,
    /// Cookie jar to use instead of a fresh in-memory one.
    pub cookies: Option<Arc<SessionJar>>,
}

impl ClientConfig {
    /// Scalar keys are replaced, header maps are merged by key.
    pub fn merged(&self, overrides: ClientOverrides) -> Self {
        let mut headers = self.headers.clone();
        headers.extend(overrides.headers);
        Self {
            base_url: overrides.base_url.unwrap_or_else(|| self.base_url.clone()),
            timeout: overrides.timeout.unwrap_or(self.timeout),
            with_credentials: overrides.with_credentials.unwrap_or(self.with_credentials),
            headers,
        }
    }

    fn header_map(&self) -> Result<HeaderMap, ApiError> {
        let mut map = HeaderMap::new();
        for (name, value) in &self.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| ApiError::Config(format!("header name {:?}: {}", name, e)))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| ApiError::Config(format!("header {}: {}", name, e)))?;
            map.insert(name, value);
        }
        Ok(map)
    }
}

struct TransportInner {
    client: Client,
    config: ClientConfig,
}

/// HTTP client bound to one API origin.
/// Clone is cheap - clones share the connection pool and cookie jar.
#[derive(Clone)]
pub struct Transport {
    inner: Arc<TransportInner>,
}

impl Transport {
    pub fn new(config: ClientConfig) -> Result<Self, ApiError> {
        Self::with_cookies(config, None)
    }

    /// Like `new`, but keeps cookies in `jar` when credentials are enabled.
    pub fn with_cookies(config: ClientConfig, jar: Option<Arc<SessionJar>>) -> Result<Self, ApiError> {
        Url::parse(&config.base_url)
            .map_err(|e| ApiError::Config(format!("base URL {:?}: {}", config.base_url, e)))?;

        let mut builder = Client::builder()
            .timeout(config.timeout)
            .default_headers(config.header_map()?);
        builder = match jar {
            Some(jar) if config.with_credentials => builder.cookie_provider(jar),
            _ => builder.cookie_store(config.with_credentials),
        };
        let client = builder.build()?;

        Ok(Self {
            inner: Arc::new(TransportInner { client, config }),
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    /// True when both handles refer to the same underlying instance.
    pub fn same(a: &Transport, b: &Transport) -> bool {
        Arc::ptr_eq(&a.inner, &b.inner)
    }

    pub fn url(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.inner.config.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    /// Send the request exactly as described. Non-success statuses come
    /// back as `ApiError`; nothing is retried here.
    pub async fn send(&self, request: &ApiRequest) -> Result<Response, ApiError> {
        let url = self.url(request.path());

        let mut builder = self
            .inner
            .client
            .request(request.method().clone(), &url)
            .headers(request.headers().clone());

        builder = match request.body() {
            Some(RequestBody::Json(value)) => builder.json(value),
            Some(RequestBody::Form(pairs)) => builder.form(pairs),
            None => builder,
        };

        debug!(method = %request.method(), url = %url, "Sending request");
        let response = builder.send().await?;
        Self::check_response(response).await
    }

    /// Check if response is successful, returning an error with body if not.
    async fn check_response(response: Response) -> Result<Response, ApiError> {
        if response.status().is_success() {
            Ok(response)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            debug!(status = status.as_u16(), "Request failed");
            Err(ApiError::from_status(status, &body))
        }
    }
}

/// Holder of the one `Transport` per process.
pub struct TransportCell {
    defaults: ClientConfig,
    slot: Mutex<Option<Transport>>,
}

impl TransportCell {
    pub fn new() -> Self {
        Self::with_defaults(ClientConfig::default())
    }

    pub fn with_defaults(defaults: ClientConfig) -> Self {
        Self {
            defaults,
            slot: Mutex::new(None),
        }
    }

    /// Build the transport with `overrides` merged over the defaults, unless
    /// it already exists, in which case the existing one is returned and the
    /// overrides are ignored.
    pub fn create_client(&self, mut overrides: ClientOverrides) -> Result<Transport, ApiError> {
        let mut slot = self.slot.lock();
        if let Some(existing) = slot.as_ref() {
            return Ok(existing.clone());
        }

        let jar = overrides.cookies.take();
        let transport = Transport::with_cookies(self.defaults.merged(overrides), jar)?;
        debug!(base_url = %transport.config().base_url, "Transport created");
        *slot = Some(transport.clone());
        Ok(transport)
    }

    pub fn get_client(&self) -> Result<Transport, ApiError> {
        self.create_client(ClientOverrides::default())
    }

    /// Drop the current instance; the next access builds a new one.
    pub fn reset(&self) {
        self.slot.lock().take();
    }
}

impl Default for TransportCell {
    fn default() -> Self {
        Self::new()
    }
}
