//! Replayable request descriptions.
//!
//! `reqwest::Request` cannot always be cloned, so requests are described by
//! value and only turned into a reqwest request at send time. The same
//! description can then be sent a second time after renewal.

use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION};
use reqwest::Method;
use serde::Serialize;
use tracing::warn;

use super::ApiError;

/// Scheme prefix of the authorization header
const BEARER_PREFIX: &str = "Bearer ";

#[derive(Debug, Clone, PartialEq)]
pub enum RequestBody {
    Json(serde_json::Value),
    Form(Vec<(String, String)>),
}

#[derive(Debug, Clone)]
pub struct ApiRequest {
    method: Method,
    path: String,
    headers: HeaderMap,
    body: Option<RequestBody>,
    skip_auth: bool,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            headers: HeaderMap::new(),
            body: None,
            skip_auth: false,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn json<B: Serialize + ?Sized>(mut self, body: &B) -> Result<Self, ApiError> {
        let value = serde_json::to_value(body).map_err(ApiError::Encode)?;
        self.body = Some(RequestBody::Json(value));
        Ok(self)
    }

    pub fn form<K: Into<String>, V: Into<String>>(
        mut self,
        pairs: impl IntoIterator<Item = (K, V)>,
    ) -> Self {
        let pairs = pairs
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        self.body = Some(RequestBody::Form(pairs));
        self
    }

    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Exclude this request from bearer augmentation and from renewal.
    /// Used by the calls that establish or refresh the credential.
    pub fn skip_auth(mut self) -> Self {
        self.skip_auth = true;
        self
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn body(&self) -> Option<&RequestBody> {
        self.body.as_ref()
    }

    pub fn skips_auth(&self) -> bool {
        self.skip_auth
    }

    /// Set `Authorization: Bearer <token>`, replacing any previous value.
    /// A token that is not a valid header value leaves the request as is.
    pub fn set_bearer(&mut self, token: &str) -> bool {
        match HeaderValue::from_str(&format!("{}{}", BEARER_PREFIX, token)) {
            Ok(mut value) => {
                value.set_sensitive(true);
                self.headers.insert(AUTHORIZATION, value);
                true
            }
            Err(e) => {
                warn!(error = %e, "Access token is not a valid header value, not attaching it");
                false
            }
        }
    }

    /// Token carried in the authorization header, if it uses the bearer scheme.
    pub fn bearer_token(&self) -> Option<&str> {
        self.headers
            .get(AUTHORIZATION)?
            .to_str()
            .ok()?
            .strip_prefix(BEARER_PREFIX)
    }
}

/// One send of an original request.
///
/// Attempts are never mutated: the replay after renewal is a new attempt
/// derived from the first, which keeps the one-replay limit visible in the
/// type instead of in a flag on shared request state.
#[derive(Debug, Clone)]
pub struct Attempt {
    request: ApiRequest,
    renewed: bool,
}

impl Attempt {
    pub fn first(request: ApiRequest) -> Self {
        Self {
            request,
            renewed: false,
        }
    }

    pub fn request(&self) -> &ApiRequest {
        &self.request
    }

    /// True once this request has already been replayed after a renewal.
    pub fn is_renewed(&self) -> bool {
        self.renewed
    }

    /// Replay of this attempt. With `Some(token)` the saved request's
    /// authorization header is overwritten; with `None` it is resent as is.
    pub fn replay(&self, token: Option<&str>) -> Self {
        let mut request = self.request.clone();
        if let Some(token) = token {
            request.set_bearer(token);
        }
        Self {
            request,
            renewed: true,
        }
    }
}
