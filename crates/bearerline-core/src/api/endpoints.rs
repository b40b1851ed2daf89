//! Auth endpoints of the backend and the refresh-based renewal operation.

use futures::future::{BoxFuture, FutureExt};
use reqwest::Response;
use serde::de::DeserializeOwned;

use crate::auth::{CredentialSet, TokenResponse};

use super::renewal::RenewCredentials;
use super::request::ApiRequest;
use super::transport::Transport;
use super::ApiError;

pub const SIGN_IN_PATH: &str = "/auth/token";
pub const REFRESH_PATH: &str = "/auth/refresh";
pub const SIGN_OUT_PATH: &str = "/auth/logout";
pub const SIGN_OUT_ALL_PATH: &str = "/auth/logout/all";
pub const CURRENT_PRINCIPAL_PATH: &str = "/auth/me";

/// Sign-in request: form-encoded credentials, never augmented.
pub fn sign_in_request(username: &str, password: &str) -> ApiRequest {
    ApiRequest::post(SIGN_IN_PATH)
        .form([("username", username), ("password", password)])
        .skip_auth()
}

/// Refresh request: the refresh token rides in the cookie jar.
pub fn refresh_request() -> ApiRequest {
    ApiRequest::post(REFRESH_PATH).skip_auth()
}

/// Decode a JSON body, keeping the URL for the error message.
pub async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, ApiError> {
    let url = response.url().to_string();
    let text = response.text().await?;
    serde_json::from_str(&text).map_err(|source| ApiError::Decode { url, source })
}

/// Renewal through the backend's refresh endpoint.
///
/// Goes straight to the transport: the refresh call is neither augmented nor
/// itself subject to renewal.
#[derive(Clone)]
pub struct RefreshEndpoint {
    transport: Transport,
}

impl RefreshEndpoint {
    pub fn new(transport: Transport) -> Self {
        Self { transport }
    }

    pub async fn refresh(&self) -> Result<CredentialSet, ApiError> {
        let response = self.transport.send(&refresh_request()).await?;
        let token: TokenResponse = decode(response).await?;
        Ok(token.into())
    }
}

impl RenewCredentials for RefreshEndpoint {
    fn renew(&self) -> BoxFuture<'_, Result<CredentialSet, ApiError>> {
        self.refresh().boxed()
    }
}
