//! Authenticated API client.
//!
//! Every request goes through the same pipeline: bearer augmentation, send,
//! and on a 401 the renewal coordinator, which may replay the request once.

use std::sync::Arc;

use reqwest::Response;
use serde::{de::DeserializeOwned, Serialize};

use crate::auth::{CredentialSet, Principal, TokenResponse};

use super::augment::RequestAugmentor;
use super::endpoints::{
    decode, sign_in_request, CURRENT_PRINCIPAL_PATH, SIGN_OUT_ALL_PATH, SIGN_OUT_PATH,
};
use super::renewal::RenewalCoordinator;
use super::request::{ApiRequest, Attempt};
use super::transport::Transport;
use super::ApiError;

/// Clone is cheap - the transport, store and coordinator are shared.
#[derive(Clone)]
pub struct ApiClient {
    transport: Transport,
    augmentor: RequestAugmentor,
    coordinator: Arc<RenewalCoordinator>,
}

impl ApiClient {
    pub fn new(
        transport: Transport,
        augmentor: RequestAugmentor,
        coordinator: RenewalCoordinator,
    ) -> Self {
        Self {
            transport,
            augmentor,
            coordinator: Arc::new(coordinator),
        }
    }

    pub fn transport(&self) -> &Transport {
        &self.transport
    }

    /// Send a request through the full pipeline.
    pub async fn execute(&self, request: ApiRequest) -> Result<Response, ApiError> {
        let attempt = Attempt::first(self.augmentor.augment(request));
        match self.transport.send(attempt.request()).await {
            Ok(response) => Ok(response),
            Err(e) => {
                self.coordinator
                    .handle_failure(&self.transport, &attempt, e)
                    .await
            }
        }
    }

    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        let response = self.execute(ApiRequest::get(path)).await?;
        decode(response).await
    }

    pub async fn post<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ApiError> {
        let response = self.execute(ApiRequest::post(path).json(body)?).await?;
        decode(response).await
    }

    // ===== Auth endpoints =====

    /// Exchange username and password for a credential set. Does not touch
    /// the store; the session decides what to do with the result.
    pub async fn sign_in(&self, username: &str, password: &str) -> Result<CredentialSet, ApiError> {
        let response = self.execute(sign_in_request(username, password)).await?;
        let token: TokenResponse = decode(response).await?;
        Ok(token.into())
    }

    pub async fn sign_out(&self) -> Result<(), ApiError> {
        self.execute(ApiRequest::post(SIGN_OUT_PATH)).await?;
        Ok(())
    }

    /// Revoke every session of the current principal, not only this one.
    pub async fn sign_out_all(&self) -> Result<(), ApiError> {
        self.execute(ApiRequest::post(SIGN_OUT_ALL_PATH)).await?;
        Ok(())
    }

    pub async fn current_principal(&self) -> Result<Principal, ApiError> {
        self.get(CURRENT_PRINCIPAL_PATH).await
    }
}
