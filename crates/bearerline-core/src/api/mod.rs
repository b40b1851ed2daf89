//! Authenticated request pipeline.
//!
//! This module provides the `ApiClient` used for every backend call. A
//! request is described by an `ApiRequest`, augmented with the stored bearer
//! token, and sent through the shared `Transport`. A 401 hands the failed
//! `Attempt` to the `RenewalCoordinator`, which renews the credential through
//! the refresh endpoint and replays the request at most once.

pub mod augment;
pub mod client;
pub mod endpoints;
pub mod error;
pub mod renewal;
pub mod request;
pub mod transport;

pub use augment::RequestAugmentor;
pub use client::ApiClient;
pub use endpoints::RefreshEndpoint;
pub use error::ApiError;
pub use renewal::{RenewCredentials, RenewalCoordinator, UnauthorizedSignal};
pub use request::{ApiRequest, Attempt, RequestBody};
pub use transport::{ClientConfig, ClientOverrides, Transport, TransportCell, DEFAULT_BASE_URL};
