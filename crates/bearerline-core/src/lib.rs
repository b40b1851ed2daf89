//! Core library for bearerline.
//!
//! Authenticated access to a backend API: a credential store mirrored to
//! durable storage, bearer augmentation of outgoing requests, and
//! single-replay recovery from expired credentials with renewal shared
//! between concurrently failing requests.

pub mod api;
pub mod auth;
pub mod config;
pub mod session;

pub use api::{ApiClient, ApiError, ApiRequest, TransportCell, UnauthorizedSignal};
pub use auth::{CredentialSet, CredentialStore, Principal};
pub use config::{Config, StorageBackend};
pub use session::{ReauthNavigator, Session, SessionOptions};
