//! Credential state for the active session.
//!
//! This module provides:
//! - `CredentialSet`: the bearer token plus the principal it belongs to
//! - `CredentialStore`: in-memory cache with a durable write-through mirror
//! - `DurableMedium`: session file, OS keychain or process memory backends
//! - `SessionJar`: cookie jar whose persistent cookies are saved with the store

pub mod cookies;
pub mod credentials;
pub mod medium;
pub mod store;

pub use cookies::SessionJar;
pub use credentials::{CredentialSet, Principal, TokenResponse};
pub use medium::{DurableMedium, FileMedium, KeyringMedium, MemoryMedium, StorageError};
pub use store::{CredentialStore, STORAGE_KEY};
