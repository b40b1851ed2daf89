//! Application configuration management.
//!
//! This module handles loading and saving the application configuration:
//! API origin, request timeout, where the session is persisted and the
//! re-authentication entry path.
//!
//! Configuration is stored at `~/.config/bearerline/config.json`.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::api::ClientOverrides;
use crate::auth::{CredentialStore, FileMedium, KeyringMedium, MemoryMedium};

/// Application name used for config/cache directory paths
const APP_NAME: &str = "bearerline";

/// Config file name
const CONFIG_FILE: &str = "config.json";

/// Directory under the cache dir holding the session record
const SESSION_DIR: &str = "session";

/// Path the front end is sent to when the session cannot be recovered
pub const DEFAULT_REAUTH_PATH: &str = "/auth";

/// Where the credential set is mirrored between runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    File,
    Keyring,
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    pub api_base_url: Option<String>,
    pub timeout_secs: Option<u64>,
    pub reauth_path: Option<String>,
    #[serde(default)]
    pub storage: StorageBackend,
    pub last_username: Option<String>,
}

impl Config {
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        if path.exists() {
            let contents = std::fs::read_to_string(&path)?;
            Ok(serde_json::from_str(&contents)?)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self) -> Result<()> {
        let path = Self::config_path()?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    pub fn session_dir(&self) -> Result<PathBuf> {
        let cache_dir = dirs::cache_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find cache directory"))?;
        Ok(cache_dir.join(APP_NAME).join(SESSION_DIR))
    }

    pub fn reauth_path(&self) -> &str {
        self.reauth_path.as_deref().unwrap_or(DEFAULT_REAUTH_PATH)
    }

    /// Transport overrides for the configured values; unset keys keep the
    /// transport defaults.
    pub fn client_overrides(&self) -> ClientOverrides {
        ClientOverrides {
            base_url: self.api_base_url.clone(),
            timeout: self.timeout_secs.map(Duration::from_secs),
            ..Default::default()
        }
    }

    /// Credential store backed by the configured medium.
    pub fn credential_store(&self) -> Result<CredentialStore> {
        Ok(match self.storage {
            StorageBackend::File => CredentialStore::new(FileMedium::new(self.session_dir()?)),
            StorageBackend::Keyring => CredentialStore::new(KeyringMedium::new()),
            StorageBackend::Memory => CredentialStore::new(MemoryMedium::new()),
        })
    }
}
