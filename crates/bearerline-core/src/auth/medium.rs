//! Durable media backing the credential store.
//!
//! A medium stores opaque strings under a namespace key. The store treats
//! every medium failure as "no credential"; the error type exists so the
//! store can log what went wrong.

use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use keyring::Entry;
use parking_lot::Mutex;
use thiserror::Error;

/// Keychain service name for the keyring medium
const KEYRING_SERVICE: &str = "bearerline";

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Session file error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Keychain error: {0}")]
    Keyring(#[from] keyring::Error),

    #[error("Malformed durable record: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Write-through mirror for the in-memory credential cache.
pub trait DurableMedium: Send + Sync {
    /// Read the record stored under `key`; `Ok(None)` when there is none.
    fn load(&self, key: &str) -> Result<Option<String>, StorageError>;

    fn save(&self, key: &str, value: &str) -> Result<(), StorageError>;

    /// Remove the record; removing a missing record is not an error.
    fn remove(&self, key: &str) -> Result<(), StorageError>;
}

/// One JSON file per key inside a session directory.
pub struct FileMedium {
    dir: PathBuf,
}

impl FileMedium {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn record_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", key))
    }
}

impl DurableMedium for FileMedium {
    fn load(&self, key: &str) -> Result<Option<String>, StorageError> {
        match std::fs::read_to_string(self.record_path(key)) {
            Ok(contents) => Ok(Some(contents)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn save(&self, key: &str, value: &str) -> Result<(), StorageError> {
        std::fs::create_dir_all(&self.dir)?;
        std::fs::write(self.record_path(key), value)?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        match std::fs::remove_file(self.record_path(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// OS keychain entry, account name = namespace key.
pub struct KeyringMedium {
    service: String,
}

impl KeyringMedium {
    pub fn new() -> Self {
        Self::with_service(KEYRING_SERVICE)
    }

    pub fn with_service(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }
}

impl Default for KeyringMedium {
    fn default() -> Self {
        Self::new()
    }
}

impl DurableMedium for KeyringMedium {
    fn load(&self, key: &str) -> Result<Option<String>, StorageError> {
        let entry = Entry::new(&self.service, key)?;
        match entry.get_password() {
            Ok(value) => Ok(Some(value)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn save(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let entry = Entry::new(&self.service, key)?;
        entry.set_password(value)?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        let entry = Entry::new(&self.service, key)?;
        match entry.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Process-local medium. Nothing survives a restart.
#[derive(Default)]
pub struct MemoryMedium {
    records: Mutex<HashMap<String, String>>,
}

impl MemoryMedium {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DurableMedium for MemoryMedium {
    fn load(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.records.lock().get(key).cloned())
    }

    fn save(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.records.lock().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.records.lock().remove(key);
        Ok(())
    }
}
