use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, warn};

use super::cookies::SavedCookie;
use super::credentials::CredentialSet;
use super::medium::{DurableMedium, MemoryMedium, StorageError};

/// Namespace key of the durable record
pub const STORAGE_KEY: &str = "bearerline-auth-tokens";

/// Suffix of the companion record holding the session's persistent cookies
const COOKIE_KEY_SUFFIX: &str = "-cookies";

struct StoreInner {
    cache: RwLock<Option<CredentialSet>>,
    medium: Box<dyn DurableMedium>,
    key: String,
}

/// Holds the active credential set, mirrored to a durable medium.
///
/// Clones share the same cache. The in-memory value is authoritative; the
/// medium is only consulted while the cache is empty.
#[derive(Clone)]
pub struct CredentialStore {
    inner: Arc<StoreInner>,
}

impl CredentialStore {
    pub fn new(medium: impl DurableMedium + 'static) -> Self {
        Self::with_key(medium, STORAGE_KEY)
    }

    pub fn with_key(medium: impl DurableMedium + 'static, key: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(StoreInner {
                cache: RwLock::new(None),
                medium: Box::new(medium),
                key: key.into(),
            }),
        }
    }

    /// Store with no durable mirror beyond process memory.
    pub fn in_memory() -> Self {
        Self::new(MemoryMedium::new())
    }

    /// Current credential set, loading it from the medium on a cold cache.
    /// Missing, unreadable or corrupt records all read as `None`, and so
    /// does a set whose access token is empty.
    pub fn read(&self) -> Option<CredentialSet> {
        self.read_any().filter(CredentialSet::is_usable)
    }

    fn read_any(&self) -> Option<CredentialSet> {
        if let Some(cached) = self.inner.cache.read().as_ref() {
            return Some(cached.clone());
        }

        let loaded = self.load_durable()?;
        let mut cache = self.inner.cache.write();
        // A write may have landed while the medium was being read
        if let Some(current) = cache.as_ref() {
            return Some(current.clone());
        }
        *cache = Some(loaded.clone());
        Some(loaded)
    }

    pub fn access_token(&self) -> Option<String> {
        self.read()
            .and_then(|creds| creds.token().map(str::to_string))
    }

    pub fn is_authenticated(&self) -> bool {
        self.access_token().is_some()
    }

    /// Replace the credential set. The durable write is best-effort and never
    /// rolls back the in-memory value.
    pub fn write(&self, credentials: CredentialSet) {
        *self.inner.cache.write() = Some(credentials.clone());

        if let Err(e) = self.save_durable(&credentials) {
            warn!(error = %e, "Failed to persist credentials");
        }
    }

    /// Forget the credential set and the session cookies saved with it.
    pub fn clear(&self) {
        *self.inner.cache.write() = None;
        if let Err(e) = self.inner.medium.remove(&self.inner.key) {
            warn!(error = %e, "Failed to remove persisted credentials");
        }
        if let Err(e) = self.inner.medium.remove(&self.cookie_key()) {
            warn!(error = %e, "Failed to remove persisted cookies");
        }
    }

    /// Persistent cookies saved for this session. Unreadable records read as
    /// empty.
    pub(crate) fn saved_cookies(&self) -> Vec<SavedCookie> {
        let raw = match self.inner.medium.load(&self.cookie_key()) {
            Ok(Some(raw)) => raw,
            Ok(None) => return Vec::new(),
            Err(e) => {
                warn!(error = %e, "Durable cookie storage unavailable");
                return Vec::new();
            }
        };
        serde_json::from_str(&raw).unwrap_or_else(|e| {
            warn!(error = %e, "Discarding corrupt cookie record");
            Vec::new()
        })
    }

    pub(crate) fn save_cookies(&self, cookies: &[SavedCookie]) {
        let key = self.cookie_key();
        let result = if cookies.is_empty() {
            self.inner.medium.remove(&key)
        } else {
            serde_json::to_string(cookies)
                .map_err(StorageError::from)
                .and_then(|contents| self.inner.medium.save(&key, &contents))
        };
        if let Err(e) = result {
            warn!(error = %e, "Failed to persist cookies");
        }
    }

    fn cookie_key(&self) -> String {
        format!("{}{}", self.inner.key, COOKIE_KEY_SUFFIX)
    }

    /// The durable record is the JSON-encoded credential set.
    fn save_durable(&self, credentials: &CredentialSet) -> Result<(), StorageError> {
        let contents = serde_json::to_string(credentials)?;
        self.inner.medium.save(&self.inner.key, &contents)
    }

    fn load_durable(&self) -> Option<CredentialSet> {
        let raw = match self.inner.medium.load(&self.inner.key) {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                warn!(error = %e, "Durable credential storage unavailable");
                return None;
            }
        };

        match serde_json::from_str::<CredentialSet>(&raw) {
            Ok(credentials) => {
                debug!("Credentials restored from durable storage");
                Some(credentials)
            }
            Err(e) => {
                warn!(error = %e, "Discarding corrupt durable credential record");
                if let Err(e) = self.inner.medium.remove(&self.inner.key) {
                    debug!(error = %e, "Failed to remove corrupt record");
                }
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::credentials::Principal;
    use crate::auth::medium::FileMedium;

    /// Medium whose every operation fails, like a locked keychain.
    struct BrokenMedium;

    impl DurableMedium for BrokenMedium {
        fn load(&self, _key: &str) -> Result<Option<String>, StorageError> {
            Err(std::io::Error::other("locked").into())
        }

        fn save(&self, _key: &str, _value: &str) -> Result<(), StorageError> {
            Err(std::io::Error::other("quota exceeded").into())
        }

        fn remove(&self, _key: &str) -> Result<(), StorageError> {
            Err(std::io::Error::other("locked").into())
        }
    }

    fn sample() -> CredentialSet {
        CredentialSet {
            access_token: "access-1".to_string(),
            token_type: Some("bearer".to_string()),
            principal: Some(Principal {
                id: 42,
                display_name: "park".to_string(),
                role: "USER".to_string(),
            }),
        }
    }

    #[test]
    fn test_write_then_read_round_trips() {
        let store = CredentialStore::in_memory();
        store.write(sample());
        assert_eq!(store.read(), Some(sample()));
        assert_eq!(store.access_token().as_deref(), Some("access-1"));
    }

    #[test]
    fn test_clear_then_read_is_absent() {
        let store = CredentialStore::in_memory();
        store.write(sample());
        store.clear();
        assert_eq!(store.read(), None);
        assert!(!store.is_authenticated());
    }

    #[test]
    fn test_empty_access_token_reads_as_absent() {
        let store = CredentialStore::in_memory();
        store.write(CredentialSet::new(""));
        assert_eq!(store.read(), None);
        assert_eq!(store.access_token(), None);
        assert!(!store.is_authenticated());
    }

    #[test]
    fn test_clear_removes_saved_cookies() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = CredentialStore::new(FileMedium::new(dir.path()));
        store.write(sample());
        store.save_cookies(&[SavedCookie {
            url: "http://localhost:8000/api/auth/token".to_string(),
            header: "refresh_token=r1; Max-Age=600; Path=/".to_string(),
            expires_at: None,
        }]);

        let restarted = CredentialStore::new(FileMedium::new(dir.path()));
        assert_eq!(restarted.saved_cookies().len(), 1);

        restarted.clear();
        assert!(store.saved_cookies().is_empty());
        assert!(CredentialStore::new(FileMedium::new(dir.path())).read().is_none());
    }

    #[test]
    fn test_durable_record_is_the_credential_set() {
        let medium = MemoryMedium::new();
        medium
            .save(
                STORAGE_KEY,
                r#"{"accessToken":"a1","tokenType":"bearer","user":{"userId":42,"name":"park","userRole":"USER"}}"#,
            )
            .expect("seed");

        let store = CredentialStore::new(medium);
        let mut expected = sample();
        expected.access_token = "a1".to_string();
        assert_eq!(store.read(), Some(expected));
    }

    #[test]
    fn test_cold_cache_loads_from_file() {
        let dir = tempfile::tempdir().expect("tempdir");

        let first = CredentialStore::new(FileMedium::new(dir.path()));
        first.write(sample());

        // A fresh store simulates a restart: empty cache, same medium
        let second = CredentialStore::new(FileMedium::new(dir.path()));
        assert_eq!(second.read(), Some(sample()));
    }

    #[test]
    fn test_corrupt_record_reads_as_absent_and_is_removed() {
        let dir = tempfile::tempdir().expect("tempdir");
        let medium = FileMedium::new(dir.path());
        medium.save(STORAGE_KEY, "{not json").expect("seed corrupt record");

        let store = CredentialStore::new(FileMedium::new(dir.path()));
        assert_eq!(store.read(), None);
        assert!(medium.load(STORAGE_KEY).expect("load").is_none());
    }

    #[test]
    fn test_non_string_token_is_corrupt() {
        let medium = MemoryMedium::new();
        medium
            .save(STORAGE_KEY, r#"{"accessToken":17}"#)
            .expect("seed");
        let store = CredentialStore::new(medium);
        assert_eq!(store.read(), None);
    }

    #[test]
    fn test_broken_medium_never_fails_callers() {
        let store = CredentialStore::new(BrokenMedium);
        assert_eq!(store.read(), None);

        // Durable write fails, cache still holds the new value
        store.write(sample());
        assert_eq!(store.read(), Some(sample()));

        store.clear();
        assert_eq!(store.read(), None);
    }

    #[test]
    fn test_clones_share_state() {
        let store = CredentialStore::in_memory();
        let clone = store.clone();
        store.write(sample());
        assert_eq!(clone.access_token().as_deref(), Some("access-1"));
        clone.clear();
        assert!(store.read().is_none());
    }
}
