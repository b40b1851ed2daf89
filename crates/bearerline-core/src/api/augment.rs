use crate::auth::CredentialStore;

use super::request::ApiRequest;

/// Attaches the stored access token to outgoing requests.
#[derive(Clone)]
pub struct RequestAugmentor {
    store: CredentialStore,
}

impl RequestAugmentor {
    pub fn new(store: CredentialStore) -> Self {
        Self { store }
    }

    /// Never fails: without a token the request goes out unauthenticated and
    /// the server decides. Opted-out requests pass through untouched.
    pub fn augment(&self, mut request: ApiRequest) -> ApiRequest {
        if request.skips_auth() {
            return request;
        }
        if let Some(token) = self.store.access_token() {
            request.set_bearer(&token);
        }
        request
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::CredentialSet;
    use reqwest::header::AUTHORIZATION;

    #[test]
    fn test_attaches_bearer_token() {
        let store = CredentialStore::in_memory();
        store.write(CredentialSet::new("abc"));
        let augmentor = RequestAugmentor::new(store);

        let request = augmentor.augment(ApiRequest::get("/auth/me"));
        assert_eq!(
            request.headers().get(AUTHORIZATION).map(|v| v.as_bytes()),
            Some(&b"Bearer abc"[..])
        );
    }

    #[test]
    fn test_no_token_leaves_headers_untouched() {
        let augmentor = RequestAugmentor::new(CredentialStore::in_memory());
        let request = augmentor.augment(ApiRequest::get("/auth/me"));
        assert!(request.headers().is_empty());
    }

    #[test]
    fn test_opted_out_request_is_not_augmented() {
        let store = CredentialStore::in_memory();
        store.write(CredentialSet::new("abc"));
        let augmentor = RequestAugmentor::new(store);

        let request = augmentor.augment(ApiRequest::post("/auth/refresh").skip_auth());
        assert!(request.headers().get(AUTHORIZATION).is_none());
    }

    #[test]
    fn test_follows_store_updates() {
        let store = CredentialStore::in_memory();
        let augmentor = RequestAugmentor::new(store.clone());

        store.write(CredentialSet::new("first"));
        assert_eq!(augmentor.augment(ApiRequest::get("/")).bearer_token(), Some("first"));

        store.write(CredentialSet::new("second"));
        assert_eq!(augmentor.augment(ApiRequest::get("/")).bearer_token(), Some("second"));

        store.clear();
        assert_eq!(augmentor.augment(ApiRequest::get("/")).bearer_token(), None);
    }
}
