use serde::{Deserialize, Serialize};

/// The authenticated principal, as returned by `/auth/me` and embedded in
/// token responses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    #[serde(rename = "userId")]
    pub id: i64,
    #[serde(rename = "name")]
    pub display_name: String,
    #[serde(rename = "userRole")]
    pub role: String,
}

/// The bearer token and metadata identifying the active session.
///
/// Always replaced as a whole; there is no partial update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialSet {
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_type: Option<String>,
    #[serde(rename = "user", default, skip_serializing_if = "Option::is_none")]
    pub principal: Option<Principal>,
}

impl CredentialSet {
    pub fn new(access_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            token_type: None,
            principal: None,
        }
    }

    /// A set with an empty access token counts as no credential at all.
    pub fn is_usable(&self) -> bool {
        !self.access_token.is_empty()
    }

    /// The access token, if usable.
    pub fn token(&self) -> Option<&str> {
        self.is_usable().then_some(self.access_token.as_str())
    }
}

/// Wire shape shared by the sign-in and refresh endpoints.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: String,
    pub user: Principal,
}

impl From<TokenResponse> for CredentialSet {
    fn from(token: TokenResponse) -> Self {
        Self {
            access_token: token.access_token,
            token_type: Some(token.token_type),
            principal: Some(token.user),
        }
    }
}
