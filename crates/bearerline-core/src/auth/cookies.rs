//! Session cookies that outlive the process.
//!
//! The backend keeps the refresh token in a persistent cookie. `SessionJar`
//! answers requests from reqwest's in-memory `Jar` and mirrors every
//! persistent cookie (one carrying `Max-Age` or `Expires`) into a companion
//! record of the credential store, so a later run can still renew and sign
//! out. Clearing the store drops the record.

use std::fmt;

use chrono::{DateTime, TimeDelta, Utc};
use parking_lot::Mutex;
use reqwest::cookie::{CookieStore, Jar};
use reqwest::header::HeaderValue;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::store::CredentialStore;

/// A `Set-Cookie` header as received, with the URL it was set for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct SavedCookie {
    pub url: String,
    pub header: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

impl SavedCookie {
    fn name(&self) -> Option<&str> {
        SetCookie::parse(&self.header, Utc::now()).map(|c| c.name)
    }
}

/// What the jar needs to know about one `Set-Cookie` header.
struct SetCookie<'a> {
    name: &'a str,
    persistent: bool,
    expired: bool,
    expires_at: Option<DateTime<Utc>>,
}

impl<'a> SetCookie<'a> {
    fn parse(raw: &'a str, now: DateTime<Utc>) -> Option<Self> {
        let mut parts = raw.split(';');
        let (name, value) = parts.next()?.split_once('=')?;
        let name = name.trim();
        if name.is_empty() {
            return None;
        }

        let mut max_age = None;
        let mut expires = None;
        let mut persistent = false;
        for attr in parts {
            let (key, val) = attr.split_once('=').unwrap_or((attr, ""));
            let (key, val) = (key.trim(), val.trim());
            if key.eq_ignore_ascii_case("max-age") {
                persistent = true;
                max_age = val.parse::<i64>().ok();
            } else if key.eq_ignore_ascii_case("expires") {
                persistent = true;
                expires = DateTime::parse_from_rfc2822(val)
                    .ok()
                    .map(|at| at.with_timezone(&Utc));
            }
        }

        // Max-Age takes precedence over Expires
        let expires_at = match max_age {
            Some(secs) => TimeDelta::try_seconds(secs).and_then(|d| now.checked_add_signed(d)),
            None => expires,
        };
        let value = value.trim().trim_matches('"');
        let expired = value.is_empty() || expires_at.is_some_and(|at| at <= now);

        Some(Self {
            name,
            persistent,
            expired,
            expires_at,
        })
    }
}

/// Cookie provider for the transport, backed by the credential store.
pub struct SessionJar {
    jar: Jar,
    store: CredentialStore,
    /// Serializes read-modify-write of the saved record
    saving: Mutex<()>,
}

impl SessionJar {
    /// Jar seeded with the unexpired cookies an earlier run saved in `store`.
    pub fn restore(store: CredentialStore) -> Self {
        let jar = Jar::default();
        let now = Utc::now();
        let mut restored = 0usize;

        for cookie in store.saved_cookies() {
            if cookie.expires_at.is_some_and(|at| at <= now) {
                continue;
            }
            match Url::parse(&cookie.url) {
                Ok(url) => {
                    jar.add_cookie_str(&cookie.header, &url);
                    restored += 1;
                }
                Err(e) => debug!(error = %e, "Skipping saved cookie with unusable URL"),
            }
        }
        if restored > 0 {
            debug!(restored, "Session cookies restored");
        }

        Self {
            jar,
            store,
            saving: Mutex::new(()),
        }
    }

    fn remember(&self, headers: &[HeaderValue], url: &Url) {
        let _saving = self.saving.lock();
        let now = Utc::now();
        let before = self.store.saved_cookies();
        let mut saved = before.clone();

        for raw in headers.iter().filter_map(|h| h.to_str().ok()) {
            let Some(cookie) = SetCookie::parse(raw, now) else {
                continue;
            };
            saved.retain(|c| c.name() != Some(cookie.name));
            if cookie.persistent && !cookie.expired {
                saved.push(SavedCookie {
                    url: url.to_string(),
                    header: raw.to_string(),
                    expires_at: cookie.expires_at,
                });
            }
        }

        if saved != before {
            debug!(count = saved.len(), "Saving session cookies");
            self.store.save_cookies(&saved);
        }
    }
}

impl CookieStore for SessionJar {
    fn set_cookies(&self, cookie_headers: &mut dyn Iterator<Item = &HeaderValue>, url: &Url) {
        let headers: Vec<HeaderValue> = cookie_headers.cloned().collect();
        if headers.is_empty() {
            return;
        }
        self.jar.set_cookies(&mut headers.iter(), url);
        self.remember(&headers, url);
    }

    fn cookies(&self, url: &Url) -> Option<HeaderValue> {
        self.jar.cookies(url)
    }
}

impl fmt::Debug for SessionJar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionJar").finish_non_exhaustive()
    }
}
