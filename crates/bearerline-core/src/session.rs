//! Session bootstrap.
//!
//! `Session::start` wires the credential store, transport, augmentor and
//! renewal coordinator together once at startup, before any business call.
//! Terminal unauthorized signals from the coordinator are consumed by a
//! background task that clears the store and moves the `ReauthNavigator` to
//! the re-authentication entry path. Persistent cookies, the refresh token
//! among them, are saved alongside the credentials so a restarted process
//! can still renew and sign out.

use std::sync::Arc;

use tokio::sync::mpsc::{self, UnboundedReceiver};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::api::{
    ApiClient, ApiError, ClientOverrides, RefreshEndpoint, RenewalCoordinator, RequestAugmentor,
    TransportCell, UnauthorizedSignal,
};
use crate::auth::{CredentialSet, CredentialStore, Principal, SessionJar};
use crate::config::DEFAULT_REAUTH_PATH;

/// Location of the authenticated landing view
pub const HOME_PATH: &str = "/";

pub struct SessionOptions {
    pub store: CredentialStore,
    pub overrides: ClientOverrides,
    pub reauth_path: String,
    /// Renew through the refresh endpoint on 401. When off, every 401 ends
    /// the session.
    pub renewal: bool,
}

impl SessionOptions {
    pub fn new(store: CredentialStore) -> Self {
        Self {
            store,
            overrides: ClientOverrides::default(),
            reauth_path: DEFAULT_REAUTH_PATH.to_string(),
            renewal: true,
        }
    }

    pub fn overrides(mut self, overrides: ClientOverrides) -> Self {
        self.overrides = overrides;
        self
    }

    pub fn reauth_path(mut self, path: impl Into<String>) -> Self {
        self.reauth_path = path.into();
        self
    }

    pub fn without_renewal(mut self) -> Self {
        self.renewal = false;
        self
    }
}

/// Current location of the front end, observable through a watch channel.
pub struct ReauthNavigator {
    entry_path: String,
    location: watch::Sender<String>,
}

impl ReauthNavigator {
    pub fn new(entry_path: impl Into<String>, initial: impl Into<String>) -> Self {
        let (location, _) = watch::channel(initial.into());
        Self {
            entry_path: entry_path.into(),
            location,
        }
    }

    pub fn entry_path(&self) -> &str {
        &self.entry_path
    }

    pub fn location(&self) -> String {
        self.location.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<String> {
        self.location.subscribe()
    }

    pub fn navigate(&self, path: &str) {
        self.location.send_replace(path.to_string());
    }

    /// Move to the re-authentication entry path unless already there.
    /// Returns whether the location changed.
    pub fn redirect_to_reauth(&self) -> bool {
        self.location.send_if_modified(|current| {
            if *current == self.entry_path {
                false
            } else {
                current.clone_from(&self.entry_path);
                true
            }
        })
    }
}

pub struct Session {
    client: ApiClient,
    store: CredentialStore,
    navigator: Arc<ReauthNavigator>,
}

impl Session {
    /// Build the pipeline on the transport held by `cell`.
    ///
    /// # Panics
    /// Panics when called outside a Tokio runtime; the terminal action runs
    /// as a spawned task.
    pub fn start(cell: &TransportCell, options: SessionOptions) -> Result<Self, ApiError> {
        let SessionOptions {
            store,
            mut overrides,
            reauth_path,
            renewal,
        } = options;

        if overrides.cookies.is_none() {
            overrides.cookies = Some(Arc::new(SessionJar::restore(store.clone())));
        }
        let transport = cell.create_client(overrides)?;
        let (tx, rx) = mpsc::unbounded_channel();

        let mut coordinator = RenewalCoordinator::new(store.clone()).with_signals(tx);
        if renewal {
            coordinator =
                coordinator.with_renewal(Arc::new(RefreshEndpoint::new(transport.clone())));
        }

        let initial = if store.is_authenticated() {
            HOME_PATH.to_string()
        } else {
            reauth_path.clone()
        };
        let navigator = Arc::new(ReauthNavigator::new(reauth_path, initial));

        tokio::spawn(run_terminal_action(rx, store.clone(), Arc::clone(&navigator)));

        let client = ApiClient::new(transport, RequestAugmentor::new(store.clone()), coordinator);
        debug!(
            base_url = %client.transport().config().base_url,
            renewal,
            "Session started"
        );

        Ok(Self {
            client,
            store,
            navigator,
        })
    }

    pub fn client(&self) -> &ApiClient {
        &self.client
    }

    pub fn store(&self) -> &CredentialStore {
        &self.store
    }

    pub fn navigator(&self) -> &ReauthNavigator {
        &self.navigator
    }

    pub fn is_authenticated(&self) -> bool {
        self.store.is_authenticated()
    }

    /// Sign in and make the returned credential set the active one.
    pub async fn sign_in(&self, username: &str, password: &str) -> Result<CredentialSet, ApiError> {
        let credentials = self.client.sign_in(username, password).await?;
        self.store.write(credentials.clone());
        self.navigator.navigate(HOME_PATH);
        info!(username, "Signed in");
        Ok(credentials)
    }

    /// Best-effort server sign-out; local state is cleared regardless.
    pub async fn sign_out(&self) {
        if let Err(e) = self.client.sign_out().await {
            debug!(error = %e, "Ignoring sign-out failure");
        }
        self.end_locally();
    }

    /// Like `sign_out`, but revokes every session of the principal.
    pub async fn sign_out_all(&self) {
        if let Err(e) = self.client.sign_out_all().await {
            debug!(error = %e, "Ignoring sign-out failure");
        }
        self.end_locally();
    }

    /// Fetch the signed-in principal. An authorization failure that survived
    /// renewal ends the local session.
    pub async fn current_principal(&self) -> Result<Principal, ApiError> {
        match self.client.current_principal().await {
            Ok(principal) => Ok(principal),
            Err(e) => {
                if matches!(e, ApiError::Unauthorized { .. } | ApiError::Renewal(_)) {
                    self.end_locally();
                }
                Err(e)
            }
        }
    }

    fn end_locally(&self) {
        self.store.clear();
        self.navigator.redirect_to_reauth();
    }
}

async fn run_terminal_action(
    mut signals: UnboundedReceiver<UnauthorizedSignal>,
    store: CredentialStore,
    navigator: Arc<ReauthNavigator>,
) {
    while let Some(signal) = signals.recv().await {
        warn!(reason = signal.as_str(), "Session could not be recovered");
        store.clear();
        if navigator.redirect_to_reauth() {
            info!(path = navigator.entry_path(), "Redirected to re-authentication");
        }
    }
}
