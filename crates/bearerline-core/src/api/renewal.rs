//! 401 recovery: renew the credential, then replay the failed request once.
//!
//! Requests that fail together share one renewal. The first one to need it
//! starts the renewal future; everyone arriving while it is in flight awaits
//! a clone of the same `Shared` future. The store update and the terminal
//! unauthorized signal happen inside that future, so they run once per
//! renewal no matter how many requests are waiting on it.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use futures::future::{BoxFuture, FutureExt, Shared};
use reqwest::Response;
use tokio::sync::mpsc::UnboundedSender;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::auth::{CredentialSet, CredentialStore};

use super::request::Attempt;
use super::transport::Transport;
use super::ApiError;

/// Exchanges an expired or missing credential for a new one.
pub trait RenewCredentials: Send + Sync {
    fn renew(&self) -> BoxFuture<'_, Result<CredentialSet, ApiError>>;
}

impl<F, Fut> RenewCredentials for F
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = Result<CredentialSet, ApiError>> + Send + 'static,
{
    fn renew(&self) -> BoxFuture<'_, Result<CredentialSet, ApiError>> {
        (self)().boxed()
    }
}

/// Why the session could not be recovered.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum UnauthorizedSignal {
    /// A request was rejected and no renewal operation is configured.
    RenewalUnavailable,
    /// The renewal operation itself failed.
    RenewalFailed,
}

impl UnauthorizedSignal {
    /// Human-readable reason for logs.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            UnauthorizedSignal::RenewalUnavailable => "renewal_unavailable",
            UnauthorizedSignal::RenewalFailed => "renewal_failed",
        }
    }
}

type RenewalOutcome = Result<CredentialSet, Arc<ApiError>>;
type RenewalFuture = Shared<BoxFuture<'static, RenewalOutcome>>;
type RenewalSlot = Mutex<Option<(u64, RenewalFuture)>>;

pub struct RenewalCoordinator {
    store: CredentialStore,
    renewer: Option<Arc<dyn RenewCredentials>>,
    signals: Option<UnboundedSender<UnauthorizedSignal>>,
    /// Renewal currently in flight, tagged with its generation. The renewal
    /// future empties the slot itself when it finishes.
    in_flight: Arc<RenewalSlot>,
    generation: AtomicU64,
}

impl RenewalCoordinator {
    /// Coordinator with no renewal operation: every 401 is terminal.
    pub fn new(store: CredentialStore) -> Self {
        Self {
            store,
            renewer: None,
            signals: None,
            in_flight: Arc::new(Mutex::new(None)),
            generation: AtomicU64::new(0),
        }
    }

    pub fn with_renewal(mut self, renewer: Arc<dyn RenewCredentials>) -> Self {
        self.renewer = Some(renewer);
        self
    }

    pub fn with_signals(mut self, signals: UnboundedSender<UnauthorizedSignal>) -> Self {
        self.signals = Some(signals);
        self
    }

    /// Recover from a failed attempt and replay it once through `transport`.
    /// The replay's outcome is returned as is.
    pub async fn handle_failure(
        &self,
        transport: &Transport,
        attempt: &Attempt,
        error: ApiError,
    ) -> Result<Response, ApiError> {
        let replay = self.recover(attempt, error).await?;
        debug!(path = replay.request().path(), "Replaying request with renewed credentials");
        transport.send(replay.request()).await
    }

    /// Decide what happens after `attempt` failed with `error`: either the
    /// attempt to replay, or the error to hand back to the caller.
    pub async fn recover(&self, attempt: &Attempt, error: ApiError) -> Result<Attempt, ApiError> {
        if !error.is_unauthorized() || attempt.request().skips_auth() {
            return Err(error);
        }

        if attempt.is_renewed() {
            debug!(path = attempt.request().path(), "Rejected again after renewal, giving up");
            return Err(error);
        }

        let Some(renewer) = self.renewer.as_ref() else {
            warn!("Request rejected and no credential renewal is configured");
            self.store.clear();
            emit(&self.signals, UnauthorizedSignal::RenewalUnavailable);
            return Err(error);
        };

        // Another request already renewed since this one was sent
        if let Some(current) = self.store.access_token() {
            if attempt.request().bearer_token() != Some(current.as_str()) {
                debug!("Credential changed while request was in flight, replaying with current token");
                return Ok(attempt.replay(Some(&current)));
            }
        }

        match self.renewal(renewer).await {
            Ok(credentials) => {
                if credentials.token().is_none() {
                    warn!("Renewal returned an empty access token, replaying without a new header");
                }
                Ok(attempt.replay(credentials.token()))
            }
            Err(e) => Err(ApiError::Renewal(e)),
        }
    }

    /// Join the in-flight renewal, or start one.
    async fn renewal(&self, renewer: &Arc<dyn RenewCredentials>) -> RenewalOutcome {
        let shared = {
            let mut slot = self.in_flight.lock().await;
            match slot.as_ref() {
                Some((generation, shared)) => {
                    debug!(generation, "Joining in-flight credential renewal");
                    shared.clone()
                }
                None => {
                    let generation = self.generation.fetch_add(1, Ordering::Relaxed);
                    let shared = self.start_renewal(generation, Arc::clone(renewer));
                    *slot = Some((generation, shared.clone()));
                    shared
                }
            }
        };
        shared.await
    }

    fn start_renewal(&self, generation: u64, renewer: Arc<dyn RenewCredentials>) -> RenewalFuture {
        let store = self.store.clone();
        let signals = self.signals.clone();
        let slot = Arc::downgrade(&self.in_flight);

        async move {
            info!(generation, "Renewing credentials");
            let outcome = match renewer.renew().await {
                Ok(credentials) => {
                    store.write(credentials.clone());
                    Ok(credentials)
                }
                Err(e) => {
                    warn!(error = %e, "Credential renewal failed");
                    store.clear();
                    emit(&signals, UnauthorizedSignal::RenewalFailed);
                    Err(Arc::new(e))
                }
            };
            release(&slot, generation).await;
            outcome
        }
        .boxed()
        .shared()
    }
}

/// Empty the in-flight slot if it still holds renewal `generation`, so the
/// next expiry starts a fresh renewal whether or not any waiter is left.
async fn release(slot: &Weak<RenewalSlot>, generation: u64) {
    let Some(slot) = slot.upgrade() else {
        return;
    };
    let mut slot = slot.lock().await;
    if matches!(slot.as_ref(), Some((current, _)) if *current == generation) {
        *slot = None;
    }
}

fn emit(signals: &Option<UnboundedSender<UnauthorizedSignal>>, signal: UnauthorizedSignal) {
    if let Some(tx) = signals {
        if tx.send(signal).is_err() {
            debug!(reason = signal.as_str(), "No listener for unauthorized signal");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::request::ApiRequest;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;
    use tokio::sync::mpsc;

    fn unauthorized() -> ApiError {
        ApiError::Unauthorized {
            body: "expired".to_string(),
        }
    }

    fn sent_with(token: &str) -> Attempt {
        let mut request = ApiRequest::get("/items");
        request.set_bearer(token);
        Attempt::first(request)
    }

    fn store_with(token: &str) -> CredentialStore {
        let store = CredentialStore::in_memory();
        store.write(CredentialSet::new(token));
        store
    }

    /// Renewer that counts calls and answers with `token` after `delay`.
    fn renewer(
        calls: &Arc<AtomicUsize>,
        token: &'static str,
        delay: Duration,
    ) -> Arc<dyn RenewCredentials> {
        let calls = Arc::clone(calls);
        Arc::new(move || {
            calls.fetch_add(1, Ordering::SeqCst);
            async move {
                tokio::time::sleep(delay).await;
                Ok::<_, ApiError>(CredentialSet::new(token))
            }
        })
    }

    fn failing_renewer(calls: &Arc<AtomicUsize>) -> Arc<dyn RenewCredentials> {
        let calls = Arc::clone(calls);
        Arc::new(move || {
            calls.fetch_add(1, Ordering::SeqCst);
            async move {
                Err::<CredentialSet, _>(ApiError::ServerError("refresh token revoked".to_string()))
            }
        })
    }

    #[tokio::test]
    async fn test_non_401_passes_through_without_renewal() {
        let calls = Arc::new(AtomicUsize::new(0));
        let store = store_with("old");
        let coordinator = RenewalCoordinator::new(store.clone())
            .with_renewal(renewer(&calls, "new", Duration::ZERO));

        let err = coordinator
            .recover(&sent_with("old"), ApiError::ServerError("boom".to_string()))
            .await
            .err()
            .expect("propagated");

        assert!(matches!(err, ApiError::ServerError(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(store.access_token().as_deref(), Some("old"));
    }

    #[tokio::test]
    async fn test_opted_out_request_is_not_renewed() {
        let calls = Arc::new(AtomicUsize::new(0));
        let coordinator = RenewalCoordinator::new(CredentialStore::in_memory())
            .with_renewal(renewer(&calls, "new", Duration::ZERO));

        let attempt = Attempt::first(ApiRequest::post("/auth/token").skip_auth());
        let err = coordinator.recover(&attempt, unauthorized()).await.err().expect("propagated");

        assert!(err.is_unauthorized());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_renewed_attempt_is_not_renewed_again() {
        let calls = Arc::new(AtomicUsize::new(0));
        let store = store_with("new");
        let (tx, mut rx) = mpsc::unbounded_channel();
        let coordinator = RenewalCoordinator::new(store.clone())
            .with_renewal(renewer(&calls, "newer", Duration::ZERO))
            .with_signals(tx);

        let replayed = sent_with("old").replay(Some("new"));
        let err = coordinator.recover(&replayed, unauthorized()).await.err().expect("propagated");

        assert!(err.is_unauthorized());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(store.access_token().as_deref(), Some("new"));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_without_renewal_clears_store_and_signals() {
        let store = store_with("old");
        let (tx, mut rx) = mpsc::unbounded_channel();
        let coordinator = RenewalCoordinator::new(store.clone()).with_signals(tx);

        let err = coordinator.recover(&sent_with("old"), unauthorized()).await.err().expect("propagated");

        assert!(err.is_unauthorized());
        assert!(store.read().is_none());
        assert_eq!(rx.try_recv().ok(), Some(UnauthorizedSignal::RenewalUnavailable));
    }

    #[tokio::test]
    async fn test_successful_renewal_updates_store_and_replays() {
        let calls = Arc::new(AtomicUsize::new(0));
        let store = store_with("old");
        let coordinator = RenewalCoordinator::new(store.clone())
            .with_renewal(renewer(&calls, "fresh", Duration::ZERO));

        let replay = coordinator.recover(&sent_with("old"), unauthorized()).await.expect("replay");

        assert!(replay.is_renewed());
        assert_eq!(replay.request().bearer_token(), Some("fresh"));
        assert_eq!(store.access_token().as_deref(), Some("fresh"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failed_renewal_clears_store_and_signals_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let store = store_with("old");
        let (tx, mut rx) = mpsc::unbounded_channel();
        let coordinator = RenewalCoordinator::new(store.clone())
            .with_renewal(failing_renewer(&calls))
            .with_signals(tx);

        let err = coordinator.recover(&sent_with("old"), unauthorized()).await.err().expect("failed");

        match err {
            ApiError::Renewal(inner) => assert!(matches!(*inner, ApiError::ServerError(_))),
            other => panic!("expected renewal error, got {other:?}"),
        }
        assert!(store.read().is_none());
        assert_eq!(rx.try_recv().ok(), Some(UnauthorizedSignal::RenewalFailed));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_concurrent_failures_share_one_renewal() {
        let calls = Arc::new(AtomicUsize::new(0));
        let store = store_with("old");
        let coordinator = RenewalCoordinator::new(store.clone())
            .with_renewal(renewer(&calls, "fresh", Duration::from_millis(50)));

        let attempts: Vec<Attempt> = (0..5).map(|_| sent_with("old")).collect();
        let results = futures::future::join_all(
            attempts.iter().map(|a| coordinator.recover(a, unauthorized())),
        )
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        for result in results {
            let replay = result.expect("replay");
            assert_eq!(replay.request().bearer_token(), Some("fresh"));
        }
    }

    #[tokio::test]
    async fn test_concurrent_failed_renewal_signals_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let (tx, mut rx) = mpsc::unbounded_channel();
        let slow_failure: Arc<dyn RenewCredentials> = {
            let calls = Arc::clone(&calls);
            Arc::new(move || {
                calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    Err::<CredentialSet, _>(ApiError::Unauthorized { body: String::new() })
                }
            })
        };
        let coordinator = RenewalCoordinator::new(store_with("old"))
            .with_renewal(slow_failure)
            .with_signals(tx);

        let attempts: Vec<Attempt> = (0..3).map(|_| sent_with("old")).collect();
        let results = futures::future::join_all(
            attempts.iter().map(|a| coordinator.recover(a, unauthorized())),
        )
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(results.iter().all(|r| matches!(r, Err(ApiError::Renewal(_)))));
        assert_eq!(rx.try_recv().ok(), Some(UnauthorizedSignal::RenewalFailed));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_sequential_expiries_renew_again() {
        let calls = Arc::new(AtomicUsize::new(0));
        let store = store_with("old");
        let coordinator = RenewalCoordinator::new(store.clone())
            .with_renewal(renewer(&calls, "fresh", Duration::ZERO));

        coordinator.recover(&sent_with("old"), unauthorized()).await.expect("first");
        // The renewed token expires in turn
        coordinator.recover(&sent_with("fresh"), unauthorized()).await.expect("second");

        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_finished_renewal_frees_slot_without_waiters() {
        let calls = Arc::new(AtomicUsize::new(0));
        let store = store_with("old");
        let renew = renewer(&calls, "fresh", Duration::ZERO);
        let coordinator = RenewalCoordinator::new(store.clone()).with_renewal(Arc::clone(&renew));

        // Drive a renewal to completion without going through `recover`,
        // as if its only waiter was cancelled right after it finished
        let shared = {
            let mut slot = coordinator.in_flight.lock().await;
            let shared = coordinator.start_renewal(7, renew);
            *slot = Some((7, shared.clone()));
            shared
        };
        shared.await.expect("renewed");
        assert!(coordinator.in_flight.lock().await.is_none());

        // The next expiry renews again instead of reusing the old outcome
        coordinator.recover(&sent_with("fresh"), unauthorized()).await.expect("replay");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_stale_token_replays_with_current_without_renewing() {
        let calls = Arc::new(AtomicUsize::new(0));
        let coordinator = RenewalCoordinator::new(store_with("already-renewed"))
            .with_renewal(renewer(&calls, "unused", Duration::ZERO));

        let replay = coordinator.recover(&sent_with("old"), unauthorized()).await.expect("replay");

        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(replay.is_renewed());
        assert_eq!(replay.request().bearer_token(), Some("already-renewed"));
    }

    #[tokio::test]
    async fn test_empty_renewed_token_replays_unchanged() {
        let calls = Arc::new(AtomicUsize::new(0));
        let store = store_with("old");
        let coordinator = RenewalCoordinator::new(store.clone())
            .with_renewal(renewer(&calls, "", Duration::ZERO));

        let replay = coordinator.recover(&sent_with("old"), unauthorized()).await.expect("replay");

        assert!(replay.is_renewed());
        assert_eq!(replay.request().bearer_token(), Some("old"));
        assert_eq!(store.access_token(), None);
    }
}
