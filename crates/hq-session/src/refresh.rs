//! Single-flight token refresh
//!
//! At most one renewal round-trip is in flight at any time. Callers that ask
//! for a refresh while one is pending attach to it and receive its result.
//!
//! The pending operation lives in a mutex-guarded `Idle | Pending` state
//! holding a [`Shared`] future. The renewal future resets the state to `Idle`
//! itself when it settles, whichever waiter happened to drive it. If every
//! waiter is dropped mid-flight the operation stays registered and the next
//! caller resumes it instead of starting a second call.

use crate::store::{CredentialStore, SessionEpoch};
use futures::future::{BoxFuture, FutureExt, Shared};
use hq_core::{AccessToken, AuthTransport, RefreshToken};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

type Flight = Shared<BoxFuture<'static, Option<AccessToken>>>;

enum FlightState {
    Idle,
    Pending { id: u64, flight: Flight },
}

/// Coordinates access-token renewal
pub struct RefreshCoordinator {
    store: Arc<CredentialStore>,
    transport: Arc<dyn AuthTransport>,
    state: Arc<Mutex<FlightState>>,
    next_id: AtomicU64,
    renewals: Arc<AtomicU64>,
}

impl RefreshCoordinator {
    pub fn new(store: Arc<CredentialStore>, transport: Arc<dyn AuthTransport>) -> Self {
        Self {
            store,
            transport,
            state: Arc::new(Mutex::new(FlightState::Idle)),
            next_id: AtomicU64::new(1),
            renewals: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Renew the access token.
    ///
    /// Returns the new token, or `None` when there is no session to renew or
    /// renewal failed. In both `None` cases the session has been cleared.
    pub async fn refresh(&self) -> Option<AccessToken> {
        let epoch = self.store.epoch();
        let Some(refresh_token) = self.store.refresh_token() else {
            tracing::debug!("No refresh token available; clearing session");
            self.store.clear();
            return None;
        };

        let flight = self.join_or_start(epoch, refresh_token);
        flight.await
    }

    /// Whether a renewal is currently in flight
    pub fn is_pending(&self) -> bool {
        matches!(*lock(&self.state), FlightState::Pending { .. })
    }

    /// Number of renewal round-trips issued so far
    pub fn renewals(&self) -> u64 {
        self.renewals.load(Ordering::SeqCst)
    }

    fn join_or_start(&self, epoch: SessionEpoch, refresh_token: RefreshToken) -> Flight {
        let mut state = lock(&self.state);
        if let FlightState::Pending { id, flight } = &*state {
            tracing::debug!(flight = id, "Joining in-flight token refresh");
            return flight.clone();
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let flight = renew(
            Renewal {
                id,
                epoch,
                refresh_token,
                store: self.store.clone(),
                transport: self.transport.clone(),
                state: Arc::downgrade(&self.state),
                renewals: self.renewals.clone(),
            },
        )
        .boxed()
        .shared();

        *state = FlightState::Pending {
            id,
            flight: flight.clone(),
        };
        flight
    }
}

struct Renewal {
    id: u64,
    epoch: SessionEpoch,
    refresh_token: RefreshToken,
    store: Arc<CredentialStore>,
    transport: Arc<dyn AuthTransport>,
    state: Weak<Mutex<FlightState>>,
    renewals: Arc<AtomicU64>,
}

async fn renew(job: Renewal) -> Option<AccessToken> {
    job.renewals.fetch_add(1, Ordering::SeqCst);
    tracing::debug!(flight = job.id, epoch = job.epoch.value(), "Refreshing access token");

    let outcome = match job.transport.refresh(&job.refresh_token).await {
        Ok(pair) => {
            let access = pair.access_token.clone();
            if job.store.rotate_if(job.epoch, pair) {
                tracing::debug!(flight = job.id, "Access token refreshed");
                Some(access)
            } else {
                // Logged out or signed in again meanwhile; whatever is stored now wins
                job.store.get()
            }
        }
        Err(e) => {
            tracing::warn!(flight = job.id, error = %e, "Token refresh failed; clearing session");
            if job.store.clear_if(job.epoch) {
                None
            } else {
                job.store.get()
            }
        }
    };

    if let Some(shared) = job.state.upgrade() {
        let mut state = lock(&shared);
        if matches!(&*state, FlightState::Pending { id, .. } if *id == job.id) {
            *state = FlightState::Idle;
        }
    }

    outcome
}

fn lock(state: &Mutex<FlightState>) -> MutexGuard<'_, FlightState> {
    state.lock().unwrap_or_else(|e| e.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;
    use crate::testing::ScriptedTransport;
    use hq_core::{HqError, TokenPair, TokenStorage};
    use tokio_test::{assert_pending, assert_ready, task};

    fn seeded_store() -> (Arc<CredentialStore>, Arc<MemoryStorage>) {
        let backend = Arc::new(MemoryStorage::new());
        let store = Arc::new(CredentialStore::new(backend.clone()));
        store.set(AccessToken::new("stale"), Some(RefreshToken::new("r0")));
        (store, backend)
    }

    #[tokio::test]
    async fn test_refresh_rotates_tokens() {
        let (store, _) = seeded_store();
        let transport = Arc::new(ScriptedTransport::new().on_refresh(Ok(TokenPair::new("a1", "r1"))));
        let coordinator = RefreshCoordinator::new(store.clone(), transport.clone());

        let token = coordinator.refresh().await;

        assert_eq!(token, Some(AccessToken::new("a1")));
        assert_eq!(store.get(), Some(AccessToken::new("a1")));
        assert_eq!(store.refresh_token(), Some(RefreshToken::new("r1")));
        assert_eq!(transport.refresh_tokens_seen(), vec!["r0".to_string()]);
        assert!(!coordinator.is_pending());
    }

    #[tokio::test]
    async fn test_refresh_without_refresh_token_clears_session() {
        let backend = Arc::new(MemoryStorage::new());
        backend.set(crate::store::ACCESS_TOKEN_KEY, "orphan");
        let store = Arc::new(CredentialStore::new(backend.clone()));
        let transport = Arc::new(ScriptedTransport::new());
        let coordinator = RefreshCoordinator::new(store.clone(), transport.clone());

        assert_eq!(coordinator.refresh().await, None);
        assert_eq!(transport.refresh_calls(), 0);
        assert!(store.get().is_none());
        assert!(backend.is_empty());
    }

    #[tokio::test]
    async fn test_refresh_failure_clears_session() {
        let (store, backend) = seeded_store();
        let transport = Arc::new(ScriptedTransport::new().on_refresh(Err(HqError::Http {
            status: 401,
            message: "refresh token expired".to_string(),
        })));
        let coordinator = RefreshCoordinator::new(store.clone(), transport);

        assert_eq!(coordinator.refresh().await, None);
        assert!(store.get().is_none());
        assert!(store.refresh_token().is_none());
        assert!(backend.is_empty());
        assert!(!coordinator.is_pending());
    }

    #[test]
    fn test_concurrent_callers_share_one_renewal() {
        let (store, _) = seeded_store();
        let transport = ScriptedTransport::new().on_refresh(Ok(TokenPair::new("shared", "r1")));
        let gate = transport.gate();
        let transport = Arc::new(transport);
        let coordinator = RefreshCoordinator::new(store, transport.clone());

        let mut callers: Vec<_> = (0..8).map(|_| task::spawn(coordinator.refresh())).collect();
        for caller in callers.iter_mut() {
            assert_pending!(caller.poll());
        }
        assert!(coordinator.is_pending());
        assert_eq!(transport.refresh_calls(), 1);

        gate.add_permits(1);

        for caller in callers.iter_mut() {
            let token = assert_ready!(caller.poll());
            assert_eq!(token, Some(AccessToken::new("shared")));
        }
        assert_eq!(transport.refresh_calls(), 1);
        assert_eq!(coordinator.renewals(), 1);
        assert!(!coordinator.is_pending());
    }

    #[tokio::test]
    async fn test_concurrent_callers_via_join_all() {
        let (store, _) = seeded_store();
        let transport = Arc::new(
            ScriptedTransport::new()
                .on_refresh(Ok(TokenPair::new("joined", "r1")))
                .with_refresh_yields(3),
        );
        let coordinator = RefreshCoordinator::new(store, transport.clone());

        let results = futures::future::join_all((0..16).map(|_| coordinator.refresh())).await;

        assert_eq!(transport.refresh_calls(), 1);
        assert!(results
            .iter()
            .all(|token| token.as_ref() == Some(&AccessToken::new("joined"))));
    }

    #[tokio::test]
    async fn test_settled_refresh_allows_a_new_attempt() {
        let (store, _) = seeded_store();
        let transport = Arc::new(ScriptedTransport::new().on_refresh(Ok(TokenPair::new("a1", "r1"))));
        let coordinator = RefreshCoordinator::new(store, transport.clone());

        coordinator.refresh().await;
        coordinator.refresh().await;

        assert_eq!(transport.refresh_calls(), 2);
        assert_eq!(transport.refresh_tokens_seen(), vec!["r0".to_string(), "r1".to_string()]);
    }

    #[tokio::test]
    async fn test_logout_during_refresh_wins() {
        let (store, backend) = seeded_store();
        let transport = ScriptedTransport::new().on_refresh(Ok(TokenPair::new("late", "r-late")));
        let gate = transport.gate();
        let entered = transport.refresh_entered();
        let transport = Arc::new(transport);
        let coordinator = Arc::new(RefreshCoordinator::new(store.clone(), transport));

        let pending = tokio::spawn({
            let coordinator = coordinator.clone();
            async move { coordinator.refresh().await }
        });

        entered.notified().await;
        store.clear();
        gate.add_permits(1);

        assert_eq!(pending.await.unwrap(), None);
        assert!(store.get().is_none());
        assert!(store.refresh_token().is_none());
        assert!(backend.is_empty());
    }

    #[tokio::test]
    async fn test_failed_refresh_spares_newer_login() {
        let (store, _) = seeded_store();
        let transport = ScriptedTransport::new().on_refresh(Err(HqError::Transport(
            "connection reset".to_string(),
        )));
        let gate = transport.gate();
        let entered = transport.refresh_entered();
        let coordinator = Arc::new(RefreshCoordinator::new(store.clone(), Arc::new(transport)));

        let pending = tokio::spawn({
            let coordinator = coordinator.clone();
            async move { coordinator.refresh().await }
        });

        entered.notified().await;
        store.set(AccessToken::new("fresh-login"), Some(RefreshToken::new("r-new")));
        gate.add_permits(1);

        assert_eq!(pending.await.unwrap(), Some(AccessToken::new("fresh-login")));
        assert_eq!(store.refresh_token(), Some(RefreshToken::new("r-new")));
    }

    #[test]
    fn test_dropped_waiters_leave_flight_resumable() {
        let (store, _) = seeded_store();
        let transport = ScriptedTransport::new().on_refresh(Ok(TokenPair::new("resumed", "r1")));
        let gate = transport.gate();
        let transport = Arc::new(transport);
        let coordinator = RefreshCoordinator::new(store, transport.clone());

        let mut first = task::spawn(coordinator.refresh());
        assert_pending!(first.poll());
        drop(first);
        assert!(coordinator.is_pending());

        gate.add_permits(1);
        let mut second = task::spawn(coordinator.refresh());
        let token = assert_ready!(second.poll());

        assert_eq!(token, Some(AccessToken::new("resumed")));
        assert_eq!(transport.refresh_calls(), 1);
    }
}
