//! Session manager
//!
//! The single owner of a session: signs in and out, resolves the current
//! user, and publishes every state change on a `watch` channel. It also
//! implements [`SessionAccessor`], so it can be registered on a
//! [`SessionBridge`](crate::SessionBridge).

use crate::bootstrap::SessionBootstrapper;
use crate::refresh::RefreshCoordinator;
use crate::storage;
use crate::store::{CredentialStore, SessionEpoch};
use crate::transport::HttpAuthTransport;
use async_trait::async_trait;
use hq_core::{
    AccessToken, AppConfig, AuthTransport, LoginRequest, RegisterRequest, Result,
    SessionAccessor, SessionState, UserProfile,
};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::watch;

/// Owner of the session lifecycle
pub struct SessionManager {
    store: Arc<CredentialStore>,
    transport: Arc<dyn AuthTransport>,
    coordinator: Arc<RefreshCoordinator>,
    bootstrapper: SessionBootstrapper,
    state: watch::Sender<SessionState>,
    /// Orders "check the store, then publish" against logout
    publishing: Mutex<()>,
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("store", &self.store)
            .field("authenticated", &self.state.borrow().is_authenticated())
            .finish_non_exhaustive()
    }
}

impl SessionManager {
    pub fn new(store: Arc<CredentialStore>, transport: Arc<dyn AuthTransport>) -> Self {
        let coordinator = Arc::new(RefreshCoordinator::new(store.clone(), transport.clone()));
        let bootstrapper =
            SessionBootstrapper::new(store.clone(), transport.clone(), coordinator.clone());
        let (state, _) = watch::channel(SessionState::Unauthenticated);

        Self {
            store,
            transport,
            coordinator,
            bootstrapper,
            state,
            publishing: Mutex::new(()),
        }
    }

    /// Build the HTTP transport and storage backend described by `config`
    pub fn from_config(config: &AppConfig) -> Result<Arc<Self>> {
        let transport = HttpAuthTransport::from_config(&config.api)?;
        let backend = storage::from_config(&config.storage);

        tracing::debug!(
            base_url = %config.api.base_url,
            backend = ?config.storage.backend,
            "Session manager configured"
        );

        Ok(Arc::new(Self::new(
            Arc::new(CredentialStore::new(backend)),
            Arc::new(transport),
        )))
    }

    pub fn store(&self) -> &Arc<CredentialStore> {
        &self.store
    }

    pub fn coordinator(&self) -> &Arc<RefreshCoordinator> {
        &self.coordinator
    }

    /// Sign in with email and password.
    ///
    /// A refused sign-in returns [`hq_core::HqError::Rejected`] carrying the
    /// server's message; stored credentials are left as they were.
    pub async fn login(&self, email: &str, password: &str) -> Result<SessionState> {
        let request = LoginRequest {
            email: email.to_string(),
            password: password.to_string(),
        };
        self.sign_in(&request).await
    }

    /// Create an account, then sign in with the same credentials
    pub async fn register(
        &self,
        email: &str,
        password: &str,
        display_name: &str,
    ) -> Result<SessionState> {
        let request = RegisterRequest {
            email: email.to_string(),
            password: password.to_string(),
            display_name: display_name.to_string(),
        };

        let user = self.transport.register(&request).await.map_err(|e| {
            tracing::info!(error = %e, "Registration refused");
            e
        })?;
        tracing::info!(user_id = %user.id, "Account registered");

        self.sign_in(&request.login()).await
    }

    async fn sign_in(&self, request: &LoginRequest) -> Result<SessionState> {
        let pair = self.transport.login(request).await.map_err(|e| {
            tracing::info!(error = %e, "Sign-in refused");
            e
        })?;

        let access = pair.access_token.clone();
        let epoch = self.store.set(pair.access_token, Some(pair.refresh_token));
        tracing::info!("Signed in");

        let state = self.bootstrapper.bootstrap_at(epoch, Some(access)).await;
        Ok(self.publish_resolved(epoch, state))
    }

    /// Drop the session
    pub async fn logout(&self) {
        {
            let _publishing = self.publishing();
            self.store.clear();
            self.publish(SessionState::Unauthenticated);
        }
        tracing::info!("Signed out");
    }

    /// Resolve the stored token into a session and publish the outcome.
    ///
    /// A logout or sign-in that lands while the identity call is running
    /// wins; the stale result is neither returned nor published.
    pub async fn bootstrap(&self) -> SessionState {
        let epoch = self.store.epoch();
        let token = self.store.get();
        let state = self.bootstrapper.bootstrap_at(epoch, token).await;
        self.publish_resolved(epoch, state)
    }

    /// Renew the access token through the single-flight coordinator
    pub async fn refresh(&self) -> Option<AccessToken> {
        let token = self.coordinator.refresh().await;
        if token.is_none() {
            let _publishing = self.publishing();
            if self.store.get().is_none() {
                self.publish(SessionState::Unauthenticated);
            }
        }
        token
    }

    pub fn token(&self) -> Option<AccessToken> {
        self.store.get()
    }

    pub fn current_user(&self) -> Option<UserProfile> {
        self.state.borrow().user().cloned()
    }

    pub fn state(&self) -> SessionState {
        self.state.borrow().clone()
    }

    /// Receiver observing every published session state
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    /// Publish the outcome of a bootstrap that started at `epoch`, unless the
    /// store has moved on since. Returns the state that still holds.
    fn publish_resolved(&self, epoch: SessionEpoch, state: SessionState) -> SessionState {
        let _publishing = self.publishing();
        match state {
            SessionState::Authenticated(_) if self.store.epoch() != epoch => {
                tracing::debug!("Session replaced during identity check; result dropped");
                SessionState::Unauthenticated
            }
            SessionState::Authenticated(_) => {
                self.publish(state.clone());
                state
            }
            // A newer sign-in owns the published state
            SessionState::Unauthenticated if self.store.get().is_some() => state,
            SessionState::Unauthenticated => {
                self.publish(SessionState::Unauthenticated);
                state
            }
        }
    }

    fn publish(&self, state: SessionState) {
        self.state.send_replace(state);
    }

    fn publishing(&self) -> MutexGuard<'_, ()> {
        self.publishing.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl SessionAccessor for SessionManager {
    fn get_token(&self) -> Option<AccessToken> {
        self.token()
    }

    async fn trigger_refresh(&self) -> Option<AccessToken> {
        self.refresh().await
    }

    async fn force_logout(&self) {
        self.logout().await;
    }
}
