//! Session bootstrap
//!
//! Turns a stored access token into a live [`UserProfile`]. A 401 from the
//! identity endpoint gets one renewal and one retried identity call; every
//! other failure ends the session (fail-closed).

use crate::refresh::RefreshCoordinator;
use crate::store::{CredentialStore, SessionEpoch};
use hq_core::{AccessToken, AuthTransport, HqError, SessionState, UserProfile};
use std::sync::Arc;

/// Resolves the current user from a token
pub struct SessionBootstrapper {
    store: Arc<CredentialStore>,
    transport: Arc<dyn AuthTransport>,
    coordinator: Arc<RefreshCoordinator>,
}

impl SessionBootstrapper {
    pub fn new(
        store: Arc<CredentialStore>,
        transport: Arc<dyn AuthTransport>,
        coordinator: Arc<RefreshCoordinator>,
    ) -> Self {
        Self {
            store,
            transport,
            coordinator,
        }
    }

    /// Resolve `token` into a session.
    ///
    /// Always ends in `Authenticated` or `Unauthenticated`; on the latter any
    /// stored credentials belonging to this session have been cleared.
    pub async fn bootstrap(&self, token: Option<AccessToken>) -> SessionState {
        let epoch = self.store.epoch();
        self.bootstrap_at(epoch, token).await
    }

    /// [`bootstrap`](Self::bootstrap) for a token read at `epoch`
    pub async fn bootstrap_at(&self, epoch: SessionEpoch, token: Option<AccessToken>) -> SessionState {
        let Some(token) = token else {
            tracing::debug!("No stored access token; session is signed out");
            return SessionState::Unauthenticated;
        };

        match self.transport.fetch_profile(&token).await {
            Ok(profile) => self.established(epoch, profile, "Session established"),
            Err(HqError::Unauthorized) => {
                if self.store.epoch() != epoch {
                    tracing::debug!("Session replaced during identity check; skipping renewal");
                    return SessionState::Unauthenticated;
                }
                tracing::debug!("Access token rejected; attempting renewal");
                let Some(renewed) = self.coordinator.refresh().await else {
                    tracing::info!("Renewal failed; session cleared");
                    return SessionState::Unauthenticated;
                };

                match self.transport.fetch_profile(&renewed).await {
                    Ok(profile) => {
                        self.established(epoch, profile, "Session established after renewal")
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "Identity check failed after renewal; clearing session");
                        self.store.clear_if(epoch);
                        SessionState::Unauthenticated
                    }
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "Identity check failed; clearing session");
                self.store.clear_if(epoch);
                SessionState::Unauthenticated
            }
        }
    }

    /// A profile only counts if the session it was fetched for is still the
    /// stored one. A logout or a new sign-in during the call wins.
    fn established(&self, epoch: SessionEpoch, profile: UserProfile, message: &str) -> SessionState {
        if self.store.epoch() != epoch {
            tracing::debug!(
                started = epoch.value(),
                current = self.store.epoch().value(),
                "Discarding profile for a replaced session"
            );
            return SessionState::Unauthenticated;
        }
        tracing::info!(user_id = %profile.id, "{}", message);
        SessionState::Authenticated(profile)
    }
}
