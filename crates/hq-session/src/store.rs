//! Credential store
//!
//! Holds the access/refresh token pair in memory and mirrors it into a
//! [`TokenStorage`] backend under two fixed keys so the session survives a
//! restart.
//!
//! Every externally established change (a new login via [`CredentialStore::set`],
//! a logout via [`CredentialStore::clear`]) advances the session epoch. Work
//! that started under an older epoch, such as an in-flight refresh, can only
//! write back through [`CredentialStore::rotate_if`] / [`CredentialStore::clear_if`],
//! which refuse once the epoch has moved. That is how a logout wins over a
//! renewal that resolves after it.

use hq_core::{AccessToken, RefreshToken, TokenPair, TokenStorage};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Storage key of the access token
pub const ACCESS_TOKEN_KEY: &str = "access_token";

/// Storage key of the refresh token
pub const REFRESH_TOKEN_KEY: &str = "refresh_token";

/// Generation counter of the stored session
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SessionEpoch(u64);

impl SessionEpoch {
    pub fn value(self) -> u64 {
        self.0
    }

    fn next(self) -> Self {
        Self(self.0.wrapping_add(1))
    }
}

#[derive(Debug)]
struct Credentials {
    access: Option<AccessToken>,
    refresh: Option<RefreshToken>,
    epoch: SessionEpoch,
    /// Set by a clear; the backend is not consulted again until the next write
    cleared: bool,
}

/// Token pair holder shared by every session component
pub struct CredentialStore {
    backend: Option<Arc<dyn TokenStorage>>,
    state: RwLock<Credentials>,
}

impl std::fmt::Debug for CredentialStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialStore")
            .field("attached", &self.backend.is_some())
            .field("epoch", &self.epoch())
            .finish()
    }
}

impl CredentialStore {
    /// Store backed by durable storage.
    ///
    /// Nothing is read eagerly; values are pulled from the backend the first
    /// time they are asked for.
    pub fn new(backend: Arc<dyn TokenStorage>) -> Self {
        Self {
            backend: Some(backend),
            state: RwLock::new(Credentials {
                access: None,
                refresh: None,
                epoch: SessionEpoch(0),
                cleared: false,
            }),
        }
    }

    /// Store with no storage at all: every write is dropped and the session
    /// always reads as logged out.
    pub fn detached() -> Self {
        Self {
            backend: None,
            state: RwLock::new(Credentials {
                access: None,
                refresh: None,
                epoch: SessionEpoch(0),
                cleared: false,
            }),
        }
    }

    /// The durable backend, if any
    pub fn backend(&self) -> Option<&Arc<dyn TokenStorage>> {
        self.backend.as_ref()
    }

    /// Current access token
    pub fn get(&self) -> Option<AccessToken> {
        if let Some(token) = self.read().access.clone() {
            return Some(token);
        }

        let backend = self.backend.as_ref()?;
        let mut state = self.write();
        if state.access.is_none() && !state.cleared {
            state.access = backend.get(ACCESS_TOKEN_KEY).map(AccessToken::from);
        }
        state.access.clone()
    }

    /// Current refresh token
    pub fn refresh_token(&self) -> Option<RefreshToken> {
        if let Some(token) = self.read().refresh.clone() {
            return Some(token);
        }

        let backend = self.backend.as_ref()?;
        let mut state = self.write();
        if state.refresh.is_none() && !state.cleared {
            state.refresh = backend.get(REFRESH_TOKEN_KEY).map(RefreshToken::from);
        }
        state.refresh.clone()
    }

    /// Current session epoch
    pub fn epoch(&self) -> SessionEpoch {
        self.read().epoch
    }

    /// Store a newly issued access token.
    ///
    /// Without a refresh token the stored one is left untouched. Starts a new
    /// epoch, so renewals begun before this call cannot overwrite it.
    pub fn set(&self, access: AccessToken, refresh: Option<RefreshToken>) -> SessionEpoch {
        let mut state = self.write();
        let Some(backend) = self.backend.as_ref() else {
            return state.epoch;
        };

        state.epoch = state.epoch.next();
        Self::persist(backend.as_ref(), &mut state, access, refresh);
        tracing::debug!(epoch = state.epoch.value(), "Credentials stored");
        state.epoch
    }

    /// Store a renewed token pair if the session is still the one the
    /// renewal started from. Returns `false` when the epoch has moved on.
    pub fn rotate_if(&self, epoch: SessionEpoch, pair: TokenPair) -> bool {
        let mut state = self.write();
        let Some(backend) = self.backend.as_ref() else {
            return false;
        };
        if state.epoch != epoch {
            tracing::debug!(
                started = epoch.value(),
                current = state.epoch.value(),
                "Discarding renewed credentials for a replaced session"
            );
            return false;
        }

        Self::persist(
            backend.as_ref(),
            &mut state,
            pair.access_token,
            Some(pair.refresh_token),
        );
        true
    }

    /// Drop both tokens from memory and storage
    pub fn clear(&self) {
        let mut state = self.write();
        state.epoch = state.epoch.next();
        Self::wipe(self.backend.as_deref(), &mut state);
        tracing::debug!(epoch = state.epoch.value(), "Credentials cleared");
    }

    /// Clear only if no other session was established since `epoch`
    pub fn clear_if(&self, epoch: SessionEpoch) -> bool {
        let mut state = self.write();
        if state.epoch != epoch {
            return false;
        }
        state.epoch = state.epoch.next();
        Self::wipe(self.backend.as_deref(), &mut state);
        true
    }

    fn persist(
        backend: &dyn TokenStorage,
        state: &mut Credentials,
        access: AccessToken,
        refresh: Option<RefreshToken>,
    ) {
        backend.set(ACCESS_TOKEN_KEY, access.as_str());
        state.access = Some(access);
        state.cleared = false;

        if let Some(refresh) = refresh {
            backend.set(REFRESH_TOKEN_KEY, refresh.as_str());
            state.refresh = Some(refresh);
        }
    }

    fn wipe(backend: Option<&dyn TokenStorage>, state: &mut Credentials) {
        if let Some(backend) = backend {
            backend.remove(ACCESS_TOKEN_KEY);
            backend.remove(REFRESH_TOKEN_KEY);
        }
        state.access = None;
        state.refresh = None;
        state.cleared = true;
    }

    fn read(&self) -> RwLockReadGuard<'_, Credentials> {
        self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Credentials> {
        self.state.write().unwrap_or_else(|e| e.into_inner())
    }
}
