//! Session accessor bridge
//!
//! Helpers that live outside the session owner (a generic HTTP client, a
//! background job) need the live token, a way to trigger renewal, and a way
//! to force logout, without holding the owner itself. [`SessionBridge`] is a
//! slot the current owner registers into; callers hold the bridge as an
//! `Arc<dyn SessionAccessor>`.
//!
//! Registration is last-wins. When nothing is registered the bridge degrades
//! instead of failing: tokens are read straight from durable storage, refresh
//! yields `None`, and logout does nothing.

use crate::store::ACCESS_TOKEN_KEY;
use async_trait::async_trait;
use hq_core::{AccessToken, SessionAccessor, TokenStorage};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};

struct Registered {
    id: u64,
    owner: Weak<dyn SessionAccessor>,
}

/// Process-wide indirection to the live session owner
///
/// # Thread Safety
///
/// Registration and dispatch may happen from any task. The owner is held
/// weakly and upgraded per call; no lock is held across an `.await`.
pub struct SessionBridge {
    slot: RwLock<Option<Registered>>,
    next_id: AtomicU64,
    storage: Option<Arc<dyn TokenStorage>>,
}

impl std::fmt::Debug for SessionBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionBridge")
            .field("registered", &self.is_registered())
            .field("storage", &self.storage.is_some())
            .finish()
    }
}

impl SessionBridge {
    /// Bridge that falls back to `storage` while unregistered
    pub fn new(storage: Arc<dyn TokenStorage>) -> Arc<Self> {
        Arc::new(Self::build(Some(storage)))
    }

    /// Bridge with no fallback storage; reads as logged out while unregistered
    pub fn detached() -> Arc<Self> {
        Arc::new(Self::build(None))
    }

    fn build(storage: Option<Arc<dyn TokenStorage>>) -> Self {
        Self {
            slot: RwLock::new(None),
            next_id: AtomicU64::new(1),
            storage,
        }
    }

    /// Wire `owner` in, replacing any earlier registration.
    ///
    /// The wiring lasts until the returned guard is dropped or `owner` itself
    /// goes away.
    pub fn register<A>(self: &Arc<Self>, owner: &Arc<A>) -> BridgeRegistration
    where
        A: SessionAccessor + 'static,
    {
        let owner: Weak<A> = Arc::downgrade(owner);
        let owner: Weak<dyn SessionAccessor> = owner;
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);

        let replaced = self.write().replace(Registered { id, owner }).is_some();
        if replaced {
            tracing::debug!(registration = id, "Session owner replaced on bridge");
        } else {
            tracing::debug!(registration = id, "Session owner registered on bridge");
        }

        BridgeRegistration {
            bridge: Arc::downgrade(self),
            id,
        }
    }

    /// Whether a live owner is wired in
    pub fn is_registered(&self) -> bool {
        self.current().is_some()
    }

    fn current(&self) -> Option<Arc<dyn SessionAccessor>> {
        self.read().as_ref().and_then(|r| r.owner.upgrade())
    }

    fn unregister(&self, id: u64) {
        let mut slot = self.write();
        if matches!(&*slot, Some(r) if r.id == id) {
            *slot = None;
            tracing::debug!(registration = id, "Session owner unregistered from bridge");
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, Option<Registered>> {
        self.slot.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Option<Registered>> {
        self.slot.write().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl SessionAccessor for SessionBridge {
    fn get_token(&self) -> Option<AccessToken> {
        match self.current() {
            Some(owner) => owner.get_token(),
            None => self
                .storage
                .as_ref()?
                .get(ACCESS_TOKEN_KEY)
                .map(AccessToken::from),
        }
    }

    async fn trigger_refresh(&self) -> Option<AccessToken> {
        let Some(owner) = self.current() else {
            tracing::debug!("Refresh requested with no session owner registered");
            return None;
        };
        owner.trigger_refresh().await
    }

    async fn force_logout(&self) {
        match self.current() {
            Some(owner) => owner.force_logout().await,
            None => tracing::debug!("Logout requested with no session owner registered"),
        }
    }
}

/// Keeps a bridge registration alive; unregisters on drop
#[must_use = "dropping the registration unregisters the session owner"]
#[derive(Debug)]
pub struct BridgeRegistration {
    bridge: Weak<SessionBridge>,
    id: u64,
}

impl Drop for BridgeRegistration {
    fn drop(&mut self) {
        if let Some(bridge) = self.bridge.upgrade() {
            bridge.unregister(self.id);
        }
    }
}
