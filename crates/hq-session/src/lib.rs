//! Hypequest Session - Token lifecycle for the Hypequest API
//!
//! This crate keeps a signed-in session alive:
//! - Credential store persisting the access/refresh token pair
//! - Single-flight refresh coordinator (one renewal in flight at a time)
//! - Session bootstrap resolving the stored token into a user profile
//! - Authorized request gateway injecting the bearer credential
//! - Accessor bridge for helpers living outside the session owner
//!
//! Renewal failures and unreachable identity checks end in a clean
//! signed-out state rather than a half-authenticated one.

pub mod bootstrap;
pub mod bridge;
pub mod gateway;
pub mod manager;
pub mod refresh;
pub mod storage;
pub mod store;
pub mod transport;

#[cfg(test)]
mod testing;

pub use bootstrap::SessionBootstrapper;
pub use bridge::{BridgeRegistration, SessionBridge};
pub use gateway::{with_bearer, AuthorizedClient};
pub use manager::SessionManager;
pub use refresh::RefreshCoordinator;
pub use storage::{FileStorage, MemoryStorage};
pub use store::{CredentialStore, SessionEpoch, ACCESS_TOKEN_KEY, REFRESH_TOKEN_KEY};
pub use transport::HttpAuthTransport;
