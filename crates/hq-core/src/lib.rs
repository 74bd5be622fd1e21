//! Hypequest Core - Session types, traits, and shared configuration
//!
//! This crate defines the abstractions used by the session layer:
//! - Opaque bearer credentials and the token pair returned by the auth API
//! - The user profile returned by the identity endpoint
//! - Wire payloads for every auth endpoint
//! - Common error types
//! - Seam traits for the auth transport, credential storage, and the
//!   accessor bridge used by code outside the session owner
//! - Configuration management

pub mod config;

pub use config::{ApiConfig, AppConfig, ConfigError, LoggingConfig, StorageBackend, StorageConfig};

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

/// Core error types for session operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HqError {
    /// Login or registration input was refused by the server.
    #[error("{message}")]
    Rejected { status: u16, message: String },

    #[error("Not authorized")]
    Unauthorized,

    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Malformed response from {endpoint}: {message}")]
    MalformedResponse { endpoint: String, message: String },

    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<ConfigError> for HqError {
    fn from(err: ConfigError) -> Self {
        HqError::Config(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, HqError>;

// ============================================================================
// Credentials
// ============================================================================

macro_rules! opaque_token {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl std::fmt::Debug for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, concat!(stringify!($name), "(***)"))
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }
    };
}

opaque_token!(
    /// Short-lived bearer credential presented on every authorized call.
    ///
    /// Never decoded; expiry is discovered when the server answers 401.
    AccessToken
);

opaque_token!(
    /// Longer-lived credential used solely to mint a new access token
    RefreshToken
);

/// Token pair returned by login and refresh
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenPair {
    pub access_token: AccessToken,
    pub refresh_token: RefreshToken,
}

impl TokenPair {
    pub fn new(access: impl Into<String>, refresh: impl Into<String>) -> Self {
        Self {
            access_token: AccessToken::new(access),
            refresh_token: RefreshToken::new(refresh),
        }
    }
}

// ============================================================================
// Identity
// ============================================================================

/// User record returned by `/api/auth/me` and `/api/auth/register`
///
/// Only the fields the client reads are typed, and only `id` is required.
/// Everything else the server sends is kept verbatim in `extra`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    #[serde(deserialize_with = "id_as_string")]
    pub id: String,

    #[serde(default)]
    pub email: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,

    /// Creation timestamp exactly as the server sent it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,

    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl UserProfile {
    pub fn new(id: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            email: email.into(),
            display_name: None,
            created_at: None,
            extra: serde_json::Map::new(),
        }
    }

    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }

    /// Name to greet the user with
    pub fn label(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.email)
    }

    /// Creation time, if `created_at` parses as RFC 3339 or as a naive
    /// timestamp (read as UTC)
    pub fn created(&self) -> Option<DateTime<Utc>> {
        let raw = self.created_at.as_deref()?;
        if let Ok(at) = DateTime::parse_from_rfc3339(raw) {
            return Some(at.with_timezone(&Utc));
        }
        NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
            .ok()
            .map(|at| at.and_utc())
    }
}

/// Accept numeric or string ids; the client treats both as opaque.
fn id_as_string<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::String(s) => Ok(s),
        serde_json::Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "expected string or number id, got {other}"
        ))),
    }
}

/// Terminal outcome of resolving a session
#[derive(Debug, Clone, PartialEq)]
pub enum SessionState {
    Authenticated(UserProfile),
    Unauthenticated,
}

impl SessionState {
    pub fn is_authenticated(&self) -> bool {
        matches!(self, SessionState::Authenticated(_))
    }

    pub fn user(&self) -> Option<&UserProfile> {
        match self {
            SessionState::Authenticated(user) => Some(user),
            SessionState::Unauthenticated => None,
        }
    }
}

// ============================================================================
// Wire payloads
// ============================================================================

/// Body of `POST /api/auth/login/json`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

/// Body of `POST /api/auth/register`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
    pub display_name: String,
}

impl RegisterRequest {
    /// Credentials to sign in with once the account exists
    pub fn login(&self) -> LoginRequest {
        LoginRequest {
            email: self.email.clone(),
            password: self.password.clone(),
        }
    }
}

/// Body of `POST /api/auth/refresh`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshRequest {
    pub refresh_token: String,
}

/// Error body the auth API sends with non-2xx responses.
///
/// `detail` is either a message string or a list of validation entries
/// carrying a `msg` field.
#[derive(Debug, Clone, Deserialize)]
pub struct ErrorBody {
    pub detail: serde_json::Value,
}

impl ErrorBody {
    /// Human readable message, if the body carries one
    pub fn message(&self) -> Option<String> {
        match &self.detail {
            serde_json::Value::String(s) if !s.is_empty() => Some(s.clone()),
            serde_json::Value::Array(items) => {
                let msgs: Vec<&str> = items
                    .iter()
                    .filter_map(|item| item.get("msg").and_then(|m| m.as_str()))
                    .collect();
                if msgs.is_empty() {
                    None
                } else {
                    Some(msgs.join("; "))
                }
            }
            _ => None,
        }
    }
}

/// Extract the user-facing message from a raw error body
pub fn error_message(status: u16, body: &str) -> String {
    serde_json::from_str::<ErrorBody>(body)
        .ok()
        .and_then(|b| b.message())
        .unwrap_or_else(|| format!("request failed with status {status}"))
}

// ============================================================================
// Traits
// ============================================================================

/// Trait for the auth API the session layer talks to
#[async_trait::async_trait]
pub trait AuthTransport: Send + Sync {
    /// Exchange credentials for a token pair
    async fn login(&self, request: &LoginRequest) -> Result<TokenPair>;

    /// Create an account
    async fn register(&self, request: &RegisterRequest) -> Result<UserProfile>;

    /// Mint a new access token (and possibly a rotated refresh token)
    async fn refresh(&self, refresh_token: &RefreshToken) -> Result<TokenPair>;

    /// Resolve the profile behind an access token
    async fn fetch_profile(&self, access_token: &AccessToken) -> Result<UserProfile>;
}

/// Durable string key/value storage for the token pair.
///
/// Storage is assumed always available; implementations log and swallow
/// their own I/O problems.
pub trait TokenStorage: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;

    fn set(&self, key: &str, value: &str);

    fn remove(&self, key: &str);
}

/// Session operations for call sites that do not own the session
#[async_trait::async_trait]
pub trait SessionAccessor: Send + Sync {
    /// Current access token, if any
    fn get_token(&self) -> Option<AccessToken>;

    /// Renew the access token; `None` means the session is gone
    async fn trigger_refresh(&self) -> Option<AccessToken>;

    /// Drop the session
    async fn force_logout(&self);
}

// ============================================================================
// Tests
// ============================================================================
