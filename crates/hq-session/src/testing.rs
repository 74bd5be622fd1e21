//! In-memory auth API used by unit tests

use hq_core::{
    AccessToken, AuthTransport, HqError, LoginRequest, RefreshToken, RegisterRequest, Result,
    TokenPair, UserProfile,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{Notify, Semaphore};

/// Auth transport with canned answers and call accounting.
///
/// Profiles are keyed by access token; any token without an entry is
/// answered with `Unauthorized`, the way an expired token would be.
pub(crate) struct ScriptedTransport {
    login: Mutex<Result<TokenPair>>,
    register: Mutex<Result<UserProfile>>,
    refresh: Mutex<Result<TokenPair>>,
    profiles: Mutex<HashMap<String, Result<UserProfile>>>,
    refresh_yields: usize,
    gate: Mutex<Option<Arc<Semaphore>>>,
    entered: Arc<Notify>,
    profile_gate: Mutex<Option<Arc<Semaphore>>>,
    profile_entered: Arc<Notify>,
    login_calls: AtomicUsize,
    register_calls: AtomicUsize,
    refresh_seen: Mutex<Vec<String>>,
    me_seen: Mutex<Vec<String>>,
}

impl ScriptedTransport {
    pub(crate) fn new() -> Self {
        Self {
            login: Mutex::new(Err(HqError::Rejected {
                status: 401,
                message: "Incorrect email or password".to_string(),
            })),
            register: Mutex::new(Err(HqError::Rejected {
                status: 400,
                message: "Registration closed".to_string(),
            })),
            refresh: Mutex::new(Err(HqError::Http {
                status: 401,
                message: "Invalid refresh token".to_string(),
            })),
            profiles: Mutex::new(HashMap::new()),
            refresh_yields: 0,
            gate: Mutex::new(None),
            entered: Arc::new(Notify::new()),
            profile_gate: Mutex::new(None),
            profile_entered: Arc::new(Notify::new()),
            login_calls: AtomicUsize::new(0),
            register_calls: AtomicUsize::new(0),
            refresh_seen: Mutex::new(Vec::new()),
            me_seen: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn on_login(self, result: Result<TokenPair>) -> Self {
        *self.login.lock().unwrap() = result;
        self
    }

    pub(crate) fn on_register(self, result: Result<UserProfile>) -> Self {
        *self.register.lock().unwrap() = result;
        self
    }

    pub(crate) fn on_refresh(self, result: Result<TokenPair>) -> Self {
        *self.refresh.lock().unwrap() = result;
        self
    }

    pub(crate) fn with_profile(self, token: &str, profile: UserProfile) -> Self {
        self.profiles
            .lock()
            .unwrap()
            .insert(token.to_string(), Ok(profile));
        self
    }

    pub(crate) fn with_profile_error(self, token: &str, error: HqError) -> Self {
        self.profiles
            .lock()
            .unwrap()
            .insert(token.to_string(), Err(error));
        self
    }

    /// Yield to the executor this many times inside every refresh call
    pub(crate) fn with_refresh_yields(mut self, yields: usize) -> Self {
        self.refresh_yields = yields;
        self
    }

    /// Make refresh calls wait for a permit on the returned semaphore
    pub(crate) fn gate(&self) -> Arc<Semaphore> {
        let gate = Arc::new(Semaphore::new(0));
        *self.gate.lock().unwrap() = Some(gate.clone());
        gate
    }

    /// Notified once a refresh call has been received
    pub(crate) fn refresh_entered(&self) -> Arc<Notify> {
        self.entered.clone()
    }

    /// Make identity calls wait for a permit on the returned semaphore
    pub(crate) fn profile_gate(&self) -> Arc<Semaphore> {
        let gate = Arc::new(Semaphore::new(0));
        *self.profile_gate.lock().unwrap() = Some(gate.clone());
        gate
    }

    /// Notified once an identity call has been received
    pub(crate) fn profile_entered(&self) -> Arc<Notify> {
        self.profile_entered.clone()
    }

    pub(crate) fn login_calls(&self) -> usize {
        self.login_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn register_calls(&self) -> usize {
        self.register_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn refresh_calls(&self) -> usize {
        self.refresh_seen.lock().unwrap().len()
    }

    pub(crate) fn refresh_tokens_seen(&self) -> Vec<String> {
        self.refresh_seen.lock().unwrap().clone()
    }

    pub(crate) fn me_calls(&self) -> usize {
        self.me_seen.lock().unwrap().len()
    }

    pub(crate) fn me_tokens_seen(&self) -> Vec<String> {
        self.me_seen.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl AuthTransport for ScriptedTransport {
    async fn login(&self, _request: &LoginRequest) -> Result<TokenPair> {
        self.login_calls.fetch_add(1, Ordering::SeqCst);
        self.login.lock().unwrap().clone()
    }

    async fn register(&self, _request: &RegisterRequest) -> Result<UserProfile> {
        self.register_calls.fetch_add(1, Ordering::SeqCst);
        self.register.lock().unwrap().clone()
    }

    async fn refresh(&self, refresh_token: &RefreshToken) -> Result<TokenPair> {
        self.refresh_seen
            .lock()
            .unwrap()
            .push(refresh_token.as_str().to_string());
        self.entered.notify_one();

        for _ in 0..self.refresh_yields {
            tokio::task::yield_now().await;
        }

        let gate = self.gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            let _permit = gate.acquire().await.expect("gate closed");
        }

        self.refresh.lock().unwrap().clone()
    }

    async fn fetch_profile(&self, access_token: &AccessToken) -> Result<UserProfile> {
        self.me_seen
            .lock()
            .unwrap()
            .push(access_token.as_str().to_string());
        self.profile_entered.notify_one();

        let gate = self.profile_gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            let _permit = gate.acquire().await.expect("gate closed");
        }

        self.profiles
            .lock()
            .unwrap()
            .get(access_token.as_str())
            .cloned()
            .unwrap_or(Err(HqError::Unauthorized))
    }
}
