//! Test doubles shared by the unit tests.

use std::collections::VecDeque;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, TimeDelta, TimeZone, Utc};
use tokio::sync::Notify;

use crate::api::ApiError;
use crate::auth::clock::Clock;
use crate::auth::refresh::TokenRefresher;
use crate::auth::service::AuthBackend;
use crate::auth::storage::{MemoryStorage, StorageError, TokenStorage};
use crate::models::{Credentials, GuestLogin, RefreshResponse, RegisterResponse, Registration, TokenPair, User};

/// Wall-clock instant the paused test clock starts at
pub fn epoch() -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000, 0).unwrap()
}

pub fn jwt_with_payload(payload: &str) -> String {
    format!(
        "{}.{}.signature",
        URL_SAFE_NO_PAD.encode(r#"{"alg":"HS256","typ":"JWT"}"#),
        URL_SAFE_NO_PAD.encode(payload)
    )
}

/// Access token expiring at `exp` (seconds since the Unix epoch)
pub fn jwt(exp: i64) -> String {
    jwt_with_payload(&format!(r#"{{"token_type":"access","exp":{},"user_id":7}}"#, exp))
}

/// Let spawned tasks run until they block again
pub async fn settle() {
    for _ in 0..16 {
        tokio::task::yield_now().await;
    }
}

/// Wall clock that moves with Tokio's paused test clock
pub struct PausedClock {
    started: tokio::time::Instant,
}

impl PausedClock {
    pub fn new() -> Self {
        Self {
            started: tokio::time::Instant::now(),
        }
    }
}

impl Clock for PausedClock {
    fn now(&self) -> DateTime<Utc> {
        let elapsed = TimeDelta::from_std(self.started.elapsed()).unwrap();
        epoch() + elapsed
    }
}

/// In-memory storage whose writes start failing on demand. Removals keep
/// working so teardown can still clear the tokens.
#[derive(Default)]
pub struct FlakyStorage {
    inner: MemoryStorage,
    fail_writes: AtomicBool,
}

impl FlakyStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_writes(&self) {
        self.fail_writes.store(true, Ordering::SeqCst);
    }
}

impl TokenStorage for FlakyStorage {
    fn get(&self, key: &str) -> Option<String> {
        self.inner.get(key)
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StorageError::Io(io::Error::other("disk full")));
        }
        self.inner.set(key, value)
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.inner.remove(key)
    }
}

type Scripted<T> = Mutex<VecDeque<Result<T, ApiError>>>;

/// Backend that replays scripted responses and records the calls made
#[derive(Default)]
pub struct FakeBackend {
    refresh_responses: Scripted<RefreshResponse>,
    login_responses: Scripted<TokenPair>,
    guest_responses: Scripted<TokenPair>,
    register_responses: Scripted<RegisterResponse>,
    logout_responses: Scripted<()>,
    current_user_responses: Scripted<User>,
    gate: Option<Arc<Notify>>,

    refresh_tokens_sent: Mutex<Vec<String>>,
    guest_names: Mutex<Vec<Option<String>>>,
    logged_out_tokens: Mutex<Vec<String>>,
    register_calls: Mutex<usize>,
    current_user_calls: Mutex<usize>,
}

fn next<T>(script: &Scripted<T>) -> Result<T, ApiError> {
    script
        .lock()
        .unwrap()
        .pop_front()
        .unwrap_or_else(|| Err(ApiError::ServerError("no scripted response".into())))
}

impl FakeBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_refresh(self, response: Result<RefreshResponse, ApiError>) -> Self {
        self.refresh_responses.lock().unwrap().push_back(response);
        self
    }

    pub fn with_login(self, response: Result<TokenPair, ApiError>) -> Self {
        self.login_responses.lock().unwrap().push_back(response);
        self
    }

    pub fn with_guest_login(self, response: Result<TokenPair, ApiError>) -> Self {
        self.guest_responses.lock().unwrap().push_back(response);
        self
    }

    pub fn with_register(self, response: Result<RegisterResponse, ApiError>) -> Self {
        self.register_responses.lock().unwrap().push_back(response);
        self
    }

    pub fn with_logout(self, response: Result<(), ApiError>) -> Self {
        self.logout_responses.lock().unwrap().push_back(response);
        self
    }

    pub fn with_current_user(self, response: Result<User, ApiError>) -> Self {
        self.current_user_responses.lock().unwrap().push_back(response);
        self
    }

    /// Hold every refresh response until the returned `Notify` is signalled
    pub fn gated(mut self) -> (Self, Arc<Notify>) {
        let gate = Arc::new(Notify::new());
        self.gate = Some(gate.clone());
        (self, gate)
    }

    pub fn refresh_calls(&self) -> usize {
        self.refresh_tokens_sent.lock().unwrap().len()
    }

    pub fn refresh_tokens_sent(&self) -> Vec<String> {
        self.refresh_tokens_sent.lock().unwrap().clone()
    }

    pub fn guest_names(&self) -> Vec<Option<String>> {
        self.guest_names.lock().unwrap().clone()
    }

    pub fn logged_out_tokens(&self) -> Vec<String> {
        self.logged_out_tokens.lock().unwrap().clone()
    }

    pub fn register_calls(&self) -> usize {
        *self.register_calls.lock().unwrap()
    }

    pub fn current_user_calls(&self) -> usize {
        *self.current_user_calls.lock().unwrap()
    }
}

impl TokenRefresher for FakeBackend {
    async fn refresh(&self, refresh_token: &str) -> Result<RefreshResponse, ApiError> {
        self.refresh_tokens_sent
            .lock()
            .unwrap()
            .push(refresh_token.to_string());
        if let Some(gate) = self.gate.clone() {
            gate.notified().await;
        }
        next(&self.refresh_responses)
    }
}

impl AuthBackend for FakeBackend {
    async fn login(&self, _credentials: &Credentials) -> Result<TokenPair, ApiError> {
        next(&self.login_responses)
    }

    async fn login_guest(&self, guest: &GuestLogin) -> Result<TokenPair, ApiError> {
        self.guest_names.lock().unwrap().push(guest.name.clone());
        next(&self.guest_responses)
    }

    async fn register(&self, _registration: &Registration) -> Result<RegisterResponse, ApiError> {
        *self.register_calls.lock().unwrap() += 1;
        next(&self.register_responses)
    }

    async fn logout(&self, _access_token: Option<&str>, refresh_token: &str) -> Result<(), ApiError> {
        self.logged_out_tokens
            .lock()
            .unwrap()
            .push(refresh_token.to_string());
        self.logout_responses.lock().unwrap().pop_front().unwrap_or(Ok(()))
    }

    async fn current_user(&self, _access_token: &str) -> Result<User, ApiError> {
        *self.current_user_calls.lock().unwrap() += 1;
        next(&self.current_user_responses)
    }
}
