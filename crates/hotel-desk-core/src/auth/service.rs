//! Login, guest login, registration and logout.
//!
//! These flows are the only writers of the token pair besides the
//! `SessionManager`; each one that creates a session restarts the manager
//! so the schedule matches the freshly issued token.

use std::future::Future;
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::api::ApiError;
use crate::models::{
    Credentials, GuestLogin, RegisterResponse, Registration, TokenPair, User, UserType, GUEST_DISPLAY_NAME,
};

use super::clock::{Clock, SystemClock};
use super::refresh::{SessionError, SessionManager, TokenRefresher};
use super::session::{SessionProfile, SessionState};
use super::storage::{
    clear_session, StorageError, TokenStorage, ACCESS_TOKEN_KEY, GUEST_NAME_KEY, REFRESH_TOKEN_KEY,
    USER_TYPE_KEY,
};

/// Authentication endpoints used by the login flows
pub trait AuthBackend: TokenRefresher {
    fn login(
        &self,
        credentials: &Credentials,
    ) -> impl Future<Output = Result<TokenPair, ApiError>> + Send;

    fn login_guest(
        &self,
        guest: &GuestLogin,
    ) -> impl Future<Output = Result<TokenPair, ApiError>> + Send;

    fn register(
        &self,
        registration: &Registration,
    ) -> impl Future<Output = Result<RegisterResponse, ApiError>> + Send;

    /// Blacklist the refresh token on the backend
    fn logout(
        &self,
        access_token: Option<&str>,
        refresh_token: &str,
    ) -> impl Future<Output = Result<(), ApiError>> + Send;

    fn current_user(&self, access_token: &str) -> impl Future<Output = Result<User, ApiError>> + Send;
}

#[derive(Error, Debug)]
pub enum AuthError {
    #[error(transparent)]
    Api(#[from] ApiError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error("Passwords do not match")]
    PasswordMismatch,

    #[error("Not logged in")]
    NotAuthenticated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterOutcome {
    /// The backend issued tokens and the new user is logged in
    SignedIn,
    /// Account created; the user still has to log in
    AccountCreated,
}

pub struct AuthService<A> {
    backend: Arc<A>,
    storage: Arc<dyn TokenStorage>,
    manager: SessionManager<A>,
    clock: Arc<dyn Clock>,
}

impl<A: AuthBackend> AuthService<A> {
    pub fn new(backend: Arc<A>, storage: Arc<dyn TokenStorage>, manager: SessionManager<A>) -> Self {
        Self {
            backend,
            storage,
            manager,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn manager(&self) -> &SessionManager<A> {
        &self.manager
    }

    pub async fn login(&self, credentials: &Credentials) -> Result<(), AuthError> {
        let tokens = self.backend.login(credentials).await?;
        self.begin_session(&tokens, UserType::Normal, None)?;
        info!(username = %credentials.username, "Logged in");
        Ok(())
    }

    pub async fn login_guest(&self, name: Option<&str>) -> Result<(), AuthError> {
        let guest = GuestLogin {
            name: name.map(str::to_string),
        };
        let tokens = self.backend.login_guest(&guest).await?;
        let name = name.unwrap_or(GUEST_DISPLAY_NAME);
        self.begin_session(&tokens, UserType::Guest, Some(name))?;
        info!(guest = name, "Logged in as guest");
        Ok(())
    }

    pub async fn register(&self, registration: &Registration) -> Result<RegisterOutcome, AuthError> {
        if !registration.passwords_match() {
            return Err(AuthError::PasswordMismatch);
        }

        let response = self.backend.register(registration).await?;
        match response.into_token_pair() {
            Some(tokens) => {
                self.begin_session(&tokens, UserType::Normal, None)?;
                info!(username = %registration.username, "Registered and logged in");
                Ok(RegisterOutcome::SignedIn)
            }
            None => {
                info!(username = %registration.username, "Registered, login required");
                Ok(RegisterOutcome::AccountCreated)
            }
        }
    }

    /// End the session. Local state is cleared even if the backend call fails.
    pub async fn logout(&self) {
        self.manager.stop();

        let access = self.storage.get(ACCESS_TOKEN_KEY);
        if let Some(refresh) = self.storage.get(REFRESH_TOKEN_KEY) {
            if let Err(e) = self.backend.logout(access.as_deref(), &refresh).await {
                warn!(error = %e, "Logout request failed, clearing local session anyway");
            }
        }

        clear_session(self.storage.as_ref());
        info!("Logged out");
    }

    /// Current user. Guests get a local record; a rejected access token is
    /// refreshed once and the request retried.
    pub async fn current_user(&self) -> Result<User, AuthError> {
        let access = self
            .storage
            .get(ACCESS_TOKEN_KEY)
            .ok_or(AuthError::NotAuthenticated)?;

        let profile = self.profile();
        if profile.is_guest() {
            return Ok(User::guest(profile.guest_name.as_deref()));
        }

        match self.backend.current_user(&access).await {
            Err(e) if e.is_unauthorized() => {
                debug!("Access token rejected, refreshing before retry");
                let access = self.manager.refresh_now().await?;
                Ok(self.backend.current_user(&access).await?)
            }
            result => Ok(result?),
        }
    }

    pub fn session_state(&self) -> SessionState {
        SessionState::derive(self.storage.as_ref(), self.clock.now())
    }

    pub fn access_token(&self) -> Option<String> {
        self.storage.get(ACCESS_TOKEN_KEY)
    }

    pub fn profile(&self) -> SessionProfile {
        SessionProfile::load(self.storage.as_ref())
    }

    fn begin_session(
        &self,
        tokens: &TokenPair,
        user_type: UserType,
        guest_name: Option<&str>,
    ) -> Result<(), AuthError> {
        if let Err(e) = self.store_session(tokens, user_type, guest_name) {
            clear_session(self.storage.as_ref());
            return Err(e.into());
        }
        self.manager.restart();
        Ok(())
    }

    fn store_session(
        &self,
        tokens: &TokenPair,
        user_type: UserType,
        guest_name: Option<&str>,
    ) -> Result<(), StorageError> {
        self.storage.set(ACCESS_TOKEN_KEY, &tokens.access)?;
        self.storage.set(REFRESH_TOKEN_KEY, &tokens.refresh)?;
        self.storage.set(USER_TYPE_KEY, user_type.as_str())?;
        match guest_name {
            Some(name) if user_type == UserType::Guest => self.storage.set(GUEST_NAME_KEY, name),
            _ => self.storage.remove(GUEST_NAME_KEY),
        }
    }
}
