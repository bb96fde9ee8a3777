//! Authentication module for managing the user session.
//!
//! This module provides:
//! - `SessionManager`: proactive access-token renewal with a single timer
//! - `AuthService`: login, guest login, registration and logout flows
//! - `TokenStorage`: key-value persistence for the token pair, backed by
//!   memory, a JSON file or the OS keychain
//! - token decoding and the derived `SessionState`

pub mod clock;
pub mod credentials;
pub mod refresh;
pub mod service;
pub mod session;
pub mod storage;
pub mod token;

pub use clock::{Clock, SystemClock};
pub use credentials::KeyringStorage;
pub use refresh::{
    Phase, SessionError, SessionEvent, SessionManager, TerminationReason, TokenRefresher,
    DEFAULT_REFRESH_MARGIN_SECS,
};
pub use service::{AuthBackend, AuthError, AuthService, RegisterOutcome};
pub use session::{SessionProfile, SessionState};
pub use storage::{FileStorage, MemoryStorage, StorageError, TokenStorage};
