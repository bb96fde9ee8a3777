//! Data models for the authentication API.
//!
//! Request and response bodies exchanged with the backend, plus the
//! current-user record and the role derived from it.

pub mod auth;
pub mod user;

pub use auth::{Credentials, GuestLogin, RefreshRequest, RefreshResponse, RegisterResponse, Registration, TokenPair};
pub use user::{User, UserRole, UserType, GUEST_DISPLAY_NAME};
