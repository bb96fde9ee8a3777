//! Core library for the hotel front desk client.
//!
//! Talks to the backend's authentication endpoints, keeps the access/refresh
//! token pair in storage and renews the access token before it expires.

pub mod api;
pub mod auth;
pub mod config;
pub mod models;

#[cfg(test)]
mod testing;

pub use api::{ApiClient, ApiError};
pub use auth::{AuthService, SessionEvent, SessionManager, SessionState};
pub use config::Config;
