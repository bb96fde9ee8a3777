//! REST API client module for the front desk backend.
//!
//! This module provides the `ApiClient` for the authentication endpoints
//! of the backend: login, guest login, registration, token refresh,
//! logout and the current-user lookup.
//!
//! The backend issues JWT access tokens paired with opaque refresh tokens.

pub mod client;
pub mod error;

pub use client::ApiClient;
pub use error::ApiError;
