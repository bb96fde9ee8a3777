//! API client for the authentication endpoints of the backend.
//!
//! This module provides the `ApiClient` struct used by the login flows and
//! by the `SessionManager` to renew access tokens.

use std::time::Duration;

use reqwest::{header, Client};
use serde::{de::DeserializeOwned, Serialize};
use tracing::debug;

use crate::auth::{AuthBackend, TokenRefresher};
use crate::config::ApiSettings;
use crate::models::{
    Credentials, GuestLogin, RefreshRequest, RefreshResponse, RegisterResponse, Registration, TokenPair, User,
};

use super::ApiError;

// ============================================================================
// Endpoints
// ============================================================================

const LOGIN_PATH: &str = "/api/auth/login/";
const GUEST_LOGIN_PATH: &str = "/api/auth/login-invitado/";
const REGISTER_PATH: &str = "/api/auth/register/";
const REFRESH_PATH: &str = "/api/auth/refresh/";
const LOGOUT_PATH: &str = "/api/auth/logout/";
const CURRENT_USER_PATH: &str = "/api/auth/user/";

/// API client for the front desk backend.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    base_url: String,
}

impl ApiClient {
    /// Create a new API client. Every request carries the configured timeout,
    /// so a stalled network fails the call instead of hanging it.
    pub fn new(settings: &ApiSettings) -> Result<Self, ApiError> {
        let client = Client::builder()
            .timeout(Duration::from_millis(settings.timeout_ms))
            .build()?;

        Ok(Self {
            client,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Check if response is successful, returning an error with body if not.
    async fn check_response(response: reqwest::Response) -> Result<reqwest::Response, ApiError> {
        if response.status().is_success() {
            Ok(response)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(ApiError::from_status(status, &body))
        }
    }

    async fn parse<T: DeserializeOwned>(response: reqwest::Response, url: &str) -> Result<T, ApiError> {
        let bytes = response.bytes().await?;
        serde_json::from_slice(&bytes).map_err(|e| {
            ApiError::InvalidResponse(format!("Failed to parse JSON response from {}: {}", url, e))
        })
    }

    async fn send_post<B: Serialize + ?Sized>(
        &self,
        url: &str,
        body: &B,
        token: Option<&str>,
    ) -> Result<reqwest::Response, ApiError> {
        debug!(url = %url, "POST");

        let mut request = self
            .client
            .post(url)
            .header(header::ACCEPT, "application/json")
            .json(body);
        if let Some(token) = token {
            request = request.bearer_auth(token);
        }

        Self::check_response(request.send().await?).await
    }

    async fn post<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
        token: Option<&str>,
    ) -> Result<T, ApiError> {
        let url = self.url(path);
        let response = self.send_post(&url, body, token).await?;
        Self::parse(response, &url).await
    }

    async fn get<T: DeserializeOwned>(&self, path: &str, token: &str) -> Result<T, ApiError> {
        let url = self.url(path);
        debug!(url = %url, "GET");

        let response = self
            .client
            .get(&url)
            .header(header::ACCEPT, "application/json")
            .bearer_auth(token)
            .send()
            .await?;

        let response = Self::check_response(response).await?;
        Self::parse(response, &url).await
    }
}

impl TokenRefresher for ApiClient {
    async fn refresh(&self, refresh_token: &str) -> Result<RefreshResponse, ApiError> {
        self.post(REFRESH_PATH, &RefreshRequest { refresh: refresh_token }, None)
            .await
    }
}

impl AuthBackend for ApiClient {
    async fn login(&self, credentials: &Credentials) -> Result<TokenPair, ApiError> {
        self.post(LOGIN_PATH, credentials, None).await
    }

    async fn login_guest(&self, guest: &GuestLogin) -> Result<TokenPair, ApiError> {
        self.post(GUEST_LOGIN_PATH, guest, None).await
    }

    async fn register(&self, registration: &Registration) -> Result<RegisterResponse, ApiError> {
        self.post(REGISTER_PATH, registration, None).await
    }

    async fn logout(&self, access_token: Option<&str>, refresh_token: &str) -> Result<(), ApiError> {
        // Blacklisting answers with an empty body on some backends; only the status matters
        let url = self.url(LOGOUT_PATH);
        self.send_post(&url, &RefreshRequest { refresh: refresh_token }, access_token)
            .await?;
        Ok(())
    }

    async fn current_user(&self, access_token: &str) -> Result<User, ApiError> {
        self.get(CURRENT_USER_PATH, access_token).await
    }
}
