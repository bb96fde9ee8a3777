//! Application configuration management.
//!
//! This module handles loading and saving the application configuration:
//! backend URL, request timeout, refresh margin, last used username and
//! where tokens are kept.
//!
//! Configuration is stored at `~/.config/hotel-desk/config.json`. The
//! `HOTEL_DESK_API_URL` and `HOTEL_DESK_API_TIMEOUT_MS` environment
//! variables take precedence over the file.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::auth::DEFAULT_REFRESH_MARGIN_SECS;

/// Application name used for config/data directory paths
const APP_NAME: &str = "hotel-desk";

/// Config file name
const CONFIG_FILE: &str = "config.json";

pub const API_URL_ENV: &str = "HOTEL_DESK_API_URL";
pub const API_TIMEOUT_ENV: &str = "HOTEL_DESK_API_TIMEOUT_MS";

pub const DEFAULT_API_URL: &str = "http://localhost:8000";
pub const DEFAULT_API_TIMEOUT_MS: u64 = 10_000;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    pub api_url: Option<String>,
    pub request_timeout_ms: Option<u64>,
    pub refresh_margin_secs: Option<u64>,
    pub last_username: Option<String>,
    #[serde(default)]
    pub use_keyring: bool,
}

/// Resolved connection settings for the API client
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiSettings {
    pub base_url: String,
    pub timeout_ms: u64,
}

impl Config {
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        if path.exists() {
            let contents = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read config file {}", path.display()))?;
            serde_json::from_str(&contents).context("Failed to parse config file")
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self) -> Result<()> {
        let path = Self::config_path()?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    /// Directory for the session file and logs
    pub fn data_dir(&self) -> Result<PathBuf> {
        let data_dir = dirs::data_local_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find data directory"))?;
        Ok(data_dir.join(APP_NAME))
    }

    /// API settings with environment overrides applied
    pub fn api_settings(&self) -> ApiSettings {
        self.api_settings_with(
            std::env::var(API_URL_ENV).ok(),
            std::env::var(API_TIMEOUT_ENV).ok(),
        )
    }

    fn api_settings_with(&self, env_url: Option<String>, env_timeout: Option<String>) -> ApiSettings {
        let base_url = env_url
            .filter(|url| !url.trim().is_empty())
            .or_else(|| self.api_url.clone())
            .unwrap_or_else(|| DEFAULT_API_URL.to_string());

        let env_timeout = env_timeout.and_then(|raw| match raw.trim().parse::<u64>() {
            Ok(ms) if ms > 0 => Some(ms),
            _ => {
                warn!(value = %raw, "Ignoring invalid {}", API_TIMEOUT_ENV);
                None
            }
        });
        let timeout_ms = env_timeout
            .or(self.request_timeout_ms)
            .unwrap_or(DEFAULT_API_TIMEOUT_MS);

        ApiSettings { base_url, timeout_ms }
    }

    /// Refresh margin; zero would refresh at expiry, so it is ignored
    pub fn refresh_margin(&self) -> Duration {
        let secs = match self.refresh_margin_secs {
            Some(0) => {
                warn!("Ignoring refresh_margin_secs = 0");
                DEFAULT_REFRESH_MARGIN_SECS
            }
            Some(secs) => secs,
            None => DEFAULT_REFRESH_MARGIN_SECS,
        };
        Duration::from_secs(secs)
    }
}
