use keyring::Entry;
use tracing::debug;

use super::storage::{StorageError, TokenStorage};

/// Default keychain service name
pub const SERVICE_NAME: &str = "hotel-desk";

/// Token storage in the OS keychain, one entry per key
pub struct KeyringStorage {
    service: String,
}

impl KeyringStorage {
    pub fn new() -> Self {
        Self::with_service(SERVICE_NAME)
    }

    pub fn with_service(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }

    fn entry(&self, key: &str) -> Result<Entry, StorageError> {
        Ok(Entry::new(&self.service, key)?)
    }
}

impl Default for KeyringStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl TokenStorage for KeyringStorage {
    fn get(&self, key: &str) -> Option<String> {
        match self.entry(key).and_then(|entry| Ok(entry.get_password()?)) {
            Ok(value) => Some(value),
            Err(StorageError::Keyring(keyring::Error::NoEntry)) => None,
            Err(e) => {
                debug!(key, error = %e, "Failed to read keychain entry");
                None
            }
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.entry(key)?.set_password(value)?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        match self.entry(key)?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
