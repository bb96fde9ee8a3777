use chrono::{DateTime, Utc};

use crate::models::{UserType, GUEST_DISPLAY_NAME};

use super::storage::{TokenStorage, ACCESS_TOKEN_KEY, GUEST_NAME_KEY, USER_TYPE_KEY};
use super::token;

/// Session state derived from storage at read time; never persisted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Authenticated,
    Anonymous,
    Expired,
}

impl SessionState {
    /// Derive the state from the stored access token.
    ///
    /// A token that cannot be decoded counts as authenticated; the backend
    /// has the final word on it.
    pub fn derive(storage: &dyn TokenStorage, now: DateTime<Utc>) -> Self {
        let Some(access) = storage.get(ACCESS_TOKEN_KEY) else {
            return SessionState::Anonymous;
        };
        match token::expiration(&access) {
            Ok(expires_at) if expires_at <= now => SessionState::Expired,
            _ => SessionState::Authenticated,
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            SessionState::Authenticated => "authenticated",
            SessionState::Anonymous => "anonymous",
            SessionState::Expired => "expired",
        }
    }
}

/// Who the stored session belongs to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionProfile {
    pub user_type: Option<UserType>,
    pub guest_name: Option<String>,
}

impl SessionProfile {
    pub fn load(storage: &dyn TokenStorage) -> Self {
        Self {
            user_type: UserType::from_str(storage.get(USER_TYPE_KEY).as_deref()),
            guest_name: storage.get(GUEST_NAME_KEY),
        }
    }

    pub fn is_guest(&self) -> bool {
        self.user_type == Some(UserType::Guest)
    }

    pub fn display_name(&self) -> Option<&str> {
        if self.is_guest() {
            Some(self.guest_name.as_deref().unwrap_or(GUEST_DISPLAY_NAME))
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::storage::MemoryStorage;
    use crate::testing::{epoch, jwt};

    #[test]
    fn test_state_without_token_is_anonymous() {
        let storage = MemoryStorage::new();
        assert_eq!(SessionState::derive(&storage, epoch()), SessionState::Anonymous);
    }

    #[test]
    fn test_state_follows_token_expiry() {
        let storage = MemoryStorage::new();
        storage.set(ACCESS_TOKEN_KEY, &jwt(epoch().timestamp() + 60)).unwrap();
        assert_eq!(SessionState::derive(&storage, epoch()), SessionState::Authenticated);

        storage.set(ACCESS_TOKEN_KEY, &jwt(epoch().timestamp())).unwrap();
        assert_eq!(SessionState::derive(&storage, epoch()), SessionState::Expired);
    }

    #[test]
    fn test_undecodable_token_counts_as_authenticated() {
        let storage = MemoryStorage::new();
        storage.set(ACCESS_TOKEN_KEY, "opaque").unwrap();
        assert_eq!(SessionState::derive(&storage, epoch()), SessionState::Authenticated);
    }

    #[test]
    fn test_profile_display_name_for_guests() {
        let storage = MemoryStorage::new();
        storage.set(USER_TYPE_KEY, UserType::Guest.as_str()).unwrap();
        assert_eq!(SessionProfile::load(&storage).display_name(), Some(GUEST_DISPLAY_NAME));

        storage.set(GUEST_NAME_KEY, "Luis").unwrap();
        assert_eq!(SessionProfile::load(&storage).display_name(), Some("Luis"));

        storage.set(USER_TYPE_KEY, UserType::Normal.as_str()).unwrap();
        assert_eq!(SessionProfile::load(&storage).display_name(), None);
    }
}
