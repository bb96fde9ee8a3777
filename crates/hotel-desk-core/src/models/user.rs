use serde::{Deserialize, Serialize};

/// Display name used for guest sessions that did not give a name
pub const GUEST_DISPLAY_NAME: &str = "INVITADO";

/// Current user as returned by `GET /api/auth/user/`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    #[serde(default)]
    pub id: Option<i64>,
    pub username: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub rol: Option<String>,
    #[serde(default)]
    pub is_staff: bool,
    #[serde(default)]
    pub is_superuser: bool,
    #[serde(skip)]
    pub is_guest: bool,
}

impl User {
    /// Local record for a guest session; guests have no backend account
    pub fn guest(name: Option<&str>) -> Self {
        Self {
            id: None,
            username: name.unwrap_or(GUEST_DISPLAY_NAME).to_string(),
            email: None,
            first_name: None,
            last_name: None,
            rol: None,
            is_staff: false,
            is_superuser: false,
            is_guest: true,
        }
    }

    pub fn role(&self) -> UserRole {
        if self.is_guest {
            return UserRole::Employee;
        }
        if self.is_staff || self.is_superuser || self.rol.as_deref() == Some("ADMIN") {
            UserRole::Admin
        } else {
            UserRole::Employee
        }
    }

    pub fn full_name(&self) -> String {
        let first = self.first_name.as_deref().unwrap_or("").trim();
        let last = self.last_name.as_deref().unwrap_or("").trim();
        match (first.is_empty(), last.is_empty()) {
            (true, true) => self.username.clone(),
            (false, true) => first.to_string(),
            (true, false) => last.to_string(),
            (false, false) => format!("{} {}", first, last),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserRole {
    Admin,
    Employee,
}

impl UserRole {
    pub fn display_name(&self) -> &'static str {
        match self {
            UserRole::Admin => "admin",
            UserRole::Employee => "empleado",
        }
    }
}

/// Kind of session stored alongside the tokens
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserType {
    Normal,
    Guest,
}

impl UserType {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserType::Normal => "normal",
            UserType::Guest => "invitado",
        }
    }

    pub fn from_str(s: Option<&str>) -> Option<Self> {
        match s? {
            "normal" => Some(UserType::Normal),
            "invitado" => Some(UserType::Guest),
            _ => None,
        }
    }
}
