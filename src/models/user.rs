//! User model - local records provisioned from verified IAM identities.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// User entity. Email is the unique join key to the identity provider.
///
/// The password hash exists only to satisfy storage constraints; the sole way
/// to authenticate is through the identity provider. Rows are never deleted
/// by this service.
#[derive(Debug, Clone, FromRow)]
pub struct User {
    pub user_id: Uuid,
    pub email: String,
    pub display_name: Option<String>,
    pub password_hash: String,
    pub remember_token_hash: Option<String>,
    pub last_login_utc: Option<DateTime<Utc>>,
    pub created_utc: DateTime<Utc>,
}

impl User {
    /// Create a new user record for a first-time login.
    pub fn new(email: String, display_name: Option<String>, password_hash: String) -> Self {
        let now = Utc::now();
        Self {
            user_id: Uuid::new_v4(),
            email,
            display_name,
            password_hash,
            remember_token_hash: None,
            last_login_utc: Some(now),
            created_utc: now,
        }
    }

    /// Display name with the email as fallback.
    pub fn name(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.email)
    }

    /// Convert to sanitized response (no credential material).
    pub fn sanitized(&self) -> UserResponse {
        UserResponse::from(self.clone())
    }
}

/// User response for API surfaces (without credential fields).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserResponse {
    pub user_id: Uuid,
    pub email: String,
    pub display_name: Option<String>,
    pub last_login_utc: Option<DateTime<Utc>>,
    pub created_utc: DateTime<Utc>,
}

impl From<User> for UserResponse {
    fn from(u: User) -> Self {
        Self {
            user_id: u.user_id,
            email: u.email,
            display_name: u.display_name,
            last_login_utc: u.last_login_utc,
            created_utc: u.created_utc,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_falls_back_to_email() {
        let user = User::new("user@example.com".to_string(), None, "hash".to_string());
        assert_eq!(user.name(), "user@example.com");

        let named = User::new(
            "user@example.com".to_string(),
            Some("Example User".to_string()),
            "hash".to_string(),
        );
        assert_eq!(named.name(), "Example User");
    }
}
