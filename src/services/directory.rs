//! User directory - idempotent provisioning of local users by email.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::PgPool;
use std::collections::HashMap;
use thiserror::Error;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::models::User;
use crate::utils::{hash_password, random_alphanumeric, Password};

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("credential generation failed: {0}")]
    Credential(#[source] anyhow::Error),
}

/// Directory of local user records keyed by external email.
///
/// `upsert` is the only provisioning path: repeated calls with the same email
/// never create duplicates, and later calls update only the display name and
/// last-login timestamp.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn upsert(
        &self,
        email: &str,
        display_name: Option<&str>,
    ) -> Result<User, StorageError>;

    async fn find_by_id(&self, user_id: Uuid) -> Result<Option<User>, StorageError>;

    async fn find_by_email(&self, email: &str) -> Result<Option<User>, StorageError>;

    /// Persist the hash of a freshly issued remember token.
    async fn set_remember_token(
        &self,
        user_id: Uuid,
        token_hash: &str,
    ) -> Result<(), StorageError>;
}

fn storage_password_hash() -> Result<String, StorageError> {
    // Random password-equivalent for new accounts; never used to authenticate.
    let password = Password::new(random_alphanumeric(32));
    hash_password(&password).map_err(StorageError::Credential)
}

/// PostgreSQL-backed directory.
pub struct PgUserDirectory {
    pool: PgPool,
}

impl PgUserDirectory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserDirectory for PgUserDirectory {
    async fn upsert(
        &self,
        email: &str,
        display_name: Option<&str>,
    ) -> Result<User, StorageError> {
        let password_hash = storage_password_hash()?;
        let display_name = display_name.unwrap_or(email);

        // Single statement so concurrent first logins for one email cannot
        // race into duplicate rows.
        let user = sqlx::query_as::<_, User>(
            r#"
            INSERT INTO users (user_id, email, display_name, password_hash, last_login_utc, created_utc)
            VALUES ($1, $2, $3, $4, $5, $5)
            ON CONFLICT (email) DO UPDATE
                SET display_name = EXCLUDED.display_name,
                    last_login_utc = EXCLUDED.last_login_utc
            RETURNING user_id, email, display_name, password_hash,
                      remember_token_hash, last_login_utc, created_utc
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(email)
        .bind(display_name)
        .bind(password_hash)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await?;

        Ok(user)
    }

    async fn find_by_id(&self, user_id: Uuid) -> Result<Option<User>, StorageError> {
        let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE user_id = $1")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(user)
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>, StorageError> {
        let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE email = $1")
            .bind(email)
            .fetch_optional(&self.pool)
            .await?;
        Ok(user)
    }

    async fn set_remember_token(
        &self,
        user_id: Uuid,
        token_hash: &str,
    ) -> Result<(), StorageError> {
        sqlx::query("UPDATE users SET remember_token_hash = $2 WHERE user_id = $1")
            .bind(user_id)
            .bind(token_hash)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

/// In-memory directory for tests and local development.
#[derive(Default)]
pub struct MemoryDirectory {
    users: RwLock<HashMap<String, User>>,
}

impl MemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.users.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.users.read().await.is_empty()
    }
}

#[async_trait]
impl UserDirectory for MemoryDirectory {
    async fn upsert(
        &self,
        email: &str,
        display_name: Option<&str>,
    ) -> Result<User, StorageError> {
        let mut users = self.users.write().await;

        if let Some(existing) = users.get_mut(email) {
            existing.display_name = Some(display_name.unwrap_or(email).to_string());
            existing.last_login_utc = Some(Utc::now());
            return Ok(existing.clone());
        }

        let user = User::new(
            email.to_string(),
            Some(display_name.unwrap_or(email).to_string()),
            storage_password_hash()?,
        );
        users.insert(email.to_string(), user.clone());
        Ok(user)
    }

    async fn find_by_id(&self, user_id: Uuid) -> Result<Option<User>, StorageError> {
        let users = self.users.read().await;
        Ok(users.values().find(|u| u.user_id == user_id).cloned())
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>, StorageError> {
        let users = self.users.read().await;
        Ok(users.get(email).cloned())
    }

    async fn set_remember_token(
        &self,
        user_id: Uuid,
        token_hash: &str,
    ) -> Result<(), StorageError> {
        let mut users = self.users.write().await;
        if let Some(user) = users.values_mut().find(|u| u.user_id == user_id) {
            user.remember_token_hash = Some(token_hash.to_string());
        }
        Ok(())
    }
}
