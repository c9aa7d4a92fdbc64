//! Auth session manager: binds a verified identity to the local session.
//!
//! Binding comes in two modes, selected explicitly by the caller through the
//! [`SessionBinder`] strategy:
//!
//! - [`RotatingBinder`] issues a fresh session identifier at bind time, the
//!   usual defense against session fixation.
//! - [`PreservingBinder`] keeps the existing identifier. The SSO round-trip
//!   bounces the browser through the IAM domain between redirect and
//!   callback, and rotating at that boundary desynchronizes the session
//!   cookie from the server-side record. Whether rotation-at-bind is unsafe
//!   in general or only across that hop is unresolved; both modes stay
//!   first-class and the callback handler opts into preservation explicitly.
//!
//! Logout has no preserving variant: it always invalidates the session and
//! rotates both the identifier and the anti-forgery token.

use async_trait::async_trait;
use axum_extra::extract::cookie::Cookie;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::broadcast;
use tower_sessions::Session;
use uuid::Uuid;

use crate::models::User;
use crate::services::directory::{StorageError, UserDirectory};
use crate::utils::{random_alphanumeric, sha256_hex};

pub const DEFAULT_GUARD: &str = "web";

const CSRF_KEY: &str = "_token";
const CSRF_TOKEN_LEN: usize = 40;
const REMEMBER_TOKEN_LEN: usize = 60;
const REMEMBER_COOKIE_DAYS: i64 = 180;

/// Session key the bound user id lives under. Derived from the guard name so
/// binder and guard can never disagree; stable across the deployment.
pub fn session_key(guard: &str) -> String {
    format!("login_{}_{}", guard, sha256_hex(guard))
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("session error: {0}")]
    Session(#[from] tower_sessions::session::Error),
}

/// Forensic trail for login/logout, emitted regardless of rotation mode so
/// operators can spot fixation anomalies after the fact.
#[derive(Debug, Clone)]
pub enum AuthEvent {
    Login {
        user_id: Uuid,
        previous_session_id: Option<String>,
        session_id: Option<String>,
        rotated: bool,
        remember: bool,
    },
    Logout {
        user_id: Option<Uuid>,
        previous_session_id: Option<String>,
        session_id: Option<String>,
    },
}

/// Long-lived remember-me cookie scheduled by a bind with `remember`.
#[derive(Debug, Clone)]
pub struct RememberCookie {
    pub name: String,
    pub value: String,
}

impl RememberCookie {
    pub fn into_cookie(self) -> Cookie<'static> {
        Cookie::build((self.name, self.value))
            .path("/")
            .http_only(true)
            .secure(true)
            .max_age(time::Duration::days(REMEMBER_COOKIE_DAYS))
            .build()
    }
}

/// Result of a bind, with both identifiers for the audit trail.
#[derive(Debug)]
pub struct BindOutcome {
    pub previous_session_id: Option<String>,
    pub session_id: Option<String>,
    pub rotated: bool,
    pub remember_cookie: Option<RememberCookie>,
}

#[derive(Debug)]
pub struct LogoutOutcome {
    pub user_id: Option<Uuid>,
    pub previous_session_id: Option<String>,
    pub session_id: Option<String>,
}

/// Request-scoped entry point to auth state. Passed explicitly through
/// application state; there is no process-wide singleton.
pub struct AuthContext {
    directory: Arc<dyn UserDirectory>,
    guard: String,
    key: String,
    events: broadcast::Sender<AuthEvent>,
}

impl AuthContext {
    pub fn new(directory: Arc<dyn UserDirectory>) -> Self {
        Self::with_guard(directory, DEFAULT_GUARD)
    }

    pub fn with_guard(directory: Arc<dyn UserDirectory>, guard: &str) -> Self {
        let (events, _) = broadcast::channel(16);
        Self {
            directory,
            guard: guard.to_string(),
            key: session_key(guard),
            events,
        }
    }

    pub fn directory(&self) -> &Arc<dyn UserDirectory> {
        &self.directory
    }

    pub fn session_key(&self) -> &str {
        &self.key
    }

    /// Subscribe to login/logout events.
    pub fn subscribe(&self) -> broadcast::Receiver<AuthEvent> {
        self.events.subscribe()
    }

    /// The bound user id, if any. `None` means the session is anonymous.
    pub async fn current_user_id(&self, session: &Session) -> Result<Option<Uuid>, AuthError> {
        Ok(session.get::<Uuid>(&self.key).await?)
    }

    /// The bound user record, if any.
    pub async fn current_user(&self, session: &Session) -> Result<Option<User>, AuthError> {
        match self.current_user_id(session).await? {
            Some(user_id) => Ok(self.directory.find_by_id(user_id).await?),
            None => Ok(None),
        }
    }

    /// Clear the binding, invalidate the session, and rotate both the
    /// identifier and the anti-forgery token. Always rotates.
    pub async fn logout(&self, session: &Session) -> Result<LogoutOutcome, AuthError> {
        let user_id = self.current_user_id(session).await?;
        let previous_session_id = session.id().map(|id| id.to_string());

        tracing::info!(
            user_id = ?user_id,
            session_id = previous_session_id.as_deref().unwrap_or("-"),
            "logout initiated"
        );

        // Invalidation must complete before a replacement identifier exists,
        // so the old identifier never overlaps with the new one.
        session.remove::<Uuid>(&self.key).await?;
        session.flush().await?;
        // flush() empties the record and deletes it from the store, but the
        // cached record keeps its old identifier and save() would re-create
        // the session under it. Cycle before saving so the replacement
        // session gets a fresh identifier.
        session.cycle_id().await?;

        session
            .insert(CSRF_KEY, random_alphanumeric(CSRF_TOKEN_LEN))
            .await?;
        session.save().await?;

        let session_id = session.id().map(|id| id.to_string());
        tracing::info!(
            previous_user_id = ?user_id,
            old_session_id = previous_session_id.as_deref().unwrap_or("-"),
            new_session_id = session_id.as_deref().unwrap_or("-"),
            "logout completed"
        );

        let outcome = LogoutOutcome {
            user_id,
            previous_session_id,
            session_id,
        };
        let _ = self.events.send(AuthEvent::Logout {
            user_id: outcome.user_id,
            previous_session_id: outcome.previous_session_id.clone(),
            session_id: outcome.session_id.clone(),
        });

        Ok(outcome)
    }

    /// The anti-forgery token currently held by the session.
    pub async fn csrf_token(&self, session: &Session) -> Result<Option<String>, AuthError> {
        Ok(session.get::<String>(CSRF_KEY).await?)
    }

    async fn bind(
        &self,
        session: &Session,
        user: &User,
        remember: bool,
        rotate: bool,
    ) -> Result<BindOutcome, AuthError> {
        // Pre-bind identifier is recorded for the audit trail only; a lazy
        // session that was never saved has no identifier yet.
        let previous_session_id = session.id().map(|id| id.to_string());

        session.insert(&self.key, user.user_id).await?;

        if rotate {
            // Fresh identifier; the session record (claims included) is
            // carried over to the new identifier.
            session.cycle_id().await?;
        }

        let remember_cookie = if remember {
            Some(self.issue_remember_cookie(user).await?)
        } else {
            None
        };

        // Writes are staged on the in-memory record; this single save commits
        // them and materializes the post-bind identifier.
        session.save().await?;
        let session_id = session.id().map(|id| id.to_string());

        tracing::info!(
            user_id = %user.user_id,
            email = %user.email,
            session_id_before = previous_session_id.as_deref().unwrap_or("-"),
            session_id_after = session_id.as_deref().unwrap_or("-"),
            rotated = rotate,
            remember = remember,
            "session bound"
        );

        let _ = self.events.send(AuthEvent::Login {
            user_id: user.user_id,
            previous_session_id: previous_session_id.clone(),
            session_id: session_id.clone(),
            rotated: rotate,
            remember,
        });

        Ok(BindOutcome {
            previous_session_id,
            session_id,
            rotated: rotate,
            remember_cookie,
        })
    }

    async fn issue_remember_cookie(&self, user: &User) -> Result<RememberCookie, AuthError> {
        // Token is rotated on every re-issue; only its hash is persisted.
        let token = random_alphanumeric(REMEMBER_TOKEN_LEN);
        self.directory
            .set_remember_token(user.user_id, &sha256_hex(&token))
            .await?;

        Ok(RememberCookie {
            name: format!("remember_{}_{}", self.guard, sha256_hex(&self.guard)),
            value: format!("{}|{}|{}", user.user_id, token, user.password_hash),
        })
    }
}

/// Strategy for establishing the user binding. Callers pick the
/// implementation explicitly; there is no runtime mode detection.
#[async_trait]
pub trait SessionBinder: Send + Sync {
    async fn bind(
        &self,
        ctx: &AuthContext,
        session: &Session,
        user: &User,
        remember: bool,
    ) -> Result<BindOutcome, AuthError>;
}

/// Standard mode: rotate the session identifier at bind time.
pub struct RotatingBinder;

#[async_trait]
impl SessionBinder for RotatingBinder {
    async fn bind(
        &self,
        ctx: &AuthContext,
        session: &Session,
        user: &User,
        remember: bool,
    ) -> Result<BindOutcome, AuthError> {
        ctx.bind(session, user, remember, true).await
    }
}

/// Fixation-preserving mode: bind under the existing identifier.
///
/// Used for the post-IAM-redirect binding step, where rotation breaks the
/// redirect round-trip. The skipped rotation is a deliberate branch, not an
/// omission.
pub struct PreservingBinder;

#[async_trait]
impl SessionBinder for PreservingBinder {
    async fn bind(
        &self,
        ctx: &AuthContext,
        session: &Session,
        user: &User,
        remember: bool,
    ) -> Result<BindOutcome, AuthError> {
        ctx.bind(session, user, remember, false).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::directory::MemoryDirectory;
    use tower_sessions::MemoryStore;

    fn context() -> (AuthContext, Arc<MemoryDirectory>) {
        let directory = Arc::new(MemoryDirectory::new());
        let ctx = AuthContext::new(directory.clone());
        (ctx, directory)
    }

    /// A session that already has an identifier, like a visitor who browsed
    /// before logging in.
    async fn materialized_session() -> Session {
        let store = Arc::new(MemoryStore::default());
        let session = Session::new(None, store, None);
        session.insert("visited", true).await.unwrap();
        session.save().await.unwrap();
        assert!(session.id().is_some());
        session
    }

    #[tokio::test]
    async fn preserving_bind_keeps_the_session_identifier() {
        let (ctx, directory) = context();
        let user = directory.upsert("user@example.com", None).await.unwrap();
        let session = materialized_session().await;
        let before = session.id();

        let outcome = PreservingBinder
            .bind(&ctx, &session, &user, false)
            .await
            .unwrap();

        assert_eq!(session.id(), before);
        assert!(!outcome.rotated);
        assert_eq!(outcome.previous_session_id, outcome.session_id);
        assert_eq!(
            ctx.current_user_id(&session).await.unwrap(),
            Some(user.user_id)
        );
    }

    #[tokio::test]
    async fn rotating_bind_changes_the_session_identifier() {
        let (ctx, directory) = context();
        let user = directory.upsert("user@example.com", None).await.unwrap();
        let session = materialized_session().await;
        let before = session.id();

        let outcome = RotatingBinder
            .bind(&ctx, &session, &user, false)
            .await
            .unwrap();

        assert_ne!(session.id(), before);
        assert!(outcome.rotated);
        assert_ne!(outcome.previous_session_id, outcome.session_id);
        // Rotation re-keys the record; data set before the bind survives.
        assert_eq!(session.get::<bool>("visited").await.unwrap(), Some(true));
        assert_eq!(
            ctx.current_user_id(&session).await.unwrap(),
            Some(user.user_id)
        );
    }

    #[tokio::test]
    async fn rebinding_the_same_user_is_idempotent() {
        let (ctx, directory) = context();
        let user = directory.upsert("user@example.com", None).await.unwrap();
        let session = materialized_session().await;

        PreservingBinder
            .bind(&ctx, &session, &user, false)
            .await
            .unwrap();
        let id_after_first = session.id();

        PreservingBinder
            .bind(&ctx, &session, &user, false)
            .await
            .unwrap();

        assert_eq!(session.id(), id_after_first);
        assert_eq!(
            ctx.current_user_id(&session).await.unwrap(),
            Some(user.user_id)
        );
    }

    #[tokio::test]
    async fn logout_clears_binding_and_rotates_everything() {
        let (ctx, directory) = context();
        let user = directory.upsert("user@example.com", None).await.unwrap();
        let session = materialized_session().await;

        PreservingBinder
            .bind(&ctx, &session, &user, false)
            .await
            .unwrap();
        session
            .insert(CSRF_KEY, random_alphanumeric(CSRF_TOKEN_LEN))
            .await
            .unwrap();
        let token_before = ctx.csrf_token(&session).await.unwrap();
        let id_before = session.id();

        let outcome = ctx.logout(&session).await.unwrap();

        assert_eq!(outcome.user_id, Some(user.user_id));
        assert_eq!(ctx.current_user_id(&session).await.unwrap(), None);
        assert_ne!(session.id(), id_before);
        assert_ne!(ctx.csrf_token(&session).await.unwrap(), token_before);
        // Invalidation drops all prior session data, not just the binding.
        assert_eq!(session.get::<bool>("visited").await.unwrap(), None);
    }

    #[tokio::test]
    async fn logout_retires_the_old_session_identifier() {
        let (ctx, directory) = context();
        let user = directory.upsert("user@example.com", None).await.unwrap();
        let store = Arc::new(MemoryStore::default());
        let session = Session::new(None, store.clone(), None);
        session.insert("visited", true).await.unwrap();
        session.save().await.unwrap();

        PreservingBinder
            .bind(&ctx, &session, &user, false)
            .await
            .unwrap();
        let old_id = session.id();

        ctx.logout(&session).await.unwrap();

        // A fresh identifier was issued, not the old one re-saved.
        assert!(session.id().is_some());
        assert_ne!(session.id(), old_id);

        // The retired identifier no longer resolves to a live record.
        let revived = Session::new(old_id, store, None);
        assert_eq!(
            revived.get::<Uuid>(ctx.session_key()).await.unwrap(),
            None
        );
        assert_eq!(revived.get::<bool>("visited").await.unwrap(), None);
    }

    #[tokio::test]
    async fn remember_bind_issues_cookie_and_persists_hash() {
        let (ctx, directory) = context();
        let user = directory.upsert("user@example.com", None).await.unwrap();
        let session = materialized_session().await;

        let outcome = PreservingBinder
            .bind(&ctx, &session, &user, true)
            .await
            .unwrap();

        let cookie = outcome.remember_cookie.expect("remember cookie scheduled");
        let parts: Vec<&str> = cookie.value.splitn(3, '|').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], user.user_id.to_string());
        assert_eq!(parts[2], user.password_hash);

        let reloaded = directory.find_by_id(user.user_id).await.unwrap().unwrap();
        assert_eq!(
            reloaded.remember_token_hash.as_deref(),
            Some(sha256_hex(parts[1]).as_str())
        );
    }

    #[tokio::test]
    async fn login_event_carries_both_identifiers() {
        let (ctx, directory) = context();
        let user = directory.upsert("user@example.com", None).await.unwrap();
        let session = materialized_session().await;
        let mut events = ctx.subscribe();

        let outcome = RotatingBinder
            .bind(&ctx, &session, &user, false)
            .await
            .unwrap();

        match events.try_recv().unwrap() {
            AuthEvent::Login {
                user_id,
                previous_session_id,
                session_id,
                rotated,
                ..
            } => {
                assert_eq!(user_id, user.user_id);
                assert_eq!(previous_session_id, outcome.previous_session_id);
                assert_eq!(session_id, outcome.session_id);
                assert!(rotated);
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn session_key_is_stable_and_guard_scoped() {
        assert_eq!(session_key("web"), session_key("web"));
        assert_ne!(session_key("web"), session_key("api"));
        assert!(session_key("web").starts_with("login_web_"));
    }
}
