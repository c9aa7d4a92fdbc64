//! Route guard: rejects unauthenticated requests before protected handlers.

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::{IntoResponse, Redirect, Response},
};
use std::sync::Arc;
use tower_sessions::Session;

use crate::error::AppError;
use crate::services::session_auth::AuthContext;

/// Pure function of the bound-user session key: authenticated requests pass
/// through unchanged, anonymous ones are redirected to `/login`. Session
/// materialization is lazy and inherited from the session layer.
pub async fn require_auth(
    State(auth): State<Arc<AuthContext>>,
    session: Session,
    request: Request,
    next: Next,
) -> Response {
    match auth.current_user_id(&session).await {
        Ok(Some(user_id)) => {
            tracing::debug!(
                user_id = %user_id,
                path = %request.uri().path(),
                "request authenticated"
            );
            next.run(request).await
        }
        Ok(None) => {
            tracing::info!(
                path = %request.uri().path(),
                session_id = %session.id().map(|id| id.to_string()).unwrap_or_else(|| "-".to_string()),
                "unauthenticated request, redirecting to login"
            );
            Redirect::to("/login").into_response()
        }
        Err(e) => AppError::from(e).into_response(),
    }
}
