use axum::{
    extract::State,
    response::{Html, IntoResponse},
};
use tower_sessions::Session;

use crate::error::AppError;
use crate::AppState;

/// Home page: minimal authenticated/anonymous rendering. Page design itself
/// belongs to the presentation layer; this only surfaces the binding state.
pub async fn index(
    State(state): State<AppState>,
    session: Session,
) -> Result<impl IntoResponse, AppError> {
    let body = match state.auth.current_user(&session).await? {
        Some(user) => format!(
            "<html><body><h1>Welcome back, {}</h1>\
             <form method=\"post\" action=\"/logout\"><button>Log out</button></form>\
             </body></html>",
            user.name()
        ),
        None => "<html><body><h1>Welcome</h1><a href=\"/login\">Log in</a></body></html>"
            .to_string(),
    };
    Ok(Html(body))
}

/// Guarded sample resource.
pub async fn dashboard(
    State(state): State<AppState>,
    session: Session,
) -> Result<impl IntoResponse, AppError> {
    let user = state.auth.current_user(&session).await?;
    // The guard admitted this request, so a missing user means the record
    // disappeared between check and render; treat it as unauthorized.
    let user = user.ok_or_else(|| AppError::Unauthorized(anyhow::anyhow!("Not authenticated")))?;

    Ok(Html(format!(
        "<html><body><h1>Dashboard</h1><p>Signed in as {}</p></body></html>",
        user.email
    )))
}

pub async fn health_check() -> &'static str {
    "OK"
}
