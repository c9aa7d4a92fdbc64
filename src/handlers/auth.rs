//! SSO login flow: redirect to the IAM server, process its callback, logout.

use axum::{
    extract::{Query, State},
    response::{IntoResponse, Redirect, Response},
    Json,
};
use axum_extra::extract::cookie::CookieJar;
use serde::{Deserialize, Serialize};
use tower_sessions::Session;

use crate::error::AppError;
use crate::services::iam_client::{IamError, VerifiedClaims};
use crate::services::metrics::observe_sso_login;
use crate::services::session_auth::{PreservingBinder, SessionBinder};
use crate::AppState;

/// Structured IAM claims kept in the session for the lifetime of the login.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IamClaims {
    pub sub: Option<String>,
    pub app: Option<String>,
    pub roles: Vec<String>,
    pub perms: Vec<String>,
}

impl From<&VerifiedClaims> for IamClaims {
    fn from(claims: &VerifiedClaims) -> Self {
        Self {
            sub: claims.sub.clone(),
            app: claims.app.clone(),
            roles: claims.roles.clone(),
            perms: claims.perms.clone(),
        }
    }
}

pub const IAM_CLAIMS_KEY: &str = "iam";

#[derive(Deserialize)]
pub struct LoginQuery {
    pub error: Option<String>,
}

/// Send the browser to the IAM server to start the SSO round-trip.
pub async fn login_redirect(
    State(state): State<AppState>,
    Query(query): Query<LoginQuery>,
) -> impl IntoResponse {
    if let Some(error) = query.error {
        tracing::warn!(error = %error, "login requested after failed SSO attempt");
    }

    let callback = format!("{}/auth/callback", state.settings.server.public_url);
    Redirect::to(&state.iam.redirect_url(&callback))
}

#[derive(Deserialize)]
pub struct CallbackQuery {
    pub token: Option<String>,
}

fn token_preview(token: &str) -> String {
    token.chars().take(10).collect()
}

/// IAM callback: verify the one-time token, provision the local user, and
/// bind the session.
///
/// The binding deliberately uses the fixation-preserving binder: the browser
/// round-trips through the IAM domain between redirect and callback, and
/// rotating the identifier at this boundary desynchronizes the session
/// cookie from the server-side record.
pub async fn sso_callback(
    State(state): State<AppState>,
    session: Session,
    jar: CookieJar,
    Query(query): Query<CallbackQuery>,
) -> Result<(CookieJar, Response), AppError> {
    let session_id = session.id().map(|id| id.to_string());
    tracing::info!(
        token = if query.token.is_some() { "present" } else { "missing" },
        session_id = session_id.as_deref().unwrap_or("-"),
        "SSO callback received"
    );

    let token = query
        .token
        .filter(|t| !t.is_empty())
        .ok_or_else(|| AppError::BadRequest(anyhow::anyhow!("Missing token")))?;

    let claims = match state.iam.verify(&token).await {
        Ok(claims) => claims,
        Err(IamError::Unavailable(e)) => {
            tracing::error!(
                token_preview = %token_preview(&token),
                error = %e,
                "IAM server unavailable during token verification"
            );
            observe_sso_login("preserving", "provider_unavailable");
            return Ok((
                jar,
                Redirect::to("/login?error=provider_unavailable").into_response(),
            ));
        }
        Err(e) => {
            // Rejected or malformed; the user sees one generic flag, the
            // provider detail stays in the logs.
            tracing::warn!(
                token_preview = %token_preview(&token),
                error = %e,
                "SSO token verification failed"
            );
            observe_sso_login("preserving", "invalid_token");
            return Ok((
                jar,
                Redirect::to("/login?error=invalid_token").into_response(),
            ));
        }
    };

    let user = state
        .auth
        .directory()
        .upsert(&claims.email, claims.name.as_deref())
        .await?;

    // Claims are staged on the session record before the bind; the binder's
    // single save commits both together.
    session
        .insert(IAM_CLAIMS_KEY, IamClaims::from(&claims))
        .await?;

    let outcome = PreservingBinder
        .bind(&state.auth, &session, &user, true)
        .await?;
    observe_sso_login("preserving", "success");

    tracing::info!(
        user_id = %user.user_id,
        email = %user.email,
        session_id = outcome.session_id.as_deref().unwrap_or("-"),
        "SSO callback OK"
    );

    let jar = match outcome.remember_cookie {
        Some(cookie) => jar.add(cookie.into_cookie()),
        None => jar,
    };

    Ok((jar, Redirect::to("/").into_response()))
}

/// Tear down the login: clear the binding, invalidate the session, rotate
/// the identifier and anti-forgery token.
pub async fn logout(
    State(state): State<AppState>,
    session: Session,
) -> Result<Redirect, AppError> {
    state.auth.logout(&session).await?;
    Ok(Redirect::to("/"))
}

#[derive(Serialize)]
pub struct AuthStatus {
    pub authenticated: bool,
    pub user_id: Option<String>,
    pub email: Option<String>,
    pub session_id: Option<String>,
    pub session_key: String,
    pub iam: Option<IamClaims>,
}

/// Operator-facing snapshot of the guard state for this session.
pub async fn auth_status(
    State(state): State<AppState>,
    session: Session,
) -> Result<Json<AuthStatus>, AppError> {
    let user = state.auth.current_user(&session).await?;
    let iam: Option<IamClaims> = session.get(IAM_CLAIMS_KEY).await?;

    Ok(Json(AuthStatus {
        authenticated: user.is_some(),
        user_id: user.as_ref().map(|u| u.user_id.to_string()),
        email: user.map(|u| u.email),
        session_id: session.id().map(|id| id.to_string()),
        session_key: state.auth.session_key().to_string(),
        iam,
    }))
}
