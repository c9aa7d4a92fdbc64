use axum::{
    middleware::{from_fn, from_fn_with_state},
    routing::{get, post},
    Router,
};
use time::Duration;
use tower_http::trace::TraceLayer;
use tower_sessions::{Expiry, MemoryStore, SessionManagerLayer};

use crate::handlers::{
    app::{dashboard, health_check, index},
    auth::{auth_status, login_redirect, logout, sso_callback},
    metrics::metrics,
};
use crate::middleware::{
    auth::require_auth, metrics::track_metrics, tracing::request_id_middleware,
};
use crate::AppState;

pub fn build_router(state: AppState) -> Router {
    // Session setup. The store is the external collaborator here; MemoryStore
    // suffices for a single instance, a keyed backend slots in behind the
    // same layer.
    let session_store = MemoryStore::default();
    let session_layer = SessionManagerLayer::new(session_store)
        .with_secure(false) // Set to true in production with HTTPS
        .with_expiry(Expiry::OnInactivity(Duration::hours(24)));

    let guarded = Router::new()
        .route("/dashboard", get(dashboard))
        .route("/logout", post(logout))
        .route_layer(from_fn_with_state(state.auth.clone(), require_auth));

    Router::new()
        .route("/", get(index))
        .route("/health", get(health_check))
        .route("/metrics", get(metrics))
        .route("/login", get(login_redirect))
        .route("/auth/callback", get(sso_callback))
        .route("/auth/status", get(auth_status))
        .merge(guarded)
        .layer(session_layer)
        .layer(from_fn(track_metrics))
        .layer(
            TraceLayer::new_for_http().make_span_with(|request: &axum::http::Request<_>| {
                let request_id = request
                    .headers()
                    .get("x-request-id")
                    .and_then(|value| value.to_str().ok())
                    .unwrap_or("-");

                tracing::info_span!(
                    "http_request",
                    request_id = %request_id,
                    method = %request.method(),
                    uri = %request.uri(),
                )
            }),
        )
        .layer(from_fn(request_id_middleware))
        .with_state(state)
}
