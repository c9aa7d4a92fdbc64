use dotenvy::dotenv;
use sso_frontend::config::get_configuration;
use sso_frontend::observability::init_tracing;
use sso_frontend::services::{
    directory::PgUserDirectory, iam_client::IamClient, session_auth::AuthContext,
};
use sso_frontend::startup::build_router;
use sso_frontend::{db, AppState};
use std::sync::Arc;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();

    let configuration = get_configuration().map_err(|e| {
        eprintln!("Failed to read configuration: {}", e);
        anyhow::anyhow!("Configuration error: {}", e)
    })?;

    init_tracing("info");
    sso_frontend::services::metrics::init_metrics();

    let pool = db::create_pool(&configuration.database).await?;
    db::run_migrations(&pool).await?;

    let iam = Arc::new(IamClient::new(configuration.iam.clone())?);
    let auth = Arc::new(AuthContext::new(Arc::new(PgUserDirectory::new(pool))));

    // Observability collaborators subscribe to the auth event channel; by
    // default the events are mirrored into the log stream.
    let mut auth_events = auth.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = auth_events.recv().await {
            tracing::info!(event = ?event, "auth event");
        }
    });

    let app = build_router(AppState::new(configuration.clone(), iam, auth));

    let address = format!(
        "{}:{}",
        configuration.server.host, configuration.server.port
    );
    let listener = tokio::net::TcpListener::bind(&address).await.map_err(|e| {
        tracing::error!("Failed to bind TCP listener to {}: {}", address, e);
        anyhow::anyhow!("Failed to bind to address {}: {}", address, e)
    })?;

    info!("Starting sso-frontend on {}", address);
    axum::serve(listener, app).await.map_err(|e| {
        tracing::error!("Server error: {}", e);
        anyhow::anyhow!("Server error: {}", e)
    })?;

    Ok(())
}
