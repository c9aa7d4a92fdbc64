pub mod config;
pub mod db;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod observability;
pub mod services;
pub mod startup;
pub mod utils;

use crate::config::Settings;
use crate::services::{iam_client::IamClient, session_auth::AuthContext};
use std::sync::Arc;

/// Shared application state carried by request handlers.
///
/// The auth context replaces any facade-style global access to auth state:
/// every handler that touches the session binding receives it explicitly.
#[derive(Clone)]
pub struct AppState {
    pub settings: Settings,
    pub iam: Arc<IamClient>,
    pub auth: Arc<AuthContext>,
}

impl AppState {
    pub fn new(settings: Settings, iam: Arc<IamClient>, auth: Arc<AuthContext>) -> Self {
        Self {
            settings,
            iam,
            auth,
        }
    }
}
