//! Client for the external IAM server's SSO verification endpoint.

use crate::config::IamSettings;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

/// Failures of the single verification attempt.
///
/// `Unavailable` is kept distinct from `VerificationFailed` so callers can
/// tell the user "try again later" instead of "invalid token". Provider
/// status and body are carried for logging, never shown to the browser.
#[derive(Debug, Error)]
pub enum IamError {
    #[error("malformed provider response: {0}")]
    Protocol(String),

    #[error("provider rejected token (status {status})")]
    VerificationFailed { status: StatusCode, body: String },

    #[error("provider unavailable: {0}")]
    Unavailable(#[source] reqwest::Error),
}

/// Identity claims returned by a successful verification. Ephemeral; only
/// the structured subset is kept in the session.
#[derive(Debug, Clone)]
pub struct VerifiedClaims {
    pub email: String,
    pub name: Option<String>,
    pub sub: Option<String>,
    pub app: Option<String>,
    pub roles: Vec<String>,
    pub perms: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct RawClaims {
    email: Option<String>,
    name: Option<String>,
    sub: Option<String>,
    app: Option<String>,
    #[serde(default)]
    roles: Vec<String>,
    #[serde(default)]
    perms: Vec<String>,
}

pub struct IamClient {
    client: Client,
    settings: IamSettings,
}

impl IamClient {
    pub fn new(settings: IamSettings) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .timeout(Duration::from_secs(settings.verify_timeout_secs))
            .build()?;
        Ok(Self { client, settings })
    }

    /// URL the browser is sent to in order to start the SSO round-trip.
    pub fn redirect_url(&self, callback: &str) -> String {
        let host = self.settings.host.trim_end_matches('/');
        let query = serde_urlencoded::to_string([
            ("app", self.settings.app.as_str()),
            ("callback", callback),
        ])
        .unwrap_or_default();
        format!("{}/sso/redirect?{}", host, query)
    }

    /// Verify a one-time SSO token against the IAM server.
    ///
    /// One attempt with a hard timeout; retry policy belongs to the caller
    /// (in practice: the end user re-triggering the login flow).
    pub async fn verify(&self, token: &str) -> Result<VerifiedClaims, IamError> {
        let response = self
            .client
            .post(&self.settings.verify_url)
            .json(&serde_json::json!({ "token": token }))
            .send()
            .await
            .map_err(|e| {
                tracing::error!(
                    endpoint = %self.settings.verify_url,
                    error = %e,
                    "IAM server unavailable during token verification"
                );
                IamError::Unavailable(e)
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::warn!(status = %status, body = %body, "SSO verify failed");
            return Err(IamError::VerificationFailed { status, body });
        }

        let raw: RawClaims = response
            .json()
            .await
            .map_err(|e| IamError::Protocol(format!("invalid verify response: {}", e)))?;

        let email = match raw.email {
            Some(email) if !email.is_empty() => email,
            _ => return Err(IamError::Protocol("missing user email".to_string())),
        };

        Ok(VerifiedClaims {
            email,
            name: raw.name,
            sub: raw.sub,
            app: raw.app,
            roles: raw.roles,
            perms: raw.perms,
        })
    }
}
