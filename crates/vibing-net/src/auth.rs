//! Password sign-in against the hosted auth service.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};

use vibing_shared::backend::AuthProvider;
use vibing_shared::UserId;

use crate::endpoint::Endpoint;
use crate::error::{NetError, Result};

/// A signed-in user and the bearer token for their requests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthSession {
    pub user_id: UserId,
    pub access_token: String,
    pub refresh_token: Option<String>,
}

impl AuthSession {
    /// Wrap an already issued token (e.g. from the environment).
    pub fn from_token(user_id: UserId, access_token: impl Into<String>) -> Self {
        Self {
            user_id,
            access_token: access_token.into(),
            refresh_token: None,
        }
    }
}

#[async_trait]
impl AuthProvider for AuthSession {
    async fn current_user(&self) -> Option<UserId> {
        Some(self.user_id)
    }
}

/// No one is signed in.
#[derive(Debug, Clone, Copy, Default)]
pub struct SignedOut;

#[async_trait]
impl AuthProvider for SignedOut {
    async fn current_user(&self) -> Option<UserId> {
        None
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    user: TokenUser,
}

#[derive(Debug, Deserialize)]
struct TokenUser {
    id: UserId,
}

#[derive(Debug, Deserialize)]
struct AuthFailure {
    #[serde(default, alias = "msg", alias = "error")]
    message: Option<String>,
    #[serde(default)]
    error_description: Option<String>,
}

fn parse_token_response(body: &str) -> Result<AuthSession> {
    let token: TokenResponse = serde_json::from_str(body)?;
    Ok(AuthSession {
        user_id: token.user.id,
        access_token: token.access_token,
        refresh_token: token.refresh_token,
    })
}

fn failure_reason(body: &str) -> String {
    serde_json::from_str::<AuthFailure>(body)
        .ok()
        .and_then(|f| f.error_description.or(f.message))
        .unwrap_or_else(|| body.to_string())
}

/// Exchange email and password for an [`AuthSession`].
pub async fn sign_in_with_password(
    http: &reqwest::Client,
    endpoint: &Endpoint,
    email: &str,
    password: &str,
) -> Result<AuthSession> {
    let resp = http
        .post(endpoint.auth("token?grant_type=password"))
        .header("apikey", endpoint.anon_key())
        .json(&json!({ "email": email.trim(), "password": password }))
        .send()
        .await?;

    let status = resp.status();
    let body = resp.text().await?;
    if !status.is_success() {
        let reason = failure_reason(&body);
        warn!(status = status.as_u16(), reason = %reason, "Sign-in rejected");
        return Err(NetError::Auth(reason));
    }

    let session = parse_token_response(&body)?;
    info!(user = %session.user_id, "Signed in");
    Ok(session)
}
