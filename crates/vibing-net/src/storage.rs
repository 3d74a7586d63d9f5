//! Avatar uploads to the `avatars` storage bucket.

use reqwest::header::{AUTHORIZATION, CACHE_CONTROL, CONTENT_TYPE};
use serde_json::json;
use tracing::{info, warn};

use vibing_shared::constants::{AVATAR_BUCKET, AVATAR_CACHE_CONTROL_SECS};
use vibing_shared::upload::{avatar_object_name, object_name_from_public_url, validate_avatar};
use vibing_shared::UserId;

use crate::auth::AuthSession;
use crate::endpoint::Endpoint;
use crate::error::{NetError, Result};

#[derive(Clone)]
pub struct AvatarStorage {
    http: reqwest::Client,
    endpoint: Endpoint,
    bearer: String,
}

impl AvatarStorage {
    pub fn new(http: reqwest::Client, endpoint: Endpoint, session: &AuthSession) -> Self {
        Self {
            http,
            endpoint,
            bearer: session.access_token.clone(),
        }
    }

    /// Public URL of `object` in the avatar bucket.
    pub fn public_url(&self, object: &str) -> String {
        self.endpoint
            .storage(&format!("object/public/{AVATAR_BUCKET}/{object}"))
    }

    /// Validate and upload a new avatar, returning its public URL.
    ///
    /// The previous avatar (if any) is removed first; failing to remove it
    /// is logged and does not block the upload.
    pub async fn replace_avatar(
        &self,
        user: UserId,
        file_name: &str,
        content_type: &str,
        bytes: Vec<u8>,
        previous_url: Option<&str>,
        now_millis: i64,
    ) -> Result<String> {
        validate_avatar(content_type, bytes.len() as u64)?;

        if let Some(old) = previous_url.and_then(object_name_from_public_url) {
            if let Err(e) = self.remove(&[old]).await {
                warn!(object = old, error = %e, "Failed to remove previous avatar");
            }
        }

        let object = avatar_object_name(user, file_name, now_millis);
        self.upload(&object, content_type, bytes).await?;
        info!(user = %user, object = %object, "Avatar uploaded");
        Ok(self.public_url(&object))
    }

    /// Upload (or overwrite) `object`.
    pub async fn upload(&self, object: &str, content_type: &str, bytes: Vec<u8>) -> Result<()> {
        let resp = self
            .http
            .post(self.endpoint.storage(&format!("object/{AVATAR_BUCKET}/{object}")))
            .header("apikey", self.endpoint.anon_key())
            .header(AUTHORIZATION, format!("Bearer {}", self.bearer))
            .header(CONTENT_TYPE, content_type)
            .header(CACHE_CONTROL, format!("max-age={AVATAR_CACHE_CONTROL_SECS}"))
            .header("x-upsert", "true")
            .body(bytes)
            .send()
            .await?;
        ensure_success(resp).await
    }

    pub async fn remove(&self, objects: &[&str]) -> Result<()> {
        if objects.is_empty() {
            return Ok(());
        }
        let resp = self
            .http
            .delete(self.endpoint.storage(&format!("object/{AVATAR_BUCKET}")))
            .header("apikey", self.endpoint.anon_key())
            .header(AUTHORIZATION, format!("Bearer {}", self.bearer))
            .json(&json!({ "prefixes": objects }))
            .send()
            .await?;
        ensure_success(resp).await
    }
}

async fn ensure_success(resp: reqwest::Response) -> Result<()> {
    let status = resp.status();
    if status.is_success() {
        return Ok(());
    }
    Err(NetError::Status {
        code: status.as_u16(),
        body: resp.text().await.unwrap_or_default(),
    })
}
