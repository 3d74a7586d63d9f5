use crate::error::{NetError, Result};
use vibing_shared::constants::REALTIME_VSN;

/// Project URL and public (anon) key of the hosted backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    url: String,
    anon_key: String,
}

impl Endpoint {
    pub fn new(url: &str, anon_key: &str) -> Result<Self> {
        let url = url.trim().trim_end_matches('/');
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(NetError::InvalidUrl(url.to_string()));
        }
        Ok(Self {
            url: url.to_string(),
            anon_key: anon_key.trim().to_string(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn anon_key(&self) -> &str {
        &self.anon_key
    }

    pub fn rest(&self, table: &str) -> String {
        format!("{}/rest/v1/{table}", self.url)
    }

    pub fn auth(&self, path: &str) -> String {
        format!("{}/auth/v1/{}", self.url, path.trim_start_matches('/'))
    }

    pub fn storage(&self, path: &str) -> String {
        format!("{}/storage/v1/{}", self.url, path.trim_start_matches('/'))
    }

    /// Websocket URL of the realtime service.
    pub fn realtime(&self) -> String {
        let ws_base = if let Some(rest) = self.url.strip_prefix("https://") {
            format!("wss://{rest}")
        } else if let Some(rest) = self.url.strip_prefix("http://") {
            format!("ws://{rest}")
        } else {
            self.url.clone()
        };
        format!(
            "{ws_base}/realtime/v1/websocket?apikey={}&vsn={REALTIME_VSN}",
            self.anon_key
        )
    }
}
