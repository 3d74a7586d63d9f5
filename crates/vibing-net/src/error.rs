use thiserror::Error;
use vibing_shared::{BackendError, UploadError};

/// Errors produced by the hosted backend client.
#[derive(Error, Debug)]
pub enum NetError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Backend responded {code}: {body}")]
    Status { code: u16, body: String },

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid backend URL: {0}")]
    InvalidUrl(String),

    #[error("Sign-in failed: {0}")]
    Auth(String),

    #[error("Unexpected response: {0}")]
    Unexpected(String),

    #[error(transparent)]
    Upload(#[from] UploadError),
}

impl From<NetError> for BackendError {
    fn from(e: NetError) -> Self {
        match e {
            NetError::Status { code: 401, .. } => BackendError::Unauthenticated,
            NetError::Status { code, body } => BackendError::Status { code, body },
            NetError::Http(e) if e.is_decode() => BackendError::Decode(e.to_string()),
            NetError::Http(e) => BackendError::Request(e.to_string()),
            NetError::WebSocket(e) => BackendError::Realtime(e.to_string()),
            NetError::Json(e) => BackendError::Decode(e.to_string()),
            NetError::Unexpected(msg) => BackendError::Decode(msg),
            NetError::Auth(_) => BackendError::Unauthenticated,
            NetError::InvalidUrl(url) => BackendError::Request(format!("invalid URL {url}")),
            NetError::Upload(e) => BackendError::Storage(e.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, NetError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_errors_keep_code_and_body() {
        let e: BackendError = NetError::Status {
            code: 409,
            body: "duplicate".into(),
        }
        .into();
        assert_eq!(
            e,
            BackendError::Status {
                code: 409,
                body: "duplicate".into()
            }
        );

        let e: BackendError = NetError::Status {
            code: 401,
            body: String::new(),
        }
        .into();
        assert_eq!(e, BackendError::Unauthenticated);
    }
}
