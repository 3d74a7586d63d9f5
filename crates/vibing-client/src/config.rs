//! Client configuration loaded from environment variables.
//!
//! Without `VIBING_URL` the client runs against the embedded backend, so it
//! starts with zero configuration for local development.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use vibing_shared::constants::{POLL_INTERVAL, REALTIME_REJOIN_DELAY, SUBSCRIBE_TIMEOUT};
use vibing_shared::UserId;

use crate::runtime::DeliveryTimings;

/// How the client signs in.
#[derive(Clone, PartialEq, Eq)]
pub enum Credentials {
    Anonymous,
    /// A known user on the embedded backend.
    LocalUser(UserId),
    /// An already issued access token.
    Token { user_id: UserId, access_token: String },
    /// Email and password, exchanged for a token at startup.
    Password { email: String, password: String },
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credentials::Anonymous => f.write_str("Anonymous"),
            Credentials::LocalUser(id) => f.debug_tuple("LocalUser").field(id).finish(),
            Credentials::Token { user_id, .. } => f
                .debug_struct("Token")
                .field("user_id", user_id)
                .finish_non_exhaustive(),
            Credentials::Password { email, .. } => f
                .debug_struct("Password")
                .field("email", email)
                .finish_non_exhaustive(),
        }
    }
}

/// Client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Hosted backend project URL.
    /// Env: `VIBING_URL`
    /// Default: none (embedded backend).
    pub backend_url: Option<String>,

    /// Public API key of the hosted project.
    /// Env: `VIBING_ANON_KEY`
    pub anon_key: String,

    /// Env: `VIBING_ACCESS_TOKEN` + `VIBING_USER_ID`, or `VIBING_EMAIL` +
    /// `VIBING_PASSWORD`, or `VIBING_USER_ID` alone for the embedded backend.
    pub credentials: Credentials,

    /// Directory holding the preferences database (and the embedded
    /// backend's data).
    /// Env: `VIBING_DATA_DIR`
    /// Default: the platform data directory.
    pub data_dir: Option<PathBuf>,

    /// Env: `VIBING_POLL_INTERVAL_MS`
    /// Default: 3000
    pub poll_interval: Duration,

    /// Env: `VIBING_SUBSCRIBE_TIMEOUT_MS`
    /// Default: 5000
    pub subscribe_timeout: Duration,

    /// First realtime rejoin delay; doubles per failed attempt.
    /// Env: `VIBING_REJOIN_DELAY_MS`
    /// Default: 1000
    pub rejoin_delay: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            backend_url: None,
            anon_key: String::new(),
            credentials: Credentials::Anonymous,
            data_dir: None,
            poll_interval: POLL_INTERVAL,
            subscribe_timeout: SUBSCRIBE_TIMEOUT,
            rejoin_delay: REALTIME_REJOIN_DELAY,
        }
    }
}

impl ClientConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) over an arbitrary lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        let var = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        config.backend_url = var("VIBING_URL");

        if let Some(key) = var("VIBING_ANON_KEY") {
            config.anon_key = key;
        }

        let user_id = var("VIBING_USER_ID").and_then(|raw| match raw.parse::<UserId>() {
            Ok(id) => Some(id),
            Err(e) => {
                tracing::warn!(value = %raw, error = %e, "Invalid VIBING_USER_ID, ignoring");
                None
            }
        });

        config.credentials = match (
            var("VIBING_ACCESS_TOKEN"),
            var("VIBING_EMAIL"),
            var("VIBING_PASSWORD"),
            user_id,
        ) {
            (Some(access_token), _, _, Some(user_id)) => Credentials::Token {
                user_id,
                access_token,
            },
            (_, Some(email), Some(password), _) => Credentials::Password { email, password },
            (_, _, _, Some(user_id)) => Credentials::LocalUser(user_id),
            _ => Credentials::Anonymous,
        };

        if let Some(dir) = var("VIBING_DATA_DIR") {
            config.data_dir = Some(PathBuf::from(dir));
        }

        if let Some(val) = var("VIBING_POLL_INTERVAL_MS") {
            match parse_millis(&val) {
                Some(d) => config.poll_interval = d,
                None => tracing::warn!(value = %val, "Invalid VIBING_POLL_INTERVAL_MS, using default"),
            }
        }

        if let Some(val) = var("VIBING_SUBSCRIBE_TIMEOUT_MS") {
            match parse_millis(&val) {
                Some(d) => config.subscribe_timeout = d,
                None => {
                    tracing::warn!(value = %val, "Invalid VIBING_SUBSCRIBE_TIMEOUT_MS, using default")
                }
            }
        }

        if let Some(val) = var("VIBING_REJOIN_DELAY_MS") {
            match parse_millis(&val) {
                Some(d) => config.rejoin_delay = d,
                None => tracing::warn!(value = %val, "Invalid VIBING_REJOIN_DELAY_MS, using default"),
            }
        }

        config
    }

    pub fn timings(&self) -> DeliveryTimings {
        DeliveryTimings {
            poll_interval: self.poll_interval,
            subscribe_timeout: self.subscribe_timeout,
            rejoin_delay: self.rejoin_delay,
        }
    }
}

fn parse_millis(raw: &str) -> Option<Duration> {
    raw.parse::<u64>()
        .ok()
        .filter(|ms| *ms > 0)
        .map(Duration::from_millis)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> ClientConfig {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ClientConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_default_config() {
        let config = config_from(&[]);
        assert_eq!(config.backend_url, None);
        assert_eq!(config.credentials, Credentials::Anonymous);
        assert_eq!(config.poll_interval, Duration::from_secs(3));
        assert_eq!(config.subscribe_timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_token_credentials_win() {
        let user = "0f8fad5b-d9cb-469f-a165-70867728950e";
        let config = config_from(&[
            ("VIBING_URL", "https://proj.example.co"),
            ("VIBING_ACCESS_TOKEN", "jwt"),
            ("VIBING_USER_ID", user),
            ("VIBING_EMAIL", "a@b.c"),
            ("VIBING_PASSWORD", "pw"),
        ]);
        assert_eq!(config.backend_url.as_deref(), Some("https://proj.example.co"));
        assert!(matches!(
            config.credentials,
            Credentials::Token { ref access_token, .. } if access_token == "jwt"
        ));
    }

    #[test]
    fn test_password_and_local_user() {
        let config = config_from(&[("VIBING_EMAIL", "a@b.c"), ("VIBING_PASSWORD", "pw")]);
        assert!(matches!(config.credentials, Credentials::Password { .. }));
        assert!(!format!("{:?}", config.credentials).contains("pw"));

        let config = config_from(&[("VIBING_USER_ID", "0f8fad5b-d9cb-469f-a165-70867728950e")]);
        assert!(matches!(config.credentials, Credentials::LocalUser(_)));

        let config = config_from(&[("VIBING_USER_ID", "not-a-uuid")]);
        assert_eq!(config.credentials, Credentials::Anonymous);
    }

    #[test]
    fn test_invalid_durations_keep_defaults() {
        let config = config_from(&[
            ("VIBING_POLL_INTERVAL_MS", "250"),
            ("VIBING_SUBSCRIBE_TIMEOUT_MS", "soon"),
            ("VIBING_REJOIN_DELAY_MS", "400"),
        ]);
        assert_eq!(config.poll_interval, Duration::from_millis(250));
        assert_eq!(config.subscribe_timeout, Duration::from_secs(5));
        assert_eq!(config.timings().rejoin_delay, Duration::from_millis(400));
        assert_eq!(parse_millis("0"), None);
    }
}
