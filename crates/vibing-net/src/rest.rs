//! PostgREST queries against the hosted `messages` and `profiles` tables.
//! The board tables live in [`crate::community`] on the same client.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::header::{HeaderValue, AUTHORIZATION, CONTENT_RANGE};
use reqwest::{Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde_json::json;
use tracing::{debug, trace};

use vibing_shared::backend::{BackendResult, MessageBackend, ProfileDirectory};
use vibing_shared::constants::{MESSAGES_TABLE, PROFILES_TABLE};
use vibing_shared::{Message, MessageId, NewMessage, Profile, Role, UserId};

use crate::auth::AuthSession;
use crate::endpoint::Endpoint;
use crate::error::{NetError, Result};

const PROFILE_COLUMNS: &str = "user_id,nickname,avatar_url";

/// [`MessageBackend`] and [`ProfileDirectory`] over the hosted REST API.
#[derive(Clone)]
pub struct RestBackend {
    http: reqwest::Client,
    endpoint: Endpoint,
    bearer: String,
}

impl RestBackend {
    /// Requests run as `session`'s user, or anonymously with the anon key.
    pub fn new(http: reqwest::Client, endpoint: Endpoint, session: Option<&AuthSession>) -> Self {
        let bearer = session
            .map(|s| s.access_token.clone())
            .unwrap_or_else(|| endpoint.anon_key().to_string());
        Self {
            http,
            endpoint,
            bearer,
        }
    }

    pub(crate) fn request(&self, method: Method, table: &str) -> RequestBuilder {
        self.http
            .request(method, self.endpoint.rest(table))
            .header("apikey", self.endpoint.anon_key())
            .header(AUTHORIZATION, format!("Bearer {}", self.bearer))
    }

    pub(crate) async fn fetch<T: DeserializeOwned>(&self, req: RequestBuilder) -> Result<T> {
        let resp = checked(req.send().await?).await?;
        Ok(resp.json().await?)
    }

    pub(crate) async fn execute(&self, req: RequestBuilder) -> Result<()> {
        checked(req.send().await?).await?;
        Ok(())
    }

    /// Exact row count via `HEAD` + `Prefer: count=exact`.
    pub(crate) async fn count(&self, table: &str, filters: &[(&str, String)]) -> Result<u64> {
        let req = self
            .request(Method::HEAD, table)
            .query(filters)
            .header("Prefer", "count=exact");
        let resp = checked(req.send().await?).await?;
        resp.headers()
            .get(CONTENT_RANGE)
            .and_then(|v: &HeaderValue| v.to_str().ok())
            .and_then(parse_content_range_total)
            .ok_or_else(|| NetError::Unexpected("missing Content-Range total".into()))
    }

    async fn update_flag(&self, filters: &[(&str, String)], column: &str) -> Result<()> {
        let mut body = serde_json::Map::new();
        body.insert(column.to_string(), json!(true));
        let req = self
            .request(Method::PATCH, MESSAGES_TABLE)
            .query(filters)
            .header("Prefer", "return=minimal")
            .json(&body);
        self.execute(req).await
    }
}

async fn checked(resp: Response) -> Result<Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    debug!(status = status.as_u16(), body = %body, "REST request failed");
    Err(NetError::Status {
        code: status.as_u16(),
        body,
    })
}

fn ts_param(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// `hidden_by_x` is nullable; only an explicit `true` hides a row.
fn not_hidden(role: Role) -> String {
    format!("{}.not.is.true", role.hidden_flag_column())
}

fn visible_to_filter(me: UserId) -> String {
    format!(
        "(and({}.eq.{me},{}),and({}.eq.{me},{}))",
        Role::Sender.id_column(),
        not_hidden(Role::Sender),
        Role::Receiver.id_column(),
        not_hidden(Role::Receiver),
    )
}

fn thread_filter(me: UserId, other: UserId) -> String {
    format!(
        "(and(sender_id.eq.{me},receiver_id.eq.{other},{}),and(sender_id.eq.{other},receiver_id.eq.{me},{}))",
        not_hidden(Role::Sender),
        not_hidden(Role::Receiver),
    )
}

/// Unread rows addressed to `me`, minus conversations `me` hid.
fn unread_filters(me: UserId) -> [(&'static str, String); 4] {
    [
        ("select", "id".to_string()),
        ("receiver_id", format!("eq.{me}")),
        ("is_read", "eq.false".to_string()),
        (Role::Receiver.hidden_flag_column(), "not.is.true".to_string()),
    ]
}

pub(crate) fn in_list<T: std::fmt::Display>(items: &[T]) -> String {
    let joined = items
        .iter()
        .map(|i| i.to_string())
        .collect::<Vec<_>>()
        .join(",");
    format!("in.({joined})")
}

/// Backslash-escape LIKE wildcards, PostgREST's `*` included.
pub(crate) fn escape_like(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, '\\' | '%' | '_' | '*') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Case-insensitive match on the literal nickname.
fn ilike_literal(value: &str) -> String {
    format!("ilike.{}", escape_like(value))
}

/// Total from a `Content-Range` header such as `0-24/573` or `*/0`.
fn parse_content_range_total(header: &str) -> Option<u64> {
    header.rsplit_once('/')?.1.trim().parse().ok()
}

#[async_trait]
impl MessageBackend for RestBackend {
    async fn visible_messages(&self, me: UserId) -> BackendResult<Vec<Message>> {
        let req = self.request(Method::GET, MESSAGES_TABLE).query(&[
            ("select", "*".to_string()),
            ("or", visible_to_filter(me)),
            ("order", "created_at.desc".to_string()),
        ]);
        Ok(self.fetch(req).await?)
    }

    async fn thread(&self, me: UserId, other: UserId) -> BackendResult<Vec<Message>> {
        let req = self.request(Method::GET, MESSAGES_TABLE).query(&[
            ("select", "*".to_string()),
            ("or", thread_filter(me, other)),
            ("order", "created_at.asc".to_string()),
        ]);
        Ok(self.fetch(req).await?)
    }

    async fn received_since(
        &self,
        me: UserId,
        since: DateTime<Utc>,
    ) -> BackendResult<Vec<Message>> {
        let req = self.request(Method::GET, MESSAGES_TABLE).query(&[
            ("select", "*".to_string()),
            ("receiver_id", format!("eq.{me}")),
            ("created_at", format!("gt.{}", ts_param(&since))),
            ("order", "created_at.asc".to_string()),
        ]);
        Ok(self.fetch(req).await?)
    }

    async fn insert_message(&self, message: NewMessage) -> BackendResult<Message> {
        let req = self
            .request(Method::POST, MESSAGES_TABLE)
            .header("Prefer", "return=representation")
            .json(&[&message]);
        let mut rows: Vec<Message> = self.fetch(req).await?;
        if rows.is_empty() {
            return Err(NetError::Unexpected("insert returned no row".into()).into());
        }
        let stored = rows.swap_remove(0);
        trace!(msg_id = %stored.id, "Message inserted");
        Ok(stored)
    }

    async fn mark_read(&self, ids: &[MessageId]) -> BackendResult<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let req = self
            .request(Method::PATCH, MESSAGES_TABLE)
            .query(&[("id", in_list(ids))])
            .header("Prefer", "return=minimal")
            .json(&json!({ "is_read": true }));
        Ok(self.execute(req).await?)
    }

    async fn unread_count(&self, me: UserId) -> BackendResult<u64> {
        Ok(self.count(MESSAGES_TABLE, &unread_filters(me)).await?)
    }

    async fn hide_conversation(&self, me: UserId, other: UserId) -> BackendResult<()> {
        self.update_flag(
            &[
                ("sender_id", format!("eq.{me}")),
                ("receiver_id", format!("eq.{other}")),
            ],
            Role::Sender.hidden_flag_column(),
        )
        .await?;
        self.update_flag(
            &[
                ("receiver_id", format!("eq.{me}")),
                ("sender_id", format!("eq.{other}")),
            ],
            Role::Receiver.hidden_flag_column(),
        )
        .await?;
        Ok(())
    }
}

#[async_trait]
impl ProfileDirectory for RestBackend {
    async fn profiles(&self, ids: &[UserId]) -> BackendResult<Vec<Profile>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let req = self.request(Method::GET, PROFILES_TABLE).query(&[
            ("select", PROFILE_COLUMNS.to_string()),
            ("user_id", in_list(ids)),
        ]);
        Ok(self.fetch(req).await?)
    }

    async fn profile(&self, id: UserId) -> BackendResult<Option<Profile>> {
        let req = self.request(Method::GET, PROFILES_TABLE).query(&[
            ("select", PROFILE_COLUMNS.to_string()),
            ("user_id", format!("eq.{id}")),
            ("limit", "1".to_string()),
        ]);
        let rows: Vec<Profile> = self.fetch(req).await?;
        Ok(rows.into_iter().next())
    }

    async fn nickname_taken(&self, nickname: &str, except: Option<UserId>) -> BackendResult<bool> {
        let mut query = vec![
            ("select", "user_id".to_string()),
            ("nickname", ilike_literal(&nickname.trim().to_lowercase())),
            ("limit", "1".to_string()),
        ];
        if let Some(user) = except {
            query.push(("user_id", format!("neq.{user}")));
        }
        let req = self.request(Method::GET, PROFILES_TABLE).query(&query);
        let rows: Vec<serde_json::Value> = self.fetch(req).await?;
        Ok(!rows.is_empty())
    }
}
