//! Realtime wire frames.
//!
//! The hosted realtime endpoint speaks Phoenix-channel JSON: every frame is
//! `{topic, event, payload, ref, join_ref}`.  Only the handful of events the
//! messaging channel needs are modelled; anything else is surfaced as
//! [`Inbound::Other`].

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::backend::ChangeListener;

pub const EVENT_JOIN: &str = "phx_join";
pub const EVENT_LEAVE: &str = "phx_leave";
pub const EVENT_REPLY: &str = "phx_reply";
pub const EVENT_ERROR: &str = "phx_error";
pub const EVENT_CLOSE: &str = "phx_close";
pub const EVENT_HEARTBEAT: &str = "heartbeat";
pub const EVENT_CHANGES: &str = "postgres_changes";
pub const EVENT_SYSTEM: &str = "system";

pub const HEARTBEAT_TOPIC: &str = "phoenix";

/// Wire topic for a client-chosen channel name.
pub fn topic_for(channel: &str) -> String {
    format!("realtime:{channel}")
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    pub topic: String,
    pub event: String,
    #[serde(default)]
    pub payload: Value,
    #[serde(rename = "ref", default)]
    pub reference: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub join_ref: Option<String>,
}

impl Frame {
    /// Join `topic`, registering one postgres-changes binding per listener.
    pub fn join(topic: &str, listeners: &[ChangeListener], access_token: &str, reference: &str) -> Self {
        let bindings: Vec<Value> = listeners
            .iter()
            .map(|l| {
                let mut binding = json!({
                    "event": l.event.as_str(),
                    "schema": l.schema,
                    "table": l.table,
                });
                if let Some(filter) = &l.filter {
                    binding["filter"] = Value::String(filter.clone());
                }
                binding
            })
            .collect();

        Self {
            topic: topic.to_string(),
            event: EVENT_JOIN.to_string(),
            payload: json!({
                "config": {
                    "broadcast": { "ack": false, "self": false },
                    "presence": { "key": "" },
                    "postgres_changes": bindings,
                    "private": false,
                },
                "access_token": access_token,
            }),
            reference: Some(reference.to_string()),
            join_ref: Some(reference.to_string()),
        }
    }

    pub fn leave(topic: &str, reference: &str) -> Self {
        Self {
            topic: topic.to_string(),
            event: EVENT_LEAVE.to_string(),
            payload: json!({}),
            reference: Some(reference.to_string()),
            join_ref: None,
        }
    }

    pub fn heartbeat(reference: &str) -> Self {
        Self {
            topic: HEARTBEAT_TOPIC.to_string(),
            event: EVENT_HEARTBEAT.to_string(),
            payload: json!({}),
            reference: Some(reference.to_string()),
            join_ref: None,
        }
    }

    pub fn to_text(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_text(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// Classify an inbound frame.
    pub fn classify(&self) -> Inbound {
        match self.event.as_str() {
            EVENT_REPLY => {
                let ok = self.payload.get("status").and_then(Value::as_str) == Some("ok");
                let response = self.payload.get("response");
                let binding_ids = response
                    .and_then(|r| r.get("postgres_changes"))
                    .and_then(Value::as_array)
                    .map(|bindings| {
                        bindings
                            .iter()
                            .filter_map(|b| b.get("id").and_then(Value::as_i64))
                            .collect()
                    })
                    .unwrap_or_default();
                let reason = response
                    .and_then(|r| r.get("reason"))
                    .and_then(Value::as_str)
                    .map(str::to_string);
                Inbound::Reply {
                    reference: self.reference.clone(),
                    ok,
                    binding_ids,
                    reason,
                }
            }
            EVENT_CHANGES => {
                let ids = self
                    .payload
                    .get("ids")
                    .and_then(Value::as_array)
                    .map(|ids| ids.iter().filter_map(Value::as_i64).collect())
                    .unwrap_or_default();
                let data = self.payload.get("data");
                let change = data
                    .and_then(|d| d.get("type"))
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                let record = data
                    .and_then(|d| d.get("record"))
                    .cloned()
                    .unwrap_or(Value::Null);
                Inbound::Change { ids, change, record }
            }
            EVENT_ERROR => Inbound::Error,
            EVENT_CLOSE => Inbound::Close,
            EVENT_SYSTEM => Inbound::System {
                ok: self.payload.get("status").and_then(Value::as_str) == Some("ok"),
                message: self
                    .payload
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
            },
            other => Inbound::Other(other.to_string()),
        }
    }
}

/// Decoded meaning of an inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// Reply to a join, leave or heartbeat, matched by `reference`.
    Reply {
        reference: Option<String>,
        ok: bool,
        /// Server-assigned ids of the postgres bindings, in listener order.
        binding_ids: Vec<i64>,
        reason: Option<String>,
    },
    /// A row change for one or more bindings.
    Change {
        ids: Vec<i64>,
        change: String,
        record: Value,
    },
    Error,
    Close,
    System { ok: bool, message: String },
    Other(String),
}
