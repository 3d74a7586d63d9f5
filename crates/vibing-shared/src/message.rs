//! Message and profile rows as stored by the backend.
//!
//! This process never owns these rows; it only holds transient copies of
//! whatever the last query returned.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::types::{MessageId, UserId};

/// A direct message between two users.
///
/// Immutable once created except for `is_read` and the two per-participant
/// soft-delete flags.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    pub id: MessageId,
    pub sender_id: UserId,
    pub receiver_id: UserId,
    pub content: String,
    pub created_at: DateTime<Utc>,
    #[serde(default, deserialize_with = "null_as_false")]
    pub is_read: bool,
    /// The sender removed the conversation from their own list.
    #[serde(default, deserialize_with = "null_as_false")]
    pub hidden_by_sender: bool,
    /// The receiver removed the conversation from their own list.
    #[serde(default, deserialize_with = "null_as_false")]
    pub hidden_by_receiver: bool,
}

impl Message {
    pub fn is_received_by(&self, user: UserId) -> bool {
        self.receiver_id == user
    }

    pub fn is_sent_by(&self, user: UserId) -> bool {
        self.sender_id == user
    }

    /// The participant that is not `user`, or `None` when `user` is not part
    /// of this message at all.
    pub fn counterpart(&self, user: UserId) -> Option<UserId> {
        if self.sender_id == user {
            Some(self.receiver_id)
        } else if self.receiver_id == user {
            Some(self.sender_id)
        } else {
            None
        }
    }

    /// Whether `user` should see this row, honouring the hidden flag of the
    /// role they play in it.
    pub fn is_visible_to(&self, user: UserId) -> bool {
        (self.sender_id == user && !self.hidden_by_sender)
            || (self.receiver_id == user && !self.hidden_by_receiver)
    }
}

/// Insert payload for a new message.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct NewMessage {
    pub sender_id: UserId,
    pub receiver_id: UserId,
    pub content: String,
    pub is_read: bool,
}

impl NewMessage {
    pub fn new(sender_id: UserId, receiver_id: UserId, content: impl Into<String>) -> Self {
        Self {
            sender_id,
            receiver_id,
            content: content.into(),
            is_read: false,
        }
    }
}

/// Role a user plays in a message row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Sender,
    Receiver,
}

impl Role {
    /// Column holding this role's soft-delete flag.
    pub fn hidden_flag_column(self) -> &'static str {
        match self {
            Role::Sender => "hidden_by_sender",
            Role::Receiver => "hidden_by_receiver",
        }
    }

    /// Column holding the user id for this role.
    pub fn id_column(self) -> &'static str {
        match self {
            Role::Sender => "sender_id",
            Role::Receiver => "receiver_id",
        }
    }
}

/// Public profile fields needed by messaging.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Profile {
    pub user_id: UserId,
    #[serde(default)]
    pub nickname: Option<String>,
    #[serde(default)]
    pub avatar_url: Option<String>,
}

fn null_as_false<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<bool>::deserialize(deserializer)?.unwrap_or(false))
}
