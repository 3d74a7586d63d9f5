use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::IdError;
use crate::ids;

// User identity = the backend's auth user UUID
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct UserId(pub Uuid);

impl UserId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn short(&self) -> String {
        self.0.to_string()[..8].to_string()
    }

    /// Name of the realtime channel scoped to this user's inbox.
    pub fn inbox_channel(&self) -> String {
        format!("messages-{}", self.0)
    }
}

impl Default for UserId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for UserId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s.trim()).map(Self)
    }
}

/// Row id of a message.  Always a positive integer.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct MessageId(pub i64);

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for MessageId {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ids::parse_id(s, "message id").map(Self)
    }
}

/// Row id of a post (artwork) on the community board.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct PostId(pub i64);

impl fmt::Display for PostId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for PostId {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ids::parse_id(s, "post id").map(Self)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct CommentId(pub i64);

impl fmt::Display for CommentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for CommentId {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ids::parse_id(s, "comment id").map(Self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inbox_channel_is_scoped_to_user() {
        let id: UserId = "0f8fad5b-d9cb-469f-a165-70867728950e".parse().unwrap();
        assert_eq!(
            id.inbox_channel(),
            "messages-0f8fad5b-d9cb-469f-a165-70867728950e"
        );
        assert_eq!(id.short(), "0f8fad5b");
    }

    #[test]
    fn message_id_parses_through_coercion() {
        let id: MessageId = " 42 ".parse().unwrap();
        assert_eq!(id, MessageId(42));
        assert!("0".parse::<MessageId>().is_err());
        assert!("abc".parse::<MessageId>().is_err());
    }

    #[test]
    fn post_and_comment_ids_reject_garbage() {
        assert_eq!("7".parse::<PostId>().unwrap(), PostId(7));
        assert_eq!(CommentId(3).to_string(), "3");
        let err = "x".parse::<CommentId>().unwrap_err();
        assert!(err.to_string().starts_with("comment id"));
    }
}
