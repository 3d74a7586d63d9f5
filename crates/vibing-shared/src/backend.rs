//! The seam between the messaging logic and the hosted backend.
//!
//! Every persistence and realtime operation goes through these traits.  The
//! hosted implementation lives in `vibing-net`, the embedded one in
//! `vibing-store`; tests supply their own.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::mpsc;

use crate::constants::{DB_SCHEMA, MESSAGES_TABLE};
use crate::error::BackendError;
use crate::message::{Message, NewMessage, Profile};
use crate::community::{
    Comment, FollowRow, FollowStats, NewComment, PostStamp, Reaction, ReactionRow, TagUsage,
};
use crate::types::{CommentId, MessageId, PostId, UserId};

pub type BackendResult<T> = Result<T, BackendError>;

/// Resolves the currently signed-in user.
#[async_trait]
pub trait AuthProvider: Send + Sync {
    async fn current_user(&self) -> Option<UserId>;
}

/// Queries and mutations on the `messages` table.
#[async_trait]
pub trait MessageBackend: Send + Sync {
    /// Every message `me` can see, newest first.
    async fn visible_messages(&self, me: UserId) -> BackendResult<Vec<Message>>;

    /// The visible history between `me` and `other`, oldest first.
    async fn thread(&self, me: UserId, other: UserId) -> BackendResult<Vec<Message>>;

    /// Messages addressed to `me` created strictly after `since`, oldest first.
    async fn received_since(&self, me: UserId, since: DateTime<Utc>)
        -> BackendResult<Vec<Message>>;

    async fn insert_message(&self, message: NewMessage) -> BackendResult<Message>;

    /// Mark the given rows as read.  An empty slice must not hit the backend.
    async fn mark_read(&self, ids: &[MessageId]) -> BackendResult<()>;

    async fn unread_count(&self, me: UserId) -> BackendResult<u64>;

    /// Soft-delete the conversation for `me` only: flags `hidden_by_sender`
    /// on rows `me -> other` and `hidden_by_receiver` on rows `other -> me`.
    async fn hide_conversation(&self, me: UserId, other: UserId) -> BackendResult<()>;
}

/// Lookups on the `profiles` table.
#[async_trait]
pub trait ProfileDirectory: Send + Sync {
    async fn profiles(&self, ids: &[UserId]) -> BackendResult<Vec<Profile>>;

    async fn profile(&self, id: UserId) -> BackendResult<Option<Profile>>;

    /// Case-insensitive nickname lookup, ignoring `except` (the caller's own
    /// profile when renaming).
    async fn nickname_taken(&self, nickname: &str, except: Option<UserId>) -> BackendResult<bool>;
}

/// Reactions, follows, saves, comments and tags on board posts.
#[async_trait]
pub trait CommunityBackend: Send + Sync {
    /// Author of `post`, or `None` if the post does not exist.
    async fn post_author(&self, post: PostId) -> BackendResult<Option<UserId>>;
    /// Creation times of the posts in `posts` that exist.
    async fn post_stamps(&self, posts: &[PostId]) -> BackendResult<Vec<PostStamp>>;

    async fn reaction(&self, post: PostId, user: UserId) -> BackendResult<Option<Reaction>>;
    /// Store `reaction` as `user`'s only reaction to `post`, or clear it.
    async fn set_reaction(
        &self,
        post: PostId,
        user: UserId,
        reaction: Option<Reaction>,
    ) -> BackendResult<()>;
    async fn reactions(&self, posts: &[PostId]) -> BackendResult<Vec<ReactionRow>>;

    async fn is_following(&self, follower: UserId, followee: UserId) -> BackendResult<bool>;
    async fn set_following(
        &self,
        follower: UserId,
        followee: UserId,
        follow: bool,
    ) -> BackendResult<()>;
    async fn follow_stats(&self, user: UserId) -> BackendResult<FollowStats>;
    /// Who follows `user`, newest first.
    async fn followers(&self, user: UserId, limit: u32, offset: u32)
        -> BackendResult<Vec<FollowRow>>;
    /// Whom `user` follows, newest first.
    async fn following(&self, user: UserId, limit: u32, offset: u32)
        -> BackendResult<Vec<FollowRow>>;

    async fn is_saved(&self, post: PostId, user: UserId) -> BackendResult<bool>;
    async fn set_saved(&self, post: PostId, user: UserId, saved: bool) -> BackendResult<()>;
    /// The subset of `posts` that `user` saved.
    async fn saved_among(&self, user: UserId, posts: &[PostId]) -> BackendResult<Vec<PostId>>;

    /// Comments on `post`, oldest first.
    async fn comments(&self, post: PostId) -> BackendResult<Vec<Comment>>;
    /// The post of every comment on any of `posts`, one entry per comment.
    async fn comment_posts(&self, posts: &[PostId]) -> BackendResult<Vec<PostId>>;
    async fn insert_comment(&self, comment: NewComment) -> BackendResult<Comment>;
    async fn comment_author(&self, id: CommentId) -> BackendResult<Option<UserId>>;
    /// Delete a comment together with its replies.
    async fn delete_comment(&self, id: CommentId) -> BackendResult<()>;

    async fn post_tags(&self, post: PostId) -> BackendResult<Vec<String>>;
    /// Link the tag named `name` to `post`, creating the tag if needed.
    /// Returns false if the link already existed.
    async fn attach_tag(&self, post: PostId, name: &str) -> BackendResult<bool>;
    async fn clear_tags(&self, post: PostId) -> BackendResult<()>;
    /// Tags in use whose name starts with `prefix`, most used first.
    async fn search_tags(&self, prefix: &str, limit: u32) -> BackendResult<Vec<TagUsage>>;
}

// ---------------------------------------------------------------------------
// Realtime
// ---------------------------------------------------------------------------

/// Row change kinds a listener can register for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeEvent {
    Insert,
    Update,
    Delete,
}

impl ChangeEvent {
    pub fn as_str(self) -> &'static str {
        match self {
            ChangeEvent::Insert => "INSERT",
            ChangeEvent::Update => "UPDATE",
            ChangeEvent::Delete => "DELETE",
        }
    }
}

/// One postgres-changes listener: table, event and an equality filter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeListener {
    pub schema: String,
    pub table: String,
    pub event: ChangeEvent,
    /// `column=eq.value` filter understood by the backend.
    pub filter: Option<String>,
}

impl ChangeListener {
    /// INSERTs on `messages` where `column` equals `user`.
    pub fn message_inserts(column: &str, user: UserId) -> Self {
        Self {
            schema: DB_SCHEMA.to_string(),
            table: MESSAGES_TABLE.to_string(),
            event: ChangeEvent::Insert,
            filter: Some(format!("{column}=eq.{user}")),
        }
    }

    /// Whether an inserted `messages` row satisfies this listener.  Only
    /// equality filters on the id columns and `content` are understood.
    pub fn matches_insert(&self, message: &Message) -> bool {
        if self.event != ChangeEvent::Insert || self.table != MESSAGES_TABLE {
            return false;
        }
        let Some(filter) = &self.filter else {
            return true;
        };
        let Some((column, value)) = filter.split_once("=eq.") else {
            return false;
        };
        match column {
            "sender_id" => message.sender_id.to_string() == value,
            "receiver_id" => message.receiver_id.to_string() == value,
            "content" => message.content == value,
            _ => false,
        }
    }
}

/// A channel to open: a client-chosen name plus its listeners.  Insert
/// events are tagged with the index of the listener that matched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelSpec {
    pub name: String,
    pub listeners: Vec<ChangeListener>,
}

/// Subscription status reported by the channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelStatus {
    Subscribed,
    ChannelError,
    TimedOut,
    Closed,
}

impl ChannelStatus {
    pub fn is_failure(self) -> bool {
        !matches!(self, ChannelStatus::Subscribed)
    }
}

/// Notifications delivered by an open channel.
#[derive(Debug, Clone, PartialEq)]
pub enum RealtimeEvent {
    Status(ChannelStatus),
    Insert { listener: usize, record: Message },
}

/// Control handle of an open channel.
#[async_trait]
pub trait ChannelHandle: Send + Sync {
    /// Leave the channel.  Calling it twice is a no-op.
    async fn unsubscribe(&self);
}

/// An open channel: its notification stream and its control handle.
pub struct Subscription {
    pub events: mpsc::Receiver<RealtimeEvent>,
    pub handle: Box<dyn ChannelHandle>,
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").finish_non_exhaustive()
    }
}

/// Opens realtime channels.
#[async_trait]
pub trait RealtimeConnector: Send + Sync {
    /// Establish the channel.  An `Err` means the transport could not be
    /// set up at all; later failures arrive as [`RealtimeEvent::Status`].
    async fn subscribe(&self, spec: ChannelSpec) -> BackendResult<Subscription>;
}
