//! [`LocalBackend`]: the embedded database behind the async backend traits.
//!
//! Inserts are fanned out in-process to every open channel whose listener
//! filter matches the new row, which gives the same notification shape as
//! the hosted realtime service.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tracing::{debug, trace};

use vibing_shared::backend::{
    AuthProvider, BackendResult, ChangeListener, ChannelHandle, ChannelSpec,
    ChannelStatus, CommunityBackend, MessageBackend, ProfileDirectory, RealtimeConnector,
    RealtimeEvent, Subscription,
};
use vibing_shared::community::{
    Comment, FollowRow, FollowStats, NewComment, PostStamp, Reaction, ReactionRow, TagUsage,
};
use vibing_shared::{
    BackendError, CommentId, Message, MessageId, NewMessage, PostId, Profile, UserId,
};

use crate::database::Database;
use crate::error::StoreError;

const CHANNEL_CAPACITY: usize = 64;

struct LocalChannel {
    name: String,
    listeners: Vec<ChangeListener>,
    tx: mpsc::Sender<RealtimeEvent>,
    closed: Arc<AtomicBool>,
    /// False while realtime is blocked; the channel has not been acked yet.
    live: bool,
}

impl LocalChannel {
    fn is_open(&self) -> bool {
        !self.closed.load(Ordering::SeqCst) && !self.tx.is_closed()
    }
}

/// Cloneable handle over a shared [`Database`].
#[derive(Clone)]
pub struct LocalBackend {
    db: Arc<Mutex<Database>>,
    channels: Arc<Mutex<Vec<LocalChannel>>>,
    signed_in: Arc<Mutex<Option<UserId>>>,
    realtime_blocked: Arc<AtomicBool>,
}

impl LocalBackend {
    pub fn new(db: Database) -> Self {
        Self {
            db: Arc::new(Mutex::new(db)),
            channels: Arc::new(Mutex::new(Vec::new())),
            signed_in: Arc::new(Mutex::new(None)),
            realtime_blocked: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn in_memory() -> Result<Self, StoreError> {
        Database::open_in_memory().map(Self::new)
    }

    /// Record who [`AuthProvider::current_user`] reports.
    pub fn sign_in(&self, user: Option<UserId>) {
        if let Ok(mut guard) = self.signed_in.lock() {
            *guard = user;
        }
    }

    /// While blocked, channels never report a status and never deliver
    /// inserts, like a websocket swallowed by a proxy.  Unblocking acks every
    /// channel that is still waiting.
    pub fn block_realtime(&self, blocked: bool) {
        self.realtime_blocked.store(blocked, Ordering::SeqCst);
        if blocked {
            return;
        }
        let Ok(mut channels) = self.channels.lock() else {
            return;
        };
        for channel in channels.iter_mut().filter(|c| !c.live && c.is_open()) {
            channel.live = true;
            debug!(channel = %channel.name, "realtime unblocked, channel subscribed");
            let _ = channel
                .tx
                .try_send(RealtimeEvent::Status(ChannelStatus::Subscribed));
        }
    }

    /// Run `f` against the database under the lock.
    pub fn with_db<T>(
        &self,
        f: impl FnOnce(&Database) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let db = self.lock_db()?;
        f(&db)
    }

    /// Channels that have not been unsubscribed or dropped.
    pub fn open_channels(&self) -> usize {
        match self.channels.lock() {
            Ok(mut channels) => {
                channels.retain(LocalChannel::is_open);
                channels.len()
            }
            Err(_) => 0,
        }
    }

    fn lock_db(&self) -> Result<MutexGuard<'_, Database>, StoreError> {
        self.db.lock().map_err(|_| StoreError::Poisoned)
    }

    fn publish_insert(&self, message: &Message) {
        let Ok(mut channels) = self.channels.lock() else {
            return;
        };
        channels.retain(LocalChannel::is_open);

        for channel in channels.iter().filter(|c| c.live) {
            for (idx, listener) in channel.listeners.iter().enumerate() {
                if !listener.matches_insert(message) {
                    continue;
                }
                trace!(channel = %channel.name, listener = idx, id = %message.id, "fan out insert");
                let event = RealtimeEvent::Insert {
                    listener: idx,
                    record: message.clone(),
                };
                if channel.tx.try_send(event).is_err() {
                    debug!(channel = %channel.name, "channel full, dropping insert");
                }
            }
        }
    }
}

struct LocalChannelHandle {
    closed: Arc<AtomicBool>,
}

#[async_trait]
impl ChannelHandle for LocalChannelHandle {
    async fn unsubscribe(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl AuthProvider for LocalBackend {
    async fn current_user(&self) -> Option<UserId> {
        self.signed_in.lock().ok().and_then(|guard| *guard)
    }
}

#[async_trait]
impl MessageBackend for LocalBackend {
    async fn visible_messages(&self, me: UserId) -> BackendResult<Vec<Message>> {
        Ok(self.lock_db()?.visible_messages(me)?)
    }

    async fn thread(&self, me: UserId, other: UserId) -> BackendResult<Vec<Message>> {
        Ok(self.lock_db()?.thread(me, other)?)
    }

    async fn received_since(
        &self,
        me: UserId,
        since: DateTime<Utc>,
    ) -> BackendResult<Vec<Message>> {
        Ok(self.lock_db()?.received_since(me, since)?)
    }

    async fn insert_message(&self, message: NewMessage) -> BackendResult<Message> {
        let stored = self.lock_db()?.insert_message(&message, Utc::now())?;
        self.publish_insert(&stored);
        Ok(stored)
    }

    async fn mark_read(&self, ids: &[MessageId]) -> BackendResult<()> {
        if ids.is_empty() {
            return Ok(());
        }
        self.lock_db()?.mark_read(ids)?;
        Ok(())
    }

    async fn unread_count(&self, me: UserId) -> BackendResult<u64> {
        Ok(self.lock_db()?.unread_count(me)?)
    }

    async fn hide_conversation(&self, me: UserId, other: UserId) -> BackendResult<()> {
        self.lock_db()?.hide_conversation(me, other)?;
        Ok(())
    }
}

#[async_trait]
impl ProfileDirectory for LocalBackend {
    async fn profiles(&self, ids: &[UserId]) -> BackendResult<Vec<Profile>> {
        Ok(self.lock_db()?.get_profiles(ids)?)
    }

    async fn profile(&self, id: UserId) -> BackendResult<Option<Profile>> {
        Ok(self.lock_db()?.get_profile(id)?)
    }

    async fn nickname_taken(&self, nickname: &str, except: Option<UserId>) -> BackendResult<bool> {
        Ok(self.lock_db()?.nickname_taken(nickname, except)?)
    }
}

#[async_trait]
impl CommunityBackend for LocalBackend {
    async fn post_author(&self, post: PostId) -> BackendResult<Option<UserId>> {
        Ok(self.lock_db()?.post_author(post)?)
    }

    async fn post_stamps(&self, posts: &[PostId]) -> BackendResult<Vec<PostStamp>> {
        Ok(self.lock_db()?.post_stamps(posts)?)
    }

    async fn reaction(&self, post: PostId, user: UserId) -> BackendResult<Option<Reaction>> {
        Ok(self.lock_db()?.reaction(post, user)?)
    }

    async fn set_reaction(
        &self,
        post: PostId,
        user: UserId,
        reaction: Option<Reaction>,
    ) -> BackendResult<()> {
        Ok(self.lock_db()?.set_reaction(post, user, reaction, Utc::now())?)
    }

    async fn reactions(&self, posts: &[PostId]) -> BackendResult<Vec<ReactionRow>> {
        Ok(self.lock_db()?.reactions(posts)?)
    }

    async fn is_following(&self, follower: UserId, followee: UserId) -> BackendResult<bool> {
        Ok(self.lock_db()?.is_following(follower, followee)?)
    }

    async fn set_following(
        &self,
        follower: UserId,
        followee: UserId,
        follow: bool,
    ) -> BackendResult<()> {
        Ok(self
            .lock_db()?
            .set_following(follower, followee, follow, Utc::now())?)
    }

    async fn follow_stats(&self, user: UserId) -> BackendResult<FollowStats> {
        Ok(self.lock_db()?.follow_stats(user)?)
    }

    async fn followers(
        &self,
        user: UserId,
        limit: u32,
        offset: u32,
    ) -> BackendResult<Vec<FollowRow>> {
        Ok(self.lock_db()?.followers(user, limit, offset)?)
    }

    async fn following(
        &self,
        user: UserId,
        limit: u32,
        offset: u32,
    ) -> BackendResult<Vec<FollowRow>> {
        Ok(self.lock_db()?.following(user, limit, offset)?)
    }

    async fn is_saved(&self, post: PostId, user: UserId) -> BackendResult<bool> {
        Ok(self.lock_db()?.is_saved(post, user)?)
    }

    async fn set_saved(&self, post: PostId, user: UserId, saved: bool) -> BackendResult<()> {
        Ok(self.lock_db()?.set_saved(post, user, saved, Utc::now())?)
    }

    async fn saved_among(&self, user: UserId, posts: &[PostId]) -> BackendResult<Vec<PostId>> {
        Ok(self.lock_db()?.saved_among(user, posts)?)
    }

    async fn comments(&self, post: PostId) -> BackendResult<Vec<Comment>> {
        Ok(self.lock_db()?.comments(post)?)
    }

    async fn comment_posts(&self, posts: &[PostId]) -> BackendResult<Vec<PostId>> {
        Ok(self.lock_db()?.comment_posts(posts)?)
    }

    async fn insert_comment(&self, comment: NewComment) -> BackendResult<Comment> {
        Ok(self.lock_db()?.insert_comment(&comment, Utc::now())?)
    }

    async fn comment_author(&self, id: CommentId) -> BackendResult<Option<UserId>> {
        Ok(self.lock_db()?.comment_author(id)?)
    }

    async fn delete_comment(&self, id: CommentId) -> BackendResult<()> {
        self.lock_db()?.delete_comment(id)?;
        Ok(())
    }

    async fn post_tags(&self, post: PostId) -> BackendResult<Vec<String>> {
        Ok(self.lock_db()?.post_tags(post)?)
    }

    async fn attach_tag(&self, post: PostId, name: &str) -> BackendResult<bool> {
        Ok(self.lock_db()?.attach_tag(post, name)?)
    }

    async fn clear_tags(&self, post: PostId) -> BackendResult<()> {
        self.lock_db()?.clear_tags(post)?;
        Ok(())
    }

    async fn search_tags(&self, prefix: &str, limit: u32) -> BackendResult<Vec<TagUsage>> {
        Ok(self.lock_db()?.search_tags(prefix, limit)?)
    }
}

#[async_trait]
impl RealtimeConnector for LocalBackend {
    async fn subscribe(&self, spec: ChannelSpec) -> BackendResult<Subscription> {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let closed = Arc::new(AtomicBool::new(false));
        let handle = Box::new(LocalChannelHandle {
            closed: closed.clone(),
        });

        let live = !self.realtime_blocked.load(Ordering::SeqCst);
        if live {
            tx.try_send(RealtimeEvent::Status(ChannelStatus::Subscribed))
                .map_err(|e| BackendError::Realtime(e.to_string()))?;
        } else {
            debug!(channel = %spec.name, "realtime blocked, channel will stay silent");
        }

        let mut channels = self
            .channels
            .lock()
            .map_err(|_| BackendError::Storage(StoreError::Poisoned.to_string()))?;
        debug!(channel = %spec.name, listeners = spec.listeners.len(), "local channel opened");
        channels.push(LocalChannel {
            name: spec.name,
            listeners: spec.listeners,
            tx,
            closed,
            live,
        });

        Ok(Subscription { events: rx, handle })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec_for(user: UserId) -> ChannelSpec {
        ChannelSpec {
            name: user.inbox_channel(),
            listeners: vec![
                ChangeListener::message_inserts("receiver_id", user),
                ChangeListener::message_inserts("sender_id", user),
            ],
        }
    }

    #[tokio::test]
    async fn inserts_reach_matching_listeners_only() {
        let backend = LocalBackend::in_memory().unwrap();
        let (a, b, c) = (UserId::new(), UserId::new(), UserId::new());

        let mut sub_a = backend.subscribe(spec_for(a)).await.unwrap();
        let mut sub_c = backend.subscribe(spec_for(c)).await.unwrap();
        assert_eq!(
            sub_a.events.recv().await,
            Some(RealtimeEvent::Status(ChannelStatus::Subscribed))
        );
        assert_eq!(
            sub_c.events.recv().await,
            Some(RealtimeEvent::Status(ChannelStatus::Subscribed))
        );

        let stored = backend
            .insert_message(NewMessage::new(b, a, "hi"))
            .await
            .unwrap();

        match sub_a.events.recv().await {
            Some(RealtimeEvent::Insert { listener, record }) => {
                assert_eq!(listener, 0);
                assert_eq!(record, stored);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(sub_c.events.try_recv().is_err());
    }

    #[tokio::test]
    async fn unsubscribed_channels_stop_receiving() {
        let backend = LocalBackend::in_memory().unwrap();
        let (a, b) = (UserId::new(), UserId::new());
        let mut sub = backend.subscribe(spec_for(a)).await.unwrap();
        let _ = sub.events.recv().await;
        assert_eq!(backend.open_channels(), 1);

        sub.handle.unsubscribe().await;
        sub.handle.unsubscribe().await;
        assert_eq!(backend.open_channels(), 0);

        backend
            .insert_message(NewMessage::new(b, a, "late"))
            .await
            .unwrap();
        assert!(sub.events.try_recv().is_err());
    }

    #[tokio::test]
    async fn blocked_realtime_stays_silent() {
        let backend = LocalBackend::in_memory().unwrap();
        backend.block_realtime(true);
        let (a, b) = (UserId::new(), UserId::new());
        let mut sub = backend.subscribe(spec_for(a)).await.unwrap();

        backend
            .insert_message(NewMessage::new(b, a, "hello"))
            .await
            .unwrap();
        assert!(sub.events.try_recv().is_err());

        // Polling still sees the row.
        let since = Utc::now() - chrono::Duration::seconds(5);
        assert_eq!(backend.received_since(a, since).await.unwrap().len(), 1);

        backend.block_realtime(false);
        assert_eq!(
            sub.events.recv().await,
            Some(RealtimeEvent::Status(ChannelStatus::Subscribed))
        );
        backend
            .insert_message(NewMessage::new(b, a, "again"))
            .await
            .unwrap();
        assert!(matches!(
            sub.events.recv().await,
            Some(RealtimeEvent::Insert { listener: 0, .. })
        ));
    }

    #[tokio::test]
    async fn auth_and_profiles_round_trip() {
        let backend = LocalBackend::in_memory().unwrap();
        assert_eq!(backend.current_user().await, None);
        let me = UserId::new();
        backend.sign_in(Some(me));
        assert_eq!(backend.current_user().await, Some(me));

        let profile = Profile {
            user_id: me,
            nickname: Some("vibe_master".into()),
            avatar_url: None,
        };
        backend.with_db(|db| db.upsert_profile(&profile)).unwrap();
        assert_eq!(backend.profile(me).await.unwrap(), Some(profile));
        assert!(backend.nickname_taken("VIBE_MASTER", None).await.unwrap());
        assert!(!backend.nickname_taken("vibe_master", Some(me)).await.unwrap());
    }

    #[tokio::test]
    async fn empty_mark_read_is_a_no_op() {
        let backend = LocalBackend::in_memory().unwrap();
        backend.mark_read(&[]).await.unwrap();
    }

    #[tokio::test]
    async fn community_calls_reach_the_database() {
        let backend = LocalBackend::in_memory().unwrap();
        let (author, fan) = (UserId::new(), UserId::new());
        let post = backend
            .with_db(|db| db.insert_post(author, "first light", Utc::now()))
            .unwrap();

        assert_eq!(backend.post_author(post).await.unwrap(), Some(author));
        backend.set_reaction(post, fan, Some(Reaction::Like)).await.unwrap();
        assert_eq!(backend.reaction(post, fan).await.unwrap(), Some(Reaction::Like));
        backend.set_following(fan, author, true).await.unwrap();
        assert_eq!(backend.follow_stats(author).await.unwrap().followers, 1);
        backend.set_saved(post, fan, true).await.unwrap();
        assert_eq!(backend.saved_among(fan, &[post]).await.unwrap(), vec![post]);
        assert!(backend.attach_tag(post, "dawn").await.unwrap());
        assert_eq!(backend.search_tags("da", 5).await.unwrap()[0].usage_count, 1);
    }
}
