//! The message session: conversation list, open thread and delivery of new
//! messages for one signed-in user.
//!
//! A [`MessageSession`] is created when the Messages tab is entered and
//! disposed when it is left.  It owns its [`MessageState`] outright; the
//! runtime drives it from a single task, so every operation runs to
//! completion before the next command, channel event or timer is handled.
//!
//! New messages arrive over the realtime channel while it is subscribed and
//! through [`check_new_messages`](MessageSession::check_new_messages) while
//! it is not.  Both paths end in
//! [`handle_new_message`](MessageSession::handle_new_message), which
//! de-duplicates by message id.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, trace, warn};

use vibing_shared::backend::{
    AuthProvider, BackendResult, ChangeListener, ChannelHandle, ChannelSpec, MessageBackend,
    ProfileDirectory, RealtimeConnector, RealtimeEvent, Subscription,
};
use vibing_shared::constants::INITIAL_POLL_LOOKBACK;
use vibing_shared::{Message, MessageId, NewMessage, Role, UserId};

use crate::conversations::{
    attach_profiles, display_name, peer_from_profile, summarize, unread_badge,
    ConversationSummary,
};
use crate::delivery::{DeliveryAction, DeliveryInput, DeliveryMode};
use crate::error::SessionError;
use crate::events::{ChatPeer, EventSink, MessageEvent, TranscriptEntry};
use crate::state::MessageState;

/// Listener index of inbound messages (`receiver_id = me`).
pub const INBOUND: usize = 0;
/// Listener index of the outbound echo (`sender_id = me`).
pub const OUTBOUND: usize = 1;

const HIDE_PROMPT: &str =
    "Hide this conversation? It will disappear from your list; the other person still sees it.";

/// Asks the user to confirm a destructive action.
#[async_trait]
pub trait Confirmer: Send + Sync {
    async fn confirm(&self, prompt: &str) -> bool;
}

/// Answers every prompt the same way.
#[derive(Debug, Clone, Copy)]
pub struct StaticConfirmer(pub bool);

#[async_trait]
impl Confirmer for StaticConfirmer {
    async fn confirm(&self, _prompt: &str) -> bool {
        self.0
    }
}

/// Everything a session talks to.
#[derive(Clone)]
pub struct SessionDeps {
    pub auth: Arc<dyn AuthProvider>,
    pub messages: Arc<dyn MessageBackend>,
    pub profiles: Arc<dyn ProfileDirectory>,
    pub realtime: Arc<dyn RealtimeConnector>,
    pub confirmer: Arc<dyn Confirmer>,
}

impl SessionDeps {
    /// Use one backend for every seam.
    pub fn from_backend<B>(backend: B, confirmer: Arc<dyn Confirmer>) -> Self
    where
        B: AuthProvider + MessageBackend + ProfileDirectory + RealtimeConnector + 'static,
    {
        let backend = Arc::new(backend);
        Self {
            auth: backend.clone(),
            messages: backend.clone(),
            profiles: backend.clone(),
            realtime: backend,
            confirmer,
        }
    }
}

pub struct MessageSession {
    deps: SessionDeps,
    events: EventSink,
    state: Option<MessageState>,
    channel: Option<Box<dyn ChannelHandle>>,
}

impl MessageSession {
    pub fn new(deps: SessionDeps, events: EventSink) -> Self {
        Self {
            deps,
            events,
            state: None,
            channel: None,
        }
    }

    /// `None` until [`init`](Self::init) succeeds.
    pub fn state(&self) -> Option<&MessageState> {
        self.state.as_ref()
    }

    pub fn is_polling(&self) -> bool {
        self.state.as_ref().is_some_and(|s| s.delivery.is_polling())
    }

    pub fn delivery_mode(&self) -> DeliveryMode {
        self.state
            .as_ref()
            .map_or(DeliveryMode::Connecting, |s| s.delivery.mode())
    }

    /// Start the session for the signed-in user.
    ///
    /// The conversation list and unread count are loaded before the channel
    /// is opened.  Returns the channel's event stream, or `None` when the
    /// channel could not be set up and polling has already taken over.
    pub async fn init(&mut self) -> Result<Option<mpsc::Receiver<RealtimeEvent>>, SessionError> {
        let Some(me) = self.deps.auth.current_user().await else {
            info!("Messages opened without a signed-in user");
            self.events.emit(MessageEvent::LoginRequired);
            return Err(SessionError::LoginRequired);
        };

        self.cleanup().await;
        self.state = Some(MessageState::new(me));
        info!(user = %me.short(), "Initializing message session");

        self.refresh_overview().await;
        if let Some(state) = self.state.as_mut() {
            state.last_check = Some(Utc::now());
        }

        Ok(self.setup_realtime().await)
    }

    /// Open the user's inbox channel with the inbound and outbound listeners.
    pub async fn setup_realtime(&mut self) -> Option<mpsc::Receiver<RealtimeEvent>> {
        let me = self.state.as_ref()?.me;
        let spec = ChannelSpec {
            name: me.inbox_channel(),
            listeners: vec![
                ChangeListener::message_inserts(Role::Receiver.id_column(), me),
                ChangeListener::message_inserts(Role::Sender.id_column(), me),
            ],
        };

        match self.deps.realtime.subscribe(spec).await {
            Ok(Subscription { events, handle }) => {
                debug!(user = %me.short(), "Realtime channel requested");
                self.channel = Some(handle);
                Some(events)
            }
            Err(e) => {
                warn!(error = %e, "Realtime setup failed, falling back to polling");
                self.apply(DeliveryInput::SubscribeFailed);
                None
            }
        }
    }

    /// Replace a lost channel with a fresh subscription.  Polling keeps
    /// running until the new channel reports SUBSCRIBED.
    pub async fn rejoin_realtime(&mut self) -> Option<mpsc::Receiver<RealtimeEvent>> {
        if let Some(handle) = self.channel.take() {
            handle.unsubscribe().await;
        }
        self.setup_realtime().await
    }

    /// Feed the delivery machine and publish mode changes.
    pub fn apply(&mut self, input: DeliveryInput) -> DeliveryAction {
        let Some(state) = self.state.as_mut() else {
            return DeliveryAction::Idle;
        };
        let before = state.delivery.mode();
        let action = state.delivery.apply(input);
        let mode = state.delivery.mode();

        match action {
            DeliveryAction::StartPolling => info!(?input, "Polling for new messages"),
            DeliveryAction::StopPolling => info!(?input, "Polling stopped"),
            DeliveryAction::Poll | DeliveryAction::Idle => {}
        }
        if mode != before {
            debug!(?before, ?mode, "Delivery mode changed");
            self.events.emit(MessageEvent::DeliveryModeChanged { mode });
        }
        action
    }

    pub async fn handle_realtime_event(&mut self, event: RealtimeEvent) {
        match event {
            RealtimeEvent::Status(status) => {
                debug!(?status, "Realtime status");
                self.apply(DeliveryInput::Status(status));
            }
            RealtimeEvent::Insert {
                listener: INBOUND,
                record,
            } => self.handle_new_message(record).await,
            RealtimeEvent::Insert {
                listener: OUTBOUND,
                record,
            } => {
                trace!(id = %record.id, "Outbound echo");
                self.handle_outbound_echo().await;
            }
            RealtimeEvent::Insert { listener, record } => {
                warn!(listener, id = %record.id, "Insert for an unknown listener");
            }
        }
    }

    /// One polling tick: fetch rows received after the watermark.
    pub async fn check_new_messages(&mut self) {
        let Some(state) = self.state.as_ref() else {
            return;
        };
        let me = state.me;
        let since = state.last_check.unwrap_or_else(|| {
            Utc::now() - chrono::Duration::seconds(INITIAL_POLL_LOOKBACK.as_secs() as i64)
        });

        let rows = match self.deps.messages.received_since(me, since).await {
            Ok(rows) => rows,
            Err(e) => {
                warn!(error = %e, "Polling for new messages failed");
                return;
            }
        };
        if rows.is_empty() {
            return;
        }

        debug!(count = rows.len(), %since, "Polled new messages");
        if let (Some(state), Some(last)) = (self.state.as_mut(), rows.last()) {
            state.advance_watermark(last.created_at);
        }
        for message in rows {
            self.handle_new_message(message).await;
        }
    }

    /// A message addressed to this user arrived, by either transport.
    pub async fn handle_new_message(&mut self, message: Message) {
        let Some(state) = self.state.as_mut() else {
            return;
        };
        let me = state.me;
        if message.is_sent_by(me) || !message.is_received_by(me) {
            return;
        }

        if state.current_peer() == Some(message.sender_id) {
            if state.transcript_ids.insert(message.id) {
                self.events.emit(MessageEvent::TranscriptAppended {
                    entry: TranscriptEntry::from_message(&message, me),
                });
                if !message.is_read {
                    if let Err(e) = self.deps.messages.mark_read(&[message.id]).await {
                        warn!(id = %message.id, error = %e, "Failed to mark message read");
                    }
                }
            } else {
                trace!(id = %message.id, "Message already in transcript");
            }
        }

        self.refresh_overview().await;
    }

    /// The user's own insert, seen from another client. The transcript is
    /// already up to date, only the list ordering changes.
    pub async fn handle_outbound_echo(&mut self) {
        self.load_conversations().await;
    }

    pub async fn load_conversations(&mut self) {
        let Some(me) = self.me() else {
            return;
        };
        let conversations = self.fetch_conversations(me).await;
        self.publish_conversations(conversations);
    }

    pub async fn refresh_unread_count(&mut self) {
        let Some(me) = self.me() else {
            return;
        };
        let count = self.deps.messages.unread_count(me).await;
        self.publish_unread(count);
    }

    /// Reload the conversation list and the unread counter together.
    pub async fn refresh_overview(&mut self) {
        let Some(me) = self.me() else {
            return;
        };
        let (conversations, count) = futures::join!(
            self.fetch_conversations(me),
            self.deps.messages.unread_count(me)
        );
        self.publish_conversations(conversations);
        self.publish_unread(count);
    }

    fn me(&self) -> Option<UserId> {
        self.state.as_ref().map(|s| s.me)
    }

    async fn fetch_conversations(&self, me: UserId) -> BackendResult<Vec<ConversationSummary>> {
        let rows = self.deps.messages.visible_messages(me).await?;
        let digests = summarize(me, &rows);
        if digests.is_empty() {
            return Ok(Vec::new());
        }
        let ids: Vec<UserId> = digests.iter().map(|d| d.peer).collect();
        let profiles = self.deps.profiles.profiles(&ids).await?;
        Ok(attach_profiles(digests, &profiles))
    }

    fn publish_conversations(&mut self, result: BackendResult<Vec<ConversationSummary>>) {
        let conversations = match result {
            Ok(conversations) => conversations,
            Err(e) => {
                warn!(error = %e, "Failed to load conversations");
                return;
            }
        };
        if let Some(state) = self.state.as_mut() {
            state.conversations = conversations.clone();
            self.events.emit(MessageEvent::ConversationsUpdated {
                conversations,
                active: state.current_peer(),
            });
        }
    }

    fn publish_unread(&mut self, result: BackendResult<u64>) {
        let count = match result {
            Ok(count) => count,
            Err(e) => {
                warn!(error = %e, "Failed to refresh unread count");
                return;
            }
        };
        if let Some(state) = self.state.as_mut() {
            state.unread = count;
        }
        self.events.emit(MessageEvent::UnreadCountChanged {
            count,
            badge: unread_badge(count),
        });
    }

    /// Open the thread with `user`, taking its display data from the list
    /// when it is there.
    pub async fn select_conversation(&mut self, user: UserId) -> Result<(), SessionError> {
        let listed = self
            .state
            .as_ref()
            .ok_or(SessionError::LoginRequired)?
            .conversation(user)
            .map(|c| c.peer.clone());

        let peer = match listed {
            Some(peer) => peer,
            None => self.lookup_peer(user, None).await,
        };
        self.open_peer(peer).await;
        Ok(())
    }

    /// Open a conversation started from elsewhere (a profile or search
    /// result).  An existing conversation keeps its avatar; otherwise the
    /// avatar comes from the user's profile.
    pub async fn open_conversation_with(
        &mut self,
        user: UserId,
        nickname: &str,
    ) -> Result<(), SessionError> {
        let listed_avatar = self
            .state
            .as_ref()
            .ok_or(SessionError::LoginRequired)?
            .conversation(user)
            .map(|c| c.peer.avatar_url.clone());

        let peer = match listed_avatar {
            Some(avatar_url) => ChatPeer {
                user_id: user,
                nickname: display_name(Some(nickname)),
                avatar_url,
            },
            None => self.lookup_peer(user, Some(nickname)).await,
        };
        self.open_peer(peer).await;
        Ok(())
    }

    async fn lookup_peer(&self, user: UserId, nickname: Option<&str>) -> ChatPeer {
        let profile = match self.deps.profiles.profile(user).await {
            Ok(profile) => profile,
            Err(e) => {
                warn!(user = %user.short(), error = %e, "Failed to load profile");
                None
            }
        };
        let mut peer = match profile {
            Some(profile) => peer_from_profile(&profile),
            None => ChatPeer {
                user_id: user,
                nickname: display_name(None),
                avatar_url: None,
            },
        };
        if let Some(nickname) = nickname {
            peer.nickname = display_name(Some(nickname));
        }
        peer
    }

    async fn open_peer(&mut self, peer: ChatPeer) {
        let Some(state) = self.state.as_mut() else {
            return;
        };
        let user = peer.user_id;
        state.current = Some(peer.clone());
        debug!(peer = %user.short(), "Conversation opened");

        self.events.emit(MessageEvent::ConversationOpened { peer });
        self.events.emit(MessageEvent::ConversationsUpdated {
            conversations: state.conversations.clone(),
            active: Some(user),
        });
        self.load_thread(user).await;
    }

    /// Load the full thread with `peer` and mark its unread rows read.
    pub async fn load_thread(&mut self, peer: UserId) {
        let Some(state) = self.state.as_mut() else {
            return;
        };
        let me = state.me;
        state.transcript_ids.clear();

        let rows = match self.deps.messages.thread(me, peer).await {
            Ok(rows) => rows,
            Err(e) => {
                error!(peer = %peer.short(), error = %e, "Failed to load messages");
                self.events.emit(MessageEvent::TranscriptFailed {
                    message: "Could not load messages".into(),
                });
                return;
            }
        };

        if let Some(state) = self.state.as_mut() {
            state.transcript_ids.extend(rows.iter().map(|m| m.id));
        }
        self.events.emit(MessageEvent::TranscriptLoaded {
            peer,
            entries: rows
                .iter()
                .map(|m| TranscriptEntry::from_message(m, me))
                .collect(),
        });

        let unread: Vec<MessageId> = rows
            .iter()
            .filter(|m| m.is_received_by(me) && !m.is_read)
            .map(|m| m.id)
            .collect();
        if unread.is_empty() {
            return;
        }
        match self.deps.messages.mark_read(&unread).await {
            Ok(()) => {
                debug!(count = unread.len(), "Marked thread read");
                self.refresh_overview().await;
            }
            Err(e) => warn!(error = %e, "Failed to mark thread read"),
        }
    }

    /// Send `draft` to the open conversation.
    ///
    /// The composer is cleared only once the insert succeeded; a failed send
    /// restores the draft.  Blank drafts are ignored without any backend call.
    pub async fn send_message(&mut self, draft: &str) -> Result<(), SessionError> {
        let content = draft.trim();
        if content.is_empty() {
            return Ok(());
        }

        let Some(me) = self.deps.auth.current_user().await else {
            self.events.emit(MessageEvent::LoginRequired);
            return Err(SessionError::LoginRequired);
        };
        let state = self.state.as_mut().ok_or(SessionError::LoginRequired)?;
        if state.sending {
            debug!("Send already in flight");
            return Ok(());
        }
        let Some(peer) = state.current_peer() else {
            self.events.emit(MessageEvent::Alert {
                message: "Select a conversation first".into(),
            });
            return Err(SessionError::NoConversation);
        };

        state.sending = true;
        self.events.emit(MessageEvent::SendingChanged { sending: true });

        let result = self
            .deps
            .messages
            .insert_message(NewMessage::new(me, peer, content))
            .await;

        match &result {
            Ok(stored) => {
                info!(id = %stored.id, to = %peer.short(), "Message sent");
                self.events.emit(MessageEvent::ComposerCleared);
                if let Some(state) = self.state.as_mut() {
                    if state.transcript_ids.insert(stored.id) {
                        self.events.emit(MessageEvent::TranscriptAppended {
                            entry: TranscriptEntry::from_message(stored, me),
                        });
                    }
                }
                self.load_conversations().await;
            }
            Err(e) => {
                error!(to = %peer.short(), error = %e, "Failed to send message");
                self.events.emit(MessageEvent::Alert {
                    message: format!("Failed to send message: {e}"),
                });
                self.events.emit(MessageEvent::ComposerRestored {
                    draft: draft.to_string(),
                });
            }
        }

        if let Some(state) = self.state.as_mut() {
            state.sending = false;
        }
        self.events.emit(MessageEvent::SendingChanged { sending: false });
        result.map(|_| ()).map_err(SessionError::from)
    }

    /// Hide the conversation with `user` from this user's list after
    /// confirmation.  Returns whether anything was hidden.
    pub async fn hide_conversation(&mut self, user: UserId) -> Result<bool, SessionError> {
        let me = self.me().ok_or(SessionError::LoginRequired)?;

        if !self.deps.confirmer.confirm(HIDE_PROMPT).await {
            debug!(peer = %user.short(), "Hide cancelled");
            return Ok(false);
        }

        if let Err(e) = self.deps.messages.hide_conversation(me, user).await {
            error!(peer = %user.short(), error = %e, "Failed to hide conversation");
            self.events.emit(MessageEvent::Alert {
                message: "Failed to hide the conversation".into(),
            });
            return Err(e.into());
        }

        info!(peer = %user.short(), "Conversation hidden");
        if self.state.as_ref().and_then(|s| s.current_peer()) == Some(user) {
            self.clear_current();
        }
        self.refresh_overview().await;
        Ok(true)
    }

    /// Go back from the thread to the conversation list.
    pub async fn close_conversation(&mut self) {
        self.clear_current();
        self.load_conversations().await;
    }

    fn clear_current(&mut self) {
        if let Some(state) = self.state.as_mut() {
            state.current = None;
            state.transcript_ids.clear();
            self.events.emit(MessageEvent::ConversationClosed);
        }
    }

    /// Leave the channel and stop polling.  Safe to call repeatedly.
    pub async fn cleanup(&mut self) {
        if let Some(handle) = self.channel.take() {
            handle.unsubscribe().await;
            debug!("Realtime channel removed");
        }
        self.apply(DeliveryInput::Reset);
    }

    pub async fn dispose(mut self) {
        self.cleanup().await;
        debug!("Message session disposed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use vibing_shared::backend::ChannelStatus;
    use vibing_shared::{BackendError, Profile};
    use vibing_store::LocalBackend;

    struct FixedUser(Option<UserId>);

    #[async_trait]
    impl AuthProvider for FixedUser {
        async fn current_user(&self) -> Option<UserId> {
            self.0
        }
    }

    struct NoRealtime;

    #[async_trait]
    impl RealtimeConnector for NoRealtime {
        async fn subscribe(&self, _spec: ChannelSpec) -> BackendResult<Subscription> {
            Err(BackendError::Realtime("connection refused".into()))
        }
    }

    /// Delegates to the local backend but refuses inserts.
    struct RejectInserts(LocalBackend);

    #[async_trait]
    impl MessageBackend for RejectInserts {
        async fn visible_messages(&self, me: UserId) -> BackendResult<Vec<Message>> {
            self.0.visible_messages(me).await
        }
        async fn thread(&self, me: UserId, other: UserId) -> BackendResult<Vec<Message>> {
            self.0.thread(me, other).await
        }
        async fn received_since(
            &self,
            me: UserId,
            since: chrono::DateTime<Utc>,
        ) -> BackendResult<Vec<Message>> {
            self.0.received_since(me, since).await
        }
        async fn insert_message(&self, _message: NewMessage) -> BackendResult<Message> {
            Err(BackendError::Status {
                code: 500,
                body: "boom".into(),
            })
        }
        async fn mark_read(&self, ids: &[MessageId]) -> BackendResult<()> {
            self.0.mark_read(ids).await
        }
        async fn unread_count(&self, me: UserId) -> BackendResult<u64> {
            self.0.unread_count(me).await
        }
        async fn hide_conversation(&self, me: UserId, other: UserId) -> BackendResult<()> {
            self.0.hide_conversation(me, other).await
        }
    }

    fn deps_for(backend: &LocalBackend, user: UserId, confirm: bool) -> SessionDeps {
        SessionDeps {
            auth: Arc::new(FixedUser(Some(user))),
            messages: Arc::new(backend.clone()),
            profiles: Arc::new(backend.clone()),
            realtime: Arc::new(backend.clone()),
            confirmer: Arc::new(StaticConfirmer(confirm)),
        }
    }

    fn new_session(deps: SessionDeps) -> (MessageSession, mpsc::Receiver<MessageEvent>) {
        let (sink, rx) = EventSink::channel(1024);
        (MessageSession::new(deps, sink), rx)
    }

    fn drain(rx: &mut mpsc::Receiver<MessageEvent>) -> Vec<MessageEvent> {
        let mut out = Vec::new();
        while let Ok(event) = rx.try_recv() {
            out.push(event);
        }
        out
    }

    fn appended(events: &[MessageEvent]) -> Vec<&TranscriptEntry> {
        events
            .iter()
            .filter_map(|e| match e {
                MessageEvent::TranscriptAppended { entry } => Some(entry),
                _ => None,
            })
            .collect()
    }

    fn add_profile(backend: &LocalBackend, user: UserId, nickname: &str, avatar: Option<&str>) {
        let profile = Profile {
            user_id: user,
            nickname: Some(nickname.into()),
            avatar_url: avatar.map(str::to_string),
        };
        backend.with_db(|db| db.upsert_profile(&profile)).unwrap();
    }

    #[tokio::test]
    async fn init_requires_login() {
        let backend = LocalBackend::in_memory().unwrap();
        let mut deps = deps_for(&backend, UserId::new(), true);
        deps.auth = Arc::new(FixedUser(None));
        let (mut session, mut rx) = new_session(deps);

        assert!(matches!(
            session.init().await,
            Err(SessionError::LoginRequired)
        ));
        assert_eq!(drain(&mut rx), vec![MessageEvent::LoginRequired]);
        assert!(session.state().is_none());
        assert_eq!(backend.open_channels(), 0);
    }

    #[tokio::test]
    async fn init_loads_list_then_subscribes() {
        let backend = LocalBackend::in_memory().unwrap();
        let (me, peer) = (UserId::new(), UserId::new());
        add_profile(&backend, peer, "dj_peer", None);
        backend
            .insert_message(NewMessage::new(peer, me, "yo"))
            .await
            .unwrap();

        let (mut session, mut rx) = new_session(deps_for(&backend, me, true));
        let mut channel = session.init().await.unwrap().expect("channel");
        assert_eq!(backend.open_channels(), 1);

        let events = drain(&mut rx);
        match &events[0] {
            MessageEvent::ConversationsUpdated {
                conversations,
                active,
            } => {
                assert_eq!(conversations.len(), 1);
                assert_eq!(conversations[0].peer.nickname, "dj_peer");
                assert!(conversations[0].has_unread);
                assert_eq!(*active, None);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(
            events[1],
            MessageEvent::UnreadCountChanged {
                count: 1,
                badge: Some("1".into())
            }
        );
        assert!(session.state().unwrap().last_check.is_some());

        let status = channel.recv().await.unwrap();
        session.handle_realtime_event(status).await;
        assert_eq!(session.delivery_mode(), DeliveryMode::Realtime);
        assert_eq!(
            drain(&mut rx),
            vec![MessageEvent::DeliveryModeChanged {
                mode: DeliveryMode::Realtime
            }]
        );
    }

    #[tokio::test]
    async fn opening_a_thread_marks_it_read() {
        let backend = LocalBackend::in_memory().unwrap();
        let (me, peer) = (UserId::new(), UserId::new());
        add_profile(&backend, peer, "peer", Some("https://cdn/p.png"));
        for text in ["one", "two"] {
            backend
                .insert_message(NewMessage::new(peer, me, text))
                .await
                .unwrap();
        }

        let (mut session, mut rx) = new_session(deps_for(&backend, me, true));
        let _channel = session.init().await.unwrap();
        drain(&mut rx);

        session.select_conversation(peer).await.unwrap();
        let events = drain(&mut rx);
        assert!(events.iter().any(|e| matches!(
            e,
            MessageEvent::ConversationOpened { peer: p } if p.avatar_url.as_deref() == Some("https://cdn/p.png")
        )));
        assert!(events.iter().any(|e| matches!(
            e,
            MessageEvent::TranscriptLoaded { entries, .. } if entries.len() == 2
        )));
        assert_eq!(
            events.last(),
            Some(&MessageEvent::UnreadCountChanged {
                count: 0,
                badge: None
            })
        );
        assert_eq!(backend.unread_count(me).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn two_tabs_deliver_exactly_one_entry() {
        let backend = LocalBackend::in_memory().unwrap();
        let (alice, bob) = (UserId::new(), UserId::new());
        add_profile(&backend, alice, "alice", None);
        add_profile(&backend, bob, "bob", None);

        let (mut tab_b, mut rx_b) = new_session(deps_for(&backend, bob, true));
        let mut channel_b = tab_b.init().await.unwrap().expect("channel");
        let subscribed = channel_b.recv().await.unwrap();
        assert_eq!(subscribed, RealtimeEvent::Status(ChannelStatus::Subscribed));
        tab_b.handle_realtime_event(subscribed).await;
        tab_b.open_conversation_with(alice, "alice").await.unwrap();
        drain(&mut rx_b);

        let (mut tab_a, _rx_a) = new_session(deps_for(&backend, alice, true));
        let _channel_a = tab_a.init().await.unwrap();
        tab_a.select_conversation(bob).await.unwrap();
        tab_a.send_message("  hello bob ").await.unwrap();

        let insert = channel_b.recv().await.unwrap();
        assert!(matches!(insert, RealtimeEvent::Insert { listener: INBOUND, .. }));
        assert!(channel_b.try_recv().is_err());

        tab_b.handle_realtime_event(insert.clone()).await;
        // A concurrent poll tick is a no-op while subscribed.
        assert_eq!(tab_b.apply(DeliveryInput::PollTick), DeliveryAction::Idle);
        // Replaying the same row does not duplicate it.
        tab_b.handle_realtime_event(insert).await;

        let events = drain(&mut rx_b);
        let entries = appended(&events);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].content, "hello bob");
        assert!(!entries[0].mine);
        assert_eq!(backend.unread_count(bob).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn blocked_realtime_falls_back_to_polling() {
        let backend = LocalBackend::in_memory().unwrap();
        backend.block_realtime(true);
        let (me, peer) = (UserId::new(), UserId::new());
        add_profile(&backend, peer, "peer", None);

        let (mut session, mut rx) = new_session(deps_for(&backend, me, true));
        let mut channel = session.init().await.unwrap().expect("channel");
        assert!(channel.try_recv().is_err());

        assert_eq!(
            session.apply(DeliveryInput::WatchdogElapsed),
            DeliveryAction::StartPolling
        );
        assert!(session.is_polling());

        let at = Utc::now() + Duration::seconds(1);
        let row = backend
            .with_db(|db| db.insert_message(&NewMessage::new(peer, me, "via poll"), at))
            .unwrap();
        drain(&mut rx);

        assert_eq!(session.apply(DeliveryInput::PollTick), DeliveryAction::Poll);
        session.check_new_messages().await;
        assert_eq!(session.state().unwrap().last_check, Some(row.created_at));
        let events = drain(&mut rx);
        assert!(events.iter().any(|e| matches!(
            e,
            MessageEvent::UnreadCountChanged { count: 1, .. }
        )));

        // Strictly after the watermark: the same row is not reported again.
        session.check_new_messages().await;
        assert!(drain(&mut rx).is_empty());

        backend.block_realtime(false);
        let status = channel.recv().await.unwrap();
        session.handle_realtime_event(status).await;
        assert!(!session.is_polling());
        assert_eq!(session.apply(DeliveryInput::PollTick), DeliveryAction::Idle);
    }

    #[tokio::test]
    async fn one_poll_delivers_every_new_row_once() {
        let backend = LocalBackend::in_memory().unwrap();
        let (me, peer, other) = (UserId::new(), UserId::new(), UserId::new());
        add_profile(&backend, peer, "peer", None);
        add_profile(&backend, other, "other", None);
        let mut deps = deps_for(&backend, me, true);
        deps.realtime = Arc::new(NoRealtime);
        let (mut session, mut rx) = new_session(deps);
        assert!(session.init().await.unwrap().is_none());
        session.open_conversation_with(peer, "peer").await.unwrap();
        drain(&mut rx);

        let t0 = Utc::now() + Duration::seconds(1);
        let insert = |from: UserId, text: &str, offset_ms: i64| {
            let at = t0 + Duration::milliseconds(offset_ms);
            backend
                .with_db(|db| db.insert_message(&NewMessage::new(from, me, text), at))
                .unwrap()
        };
        insert(peer, "a", 0);
        insert(peer, "b", 250);
        insert(peer, "c", 500);
        let latest = insert(other, "elsewhere", 750);

        assert_eq!(session.apply(DeliveryInput::PollTick), DeliveryAction::Poll);
        session.check_new_messages().await;

        let events = drain(&mut rx);
        let contents: Vec<&str> = appended(&events)
            .iter()
            .map(|e| e.content.as_str())
            .collect();
        assert_eq!(contents, vec!["a", "b", "c"]);
        assert_eq!(session.state().unwrap().last_check, Some(latest.created_at));
        // Rows for the open thread were read on arrival.
        assert_eq!(backend.unread_count(me).await.unwrap(), 1);

        session.check_new_messages().await;
        assert!(appended(&drain(&mut rx)).is_empty());
    }

    #[tokio::test]
    async fn subscribe_error_polls_immediately() {
        let backend = LocalBackend::in_memory().unwrap();
        let mut deps = deps_for(&backend, UserId::new(), true);
        deps.realtime = Arc::new(NoRealtime);
        let (mut session, mut rx) = new_session(deps);

        assert!(session.init().await.unwrap().is_none());
        assert!(session.is_polling());
        assert!(drain(&mut rx).contains(&MessageEvent::DeliveryModeChanged {
            mode: DeliveryMode::Polling
        }));
    }

    #[tokio::test]
    async fn blank_and_orphan_sends() {
        let backend = LocalBackend::in_memory().unwrap();
        let me = UserId::new();
        let (mut session, mut rx) = new_session(deps_for(&backend, me, true));
        let _channel = session.init().await.unwrap();
        drain(&mut rx);

        session.send_message("   \n\t").await.unwrap();
        assert!(drain(&mut rx).is_empty());

        assert!(matches!(
            session.send_message("hi").await,
            Err(SessionError::NoConversation)
        ));
        assert!(matches!(
            drain(&mut rx).as_slice(),
            [MessageEvent::Alert { .. }]
        ));
        assert!(backend.visible_messages(me).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn failed_send_restores_the_draft() {
        let backend = LocalBackend::in_memory().unwrap();
        let (me, peer) = (UserId::new(), UserId::new());
        add_profile(&backend, peer, "peer", None);
        let mut deps = deps_for(&backend, me, true);
        deps.messages = Arc::new(RejectInserts(backend.clone()));
        let (mut session, mut rx) = new_session(deps);
        let _channel = session.init().await.unwrap();
        session.select_conversation(peer).await.unwrap();
        drain(&mut rx);

        let err = session.send_message("keep me").await.unwrap_err();
        assert!(matches!(err, SessionError::Backend(BackendError::Status { code: 500, .. })));

        let events = drain(&mut rx);
        assert_eq!(events.first(), Some(&MessageEvent::SendingChanged { sending: true }));
        assert!(events.contains(&MessageEvent::ComposerRestored {
            draft: "keep me".into()
        }));
        assert!(!events.contains(&MessageEvent::ComposerCleared));
        assert_eq!(events.last(), Some(&MessageEvent::SendingChanged { sending: false }));
        assert!(!session.state().unwrap().sending);
    }

    #[tokio::test]
    async fn successful_send_appends_after_the_insert() {
        let backend = LocalBackend::in_memory().unwrap();
        let (me, peer) = (UserId::new(), UserId::new());
        add_profile(&backend, peer, "peer", None);
        let (mut session, mut rx) = new_session(deps_for(&backend, me, true));
        let _channel = session.init().await.unwrap();
        session.open_conversation_with(peer, "peer").await.unwrap();
        drain(&mut rx);

        session.send_message("first!").await.unwrap();
        let events = drain(&mut rx);
        let cleared = events
            .iter()
            .position(|e| *e == MessageEvent::ComposerCleared)
            .unwrap();
        let entries = appended(&events);
        assert_eq!(entries.len(), 1);
        assert!(entries[0].mine);
        assert!(events[cleared + 1..]
            .iter()
            .any(|e| matches!(e, MessageEvent::ConversationsUpdated { conversations, .. } if conversations.len() == 1)));
    }

    #[tokio::test]
    async fn hiding_is_per_participant_and_confirmed() {
        let backend = LocalBackend::in_memory().unwrap();
        let (me, peer) = (UserId::new(), UserId::new());
        add_profile(&backend, peer, "peer", None);
        add_profile(&backend, me, "me", None);
        backend
            .insert_message(NewMessage::new(me, peer, "hey"))
            .await
            .unwrap();

        let (mut cautious, _rx) = new_session(deps_for(&backend, me, false));
        let _channel = cautious.init().await.unwrap();
        assert!(!cautious.hide_conversation(peer).await.unwrap());
        assert_eq!(backend.visible_messages(me).await.unwrap().len(), 1);

        let (mut session, mut rx) = new_session(deps_for(&backend, me, true));
        let _channel = session.init().await.unwrap();
        session.select_conversation(peer).await.unwrap();
        drain(&mut rx);

        assert!(session.hide_conversation(peer).await.unwrap());
        let events = drain(&mut rx);
        assert_eq!(events[0], MessageEvent::ConversationClosed);
        assert!(events.iter().any(|e| matches!(
            e,
            MessageEvent::ConversationsUpdated { conversations, active: None } if conversations.is_empty()
        )));
        assert!(backend.visible_messages(me).await.unwrap().is_empty());
        assert_eq!(backend.visible_messages(peer).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn hiding_an_unread_conversation_clears_the_badge() {
        let backend = LocalBackend::in_memory().unwrap();
        let (me, peer) = (UserId::new(), UserId::new());
        add_profile(&backend, peer, "peer", None);
        backend
            .insert_message(NewMessage::new(peer, me, "unread"))
            .await
            .unwrap();

        let (mut session, mut rx) = new_session(deps_for(&backend, me, true));
        let _channel = session.init().await.unwrap();
        assert!(drain(&mut rx)
            .iter()
            .any(|e| matches!(e, MessageEvent::UnreadCountChanged { count: 1, .. })));

        assert!(session.hide_conversation(peer).await.unwrap());
        session.open_conversation_with(peer, "peer").await.unwrap();
        session.close_conversation().await;
        session.refresh_overview().await;

        let last_unread = drain(&mut rx).into_iter().rev().find_map(|e| match e {
            MessageEvent::UnreadCountChanged { count, badge } => Some((count, badge)),
            _ => None,
        });
        assert_eq!(last_unread, Some((0, None)));
        assert_eq!(backend.unread_count(me).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn new_conversation_uses_the_profile_avatar() {
        let backend = LocalBackend::in_memory().unwrap();
        let (me, stranger) = (UserId::new(), UserId::new());
        add_profile(&backend, stranger, "stranger", Some("https://cdn/s.png"));
        let (mut session, mut rx) = new_session(deps_for(&backend, me, true));
        let _channel = session.init().await.unwrap();
        drain(&mut rx);

        session
            .open_conversation_with(stranger, "Stranger Things")
            .await
            .unwrap();
        let events = drain(&mut rx);
        assert_eq!(
            events[0],
            MessageEvent::ConversationOpened {
                peer: ChatPeer {
                    user_id: stranger,
                    nickname: "Stranger Things".into(),
                    avatar_url: Some("https://cdn/s.png".into()),
                }
            }
        );
        assert!(events.contains(&MessageEvent::TranscriptLoaded {
            peer: stranger,
            entries: vec![]
        }));
    }

    #[tokio::test]
    async fn dispose_leaves_the_channel() {
        let backend = LocalBackend::in_memory().unwrap();
        let (mut session, _rx) = new_session(deps_for(&backend, UserId::new(), true));
        let _channel = session.init().await.unwrap();
        assert_eq!(backend.open_channels(), 1);

        // Re-entering tears the previous channel down first.
        let _channel = session.init().await.unwrap();
        assert_eq!(backend.open_channels(), 1);

        session.dispose().await;
        assert_eq!(backend.open_channels(), 0);
    }
}
