use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc;

use vibing_shared::{Message, MessageId, UserId};

use crate::conversations::ConversationSummary;
use crate::delivery::DeliveryMode;

/// The counterpart of an open conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatPeer {
    pub user_id: UserId,
    pub nickname: String,
    pub avatar_url: Option<String>,
}

/// One rendered line of the open transcript.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TranscriptEntry {
    pub id: MessageId,
    pub content: String,
    pub created_at: DateTime<Utc>,
    /// Sent by the signed-in user.
    pub mine: bool,
}

impl TranscriptEntry {
    pub fn from_message(message: &Message, me: UserId) -> Self {
        Self {
            id: message.id,
            content: message.content.clone(),
            created_at: message.created_at,
            mine: message.is_sent_by(me),
        }
    }
}

/// View-model updates emitted by the message session.  The UI layer renders
/// these; the session never touches presentation directly.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessageEvent {
    LoginRequired,
    /// Blocking notification for a failed foreground action.
    Alert { message: String },
    ConversationsUpdated {
        conversations: Vec<ConversationSummary>,
        active: Option<UserId>,
    },
    UnreadCountChanged { count: u64, badge: Option<String> },
    ConversationOpened { peer: ChatPeer },
    ConversationClosed,
    TranscriptLoaded {
        peer: UserId,
        entries: Vec<TranscriptEntry>,
    },
    TranscriptAppended { entry: TranscriptEntry },
    TranscriptFailed { message: String },
    ComposerCleared,
    /// Put the draft back after a failed send.
    ComposerRestored { draft: String },
    SendingChanged { sending: bool },
    DeliveryModeChanged { mode: DeliveryMode },
}

impl MessageEvent {
    pub fn name(&self) -> &'static str {
        match self {
            MessageEvent::LoginRequired => "login-required",
            MessageEvent::Alert { .. } => "alert",
            MessageEvent::ConversationsUpdated { .. } => "conversations-updated",
            MessageEvent::UnreadCountChanged { .. } => "unread-count-changed",
            MessageEvent::ConversationOpened { .. } => "conversation-opened",
            MessageEvent::ConversationClosed => "conversation-closed",
            MessageEvent::TranscriptLoaded { .. } => "transcript-loaded",
            MessageEvent::TranscriptAppended { .. } => "transcript-appended",
            MessageEvent::TranscriptFailed { .. } => "transcript-failed",
            MessageEvent::ComposerCleared => "composer-cleared",
            MessageEvent::ComposerRestored { .. } => "composer-restored",
            MessageEvent::SendingChanged { .. } => "sending-changed",
            MessageEvent::DeliveryModeChanged { .. } => "delivery-mode-changed",
        }
    }
}

/// Sending half of the view-model stream.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: mpsc::Sender<MessageEvent>,
}

impl EventSink {
    pub fn new(tx: mpsc::Sender<MessageEvent>) -> Self {
        Self { tx }
    }

    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<MessageEvent>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self::new(tx), rx)
    }

    pub fn emit(&self, event: MessageEvent) {
        let name = event.name();
        if let Err(e) = self.tx.try_send(event) {
            tracing::error!(event = name, error = %e, "Failed to emit event");
        }
    }
}
