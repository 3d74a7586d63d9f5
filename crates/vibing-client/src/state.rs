//! Per-session message state.
//!
//! Owned by exactly one [`MessageSession`](crate::session::MessageSession);
//! nothing else reads or writes it, so it needs no locking.

use std::collections::HashSet;

use chrono::{DateTime, Utc};

use vibing_shared::{MessageId, UserId};

use crate::conversations::ConversationSummary;
use crate::delivery::DeliveryMachine;
use crate::events::ChatPeer;

pub struct MessageState {
    /// The signed-in user this session belongs to.
    pub me: UserId,

    /// Counterpart of the open thread, if any.
    pub current: Option<ChatPeer>,

    /// Last computed conversation list.
    pub conversations: Vec<ConversationSummary>,

    /// Realtime/polling selection.
    pub delivery: DeliveryMachine,

    /// Polling watermark: only rows created after this are fetched.
    /// `None` until the first load completes.
    pub last_check: Option<DateTime<Utc>>,

    /// A send is in flight; further sends are ignored.
    pub sending: bool,

    /// Ids already rendered into the open transcript.
    pub transcript_ids: HashSet<MessageId>,

    /// Last known unread counter.
    pub unread: u64,
}

impl MessageState {
    pub fn new(me: UserId) -> Self {
        Self {
            me,
            current: None,
            conversations: Vec::new(),
            delivery: DeliveryMachine::new(),
            last_check: None,
            sending: false,
            transcript_ids: HashSet::new(),
            unread: 0,
        }
    }

    pub fn current_peer(&self) -> Option<UserId> {
        self.current.as_ref().map(|p| p.user_id)
    }

    pub fn conversation(&self, peer: UserId) -> Option<&ConversationSummary> {
        self.conversations.iter().find(|c| c.peer.user_id == peer)
    }

    /// Move the watermark forward; it never goes back.
    pub fn advance_watermark(&mut self, to: DateTime<Utc>) {
        if self.last_check.map_or(true, |current| to > current) {
            self.last_check = Some(to);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn watermark_only_moves_forward() {
        let mut state = MessageState::new(UserId::new());
        let now = Utc::now();
        state.advance_watermark(now);
        state.advance_watermark(now - Duration::seconds(10));
        assert_eq!(state.last_check, Some(now));
        state.advance_watermark(now + Duration::seconds(1));
        assert_eq!(state.last_check, Some(now + Duration::seconds(1)));
    }
}
