//! Conversation list derived from the visible message rows.

use std::collections::HashMap;

use serde::Serialize;

use vibing_shared::constants::{UNKNOWN_NICKNAME, UNREAD_BADGE_CAP};
use vibing_shared::{Message, Profile, UserId};

use crate::events::ChatPeer;

/// One row of the conversation list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConversationSummary {
    pub peer: ChatPeer,
    pub last_message: Message,
    /// Some message from the peer is still unread.
    pub has_unread: bool,
}

/// Counterpart, latest message and unread flag per conversation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationDigest {
    pub peer: UserId,
    pub last_message: Message,
    pub has_unread: bool,
}

/// Group `messages` (newest first) by counterpart.  The first row seen for a
/// counterpart is its latest message, so list order follows recency.
pub fn summarize(me: UserId, messages: &[Message]) -> Vec<ConversationDigest> {
    let mut order: Vec<ConversationDigest> = Vec::new();
    let mut index: HashMap<UserId, usize> = HashMap::new();

    for message in messages {
        let Some(peer) = message.counterpart(me) else {
            continue;
        };
        let unread = message.is_received_by(me) && !message.is_read;
        match index.get(&peer) {
            Some(&i) => order[i].has_unread |= unread,
            None => {
                index.insert(peer, order.len());
                order.push(ConversationDigest {
                    peer,
                    last_message: message.clone(),
                    has_unread: unread,
                });
            }
        }
    }
    order
}

/// Join digests with their profiles.  Conversations whose counterpart has
/// no profile row are dropped.
pub fn attach_profiles(
    digests: Vec<ConversationDigest>,
    profiles: &[Profile],
) -> Vec<ConversationSummary> {
    let by_id: HashMap<UserId, &Profile> = profiles.iter().map(|p| (p.user_id, p)).collect();
    digests
        .into_iter()
        .filter_map(|digest| {
            let profile = by_id.get(&digest.peer)?;
            Some(ConversationSummary {
                peer: peer_from_profile(profile),
                last_message: digest.last_message,
                has_unread: digest.has_unread,
            })
        })
        .collect()
}

pub fn peer_from_profile(profile: &Profile) -> ChatPeer {
    ChatPeer {
        user_id: profile.user_id,
        nickname: display_name(profile.nickname.as_deref()),
        avatar_url: profile.avatar_url.clone(),
    }
}

pub fn display_name(nickname: Option<&str>) -> String {
    match nickname.map(str::trim) {
        Some(name) if !name.is_empty() => name.to_string(),
        _ => UNKNOWN_NICKNAME.to_string(),
    }
}

/// Badge text for the unread counter; hidden at zero.
pub fn unread_badge(count: u64) -> Option<String> {
    match count {
        0 => None,
        n if n > UNREAD_BADGE_CAP => Some(format!("{UNREAD_BADGE_CAP}+")),
        n => Some(n.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use vibing_shared::MessageId;

    fn row(id: i64, from: UserId, to: UserId, read: bool, age_secs: i64) -> Message {
        Message {
            id: MessageId(id),
            sender_id: from,
            receiver_id: to,
            content: format!("m{id}"),
            created_at: Utc::now() - Duration::seconds(age_secs),
            is_read: read,
            hidden_by_sender: false,
            hidden_by_receiver: false,
        }
    }

    #[test]
    fn groups_by_counterpart_keeping_latest() {
        let (me, a, b) = (UserId::new(), UserId::new(), UserId::new());
        let rows = vec![
            row(4, me, a, false, 1),
            row(3, b, me, true, 2),
            row(2, a, me, false, 3),
            row(1, b, me, true, 4),
        ];
        let digests = summarize(me, &rows);
        assert_eq!(digests.len(), 2);
        assert_eq!(digests[0].peer, a);
        assert_eq!(digests[0].last_message.id, MessageId(4));
        // My own unread outgoing row does not count, the older inbound one does.
        assert!(digests[0].has_unread);
        assert_eq!(digests[1].peer, b);
        assert!(!digests[1].has_unread);
    }

    #[test]
    fn unrelated_rows_are_skipped() {
        let (me, a, b) = (UserId::new(), UserId::new(), UserId::new());
        assert!(summarize(me, &[row(1, a, b, false, 0)]).is_empty());
    }

    #[test]
    fn profiles_are_required_and_nicknames_fall_back() {
        let (me, a, b) = (UserId::new(), UserId::new(), UserId::new());
        let digests = summarize(me, &[row(2, a, me, false, 0), row(1, b, me, false, 1)]);
        let profiles = vec![Profile {
            user_id: a,
            nickname: None,
            avatar_url: Some("https://cdn/a.png".into()),
        }];
        let summaries = attach_profiles(digests, &profiles);
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].peer.nickname, UNKNOWN_NICKNAME);
        assert_eq!(summaries[0].peer.avatar_url.as_deref(), Some("https://cdn/a.png"));
    }

    #[test]
    fn badge_caps_at_ninety_nine() {
        assert_eq!(unread_badge(0), None);
        assert_eq!(unread_badge(7).as_deref(), Some("7"));
        assert_eq!(unread_badge(99).as_deref(), Some("99"));
        assert_eq!(unread_badge(100).as_deref(), Some("99+"));
    }
}
