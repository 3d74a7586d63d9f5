//! Board interactions around posts: reactions, follows, saves, comments
//! and tags.  Only the pure parts live here; the reads and writes go
//! through [`crate::backend::CommunityBackend`].

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::constants::MAX_TAG_LENGTH;
use crate::message::Profile;
use crate::ranking::RankedPost;
use crate::types::{CommentId, PostId, UserId};

// ---------------------------------------------------------------------------
// Reactions
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Reaction {
    Like,
    Dislike,
}

impl Reaction {
    pub fn as_str(self) -> &'static str {
        match self {
            Reaction::Like => "like",
            Reaction::Dislike => "dislike",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "like" => Some(Reaction::Like),
            "dislike" => Some(Reaction::Dislike),
            _ => None,
        }
    }
}

/// What pressing a reaction button does to the stored row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReactionChange {
    /// No row yet: store the pressed reaction.
    Add(Reaction),
    /// The other reaction is stored: flip it.
    Switch(Reaction),
    /// The pressed reaction is already stored: take it back.
    Remove,
}

impl ReactionChange {
    /// The reaction stored after the change.
    pub fn result(self) -> Option<Reaction> {
        match self {
            ReactionChange::Add(r) | ReactionChange::Switch(r) => Some(r),
            ReactionChange::Remove => None,
        }
    }
}

/// Like and dislike are mutually exclusive toggles.
pub fn toggle_reaction(current: Option<Reaction>, pressed: Reaction) -> ReactionChange {
    match current {
        None => ReactionChange::Add(pressed),
        Some(r) if r == pressed => ReactionChange::Remove,
        Some(_) => ReactionChange::Switch(pressed),
    }
}

/// One stored reaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReactionRow {
    #[serde(rename = "artwork_id")]
    pub post_id: PostId,
    pub user_id: UserId,
    #[serde(rename = "like_type")]
    pub reaction: Reaction,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LikeSummary {
    pub likes: u64,
    pub dislikes: u64,
    /// The viewer's own reaction, if signed in.
    pub mine: Option<Reaction>,
}

impl LikeSummary {
    pub fn net(&self) -> i64 {
        self.likes as i64 - self.dislikes as i64
    }

    pub fn ranked(&self, id: PostId, created_at: DateTime<Utc>) -> RankedPost {
        RankedPost {
            id: id.0,
            created_at,
            likes_count: self.likes,
            dislikes_count: self.dislikes,
        }
    }
}

/// A post's id and creation time, the inputs ranking needs besides votes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostStamp {
    pub id: PostId,
    pub created_at: DateTime<Utc>,
}

/// Per-post totals.  Every id in `posts` gets an entry, zero if unrated.
pub fn tally_reactions(
    posts: &[PostId],
    rows: &[ReactionRow],
    viewer: Option<UserId>,
) -> HashMap<PostId, LikeSummary> {
    let mut out: HashMap<PostId, LikeSummary> =
        posts.iter().map(|p| (*p, LikeSummary::default())).collect();
    for row in rows {
        let Some(summary) = out.get_mut(&row.post_id) else {
            continue;
        };
        match row.reaction {
            Reaction::Like => summary.likes += 1,
            Reaction::Dislike => summary.dislikes += 1,
        }
        if viewer == Some(row.user_id) {
            summary.mine = Some(row.reaction);
        }
    }
    out
}

// ---------------------------------------------------------------------------
// Follows
// ---------------------------------------------------------------------------

/// One side of a follow edge: who, and since when.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FollowRow {
    pub user_id: UserId,
    pub followed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FollowEntry {
    pub user_id: UserId,
    pub followed_at: DateTime<Utc>,
    pub profile: Option<Profile>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FollowStats {
    pub followers: u64,
    pub following: u64,
}

/// Pair follow rows with whatever profiles were found, keeping row order.
pub fn attach_profiles(rows: Vec<FollowRow>, profiles: Vec<Profile>) -> Vec<FollowEntry> {
    let mut by_id: HashMap<UserId, Profile> =
        profiles.into_iter().map(|p| (p.user_id, p)).collect();
    rows.into_iter()
        .map(|row| FollowEntry {
            profile: by_id.remove(&row.user_id),
            user_id: row.user_id,
            followed_at: row.followed_at,
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Comments
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Comment {
    pub id: CommentId,
    #[serde(rename = "artwork_id")]
    pub post_id: PostId,
    pub user_id: UserId,
    pub content: String,
    #[serde(default)]
    pub author_nickname: Option<String>,
    #[serde(rename = "parent_comment_id", default)]
    pub parent_id: Option<CommentId>,
    pub created_at: DateTime<Utc>,
}

/// Insert payload.  `id` and `created_at` are assigned by the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NewComment {
    #[serde(rename = "artwork_id")]
    pub post_id: PostId,
    pub user_id: UserId,
    pub content: String,
    pub author_nickname: String,
    #[serde(rename = "parent_comment_id", skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<CommentId>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommentNode {
    pub comment: Comment,
    pub replies: Vec<CommentNode>,
}

impl CommentNode {
    /// This comment plus every reply below it.
    pub fn thread_len(&self) -> usize {
        1 + self.replies.iter().map(CommentNode::thread_len).sum::<usize>()
    }
}

/// Nest comments under their parents.  Sibling order follows the input
/// order.  A reply whose parent is not in `comments` becomes a root.
pub fn comment_tree(comments: Vec<Comment>) -> Vec<CommentNode> {
    let present: HashSet<CommentId> = comments.iter().map(|c| c.id).collect();
    let mut roots = Vec::new();
    let mut children: HashMap<CommentId, Vec<Comment>> = HashMap::new();
    for comment in comments {
        match comment.parent_id {
            Some(parent) if present.contains(&parent) => {
                children.entry(parent).or_default().push(comment)
            }
            _ => roots.push(comment),
        }
    }
    roots
        .into_iter()
        .map(|c| build_node(c, &mut children))
        .collect()
}

fn build_node(comment: Comment, children: &mut HashMap<CommentId, Vec<Comment>>) -> CommentNode {
    let replies = children
        .remove(&comment.id)
        .unwrap_or_default()
        .into_iter()
        .map(|c| build_node(c, children))
        .collect();
    CommentNode { comment, replies }
}

/// Count rows per post.  Every id in `posts` gets an entry.
pub fn count_per_post(posts: &[PostId], row_posts: &[PostId]) -> HashMap<PostId, u64> {
    let mut out: HashMap<PostId, u64> = posts.iter().map(|p| (*p, 0)).collect();
    for post in row_posts {
        if let Some(n) = out.get_mut(post) {
            *n += 1;
        }
    }
    out
}

// ---------------------------------------------------------------------------
// Tags
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagUsage {
    pub name: String,
    pub usage_count: u64,
}

/// Trim, lowercase and drop one leading `#`.
pub fn normalize_tag(tag: &str) -> String {
    let lower = tag.trim().to_lowercase();
    match lower.strip_prefix('#') {
        Some(rest) => rest.to_string(),
        None => lower,
    }
}

/// Split on commas and whitespace, normalize, and keep tags of 1 to
/// [`MAX_TAG_LENGTH`] characters.  Repeats are dropped.
pub fn parse_tags(input: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    input
        .split(|c: char| c == ',' || c.is_whitespace())
        .map(normalize_tag)
        .filter(|t| {
            let len = t.chars().count();
            len > 0 && len <= MAX_TAG_LENGTH
        })
        .filter(|t| seen.insert(t.clone()))
        .collect()
}
