//! Board actions for the signed-in user: like/dislike, follow, save,
//! comments, tags, nickname checks and feed ordering.
//!
//! Every toggle re-reads the stored state before writing, so two clients
//! pressing the same button converge instead of double-applying.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use vibing_shared::backend::{AuthProvider, CommunityBackend, ProfileDirectory};
use vibing_shared::community::{
    attach_profiles, comment_tree, count_per_post, normalize_tag, parse_tags, tally_reactions,
    toggle_reaction, Comment, CommentNode, FollowEntry, FollowStats, LikeSummary, NewComment,
    Reaction, TagUsage,
};
use vibing_shared::constants::UNKNOWN_NICKNAME;
use vibing_shared::nickname;
use vibing_shared::ranking::{sort_posts, RankedPost, SortMode};
use vibing_shared::{BackendError, CommentId, CommunityError, NicknameError, PostId, UserId};

type Result<T> = std::result::Result<T, CommunityError>;

#[derive(Clone)]
pub struct CommunityService {
    auth: Arc<dyn AuthProvider>,
    board: Arc<dyn CommunityBackend>,
    profiles: Arc<dyn ProfileDirectory>,
}

impl CommunityService {
    pub fn new(
        auth: Arc<dyn AuthProvider>,
        board: Arc<dyn CommunityBackend>,
        profiles: Arc<dyn ProfileDirectory>,
    ) -> Self {
        Self {
            auth,
            board,
            profiles,
        }
    }

    /// Use one backend for every seam.
    pub fn from_backend<B>(backend: Arc<B>) -> Self
    where
        B: AuthProvider + CommunityBackend + ProfileDirectory + 'static,
    {
        Self {
            auth: backend.clone(),
            board: backend.clone(),
            profiles: backend,
        }
    }

    async fn viewer(&self) -> Result<UserId> {
        self.auth
            .current_user()
            .await
            .ok_or(CommunityError::LoginRequired)
    }

    // -- reactions ---------------------------------------------------------

    pub async fn likes(&self, post: PostId) -> Result<LikeSummary> {
        let mut all = self.batch_likes(&[post]).await?;
        Ok(all.remove(&post).unwrap_or_default())
    }

    pub async fn batch_likes(&self, posts: &[PostId]) -> Result<HashMap<PostId, LikeSummary>> {
        let viewer = self.auth.current_user().await;
        let rows = self.board.reactions(posts).await?;
        Ok(tally_reactions(posts, &rows, viewer))
    }

    /// Press the like or dislike button.  Returns the post's new totals.
    pub async fn react(&self, post: PostId, pressed: Reaction) -> Result<LikeSummary> {
        let me = self.viewer().await?;
        let current = self.board.reaction(post, me).await?;
        let change = toggle_reaction(current, pressed);
        self.board.set_reaction(post, me, change.result()).await?;
        debug!(post = %post, ?change, "Reaction toggled");
        self.likes(post).await
    }

    pub async fn toggle_like(&self, post: PostId) -> Result<LikeSummary> {
        self.react(post, Reaction::Like).await
    }

    pub async fn toggle_dislike(&self, post: PostId) -> Result<LikeSummary> {
        self.react(post, Reaction::Dislike).await
    }

    // -- follows -----------------------------------------------------------

    /// Follow `target`, or unfollow if already following.  Returns whether
    /// the viewer follows `target` afterwards.
    pub async fn toggle_follow(&self, target: UserId) -> Result<bool> {
        let me = self.viewer().await?;
        if me == target {
            return Err(CommunityError::SelfFollow);
        }
        let follow = !self.board.is_following(me, target).await?;
        self.board.set_following(me, target, follow).await?;
        info!(target = %target, follow, "Follow toggled");
        Ok(follow)
    }

    /// Signed-out viewers follow nobody.
    pub async fn is_following(&self, target: UserId) -> Result<bool> {
        match self.auth.current_user().await {
            Some(me) => Ok(self.board.is_following(me, target).await?),
            None => Ok(false),
        }
    }

    pub async fn follow_stats(&self, user: UserId) -> Result<FollowStats> {
        Ok(self.board.follow_stats(user).await?)
    }

    pub async fn followers(&self, user: UserId, limit: u32, offset: u32) -> Result<Vec<FollowEntry>> {
        let rows = self.board.followers(user, limit, offset).await?;
        let ids: Vec<UserId> = rows.iter().map(|r| r.user_id).collect();
        let profiles = self.profiles.profiles(&ids).await?;
        Ok(attach_profiles(rows, profiles))
    }

    pub async fn following(&self, user: UserId, limit: u32, offset: u32) -> Result<Vec<FollowEntry>> {
        let rows = self.board.following(user, limit, offset).await?;
        let ids: Vec<UserId> = rows.iter().map(|r| r.user_id).collect();
        let profiles = self.profiles.profiles(&ids).await?;
        Ok(attach_profiles(rows, profiles))
    }

    // -- saves -------------------------------------------------------------

    /// Save `post`, or unsave it.  Authors cannot save their own posts.
    pub async fn toggle_save(&self, post: PostId) -> Result<bool> {
        let me = self.viewer().await?;
        match self.board.post_author(post).await? {
            None => return Err(CommunityError::PostNotFound),
            Some(author) if author == me => return Err(CommunityError::OwnPost),
            Some(_) => {}
        }
        let save = !self.board.is_saved(post, me).await?;
        self.board.set_saved(post, me, save).await?;
        info!(post = %post, save, "Save toggled");
        Ok(save)
    }

    /// Saved flag per post.  Everything is unsaved for a signed-out viewer.
    pub async fn saved_states(&self, posts: &[PostId]) -> Result<HashMap<PostId, bool>> {
        let mut out: HashMap<PostId, bool> = posts.iter().map(|p| (*p, false)).collect();
        let Some(me) = self.auth.current_user().await else {
            return Ok(out);
        };
        for post in self.board.saved_among(me, posts).await? {
            out.insert(post, true);
        }
        Ok(out)
    }

    // -- comments ----------------------------------------------------------

    pub async fn comments(&self, post: PostId) -> Result<Vec<CommentNode>> {
        Ok(comment_tree(self.board.comments(post).await?))
    }

    pub async fn comment_counts(&self, posts: &[PostId]) -> Result<HashMap<PostId, u64>> {
        let rows = self.board.comment_posts(posts).await?;
        Ok(count_per_post(posts, &rows))
    }

    /// Post a comment, or a reply when `parent` is set.  The author's
    /// current nickname is stored with it.
    pub async fn add_comment(
        &self,
        post: PostId,
        content: &str,
        parent: Option<CommentId>,
    ) -> Result<Comment> {
        let me = self.viewer().await?;
        let content = content.trim();
        if content.is_empty() {
            return Err(CommunityError::EmptyComment);
        }
        let author_nickname = self
            .profiles
            .profile(me)
            .await?
            .and_then(|p| p.nickname)
            .unwrap_or_else(|| UNKNOWN_NICKNAME.to_string());

        let stored = self
            .board
            .insert_comment(NewComment {
                post_id: post,
                user_id: me,
                content: content.to_string(),
                author_nickname,
                parent_id: parent,
            })
            .await?;
        debug!(post = %post, comment = %stored.id, "Comment added");
        Ok(stored)
    }

    /// Only the author may delete; replies go with the comment.
    pub async fn delete_comment(&self, id: CommentId) -> Result<()> {
        let me = self.viewer().await?;
        match self.board.comment_author(id).await? {
            None => Err(BackendError::NotFound.into()),
            Some(author) if author != me => Err(CommunityError::NotCommentOwner),
            Some(_) => {
                self.board.delete_comment(id).await?;
                info!(comment = %id, "Comment deleted");
                Ok(())
            }
        }
    }

    // -- tags --------------------------------------------------------------

    pub async fn tags(&self, post: PostId) -> Result<Vec<String>> {
        Ok(self.board.post_tags(post).await?)
    }

    /// Link each tag to `post`.  A tag that fails is logged and skipped.
    /// Returns how many new links were made.
    pub async fn add_tags(&self, post: PostId, names: &[String]) -> Result<usize> {
        self.viewer().await?;
        let mut added = 0;
        for name in names {
            let name = normalize_tag(name);
            if name.is_empty() {
                continue;
            }
            match self.board.attach_tag(post, &name).await {
                Ok(true) => added += 1,
                Ok(false) => {}
                Err(e) => warn!(post = %post, tag = %name, error = %e, "Failed to attach tag"),
            }
        }
        Ok(added)
    }

    /// Replace the tags of `post` with those parsed from `input`.
    pub async fn set_tags(&self, post: PostId, input: &str) -> Result<Vec<String>> {
        self.viewer().await?;
        self.board.clear_tags(post).await?;
        self.add_tags(post, &parse_tags(input)).await?;
        self.tags(post).await
    }

    pub async fn search_tags(&self, prefix: &str, limit: u32) -> Result<Vec<TagUsage>> {
        Ok(self.board.search_tags(&normalize_tag(prefix), limit).await?)
    }

    pub async fn popular_tags(&self, limit: u32) -> Result<Vec<TagUsage>> {
        Ok(self.board.search_tags("", limit).await?)
    }

    // -- profiles and feed -------------------------------------------------

    /// Format rules plus availability, ignoring the viewer's own nickname.
    pub async fn check_nickname(
        &self,
        candidate: &str,
    ) -> std::result::Result<String, NicknameError> {
        let me = self.auth.current_user().await;
        nickname::validate(self.profiles.as_ref(), candidate, me).await
    }

    /// Order `posts` by `mode`.  Ids that do not exist are dropped.
    pub async fn rank(
        &self,
        posts: &[PostId],
        mode: SortMode,
        now: DateTime<Utc>,
    ) -> Result<Vec<RankedPost>> {
        let stamps = self.board.post_stamps(posts).await?;
        let likes = self.batch_likes(posts).await?;
        // Caller order, so ties keep it.
        let mut ranked: Vec<RankedPost> = posts
            .iter()
            .filter_map(|id| stamps.iter().find(|s| s.id == *id))
            .map(|s| likes.get(&s.id).copied().unwrap_or_default().ranked(s.id, s.created_at))
            .collect();
        sort_posts(&mut ranked, mode, now);
        Ok(ranked)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use vibing_shared::Profile;
    use vibing_store::LocalBackend;

    struct Board {
        backend: Arc<LocalBackend>,
        service: CommunityService,
    }

    fn board() -> Board {
        let backend = Arc::new(LocalBackend::in_memory().unwrap());
        let service = CommunityService::from_backend(backend.clone());
        Board { backend, service }
    }

    impl Board {
        fn post_by(&self, author: UserId, hours_ago: i64) -> PostId {
            self.backend
                .with_db(|db| db.insert_post(author, "untitled", Utc::now() - Duration::hours(hours_ago)))
                .unwrap()
        }
    }

    #[tokio::test]
    async fn actions_need_a_signed_in_user() {
        let b = board();
        let post = b.post_by(UserId::new(), 0);
        assert_eq!(b.service.toggle_like(post).await, Err(CommunityError::LoginRequired));
        assert_eq!(b.service.toggle_save(post).await, Err(CommunityError::LoginRequired));
        assert_eq!(
            b.service.add_comment(post, "hi", None).await.unwrap_err(),
            CommunityError::LoginRequired
        );
        // Reads still work signed out.
        assert_eq!(b.service.likes(post).await.unwrap(), LikeSummary::default());
        assert!(!b.service.is_following(UserId::new()).await.unwrap());
        assert!(!b.service.saved_states(&[post]).await.unwrap()[&post]);
    }

    #[tokio::test]
    async fn like_and_dislike_are_exclusive_toggles() {
        let b = board();
        let me = UserId::new();
        b.backend.sign_in(Some(me));
        let post = b.post_by(UserId::new(), 0);

        let s = b.service.toggle_like(post).await.unwrap();
        assert_eq!((s.likes, s.dislikes, s.mine), (1, 0, Some(Reaction::Like)));

        let s = b.service.toggle_dislike(post).await.unwrap();
        assert_eq!((s.likes, s.dislikes, s.mine), (0, 1, Some(Reaction::Dislike)));

        let s = b.service.toggle_dislike(post).await.unwrap();
        assert_eq!(s, LikeSummary::default());
    }

    #[tokio::test]
    async fn follow_toggles_and_lists_profiles() {
        let b = board();
        let (me, star) = (UserId::new(), UserId::new());
        b.backend.sign_in(Some(me));
        let profile = Profile {
            user_id: me,
            nickname: Some("fan_one".into()),
            avatar_url: None,
        };
        b.backend.with_db(|db| db.upsert_profile(&profile)).unwrap();

        assert_eq!(b.service.toggle_follow(me).await, Err(CommunityError::SelfFollow));
        assert!(b.service.toggle_follow(star).await.unwrap());
        assert!(b.service.is_following(star).await.unwrap());
        assert_eq!(
            b.service.follow_stats(star).await.unwrap(),
            FollowStats { followers: 1, following: 0 }
        );

        let fans = b.service.followers(star, 20, 0).await.unwrap();
        assert_eq!(fans.len(), 1);
        assert_eq!(fans[0].profile, Some(profile));
        assert_eq!(b.service.following(me, 20, 0).await.unwrap()[0].user_id, star);

        assert!(!b.service.toggle_follow(star).await.unwrap());
        assert_eq!(b.service.follow_stats(star).await.unwrap().followers, 0);
    }

    #[tokio::test]
    async fn own_posts_cannot_be_saved() {
        let b = board();
        let me = UserId::new();
        b.backend.sign_in(Some(me));
        let mine = b.post_by(me, 0);
        let theirs = b.post_by(UserId::new(), 0);

        assert_eq!(b.service.toggle_save(mine).await, Err(CommunityError::OwnPost));
        assert_eq!(b.service.toggle_save(PostId(404)).await, Err(CommunityError::PostNotFound));
        assert!(b.service.toggle_save(theirs).await.unwrap());

        let states = b.service.saved_states(&[mine, theirs]).await.unwrap();
        assert!(states[&theirs]);
        assert!(!states[&mine]);

        assert!(!b.service.toggle_save(theirs).await.unwrap());
    }

    #[tokio::test]
    async fn comments_nest_and_only_authors_delete() {
        let b = board();
        let (me, other) = (UserId::new(), UserId::new());
        let post = b.post_by(other, 0);
        b.backend.sign_in(Some(me));

        assert_eq!(
            b.service.add_comment(post, "   ", None).await.unwrap_err(),
            CommunityError::EmptyComment
        );
        let root = b.service.add_comment(post, "  lovely  ", None).await.unwrap();
        assert_eq!(root.content, "lovely");
        assert_eq!(root.author_nickname.as_deref(), Some(UNKNOWN_NICKNAME));
        b.service.add_comment(post, "agreed", Some(root.id)).await.unwrap();

        let tree = b.service.comments(post).await.unwrap();
        assert_eq!(tree.len(), 1);
        assert_eq!(tree[0].replies[0].comment.content, "agreed");
        assert_eq!(b.service.comment_counts(&[post]).await.unwrap()[&post], 2);

        b.backend.sign_in(Some(other));
        assert_eq!(
            b.service.delete_comment(root.id).await,
            Err(CommunityError::NotCommentOwner)
        );
        b.backend.sign_in(Some(me));
        b.service.delete_comment(root.id).await.unwrap();
        assert!(b.service.comments(post).await.unwrap().is_empty());
        assert_eq!(
            b.service.delete_comment(root.id).await,
            Err(CommunityError::Backend(BackendError::NotFound))
        );
    }

    #[tokio::test]
    async fn set_tags_replaces_the_previous_set() {
        let b = board();
        let me = UserId::new();
        b.backend.sign_in(Some(me));
        let post = b.post_by(me, 0);

        let tags = b.service.set_tags(post, "#Sky, sea  sky").await.unwrap();
        assert_eq!(tags, vec!["sea", "sky"]);
        let tags = b.service.set_tags(post, "ink").await.unwrap();
        assert_eq!(tags, vec!["ink"]);

        let found = b.service.search_tags("#IN", 10).await.unwrap();
        assert_eq!(found, vec![TagUsage { name: "ink".into(), usage_count: 1 }]);
        let popular = b.service.popular_tags(10).await.unwrap();
        assert_eq!(popular.len(), 1);
    }

    #[tokio::test]
    async fn ranking_uses_stored_votes() {
        let b = board();
        let voters: Vec<UserId> = (0..3).map(|_| UserId::new()).collect();
        let author = UserId::new();
        let old_hit = b.post_by(author, 30);
        let fresh = b.post_by(author, 1);

        for voter in &voters {
            b.backend.sign_in(Some(*voter));
            b.service.toggle_like(old_hit).await.unwrap();
        }

        let now = Utc::now();
        let latest = b.service.rank(&[old_hit, fresh, PostId(77)], SortMode::Latest, now).await.unwrap();
        assert_eq!(latest.iter().map(|p| p.id).collect::<Vec<_>>(), vec![fresh.0, old_hit.0]);

        let popular = b.service.rank(&[fresh, old_hit], SortMode::Popular, now).await.unwrap();
        assert_eq!(popular[0].id, old_hit.0);
        assert_eq!(popular[0].likes_count, 3);
    }

    #[tokio::test]
    async fn nickname_checks_skip_the_viewer() {
        let b = board();
        let me = UserId::new();
        let profile = Profile {
            user_id: me,
            nickname: Some("night_owl".into()),
            avatar_url: None,
        };
        b.backend.with_db(|db| db.upsert_profile(&profile)).unwrap();

        assert_eq!(
            b.service.check_nickname("Night_Owl").await,
            Err(NicknameError::Taken)
        );
        b.backend.sign_in(Some(me));
        assert_eq!(b.service.check_nickname(" night_owl ").await.unwrap(), "night_owl");
        assert_eq!(b.service.check_nickname("x").await, Err(NicknameError::TooShort { min: 3 }));
    }
}
