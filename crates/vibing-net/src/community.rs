//! [`CommunityBackend`] over the hosted board tables.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Method;
use serde::Deserialize;
use serde_json::json;
use tracing::trace;

use vibing_shared::backend::{BackendResult, CommunityBackend};
use vibing_shared::community::{
    Comment, FollowRow, FollowStats, NewComment, PostStamp, Reaction, ReactionRow, TagUsage,
};
use vibing_shared::constants::{
    COMMENTS_TABLE, FOLLOWS_TABLE, POSTS_TABLE, POST_TAGS_TABLE, REACTIONS_TABLE,
    SAVED_POSTS_TABLE, TAGS_TABLE,
};
use vibing_shared::{CommentId, PostId, UserId};

use crate::error::{NetError, Result};
use crate::rest::{escape_like, in_list, RestBackend};

#[derive(Deserialize)]
struct AuthorRow {
    user_id: UserId,
}

#[derive(Deserialize)]
struct ReactionOnly {
    like_type: Reaction,
}

#[derive(Deserialize)]
struct PostRef {
    artwork_id: PostId,
}

#[derive(Deserialize)]
struct IdRow {
    id: i64,
}

#[derive(Deserialize)]
struct FollowerWire {
    follower_id: UserId,
    created_at: DateTime<Utc>,
}

#[derive(Deserialize)]
struct FollowingWire {
    following_id: UserId,
    created_at: DateTime<Utc>,
}

#[derive(Deserialize)]
struct TagName {
    name: String,
}

/// `artwork_tags` row with its embedded `tags` resource.
#[derive(Deserialize)]
struct LinkedTag {
    tags: Option<TagName>,
}

fn eq<T: std::fmt::Display>(value: T) -> String {
    format!("eq.{value}")
}

fn pair_filters(post: PostId, user: UserId) -> [(&'static str, String); 2] {
    [("artwork_id", eq(post)), ("user_id", eq(user))]
}

fn follow_filters(follower: UserId, followee: UserId) -> [(&'static str, String); 2] {
    [("follower_id", eq(follower)), ("following_id", eq(followee))]
}

/// Query for a page of follow edges where `column` is `user`.
fn follow_page_query(
    select: &str,
    column: &'static str,
    user: UserId,
    limit: u32,
    offset: u32,
) -> Vec<(&'static str, String)> {
    vec![
        ("select", select.to_string()),
        (column, eq(user)),
        ("order", "created_at.desc".to_string()),
        ("limit", limit.to_string()),
        ("offset", offset.to_string()),
    ]
}

/// Tags in use, most used first, optionally narrowed to a name prefix.
fn tag_search_query(prefix: &str, limit: u32) -> Vec<(&'static str, String)> {
    let mut query = vec![
        ("select", "name,usage_count".to_string()),
        ("usage_count", "gt.0".to_string()),
        ("order", "usage_count.desc".to_string()),
        ("limit", limit.to_string()),
    ];
    if !prefix.is_empty() {
        query.push(("name", format!("ilike.{}*", escape_like(prefix))));
    }
    query
}

impl RestBackend {
    async fn exists(&self, table: &str, filters: &[(&str, String)]) -> Result<bool> {
        let req = self
            .request(Method::GET, table)
            .query(filters)
            .query(&[("limit", "1")]);
        let rows: Vec<serde_json::Value> = self.fetch(req).await?;
        Ok(!rows.is_empty())
    }

    async fn delete_where(&self, table: &str, filters: &[(&str, String)]) -> Result<()> {
        let req = self
            .request(Method::DELETE, table)
            .query(filters)
            .header("Prefer", "return=minimal");
        self.execute(req).await
    }

    /// Insert that leaves an existing row with the same key untouched.
    async fn insert_ignoring_duplicates(
        &self,
        table: &str,
        body: serde_json::Value,
    ) -> Result<()> {
        let req = self
            .request(Method::POST, table)
            .header("Prefer", "resolution=ignore-duplicates,return=minimal")
            .json(&[body]);
        self.execute(req).await
    }

    async fn tag_id(&self, name: &str) -> Result<Option<i64>> {
        let req = self
            .request(Method::GET, TAGS_TABLE)
            .query(&[("select", "id".to_string()), ("name", eq(name))]);
        let rows: Vec<IdRow> = self.fetch(req).await?;
        Ok(rows.first().map(|r| r.id))
    }

    async fn create_tag(&self, name: &str) -> Result<i64> {
        let req = self
            .request(Method::POST, TAGS_TABLE)
            .header("Prefer", "return=representation")
            .json(&[json!({ "name": name })]);
        let rows: Vec<IdRow> = self.fetch(req).await?;
        rows.first()
            .map(|r| r.id)
            .ok_or_else(|| NetError::Unexpected("tag insert returned no row".into()))
    }
}

#[async_trait]
impl CommunityBackend for RestBackend {
    async fn post_author(&self, post: PostId) -> BackendResult<Option<UserId>> {
        let req = self.request(Method::GET, POSTS_TABLE).query(&[
            ("select", "user_id".to_string()),
            ("id", eq(post)),
            ("limit", "1".to_string()),
        ]);
        let rows: Vec<AuthorRow> = self.fetch(req).await?;
        Ok(rows.first().map(|r| r.user_id))
    }

    async fn post_stamps(&self, posts: &[PostId]) -> BackendResult<Vec<PostStamp>> {
        if posts.is_empty() {
            return Ok(Vec::new());
        }
        let req = self.request(Method::GET, POSTS_TABLE).query(&[
            ("select", "id,created_at".to_string()),
            ("id", in_list(posts)),
        ]);
        Ok(self.fetch(req).await?)
    }

    async fn reaction(&self, post: PostId, user: UserId) -> BackendResult<Option<Reaction>> {
        let req = self
            .request(Method::GET, REACTIONS_TABLE)
            .query(&[("select", "like_type".to_string())])
            .query(&pair_filters(post, user));
        let rows: Vec<ReactionOnly> = self.fetch(req).await?;
        Ok(rows.first().map(|r| r.like_type))
    }

    async fn set_reaction(
        &self,
        post: PostId,
        user: UserId,
        reaction: Option<Reaction>,
    ) -> BackendResult<()> {
        let Some(reaction) = reaction else {
            return Ok(self.delete_where(REACTIONS_TABLE, &pair_filters(post, user)).await?);
        };
        let row = ReactionRow {
            post_id: post,
            user_id: user,
            reaction,
        };
        let req = self
            .request(Method::POST, REACTIONS_TABLE)
            .query(&[("on_conflict", "artwork_id,user_id")])
            .header("Prefer", "resolution=merge-duplicates,return=minimal")
            .json(&[row]);
        self.execute(req).await?;
        trace!(post = %post, kind = reaction.as_str(), "Reaction stored");
        Ok(())
    }

    async fn reactions(&self, posts: &[PostId]) -> BackendResult<Vec<ReactionRow>> {
        if posts.is_empty() {
            return Ok(Vec::new());
        }
        let req = self.request(Method::GET, REACTIONS_TABLE).query(&[
            ("select", "artwork_id,user_id,like_type".to_string()),
            ("artwork_id", in_list(posts)),
        ]);
        Ok(self.fetch(req).await?)
    }

    async fn is_following(&self, follower: UserId, followee: UserId) -> BackendResult<bool> {
        let mut filters = follow_filters(follower, followee).to_vec();
        filters.push(("select", "follower_id".to_string()));
        Ok(self.exists(FOLLOWS_TABLE, &filters).await?)
    }

    async fn set_following(
        &self,
        follower: UserId,
        followee: UserId,
        follow: bool,
    ) -> BackendResult<()> {
        if follow {
            self.insert_ignoring_duplicates(
                FOLLOWS_TABLE,
                json!({ "follower_id": follower, "following_id": followee }),
            )
            .await?;
        } else {
            self.delete_where(FOLLOWS_TABLE, &follow_filters(follower, followee))
                .await?;
        }
        Ok(())
    }

    async fn follow_stats(&self, user: UserId) -> BackendResult<FollowStats> {
        let followers = [("select", "follower_id".to_string()), ("following_id", eq(user))];
        let following = [("select", "following_id".to_string()), ("follower_id", eq(user))];
        let (followers, following) = tokio::try_join!(
            self.count(FOLLOWS_TABLE, &followers),
            self.count(FOLLOWS_TABLE, &following),
        )?;
        Ok(FollowStats {
            followers,
            following,
        })
    }

    async fn followers(
        &self,
        user: UserId,
        limit: u32,
        offset: u32,
    ) -> BackendResult<Vec<FollowRow>> {
        let req = self.request(Method::GET, FOLLOWS_TABLE).query(&follow_page_query(
            "follower_id,created_at",
            "following_id",
            user,
            limit,
            offset,
        ));
        let rows: Vec<FollowerWire> = self.fetch(req).await?;
        Ok(rows
            .into_iter()
            .map(|r| FollowRow {
                user_id: r.follower_id,
                followed_at: r.created_at,
            })
            .collect())
    }

    async fn following(
        &self,
        user: UserId,
        limit: u32,
        offset: u32,
    ) -> BackendResult<Vec<FollowRow>> {
        let req = self.request(Method::GET, FOLLOWS_TABLE).query(&follow_page_query(
            "following_id,created_at",
            "follower_id",
            user,
            limit,
            offset,
        ));
        let rows: Vec<FollowingWire> = self.fetch(req).await?;
        Ok(rows
            .into_iter()
            .map(|r| FollowRow {
                user_id: r.following_id,
                followed_at: r.created_at,
            })
            .collect())
    }

    async fn is_saved(&self, post: PostId, user: UserId) -> BackendResult<bool> {
        let mut filters = pair_filters(post, user).to_vec();
        filters.push(("select", "artwork_id".to_string()));
        Ok(self.exists(SAVED_POSTS_TABLE, &filters).await?)
    }

    async fn set_saved(&self, post: PostId, user: UserId, saved: bool) -> BackendResult<()> {
        if saved {
            self.insert_ignoring_duplicates(
                SAVED_POSTS_TABLE,
                json!({ "artwork_id": post, "user_id": user }),
            )
            .await?;
        } else {
            self.delete_where(SAVED_POSTS_TABLE, &pair_filters(post, user))
                .await?;
        }
        Ok(())
    }

    async fn saved_among(&self, user: UserId, posts: &[PostId]) -> BackendResult<Vec<PostId>> {
        if posts.is_empty() {
            return Ok(Vec::new());
        }
        let req = self.request(Method::GET, SAVED_POSTS_TABLE).query(&[
            ("select", "artwork_id".to_string()),
            ("user_id", eq(user)),
            ("artwork_id", in_list(posts)),
        ]);
        let rows: Vec<PostRef> = self.fetch(req).await?;
        Ok(rows.into_iter().map(|r| r.artwork_id).collect())
    }

    async fn comments(&self, post: PostId) -> BackendResult<Vec<Comment>> {
        let req = self.request(Method::GET, COMMENTS_TABLE).query(&[
            ("select", "*".to_string()),
            ("artwork_id", eq(post)),
            ("order", "created_at.asc".to_string()),
        ]);
        Ok(self.fetch(req).await?)
    }

    async fn comment_posts(&self, posts: &[PostId]) -> BackendResult<Vec<PostId>> {
        if posts.is_empty() {
            return Ok(Vec::new());
        }
        let req = self.request(Method::GET, COMMENTS_TABLE).query(&[
            ("select", "artwork_id".to_string()),
            ("artwork_id", in_list(posts)),
        ]);
        let rows: Vec<PostRef> = self.fetch(req).await?;
        Ok(rows.into_iter().map(|r| r.artwork_id).collect())
    }

    async fn insert_comment(&self, comment: NewComment) -> BackendResult<Comment> {
        let req = self
            .request(Method::POST, COMMENTS_TABLE)
            .header("Prefer", "return=representation")
            .json(&[&comment]);
        let mut rows: Vec<Comment> = self.fetch(req).await?;
        if rows.is_empty() {
            return Err(NetError::Unexpected("comment insert returned no row".into()).into());
        }
        Ok(rows.swap_remove(0))
    }

    async fn comment_author(&self, id: CommentId) -> BackendResult<Option<UserId>> {
        let req = self.request(Method::GET, COMMENTS_TABLE).query(&[
            ("select", "user_id".to_string()),
            ("id", eq(id)),
        ]);
        let rows: Vec<AuthorRow> = self.fetch(req).await?;
        Ok(rows.first().map(|r| r.user_id))
    }

    async fn delete_comment(&self, id: CommentId) -> BackendResult<()> {
        Ok(self.delete_where(COMMENTS_TABLE, &[("id", eq(id))]).await?)
    }

    async fn post_tags(&self, post: PostId) -> BackendResult<Vec<String>> {
        let req = self.request(Method::GET, POST_TAGS_TABLE).query(&[
            ("select", "tags(name)".to_string()),
            ("artwork_id", eq(post)),
        ]);
        let rows: Vec<LinkedTag> = self.fetch(req).await?;
        let mut names: Vec<String> = rows.into_iter().filter_map(|r| r.tags).map(|t| t.name).collect();
        names.sort();
        Ok(names)
    }

    async fn attach_tag(&self, post: PostId, name: &str) -> BackendResult<bool> {
        let tag_id = match self.tag_id(name).await? {
            Some(id) => id,
            None => self.create_tag(name).await?,
        };
        let link = [("artwork_id", eq(post)), ("tag_id", eq(tag_id))];
        if self.exists(POST_TAGS_TABLE, &link).await? {
            return Ok(false);
        }
        let req = self
            .request(Method::POST, POST_TAGS_TABLE)
            .header("Prefer", "return=minimal")
            .json(&[json!({ "artwork_id": post, "tag_id": tag_id })]);
        self.execute(req).await?;
        Ok(true)
    }

    async fn clear_tags(&self, post: PostId) -> BackendResult<()> {
        Ok(self
            .delete_where(POST_TAGS_TABLE, &[("artwork_id", eq(post))])
            .await?)
    }

    async fn search_tags(&self, prefix: &str, limit: u32) -> BackendResult<Vec<TagUsage>> {
        let req = self
            .request(Method::GET, TAGS_TABLE)
            .query(&tag_search_query(prefix, limit));
        Ok(self.fetch(req).await?)
    }
}
