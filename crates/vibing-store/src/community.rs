use chrono::{DateTime, Utc};
use rusqlite::{params, params_from_iter, OptionalExtension};

use vibing_shared::community::{
    Comment, FollowRow, FollowStats, NewComment, PostStamp, Reaction, ReactionRow, TagUsage,
};
use vibing_shared::{CommentId, PostId, UserId};

use crate::database::{decode_ts, encode_ts, Database};
use crate::error::{Result, StoreError};
use crate::messages::parse_user;

const COMMENT_COLUMNS: &str =
    "id, post_id, user_id, content, author_nickname, parent_id, created_at";

impl Database {
    pub fn insert_post(&self, author: UserId, title: &str, at: DateTime<Utc>) -> Result<PostId> {
        self.conn().execute(
            "INSERT INTO posts (user_id, title, created_at) VALUES (?1, ?2, ?3)",
            params![author.to_string(), title, encode_ts(&at)],
        )?;
        Ok(PostId(self.conn().last_insert_rowid()))
    }

    pub fn post_author(&self, post: PostId) -> Result<Option<UserId>> {
        self.conn()
            .query_row(
                "SELECT user_id FROM posts WHERE id = ?1",
                params![post.0],
                |row| parse_user(0, &row.get::<_, String>(0)?),
            )
            .optional()
            .map_err(StoreError::from)
    }

    pub fn post_stamps(&self, posts: &[PostId]) -> Result<Vec<PostStamp>> {
        if posts.is_empty() {
            return Ok(Vec::new());
        }
        let mut stmt = self.conn().prepare(&format!(
            "SELECT id, created_at FROM posts WHERE id IN ({})",
            placeholders(posts.len())
        ))?;
        let rows = stmt.query_map(params_from_iter(posts.iter().map(|p| p.0)), |row| {
            Ok(PostStamp {
                id: PostId(row.get(0)?),
                created_at: decode_ts(1, &row.get::<_, String>(1)?)?,
            })
        })?;
        collect(rows)
    }

    // -- reactions ---------------------------------------------------------

    pub fn reaction(&self, post: PostId, user: UserId) -> Result<Option<Reaction>> {
        self.conn()
            .query_row(
                "SELECT like_type FROM post_reactions WHERE post_id = ?1 AND user_id = ?2",
                params![post.0, user.to_string()],
                |row| parse_reaction(0, &row.get::<_, String>(0)?),
            )
            .optional()
            .map_err(StoreError::from)
    }

    pub fn set_reaction(
        &self,
        post: PostId,
        user: UserId,
        reaction: Option<Reaction>,
        at: DateTime<Utc>,
    ) -> Result<()> {
        match reaction {
            Some(r) => self.conn().execute(
                "INSERT INTO post_reactions (post_id, user_id, like_type, created_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(post_id, user_id) DO UPDATE SET like_type = excluded.like_type",
                params![post.0, user.to_string(), r.as_str(), encode_ts(&at)],
            )?,
            None => self.conn().execute(
                "DELETE FROM post_reactions WHERE post_id = ?1 AND user_id = ?2",
                params![post.0, user.to_string()],
            )?,
        };
        Ok(())
    }

    pub fn reactions(&self, posts: &[PostId]) -> Result<Vec<ReactionRow>> {
        if posts.is_empty() {
            return Ok(Vec::new());
        }
        let mut stmt = self.conn().prepare(&format!(
            "SELECT post_id, user_id, like_type FROM post_reactions WHERE post_id IN ({})",
            placeholders(posts.len())
        ))?;
        let rows = stmt.query_map(params_from_iter(posts.iter().map(|p| p.0)), |row| {
            Ok(ReactionRow {
                post_id: PostId(row.get(0)?),
                user_id: parse_user(1, &row.get::<_, String>(1)?)?,
                reaction: parse_reaction(2, &row.get::<_, String>(2)?)?,
            })
        })?;
        collect(rows)
    }

    // -- follows -----------------------------------------------------------

    pub fn is_following(&self, follower: UserId, followee: UserId) -> Result<bool> {
        let n: i64 = self.conn().query_row(
            "SELECT COUNT(*) FROM follows WHERE follower_id = ?1 AND following_id = ?2",
            params![follower.to_string(), followee.to_string()],
            |row| row.get(0),
        )?;
        Ok(n > 0)
    }

    /// Idempotent in both directions.
    pub fn set_following(
        &self,
        follower: UserId,
        followee: UserId,
        follow: bool,
        at: DateTime<Utc>,
    ) -> Result<()> {
        if follow {
            self.conn().execute(
                "INSERT OR IGNORE INTO follows (follower_id, following_id, created_at)
                 VALUES (?1, ?2, ?3)",
                params![follower.to_string(), followee.to_string(), encode_ts(&at)],
            )?;
        } else {
            self.conn().execute(
                "DELETE FROM follows WHERE follower_id = ?1 AND following_id = ?2",
                params![follower.to_string(), followee.to_string()],
            )?;
        }
        Ok(())
    }

    pub fn follow_stats(&self, user: UserId) -> Result<FollowStats> {
        let (followers, following): (i64, i64) = self.conn().query_row(
            "SELECT
                 (SELECT COUNT(*) FROM follows WHERE following_id = ?1),
                 (SELECT COUNT(*) FROM follows WHERE follower_id = ?1)",
            params![user.to_string()],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        Ok(FollowStats {
            followers: followers.max(0) as u64,
            following: following.max(0) as u64,
        })
    }

    pub fn followers(&self, user: UserId, limit: u32, offset: u32) -> Result<Vec<FollowRow>> {
        self.follow_page(
            "SELECT follower_id, created_at FROM follows WHERE following_id = ?1
             ORDER BY created_at DESC LIMIT ?2 OFFSET ?3",
            user,
            limit,
            offset,
        )
    }

    pub fn following(&self, user: UserId, limit: u32, offset: u32) -> Result<Vec<FollowRow>> {
        self.follow_page(
            "SELECT following_id, created_at FROM follows WHERE follower_id = ?1
             ORDER BY created_at DESC LIMIT ?2 OFFSET ?3",
            user,
            limit,
            offset,
        )
    }

    fn follow_page(&self, sql: &str, user: UserId, limit: u32, offset: u32) -> Result<Vec<FollowRow>> {
        let mut stmt = self.conn().prepare(sql)?;
        let rows = stmt.query_map(params![user.to_string(), limit, offset], |row| {
            Ok(FollowRow {
                user_id: parse_user(0, &row.get::<_, String>(0)?)?,
                followed_at: decode_ts(1, &row.get::<_, String>(1)?)?,
            })
        })?;
        collect(rows)
    }

    // -- saves -------------------------------------------------------------

    pub fn is_saved(&self, post: PostId, user: UserId) -> Result<bool> {
        let n: i64 = self.conn().query_row(
            "SELECT COUNT(*) FROM saved_posts WHERE post_id = ?1 AND user_id = ?2",
            params![post.0, user.to_string()],
            |row| row.get(0),
        )?;
        Ok(n > 0)
    }

    pub fn set_saved(&self, post: PostId, user: UserId, saved: bool, at: DateTime<Utc>) -> Result<()> {
        if saved {
            self.conn().execute(
                "INSERT OR IGNORE INTO saved_posts (post_id, user_id, created_at)
                 VALUES (?1, ?2, ?3)",
                params![post.0, user.to_string(), encode_ts(&at)],
            )?;
        } else {
            self.conn().execute(
                "DELETE FROM saved_posts WHERE post_id = ?1 AND user_id = ?2",
                params![post.0, user.to_string()],
            )?;
        }
        Ok(())
    }

    pub fn saved_among(&self, user: UserId, posts: &[PostId]) -> Result<Vec<PostId>> {
        if posts.is_empty() {
            return Ok(Vec::new());
        }
        let mut args: Vec<rusqlite::types::Value> = vec![user.to_string().into()];
        args.extend(posts.iter().map(|p| rusqlite::types::Value::Integer(p.0)));
        let mut stmt = self.conn().prepare(&format!(
            "SELECT post_id FROM saved_posts WHERE user_id = ? AND post_id IN ({})",
            placeholders(posts.len())
        ))?;
        let rows = stmt.query_map(params_from_iter(args), |row| Ok(PostId(row.get(0)?)))?;
        collect(rows)
    }

    // -- comments ----------------------------------------------------------

    pub fn comments(&self, post: PostId) -> Result<Vec<Comment>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {COMMENT_COLUMNS} FROM comments WHERE post_id = ?1
             ORDER BY created_at ASC, id ASC"
        ))?;
        let rows = stmt.query_map(params![post.0], row_to_comment)?;
        collect(rows)
    }

    pub fn comment_posts(&self, posts: &[PostId]) -> Result<Vec<PostId>> {
        if posts.is_empty() {
            return Ok(Vec::new());
        }
        let mut stmt = self.conn().prepare(&format!(
            "SELECT post_id FROM comments WHERE post_id IN ({})",
            placeholders(posts.len())
        ))?;
        let rows = stmt.query_map(params_from_iter(posts.iter().map(|p| p.0)), |row| {
            Ok(PostId(row.get(0)?))
        })?;
        collect(rows)
    }

    pub fn insert_comment(&self, comment: &NewComment, at: DateTime<Utc>) -> Result<Comment> {
        self.conn().execute(
            "INSERT INTO comments (post_id, user_id, content, author_nickname, parent_id, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                comment.post_id.0,
                comment.user_id.to_string(),
                comment.content,
                comment.author_nickname,
                comment.parent_id.map(|p| p.0),
                encode_ts(&at),
            ],
        )?;
        let id = self.conn().last_insert_rowid();
        self.conn()
            .query_row(
                &format!("SELECT {COMMENT_COLUMNS} FROM comments WHERE id = ?1"),
                params![id],
                row_to_comment,
            )
            .map_err(StoreError::from)
    }

    pub fn comment_author(&self, id: CommentId) -> Result<Option<UserId>> {
        self.conn()
            .query_row(
                "SELECT user_id FROM comments WHERE id = ?1",
                params![id.0],
                |row| parse_user(0, &row.get::<_, String>(0)?),
            )
            .optional()
            .map_err(StoreError::from)
    }

    /// Replies are removed by the foreign key cascade.
    pub fn delete_comment(&self, id: CommentId) -> Result<usize> {
        Ok(self
            .conn()
            .execute("DELETE FROM comments WHERE id = ?1", params![id.0])?)
    }

    // -- tags --------------------------------------------------------------

    pub fn post_tags(&self, post: PostId) -> Result<Vec<String>> {
        let mut stmt = self.conn().prepare(
            "SELECT t.name FROM post_tags pt JOIN tags t ON t.id = pt.tag_id
             WHERE pt.post_id = ?1 ORDER BY t.name",
        )?;
        let rows = stmt.query_map(params![post.0], |row| row.get(0))?;
        collect(rows)
    }

    pub fn attach_tag(&self, post: PostId, name: &str) -> Result<bool> {
        self.conn().execute(
            "INSERT OR IGNORE INTO tags (name) VALUES (?1)",
            params![name],
        )?;
        let tag_id: i64 = self.conn().query_row(
            "SELECT id FROM tags WHERE name = ?1",
            params![name],
            |row| row.get(0),
        )?;
        let linked = self.conn().execute(
            "INSERT OR IGNORE INTO post_tags (post_id, tag_id) VALUES (?1, ?2)",
            params![post.0, tag_id],
        )?;
        Ok(linked == 1)
    }

    pub fn clear_tags(&self, post: PostId) -> Result<usize> {
        Ok(self
            .conn()
            .execute("DELETE FROM post_tags WHERE post_id = ?1", params![post.0])?)
    }

    pub fn search_tags(&self, prefix: &str, limit: u32) -> Result<Vec<TagUsage>> {
        let mut stmt = self.conn().prepare(
            "SELECT name, usage_count FROM tags
             WHERE usage_count > 0 AND name LIKE ?1 || '%' ESCAPE '\\'
             ORDER BY usage_count DESC, name ASC LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![escape_like(prefix), limit], |row| {
            let count: i64 = row.get(1)?;
            Ok(TagUsage {
                name: row.get(0)?,
                usage_count: count.max(0) as u64,
            })
        })?;
        collect(rows)
    }
}

fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

fn collect<T>(rows: impl Iterator<Item = rusqlite::Result<T>>) -> Result<Vec<T>> {
    let mut out = Vec::new();
    for row in rows {
        out.push(row?);
    }
    Ok(out)
}

fn escape_like(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, '\\' | '%' | '_') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

fn parse_reaction(idx: usize, s: &str) -> rusqlite::Result<Reaction> {
    Reaction::parse(s).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            rusqlite::types::Type::Text,
            format!("unknown reaction {s:?}").into(),
        )
    })
}

fn row_to_comment(row: &rusqlite::Row<'_>) -> rusqlite::Result<Comment> {
    let parent: Option<i64> = row.get(5)?;
    Ok(Comment {
        id: CommentId(row.get(0)?),
        post_id: PostId(row.get(1)?),
        user_id: parse_user(2, &row.get::<_, String>(2)?)?,
        content: row.get(3)?,
        author_nickname: row.get(4)?,
        parent_id: parent.map(CommentId),
        created_at: decode_ts(6, &row.get::<_, String>(6)?)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn setup() -> (Database, UserId, PostId) {
        let db = Database::open_in_memory().unwrap();
        let author = UserId::new();
        let post = db.insert_post(author, "sunset", Utc::now()).unwrap();
        (db, author, post)
    }

    fn new_comment(post: PostId, user: UserId, text: &str, parent: Option<CommentId>) -> NewComment {
        NewComment {
            post_id: post,
            user_id: user,
            content: text.into(),
            author_nickname: "painter".into(),
            parent_id: parent,
        }
    }

    #[test]
    fn one_reaction_per_user_and_post() {
        let (db, _, post) = setup();
        let me = UserId::new();
        assert_eq!(db.reaction(post, me).unwrap(), None);

        db.set_reaction(post, me, Some(Reaction::Like), Utc::now()).unwrap();
        db.set_reaction(post, me, Some(Reaction::Dislike), Utc::now()).unwrap();
        assert_eq!(db.reaction(post, me).unwrap(), Some(Reaction::Dislike));
        assert_eq!(db.reactions(&[post]).unwrap().len(), 1);

        db.set_reaction(post, me, None, Utc::now()).unwrap();
        assert!(db.reactions(&[post]).unwrap().is_empty());
        assert_eq!(db.post_author(PostId(999)).unwrap(), None);
        let stamps = db.post_stamps(&[post, PostId(999)]).unwrap();
        assert_eq!(stamps.len(), 1);
        assert_eq!(stamps[0].id, post);
    }

    #[test]
    fn follow_lists_are_newest_first_and_paged() {
        let db = Database::open_in_memory().unwrap();
        let star = UserId::new();
        let fans: Vec<UserId> = (0..3).map(|_| UserId::new()).collect();
        let t = Utc::now();
        for (i, fan) in fans.iter().enumerate() {
            db.set_following(*fan, star, true, t + Duration::seconds(i as i64)).unwrap();
        }
        db.set_following(fans[0], star, true, t).unwrap();

        assert_eq!(db.follow_stats(star).unwrap(), FollowStats { followers: 3, following: 0 });
        let page: Vec<_> = db.followers(star, 2, 0).unwrap().into_iter().map(|r| r.user_id).collect();
        assert_eq!(page, vec![fans[2], fans[1]]);
        assert_eq!(db.followers(star, 2, 2).unwrap()[0].user_id, fans[0]);
        assert_eq!(db.following(fans[1], 10, 0).unwrap()[0].user_id, star);

        db.set_following(fans[1], star, false, t).unwrap();
        assert!(!db.is_following(fans[1], star).unwrap());
        db.set_following(star, star, true, t).unwrap();
        assert!(!db.is_following(star, star).unwrap());
    }

    #[test]
    fn saves_are_per_user() {
        let (db, _, post) = setup();
        let other_post = db.insert_post(UserId::new(), "moon", Utc::now()).unwrap();
        let me = UserId::new();
        db.set_saved(post, me, true, Utc::now()).unwrap();
        db.set_saved(post, me, true, Utc::now()).unwrap();
        assert!(db.is_saved(post, me).unwrap());
        assert!(!db.is_saved(post, UserId::new()).unwrap());
        assert_eq!(db.saved_among(me, &[post, other_post]).unwrap(), vec![post]);
        db.set_saved(post, me, false, Utc::now()).unwrap();
        assert!(db.saved_among(me, &[post]).unwrap().is_empty());
    }

    #[test]
    fn deleting_a_comment_takes_its_replies() {
        let (db, author, post) = setup();
        let t = Utc::now();
        let root = db.insert_comment(&new_comment(post, author, "first", None), t).unwrap();
        let reply = db
            .insert_comment(&new_comment(post, author, "reply", Some(root.id)), t + Duration::seconds(1))
            .unwrap();
        db.insert_comment(&new_comment(post, author, "nested", Some(reply.id)), t + Duration::seconds(2))
            .unwrap();
        let keep = db
            .insert_comment(&new_comment(post, author, "other", None), t + Duration::seconds(3))
            .unwrap();

        let listed = db.comments(post).unwrap();
        assert_eq!(listed.len(), 4);
        assert_eq!(listed[1].parent_id, Some(root.id));
        assert_eq!(listed[0].author_nickname.as_deref(), Some("painter"));
        assert_eq!(db.comment_author(root.id).unwrap(), Some(author));

        assert_eq!(db.delete_comment(root.id).unwrap(), 1);
        let left = db.comments(post).unwrap();
        assert_eq!(left, vec![keep]);
        assert_eq!(db.comment_posts(&[post]).unwrap(), vec![post]);
    }

    #[test]
    fn tag_usage_follows_links() {
        let (db, author, post) = setup();
        let second = db.insert_post(author, "dusk", Utc::now()).unwrap();
        assert!(db.attach_tag(post, "sky").unwrap());
        assert!(!db.attach_tag(post, "sky").unwrap());
        assert!(db.attach_tag(second, "sky").unwrap());
        assert!(db.attach_tag(post, "sea").unwrap());

        assert_eq!(db.post_tags(post).unwrap(), vec!["sea", "sky"]);
        let found = db.search_tags("s", 10).unwrap();
        assert_eq!(found[0], TagUsage { name: "sky".into(), usage_count: 2 });
        assert_eq!(found.len(), 2);

        assert_eq!(db.clear_tags(post).unwrap(), 2);
        let found = db.search_tags("", 10).unwrap();
        assert_eq!(found, vec![TagUsage { name: "sky".into(), usage_count: 1 }]);
    }

    #[test]
    fn tag_search_treats_wildcards_literally() {
        let (db, _, post) = setup();
        db.attach_tag(post, "a_b").unwrap();
        db.attach_tag(post, "axb").unwrap();
        let found: Vec<_> = db.search_tags("a_", 10).unwrap().into_iter().map(|t| t.name).collect();
        assert_eq!(found, vec!["a_b"]);
    }
}
