use std::time::Duration;

/// Application name
pub const APP_NAME: &str = "VIBING";

/// Backend table holding direct messages
pub const MESSAGES_TABLE: &str = "messages";

/// Backend table holding public profiles
pub const PROFILES_TABLE: &str = "profiles";

/// Schema the realtime listeners are registered against
pub const DB_SCHEMA: &str = "public";

/// Storage bucket for avatar images
pub const AVATAR_BUCKET: &str = "avatars";

/// Poll period used while the realtime channel is down
pub const POLL_INTERVAL: Duration = Duration::from_secs(3);

/// How long to wait for SUBSCRIBED before falling back to polling
pub const SUBSCRIBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Look-back used by the first poll when no watermark has been recorded
pub const INITIAL_POLL_LOOKBACK: Duration = Duration::from_secs(5);

/// First retry after the realtime channel is lost; doubles per failed attempt
pub const REALTIME_REJOIN_DELAY: Duration = Duration::from_secs(1);

/// Upper bound on the realtime rejoin backoff
pub const REALTIME_REJOIN_MAX: Duration = Duration::from_secs(30);

/// Phoenix join reply deadline
pub const REALTIME_JOIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Phoenix heartbeat period
pub const REALTIME_HEARTBEAT: Duration = Duration::from_secs(25);

/// Realtime protocol version sent in the websocket URL
pub const REALTIME_VSN: &str = "1.0.0";

/// Unread counts above this render as "99+"
pub const UNREAD_BADGE_CAP: u64 = 99;

/// Maximum entries kept in the recent user search history
pub const MAX_RECENT_SEARCHES: usize = 10;

/// Default background music volume
pub const DEFAULT_VOLUME: f32 = 0.3;

/// Maximum avatar size in bytes (5 MiB)
pub const MAX_AVATAR_SIZE: u64 = 5 * 1024 * 1024;

/// Cache lifetime sent with avatar uploads, in seconds
pub const AVATAR_CACHE_CONTROL_SECS: u32 = 3600;

/// Display name used when a profile has no nickname
pub const UNKNOWN_NICKNAME: &str = "Unknown";

/// Longest tag name kept by tag parsing, in characters
pub const MAX_TAG_LENGTH: usize = 50;

/// Default page size for follower and following lists
pub const FOLLOW_PAGE_SIZE: u32 = 20;

/// Board posts
pub const POSTS_TABLE: &str = "artworks";

/// One like or dislike per user and post
pub const REACTIONS_TABLE: &str = "artwork_likes";

pub const FOLLOWS_TABLE: &str = "follows";

pub const SAVED_POSTS_TABLE: &str = "saved_artworks";

pub const COMMENTS_TABLE: &str = "artwork_comments";

pub const TAGS_TABLE: &str = "tags";

/// Post to tag links; usage counts are maintained by triggers on this table
pub const POST_TAGS_TABLE: &str = "artwork_tags";
