//! v001 -- `profiles` and `messages`, column for column as the hosted
//! backend stores them.  Hidden flags stay nullable so NULL and false can
//! both be tested.

use rusqlite::Connection;

const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Profiles
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS profiles (
    user_id    TEXT PRIMARY KEY NOT NULL,   -- auth user UUID
    nickname   TEXT,
    avatar_url TEXT,
    created_at TEXT NOT NULL                -- RFC-3339, UTC, fixed width
);

CREATE UNIQUE INDEX IF NOT EXISTS idx_profiles_nickname
    ON profiles(lower(nickname));

-- ----------------------------------------------------------------
-- Messages
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS messages (
    id                 INTEGER PRIMARY KEY AUTOINCREMENT,
    sender_id          TEXT NOT NULL,
    receiver_id        TEXT NOT NULL,
    content            TEXT NOT NULL,
    created_at         TEXT NOT NULL,
    is_read            INTEGER NOT NULL DEFAULT 0,  -- boolean 0/1
    hidden_by_sender   INTEGER,                     -- nullable boolean
    hidden_by_receiver INTEGER                      -- nullable boolean
);

CREATE INDEX IF NOT EXISTS idx_messages_receiver_ts
    ON messages(receiver_id, created_at);

CREATE INDEX IF NOT EXISTS idx_messages_sender_ts
    ON messages(sender_id, created_at);
"#;

pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
