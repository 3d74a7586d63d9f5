//! v002 -- Client preferences (volume, theme, dialogs, recent searches).

use rusqlite::Connection;

const UP_SQL: &str = r#"
-- Client-side key/value preferences (JSON encoded values)
CREATE TABLE IF NOT EXISTS preferences (
    key   TEXT PRIMARY KEY NOT NULL,
    value TEXT NOT NULL
);
"#;

pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
