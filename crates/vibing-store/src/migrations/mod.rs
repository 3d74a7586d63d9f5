//! Schema upgrades for the embedded backend.
//!
//! The schema version lives in SQLite's `user_version` pragma.  Opening a
//! database applies every step above the stored version in order and bumps
//! the pragma after each one, so a file written by an older client picks up
//! the newer tables on its next open.
//!
//! | version | adds                                                   |
//! |---------|--------------------------------------------------------|
//! | 1       | `profiles`, `messages`                                 |
//! | 2       | `preferences`                                          |
//! | 3       | posts with reactions, follows, saves, comments, tags   |

pub mod v001_initial;
pub mod v002_preferences;
pub mod v003_community;

use rusqlite::Connection;

use crate::error::{Result, StoreError};

pub const CURRENT_VERSION: u32 = 3;

type Step = fn(&Connection) -> std::result::Result<(), rusqlite::Error>;

const STEPS: [(u32, &str, Step); 3] = [
    (1, "v001_initial", v001_initial::up),
    (2, "v002_preferences", v002_preferences::up),
    (3, "v003_community", v003_community::up),
];

/// Bring `conn` up to [`CURRENT_VERSION`].
pub fn run_migrations(conn: &Connection) -> Result<()> {
    let stored: u32 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;
    if stored >= CURRENT_VERSION {
        tracing::debug!(version = stored, "schema up to date");
        return Ok(());
    }

    for (version, name, up) in STEPS.iter().filter(|(v, _, _)| *v > stored) {
        tracing::info!(from = stored, to = *version, step = *name, "upgrading schema");
        up(conn).map_err(|e| StoreError::Migration(format!("{name}: {e}")))?;
        conn.pragma_update(None, "user_version", *version)?;
    }
    Ok(())
}
