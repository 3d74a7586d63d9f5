//! Client-side persisted preferences.
//!
//! Each preference is a single JSON value under a fixed key.  There is no
//! schema versioning: a value that no longer decodes is treated as unset.

use std::path::Path;

use rusqlite::{params, OptionalExtension};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::warn;

use vibing_shared::constants::{DEFAULT_VOLUME, MAX_RECENT_SEARCHES};
use vibing_shared::UserId;

use crate::database::Database;
use crate::error::Result;

const KEY_VOLUME: &str = "music_volume";
const KEY_DARK_MODE: &str = "dark_mode";
const KEY_WELCOME_DISMISSED: &str = "welcome_modal_shown";
const KEY_RECENT_SEARCHES: &str = "user_search_recent";

/// One entry of the recent user-search history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecentSearch {
    pub user_id: UserId,
    pub display_name: String,
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
}

impl Database {
    pub fn get_preference<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let raw: Option<String> = self
            .conn()
            .query_row(
                "SELECT value FROM preferences WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;

        Ok(raw.and_then(|json| match serde_json::from_str(&json) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(key, error = %e, "Ignoring undecodable preference");
                None
            }
        }))
    }

    pub fn set_preference<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        let json = serde_json::to_string(value)?;
        self.conn().execute(
            "INSERT OR REPLACE INTO preferences (key, value) VALUES (?1, ?2)",
            params![key, json],
        )?;
        Ok(())
    }

    pub fn remove_preference(&self, key: &str) -> Result<()> {
        self.conn()
            .execute("DELETE FROM preferences WHERE key = ?1", params![key])?;
        Ok(())
    }
}

/// Typed access to the persisted preferences.
pub struct Preferences {
    db: Database,
}

impl Preferences {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn open_in_dir(dir: &Path) -> Result<Self> {
        Database::open_in_dir(dir).map(Self::new)
    }

    pub fn in_memory() -> Result<Self> {
        Database::open_in_memory().map(Self::new)
    }

    pub fn volume(&self) -> Result<f32> {
        Ok(self
            .db
            .get_preference::<f32>(KEY_VOLUME)?
            .filter(|v| v.is_finite() && *v > 0.0)
            .unwrap_or(DEFAULT_VOLUME))
    }

    /// Stores the volume clamped to `0.0..=1.0` and returns what was stored.
    pub fn set_volume(&self, volume: f32) -> Result<f32> {
        let volume = if volume.is_finite() {
            volume.clamp(0.0, 1.0)
        } else {
            DEFAULT_VOLUME
        };
        self.db.set_preference(KEY_VOLUME, &volume)?;
        Ok(volume)
    }

    pub fn dark_mode(&self) -> Result<bool> {
        Ok(self.db.get_preference(KEY_DARK_MODE)?.unwrap_or(false))
    }

    pub fn set_dark_mode(&self, enabled: bool) -> Result<()> {
        self.db.set_preference(KEY_DARK_MODE, &enabled)
    }

    pub fn welcome_dismissed(&self) -> Result<bool> {
        Ok(self
            .db
            .get_preference(KEY_WELCOME_DISMISSED)?
            .unwrap_or(false))
    }

    pub fn set_welcome_dismissed(&self, dismissed: bool) -> Result<()> {
        if dismissed {
            self.db.set_preference(KEY_WELCOME_DISMISSED, &true)
        } else {
            self.db.remove_preference(KEY_WELCOME_DISMISSED)
        }
    }

    /// Newest first.
    pub fn recent_searches(&self) -> Result<Vec<RecentSearch>> {
        Ok(self
            .db
            .get_preference(KEY_RECENT_SEARCHES)?
            .unwrap_or_default())
    }

    /// Move (or insert) `user_id` to the front, keeping at most
    /// [`MAX_RECENT_SEARCHES`] entries.
    pub fn add_recent_search(
        &self,
        user_id: UserId,
        display_name: &str,
        timestamp: i64,
    ) -> Result<Vec<RecentSearch>> {
        let mut searches = self.recent_searches()?;
        searches.retain(|s| s.user_id != user_id);
        searches.insert(
            0,
            RecentSearch {
                user_id,
                display_name: display_name.to_string(),
                timestamp,
            },
        );
        searches.truncate(MAX_RECENT_SEARCHES);
        self.db.set_preference(KEY_RECENT_SEARCHES, &searches)?;
        Ok(searches)
    }

    /// Remove the entry at `index`; out-of-range indexes change nothing.
    pub fn remove_recent_search(&self, index: usize) -> Result<Vec<RecentSearch>> {
        let mut searches = self.recent_searches()?;
        if index < searches.len() {
            searches.remove(index);
            self.db.set_preference(KEY_RECENT_SEARCHES, &searches)?;
        }
        Ok(searches)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scalar_defaults_and_updates() {
        let prefs = Preferences::in_memory().unwrap();
        assert_eq!(prefs.volume().unwrap(), DEFAULT_VOLUME);
        assert!(!prefs.dark_mode().unwrap());
        assert!(!prefs.welcome_dismissed().unwrap());

        assert_eq!(prefs.set_volume(1.7).unwrap(), 1.0);
        assert_eq!(prefs.volume().unwrap(), 1.0);

        prefs.set_dark_mode(true).unwrap();
        assert!(prefs.dark_mode().unwrap());

        prefs.set_welcome_dismissed(true).unwrap();
        assert!(prefs.welcome_dismissed().unwrap());
        prefs.set_welcome_dismissed(false).unwrap();
        assert!(!prefs.welcome_dismissed().unwrap());
    }

    #[test]
    fn recent_searches_dedupe_and_cap() {
        let prefs = Preferences::in_memory().unwrap();
        let users: Vec<UserId> = (0..12).map(|_| UserId::new()).collect();
        for (i, user) in users.iter().enumerate() {
            prefs.add_recent_search(*user, &format!("user{i}"), i as i64).unwrap();
        }
        let searches = prefs.recent_searches().unwrap();
        assert_eq!(searches.len(), MAX_RECENT_SEARCHES);
        assert_eq!(searches[0].user_id, users[11]);

        // Searching again moves the entry to the front without duplicating it.
        let searches = prefs.add_recent_search(users[5], "user5", 99).unwrap();
        assert_eq!(searches[0].user_id, users[5]);
        assert_eq!(searches.iter().filter(|s| s.user_id == users[5]).count(), 1);

        let searches = prefs.remove_recent_search(0).unwrap();
        assert_eq!(searches[0].user_id, users[11]);
        assert_eq!(prefs.remove_recent_search(100).unwrap().len(), searches.len());
    }

    #[test]
    fn corrupt_values_read_as_unset() {
        let prefs = Preferences::in_memory().unwrap();
        prefs
            .db
            .conn()
            .execute(
                "INSERT INTO preferences (key, value) VALUES ('dark_mode', 'not json')",
                [],
            )
            .unwrap();
        assert!(!prefs.dark_mode().unwrap());
    }
}
