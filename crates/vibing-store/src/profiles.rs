use chrono::Utc;
use rusqlite::{params, params_from_iter, OptionalExtension};
use uuid::Uuid;

use vibing_shared::{Profile, UserId};

use crate::database::{encode_ts, Database};
use crate::error::Result;

impl Database {
    /// Insert or replace a profile's nickname and avatar.
    pub fn upsert_profile(&self, profile: &Profile) -> Result<()> {
        self.conn().execute(
            "INSERT INTO profiles (user_id, nickname, avatar_url, created_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(user_id) DO UPDATE SET
                 nickname = excluded.nickname,
                 avatar_url = excluded.avatar_url",
            params![
                profile.user_id.to_string(),
                profile.nickname,
                profile.avatar_url,
                encode_ts(&Utc::now()),
            ],
        )?;
        Ok(())
    }

    pub fn get_profile(&self, user_id: UserId) -> Result<Option<Profile>> {
        let profile = self
            .conn()
            .query_row(
                "SELECT user_id, nickname, avatar_url FROM profiles WHERE user_id = ?1",
                params![user_id.to_string()],
                row_to_profile,
            )
            .optional()?;
        Ok(profile)
    }

    /// Batch lookup; ids without a profile are simply absent from the result.
    pub fn get_profiles(&self, ids: &[UserId]) -> Result<Vec<Profile>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders = vec!["?"; ids.len()].join(", ");
        let mut stmt = self.conn().prepare(&format!(
            "SELECT user_id, nickname, avatar_url FROM profiles WHERE user_id IN ({placeholders})"
        ))?;
        let rows = stmt.query_map(
            params_from_iter(ids.iter().map(|id| id.to_string())),
            row_to_profile,
        )?;

        let mut profiles = Vec::new();
        for row in rows {
            profiles.push(row?);
        }
        Ok(profiles)
    }

    pub fn nickname_taken(&self, nickname: &str, except: Option<UserId>) -> Result<bool> {
        let except = except.map(|id| id.to_string()).unwrap_or_default();
        let count: i64 = self.conn().query_row(
            "SELECT COUNT(*) FROM profiles
             WHERE lower(nickname) = lower(?1) AND user_id != ?2",
            params![nickname.trim(), except],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }
}

fn row_to_profile(row: &rusqlite::Row<'_>) -> rusqlite::Result<Profile> {
    let id_str: String = row.get(0)?;
    let user_id = Uuid::parse_str(&id_str).map(UserId).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
    })?;
    Ok(Profile {
        user_id,
        nickname: row.get(1)?,
        avatar_url: row.get(2)?,
    })
}
