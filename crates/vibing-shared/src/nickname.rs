//! Nickname rules for the community's unique display names.

use rand::Rng;

use crate::backend::ProfileDirectory;
use crate::error::NicknameError;
use crate::types::UserId;

pub const MIN_LENGTH: usize = 3;
pub const MAX_LENGTH: usize = 20;

const RESERVED: &[&str] = &[
    "admin",
    "system",
    "anonymous",
    "익명",
    "moderator",
    "mod",
    "root",
    "user",
];

const SUFFIXES: &[&str] = &["_pro", "_user", "_master", "_king", "_ace"];

fn is_allowed_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || ('\u{AC00}'..='\u{D7A3}').contains(&c)
}

/// Check the format of a nickname and return its trimmed form.
pub fn validate_format(nickname: &str) -> Result<String, NicknameError> {
    let trimmed = nickname.trim();
    if trimmed.is_empty() {
        return Err(NicknameError::Empty);
    }

    let len = trimmed.chars().count();
    if len < MIN_LENGTH {
        return Err(NicknameError::TooShort { min: MIN_LENGTH });
    }
    if len > MAX_LENGTH {
        return Err(NicknameError::TooLong { max: MAX_LENGTH });
    }

    if !trimmed.chars().all(is_allowed_char) {
        return Err(NicknameError::InvalidCharacters);
    }

    let lower = trimmed.to_lowercase();
    if RESERVED.contains(&lower.as_str()) {
        return Err(NicknameError::Reserved);
    }

    if trimmed.contains("__") {
        return Err(NicknameError::RepeatedUnderscore);
    }

    if trimmed.starts_with('_') || trimmed.ends_with('_') {
        return Err(NicknameError::EdgeUnderscore);
    }

    Ok(trimmed.to_string())
}

/// Format check followed by an availability lookup.  Nothing is written.
pub async fn validate(
    directory: &dyn ProfileDirectory,
    nickname: &str,
    current_user: Option<UserId>,
) -> Result<String, NicknameError> {
    let trimmed = validate_format(nickname)?;
    if directory
        .nickname_taken(&trimmed.to_lowercase(), current_user)
        .await?
    {
        return Err(NicknameError::Taken);
    }
    Ok(trimmed)
}

/// Three alternatives to offer when a nickname is taken: a numbered one,
/// an underscored one and one with a suffix.
pub fn suggestions<R: Rng>(base: &str, rng: &mut R) -> Vec<String> {
    let base = base.trim().to_lowercase();
    vec![
        format!("{base}{}", rng.gen_range(0..1000)),
        format!("{base}_{}", rng.gen_range(0..100)),
        format!("{base}{}", SUFFIXES[rng.gen_range(0..SUFFIXES.len())]),
    ]
}
