//! Avatar upload checks and object naming.  All of this runs before any
//! bytes leave the process.

use crate::constants::MAX_AVATAR_SIZE;
use crate::error::UploadError;
use crate::types::UserId;

pub const IMAGE_TYPES: &[&str] = &[
    "image/jpeg",
    "image/jpg",
    "image/png",
    "image/gif",
    "image/webp",
];

pub fn validate_avatar(content_type: &str, size: u64) -> Result<(), UploadError> {
    let content_type = content_type.trim().to_ascii_lowercase();
    if !IMAGE_TYPES.contains(&content_type.as_str()) {
        return Err(UploadError::UnsupportedType(content_type));
    }
    if size > MAX_AVATAR_SIZE {
        return Err(UploadError::TooLarge {
            size,
            max: MAX_AVATAR_SIZE,
        });
    }
    Ok(())
}

/// Image content type implied by a file name's extension.
pub fn content_type_for(file_name: &str) -> Option<&'static str> {
    let (_, ext) = file_name.rsplit_once('.')?;
    match ext.to_ascii_lowercase().as_str() {
        "jpg" | "jpeg" => Some("image/jpeg"),
        "png" => Some("image/png"),
        "gif" => Some("image/gif"),
        "webp" => Some("image/webp"),
        _ => None,
    }
}

/// `{user}-{millis}.{ext}`, where `ext` is the original file's extension.
pub fn avatar_object_name(user: UserId, original_file_name: &str, now_millis: i64) -> String {
    let ext = original_file_name
        .rsplit_once('.')
        .map(|(_, ext)| ext)
        .filter(|ext| !ext.is_empty())
        .unwrap_or("png");
    format!("{user}-{now_millis}.{ext}")
}

/// Object name of a previously uploaded avatar, recovered from its public URL.
pub fn object_name_from_public_url(url: &str) -> Option<&str> {
    let without_query = url.split(['?', '#']).next()?;
    without_query
        .rsplit('/')
        .next()
        .filter(|name| !name.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_non_images_and_oversized_files() {
        assert!(validate_avatar("image/png", 1024).is_ok());
        assert!(validate_avatar("IMAGE/WEBP", 1024).is_ok());
        assert_eq!(
            validate_avatar("application/pdf", 10),
            Err(UploadError::UnsupportedType("application/pdf".into()))
        );
        assert!(matches!(
            validate_avatar("image/jpeg", MAX_AVATAR_SIZE + 1),
            Err(UploadError::TooLarge { .. })
        ));
    }

    #[test]
    fn object_names_round_trip_through_urls() {
        let user: UserId = "0f8fad5b-d9cb-469f-a165-70867728950e".parse().unwrap();
        let name = avatar_object_name(user, "me.final.jpg", 1_700_000_000_000);
        assert_eq!(name, "0f8fad5b-d9cb-469f-a165-70867728950e-1700000000000.jpg");

        let url = format!("https://x.example/storage/v1/object/public/avatars/{name}?t=1");
        assert_eq!(object_name_from_public_url(&url), Some(name.as_str()));
        assert_eq!(object_name_from_public_url("https://x.example/"), None);
    }

    #[test]
    fn content_types_follow_the_extension() {
        assert_eq!(content_type_for("me.JPG"), Some("image/jpeg"));
        assert_eq!(content_type_for("a.b.webp"), Some("image/webp"));
        assert_eq!(content_type_for("notes.txt"), None);
        assert_eq!(content_type_for("noext"), None);
    }
}
