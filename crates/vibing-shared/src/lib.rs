//! # vibing-shared
//!
//! Domain types, error enums and the backend seam shared by every VIBING
//! crate.  Nothing in here performs I/O: the traits in [`backend`] are
//! implemented by `vibing-store` (embedded SQLite) and `vibing-net` (the
//! hosted backend).

pub mod backend;
pub mod community;
pub mod constants;
pub mod error;
pub mod ids;
pub mod message;
pub mod nickname;
pub mod protocol;
pub mod ranking;
pub mod types;
pub mod upload;

pub use error::{BackendError, CommunityError, IdError, NicknameError, UploadError};
pub use message::{Message, NewMessage, Profile, Role};
pub use types::{CommentId, MessageId, PostId, UserId};
