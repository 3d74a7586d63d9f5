//! # vibing-store
//!
//! Embedded SQLite backend for VIBING.
//!
//! The crate mirrors the hosted `messages` and `profiles` tables, plus the
//! board tables behind reactions, follows, saves, comments and tags, so the
//! client can run offline and under test with the query semantics of the
//! hosted backend.  It also persists the small set of
//! client-side preferences (volume, dark mode, welcome dialog, recent
//! searches).
//!
//! [`Database`] is a synchronous handle over a `rusqlite::Connection` with
//! typed CRUD helpers; [`LocalBackend`] puts it behind the async backend
//! traits from `vibing-shared`.

pub mod backend;
pub mod community;
pub mod database;
pub mod messages;
pub mod migrations;
pub mod preferences;
pub mod profiles;

mod error;

pub use backend::LocalBackend;
pub use database::Database;
pub use error::StoreError;
pub use preferences::{Preferences, RecentSearch};
