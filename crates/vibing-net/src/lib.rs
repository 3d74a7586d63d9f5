// Hosted backend client: REST queries for messages and the board, password
// auth, realtime channels and avatar storage.

pub mod auth;
pub mod community;
pub mod endpoint;
pub mod error;
pub mod realtime;
pub mod rest;
pub mod storage;

pub use auth::{sign_in_with_password, AuthSession, SignedOut};
pub use endpoint::Endpoint;
pub use error::NetError;
pub use realtime::RealtimeClient;
pub use rest::RestBackend;
pub use storage::AvatarStorage;
