use thiserror::Error;
use vibing_shared::BackendError;
use vibing_store::StoreError;

/// Failures of foreground messaging actions.
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Login required")]
    LoginRequired,

    #[error("No conversation selected")]
    NoConversation,

    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error(transparent)]
    Store(#[from] StoreError),

    /// The session task has shut down.
    #[error("Messaging session closed")]
    Closed,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NavigationError {
    #[error("Unknown tab: {0}")]
    UnknownTab(String),

    #[error("{0} requires login")]
    LoginRequired(String),
}
