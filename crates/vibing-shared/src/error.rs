use thiserror::Error;

/// Failures of a call against the backend (hosted or embedded).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    #[error("Login required")]
    Unauthenticated,

    #[error("Request failed: {0}")]
    Request(String),

    #[error("Backend responded {code}: {body}")]
    Status { code: u16, body: String },

    #[error("Malformed response: {0}")]
    Decode(String),

    #[error("Realtime channel error: {0}")]
    Realtime(String),

    #[error("Record not found")]
    NotFound,

    #[error("Storage error: {0}")]
    Storage(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IdError {
    #[error("{context} is missing")]
    Missing { context: String },

    #[error("{context} cannot be converted to a number: \"{value}\"")]
    NotNumeric { context: String, value: String },

    #[error("{context} is not a valid id: {value}")]
    NotPositive { context: String, value: i64 },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NicknameError {
    #[error("Please enter a nickname")]
    Empty,

    #[error("Nickname must be at least {min} characters")]
    TooShort { min: usize },

    #[error("Nickname can be at most {max} characters")]
    TooLong { max: usize },

    #[error("Nickname may only contain letters, digits, Hangul and underscores")]
    InvalidCharacters,

    #[error("This nickname is not available")]
    Reserved,

    #[error("Underscores cannot be repeated")]
    RepeatedUnderscore,

    #[error("Nickname cannot start or end with an underscore")]
    EdgeUnderscore,

    #[error("Nickname is already taken")]
    Taken,

    #[error("Could not check nickname availability: {0}")]
    Lookup(#[from] BackendError),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum UploadError {
    #[error("Only image files can be uploaded (got {0})")]
    UnsupportedType(String),

    #[error("File too large: {size} bytes (max {max})")]
    TooLarge { size: u64, max: u64 },
}

/// Failures of the like, follow, save, comment and tag actions.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommunityError {
    #[error("Login required")]
    LoginRequired,

    #[error("You cannot follow yourself")]
    SelfFollow,

    #[error("You cannot save your own post")]
    OwnPost,

    #[error("Post not found")]
    PostNotFound,

    #[error("Only the author can delete this comment")]
    NotCommentOwner,

    #[error("Comment is empty")]
    EmptyComment,

    #[error(transparent)]
    Backend(#[from] BackendError),
}
