use thiserror::Error;

/// Errors raised by a storage engine behind the registry and message store.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StorageError {
    #[error("record not found")]
    NotFound,

    #[error("conflict: {0}")]
    Conflict(String),

    /// Transient failure. The message store retries these with bounded attempts.
    #[error("storage unavailable: {0}")]
    Unavailable(String),

    #[error("storage backend error: {0}")]
    Backend(String),
}

impl StorageError {
    pub fn is_transient(&self) -> bool {
        matches!(self, StorageError::Unavailable(_))
    }
}

/// Error taxonomy returned by the channel service to the session gateway.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ChatError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("unavailable: {0}")]
    Unavailable(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ChatError {
    /// Stable machine-readable code used on the wire.
    pub fn code(&self) -> &'static str {
        match self {
            ChatError::NotFound(_) => "not_found",
            ChatError::PermissionDenied(_) => "permission_denied",
            ChatError::Conflict(_) => "conflict",
            ChatError::Unavailable(_) => "unavailable",
            ChatError::InvalidArgument(_) => "invalid_argument",
            ChatError::Internal(_) => "internal",
        }
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        ChatError::NotFound(what.into())
    }

    pub fn denied(why: impl Into<String>) -> Self {
        ChatError::PermissionDenied(why.into())
    }
}

impl From<StorageError> for ChatError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound => ChatError::NotFound("record not found".into()),
            StorageError::Conflict(m) => ChatError::Conflict(m),
            StorageError::Unavailable(m) => ChatError::Unavailable(m),
            StorageError::Backend(m) => ChatError::Internal(m),
        }
    }
}

pub type ChatResult<T> = Result<T, ChatError>;
