use thiserror::Error;

/// Errors from repository operations (used by trait definitions in baton-core).
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database connection error")]
    Connection,

    #[error("query error: {0}")]
    Query(String),

    #[error("entity not found")]
    NotFound,

    #[error("conflict: {0}")]
    Conflict(String),
}

/// Category attached to every [`ApplicationError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    NotFound,
    InvalidInput,
    Conflict,
    BackendError,
}

/// Errors surfaced to callers of the orchestration API.
///
/// Validation failures are never retried by the engine. Collaborator failures
/// arrive as `Backend` and are expected to be re-driven by the caller (the
/// sweep does this for `decide`).
#[derive(Debug, Error)]
pub enum ApplicationError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("backend error: {0}")]
    Backend(#[from] RepositoryError),
}

impl ApplicationError {
    pub fn code(&self) -> ErrorCode {
        match self {
            ApplicationError::NotFound(_) => ErrorCode::NotFound,
            ApplicationError::InvalidInput(_) => ErrorCode::InvalidInput,
            ApplicationError::Conflict(_) => ErrorCode::Conflict,
            ApplicationError::Backend(_) => ErrorCode::BackendError,
        }
    }
}
