use thiserror::Error;

/// Errors from the repository (storage) layer.
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

/// Errors related to user operations.
#[derive(Debug, Error)]
pub enum UserError {
    #[error("user not found: {0}")]
    NotFound(i64),

    #[error("email '{0}' already registered")]
    EmailConflict(String),

    #[error("invalid user: {0}")]
    Invalid(String),

    #[error("storage error: {0}")]
    StorageError(String),
}

impl From<RepositoryError> for UserError {
    fn from(err: RepositoryError) -> Self {
        UserError::StorageError(err.to_string())
    }
}
