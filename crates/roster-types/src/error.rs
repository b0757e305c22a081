use thiserror::Error;

/// Errors produced by type operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TypeError {
    #[error("invalid user id {0}: ids are positive integers")]
    InvalidUserId(i64),

    #[error("unknown merge field: {0}")]
    UnknownField(String),

    #[error("unknown resolution tag: {0}")]
    UnknownResolution(String),

    #[error("invalid dependent reference: {0}")]
    InvalidReference(String),
}
