use std::path::PathBuf;
use std::time::Duration;

use roster_types::UserId;

/// Errors from record store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// A user record with this id already exists.
    #[error("user {0} already exists")]
    DuplicateUser(UserId),

    /// The user record was not found where one was required.
    #[error("user {0} not found")]
    UserNotFound(UserId),

    /// The table is not known to the store.
    #[error("unknown table: {0}")]
    UnknownTable(String),

    /// The row does not exist in the table.
    #[error("row {row} not found in {table}")]
    RowNotFound { table: String, row: u64 },

    /// Committing would violate a uniqueness constraint.
    #[error("constraint violation: {0}")]
    ConstraintViolation(String),

    /// Row locks could not be acquired before the timeout.
    #[error("timed out after {waited:?} waiting for row locks on users {ids:?}")]
    LockTimeout { ids: Vec<UserId>, waited: Duration },

    /// The snapshot file was committed to by another process since this
    /// store loaded it.
    #[error("store file {path} changed on disk (version {found}, expected {expected})")]
    ConcurrentModification {
        path: PathBuf,
        expected: u64,
        found: u64,
    },

    /// A thread panicked while holding an internal lock.
    #[error("store lock poisoned")]
    LockPoisoned,

    /// A fault injected for testing.
    #[error("injected fault: {0}")]
    InjectedFault(String),

    /// Serialization or deserialization failure.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// I/O error from the underlying storage backend.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
