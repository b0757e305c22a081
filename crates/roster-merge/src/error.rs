use roster_store::StoreError;
use roster_types::{MergeField, UserId};

/// Reasons a merge request is rejected before anything is written.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    /// No duplicate ids were supplied.
    #[error("at least one duplicate id is required")]
    NoDuplicates,

    /// An id is zero or negative.
    #[error("malformed user id: {0}")]
    MalformedId(i64),

    /// The primary id also appears among the duplicates.
    #[error("cannot merge user {0} into itself")]
    SelfMerge(UserId),

    /// No record exists with this id.
    #[error("user {0} not found")]
    NotFound(UserId),

    /// The record was already merged into another profile.
    #[error("user {0} is already merged")]
    AlreadyMerged(UserId),

    /// Interactive resolution was requested but prompting is disabled.
    #[error("interactive resolution requested in non-interactive mode")]
    InteractiveDisabled,

    /// The record changed between the preview and the locked apply phase.
    #[error("user {0} changed while the merge was being prepared")]
    Stale(UserId),
}

/// Every non-success outcome of a merge invocation.
#[derive(Debug, thiserror::Error)]
pub enum MergeError {
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),

    /// Conflicts exist, no resolution mode was given, and prompting is off.
    /// `fields` is deduplicated and in [`MergeField::ALL`] order.
    #[error("unresolved conflicts on {}", field_list(.fields))]
    ConflictUnresolved { fields: Vec<MergeField> },

    /// The operator cancelled. Nothing was written.
    #[error("merge aborted by operator")]
    Aborted,

    /// The apply phase failed and was rolled back.
    #[error("storage failure: {0}")]
    Storage(#[from] StoreError),
}

impl MergeError {
    /// Returns `true` for a deliberate operator cancellation.
    pub fn is_aborted(&self) -> bool {
        matches!(self, Self::Aborted)
    }
}

fn field_list(fields: &[MergeField]) -> String {
    fields
        .iter()
        .map(|f| f.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Result alias for merge operations.
pub type MergeResult<T> = Result<T, MergeError>;
