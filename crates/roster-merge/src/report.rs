use std::collections::BTreeMap;

use roster_types::{MergeField, ResolutionTag, UserId};
use serde::Serialize;

use crate::detector::Conflict;
use crate::phase::MergePhase;
use crate::relinker::RelinkPlan;

/// Net change to one field of the primary.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct FieldChange {
    pub field: MergeField,
    pub before: Option<String>,
    pub after: Option<String>,
    /// Last resolution decided for the field; `None` for a plain fill.
    pub resolution: Option<ResolutionTag>,
}

/// One duplicate as shown in a preview.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct DuplicateSummary {
    pub id: UserId,
    pub name: String,
    pub conflicts: Vec<MergeField>,
}

/// Everything a merge would do, computed without writing.
///
/// Produced for dry runs and handed to the operator for confirmation before
/// an interactive merge is applied.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct MergePreview {
    pub primary_id: UserId,
    pub primary_name: String,
    pub duplicates: Vec<DuplicateSummary>,
    pub field_changes: Vec<FieldChange>,
    pub field_resolutions: BTreeMap<MergeField, ResolutionTag>,
    /// Conflicts left for an operator to decide.
    pub pending: Vec<Conflict>,
    pub relinks: Vec<RelinkPlan>,
    pub soft_deletes: Vec<UserId>,
}

impl MergePreview {
    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    pub fn relinked_rows(&self) -> usize {
        self.relinks.iter().map(|p| p.relinked.len()).sum()
    }

    pub fn dropped_rows(&self) -> usize {
        self.relinks.iter().map(|p| p.dropped.len()).sum()
    }
}

/// A committed merge.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct MergeSuccess {
    pub primary_id: UserId,
    pub merged_ids: Vec<UserId>,
    /// Only fields that were detected as conflicts.
    pub field_resolutions: BTreeMap<MergeField, ResolutionTag>,
    pub field_changes: Vec<FieldChange>,
    pub relinks: Vec<RelinkPlan>,
    /// `Logged`, or `Committed` when the audit write failed.
    pub phase: MergePhase,
    /// Non-fatal problems, such as a failed audit write.
    pub warnings: Vec<String>,
}

impl MergeSuccess {
    pub fn is_logged(&self) -> bool {
        self.phase == MergePhase::Logged
    }
}

/// Successful outcome of [`crate::MergeEngine::merge`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum MergeReport {
    Committed(MergeSuccess),
    Preview(MergePreview),
}

impl MergeReport {
    pub fn committed(&self) -> Option<&MergeSuccess> {
        match self {
            Self::Committed(success) => Some(success),
            Self::Preview(_) => None,
        }
    }

    pub fn preview(&self) -> Option<&MergePreview> {
        match self {
            Self::Preview(preview) => Some(preview),
            Self::Committed(_) => None,
        }
    }
}
