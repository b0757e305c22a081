use roster_store::RecordStore;
use roster_types::{UserId, UserRecord};
use tracing::debug;

use crate::error::{MergeResult, ValidationError};

/// Primary and duplicate ids that passed the store-free checks.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MergeIds {
    pub primary: UserId,
    /// Duplicates in caller order with repeats removed.
    pub duplicates: Vec<UserId>,
}

impl MergeIds {
    /// Primary first, then every duplicate.
    pub fn all(&self) -> Vec<UserId> {
        std::iter::once(self.primary)
            .chain(self.duplicates.iter().copied())
            .collect()
    }
}

/// Records loaded for a merge, not yet locked.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MergeCandidates {
    pub primary: UserRecord,
    pub duplicates: Vec<UserRecord>,
}

/// Check id shape without touching the store.
///
/// Order of checks: empty list, malformed ids, self-merge. The self-merge
/// check runs on the raw list, so `[p, p]` is rejected even though it would
/// deduplicate to a single id.
pub fn check_ids(primary: i64, duplicates: &[i64]) -> Result<MergeIds, ValidationError> {
    if duplicates.is_empty() {
        return Err(ValidationError::NoDuplicates);
    }
    let primary_id = UserId::new(primary).map_err(|_| ValidationError::MalformedId(primary))?;
    let mut ids = Vec::with_capacity(duplicates.len());
    for raw in duplicates {
        ids.push(UserId::new(*raw).map_err(|_| ValidationError::MalformedId(*raw))?);
    }
    if ids.contains(&primary_id) {
        return Err(ValidationError::SelfMerge(primary_id));
    }

    let mut unique: Vec<UserId> = Vec::with_capacity(ids.len());
    for id in ids {
        if !unique.contains(&id) {
            unique.push(id);
        }
    }
    Ok(MergeIds {
        primary: primary_id,
        duplicates: unique,
    })
}

/// Load every record and require it to exist and be active.
pub fn load_candidates(store: &dyn RecordStore, ids: &MergeIds) -> MergeResult<MergeCandidates> {
    let primary = load_active(store, ids.primary)?;
    let mut duplicates = Vec::with_capacity(ids.duplicates.len());
    for id in &ids.duplicates {
        duplicates.push(load_active(store, *id)?);
    }
    debug!(primary = %ids.primary, duplicates = duplicates.len(), "merge candidates loaded");
    Ok(MergeCandidates {
        primary,
        duplicates,
    })
}

fn load_active(store: &dyn RecordStore, id: UserId) -> MergeResult<UserRecord> {
    let record = store.user(id)?.ok_or(ValidationError::NotFound(id))?;
    if !record.is_active() {
        return Err(ValidationError::AlreadyMerged(id).into());
    }
    Ok(record)
}
