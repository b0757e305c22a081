use roster_types::{MergeField, UserId, UserRecord};
use serde::Serialize;

/// A field where both records hold different non-empty values.
///
/// Values are stored trimmed, in their original case.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Conflict {
    pub field: MergeField,
    pub primary_id: UserId,
    pub primary: String,
    pub duplicate_id: UserId,
    pub duplicate: String,
}

/// A field empty on the primary that the duplicate can supply.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Fill {
    pub field: MergeField,
    pub value: String,
}

/// Field-by-field classification of one (primary, duplicate) pair.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct FieldComparison {
    pub conflicts: Vec<Conflict>,
    pub fills: Vec<Fill>,
}

impl FieldComparison {
    pub fn conflicting_fields(&self) -> Vec<MergeField> {
        self.conflicts.iter().map(|c| c.field).collect()
    }

    pub fn is_clean(&self) -> bool {
        self.conflicts.is_empty()
    }
}

/// Compare every mergeable field of `duplicate` against `primary`.
///
/// Both-empty and equal-after-normalization fields are no-ops. Output is in
/// [`MergeField::ALL`] order.
pub fn compare(primary: &UserRecord, duplicate: &UserRecord) -> FieldComparison {
    let mut comparison = FieldComparison::default();
    for field in MergeField::ALL {
        let ours = field.normalize(primary.field(field));
        let theirs = field.normalize(duplicate.field(field));
        match (ours, theirs) {
            (None, Some(_)) => comparison.fills.push(Fill {
                field,
                value: trimmed(duplicate, field),
            }),
            (Some(a), Some(b)) if a != b => comparison.conflicts.push(Conflict {
                field,
                primary_id: primary.id,
                primary: trimmed(primary, field),
                duplicate_id: duplicate.id,
                duplicate: trimmed(duplicate, field),
            }),
            _ => {}
        }
    }
    comparison
}

fn trimmed(record: &UserRecord, field: MergeField) -> String {
    record.field(field).unwrap_or_default().trim().to_string()
}
