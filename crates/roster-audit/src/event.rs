use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use roster_types::{MergeField, ResolutionTag, UserId};
use serde::{Deserialize, Serialize};

/// Value of the `event` discriminator on every merge line.
pub const MERGE_PROFILE_EVENT: &str = "MERGE_PROFILE";

/// Event discriminator. Only merges are audited today.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventKind {
    #[serde(rename = "MERGE_PROFILE")]
    MergeProfile,
}

/// The audit record of one committed profile merge.
///
/// Created once per successful commit and never mutated afterwards.
/// `field_resolutions` lists only fields that were in conflict; fields filled
/// from an empty primary are not resolutions and never appear here.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeEvent {
    pub event: EventKind,
    pub timestamp: DateTime<Utc>,
    pub primary_id: UserId,
    pub merged_ids: Vec<UserId>,
    pub field_resolutions: BTreeMap<MergeField, ResolutionTag>,
}

impl MergeEvent {
    /// Build a merge event stamped with the current time.
    pub fn new(
        primary_id: UserId,
        merged_ids: Vec<UserId>,
        field_resolutions: BTreeMap<MergeField, ResolutionTag>,
    ) -> Self {
        Self::at(Utc::now(), primary_id, merged_ids, field_resolutions)
    }

    /// Build a merge event with an explicit timestamp.
    pub fn at(
        timestamp: DateTime<Utc>,
        primary_id: UserId,
        merged_ids: Vec<UserId>,
        field_resolutions: BTreeMap<MergeField, ResolutionTag>,
    ) -> Self {
        Self {
            event: EventKind::MergeProfile,
            timestamp,
            primary_id,
            merged_ids,
            field_resolutions,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn uid(raw: i64) -> UserId {
        UserId::new(raw).unwrap()
    }

    #[test]
    fn serializes_to_the_documented_shape() {
        let ts: DateTime<Utc> = "2025-03-01T12:00:00Z".parse().unwrap();
        let mut resolutions = BTreeMap::new();
        resolutions.insert(MergeField::Phone, ResolutionTag::KeptPrimary);
        let event = MergeEvent::at(ts, uid(3), vec![uid(5)], resolutions);

        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(
            value,
            json!({
                "event": "MERGE_PROFILE",
                "timestamp": "2025-03-01T12:00:00Z",
                "primary_id": 3,
                "merged_ids": [5],
                "field_resolutions": {"phone": "kept_primary"}
            })
        );
        assert_eq!(value["event"], MERGE_PROFILE_EVENT);
    }

    #[test]
    fn empty_resolutions_serialize_as_empty_object() {
        let event = MergeEvent::new(uid(1), vec![uid(2), uid(4)], BTreeMap::new());
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["field_resolutions"], json!({}));
        assert_eq!(value["merged_ids"], json!([2, 4]));
    }

    #[test]
    fn rejects_foreign_event_kind() {
        let line = r#"{"event":"DELETE_PROFILE","timestamp":"2025-03-01T12:00:00Z",
                      "primary_id":1,"merged_ids":[2],"field_resolutions":{}}"#;
        assert!(serde_json::from_str::<MergeEvent>(line).is_err());
    }
}
