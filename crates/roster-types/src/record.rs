use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::field::MergeField;
use crate::identity::UserId;

/// Lifecycle state of a user record.
///
/// Records are never physically removed by a merge; a merged duplicate moves
/// to `SoftDeleted` and keeps every field for history and audit.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum RecordStatus {
    Active,
    SoftDeleted { deleted_at: DateTime<Utc> },
}

impl RecordStatus {
    /// Returns `true` if the record is active.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Active)
    }

    /// The deletion timestamp, if soft-deleted.
    pub fn deleted_at(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::Active => None,
            Self::SoftDeleted { deleted_at } => Some(*deleted_at),
        }
    }
}

/// A user profile as stored in the `users` table.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRecord {
    pub id: UserId,
    pub first_name: String,
    pub last_name: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub usbc_id: Option<String>,
    #[serde(default)]
    pub tnba_id: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default = "active")]
    pub status: RecordStatus,
}

fn active() -> RecordStatus {
    RecordStatus::Active
}

impl UserRecord {
    /// Create an active record with only a name set.
    pub fn new(id: UserId, first_name: impl Into<String>, last_name: impl Into<String>) -> Self {
        Self {
            id,
            first_name: first_name.into(),
            last_name: last_name.into(),
            email: None,
            phone: None,
            address: None,
            usbc_id: None,
            tnba_id: None,
            created_at: Utc::now(),
            status: RecordStatus::Active,
        }
    }

    /// Builder-style setter for a mergeable field.
    pub fn with(mut self, field: MergeField, value: impl Into<String>) -> Self {
        self.set_field(field, Some(value.into()));
        self
    }

    /// Read a mergeable field.
    pub fn field(&self, field: MergeField) -> Option<&str> {
        match field {
            MergeField::Email => self.email.as_deref(),
            MergeField::Phone => self.phone.as_deref(),
            MergeField::Address => self.address.as_deref(),
            MergeField::UsbcId => self.usbc_id.as_deref(),
            MergeField::TnbaId => self.tnba_id.as_deref(),
        }
    }

    /// Overwrite a mergeable field.
    pub fn set_field(&mut self, field: MergeField, value: Option<String>) {
        let slot = match field {
            MergeField::Email => &mut self.email,
            MergeField::Phone => &mut self.phone,
            MergeField::Address => &mut self.address,
            MergeField::UsbcId => &mut self.usbc_id,
            MergeField::TnbaId => &mut self.tnba_id,
        };
        *slot = value;
    }

    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }

    /// Mark the record as merged away. Idempotent on already-deleted records.
    pub fn soft_delete(&mut self, at: DateTime<Utc>) {
        if self.is_active() {
            self.status = RecordStatus::SoftDeleted { deleted_at: at };
        }
    }

    /// "First Last" for summaries.
    pub fn display_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn uid(raw: i64) -> UserId {
        UserId::new(raw).unwrap()
    }

    #[test]
    fn field_accessors_cover_every_field() {
        let mut record = UserRecord::new(uid(1), "Ada", "Lovelace");
        for field in MergeField::ALL {
            assert_eq!(record.field(field), None);
            record.set_field(field, Some(format!("v-{field}")));
            assert_eq!(record.field(field), Some(format!("v-{field}").as_str()));
        }
    }

    #[test]
    fn soft_delete_keeps_first_timestamp() {
        let mut record = UserRecord::new(uid(2), "Bo", "Diddley");
        let first = Utc::now();
        record.soft_delete(first);
        assert_eq!(record.status.deleted_at(), Some(first));

        record.soft_delete(first + chrono::Duration::seconds(10));
        assert_eq!(record.status.deleted_at(), Some(first));
        assert!(!record.is_active());
    }

    #[test]
    fn deserializes_without_optional_fields() {
        let json = r#"{
            "id": 3,
            "first_name": "Cy",
            "last_name": "Young",
            "phone": "555-1234",
            "created_at": "2024-01-01T00:00:00Z"
        }"#;
        let record: UserRecord = serde_json::from_str(json).unwrap();
        assert_eq!(record.id, uid(3));
        assert_eq!(record.phone.as_deref(), Some("555-1234"));
        assert!(record.email.is_none());
        assert!(record.is_active());
    }

    #[test]
    fn status_serializes_as_tagged_state() {
        let at: DateTime<Utc> = "2024-02-03T04:05:06Z".parse().unwrap();
        let json = serde_json::to_value(RecordStatus::SoftDeleted { deleted_at: at }).unwrap();
        assert_eq!(json["state"], "soft_deleted");
        assert_eq!(json["deleted_at"], "2024-02-03T04:05:06Z");
    }
}
