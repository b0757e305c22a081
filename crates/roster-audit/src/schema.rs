use jsonschema::Validator;
use serde_json::Value;

use crate::error::{AuditError, AuditResult};
use crate::event::MergeEvent;

/// Compiled JSON Schema for merge audit lines.
///
/// `format` keywords are asserted, so `timestamp` must be RFC 3339.
pub struct MergeEventSchema {
    validator: Validator,
}

impl MergeEventSchema {
    /// Compile the bundled schema.
    pub fn new() -> AuditResult<Self> {
        let schema_json = include_str!("../schemas/merge_profile.schema.json");
        let schema_value: Value = serde_json::from_str(schema_json)?;

        let validator = jsonschema::options()
            .should_validate_formats(true)
            .build(&schema_value)
            .map_err(|e| AuditError::SchemaCompilation(e.to_string()))?;

        Ok(Self { validator })
    }

    /// Validate an arbitrary JSON value, collecting every violation.
    pub fn validate_value(&self, value: &Value) -> AuditResult<()> {
        let violations: Vec<String> = self
            .validator
            .iter_errors(value)
            .map(|error| error.to_string())
            .collect();
        if violations.is_empty() {
            Ok(())
        } else {
            Err(AuditError::SchemaViolation(violations))
        }
    }

    /// Serialize an event and validate it, returning the validated value.
    pub fn validate_event(&self, event: &MergeEvent) -> AuditResult<Value> {
        let value = serde_json::to_value(event)?;
        self.validate_value(&value)?;
        Ok(value)
    }

    pub fn is_valid(&self, value: &Value) -> bool {
        self.validator.is_valid(value)
    }
}

impl std::fmt::Debug for MergeEventSchema {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MergeEventSchema").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use roster_types::{MergeField, ResolutionTag, UserId};
    use serde_json::json;
    use std::collections::BTreeMap;

    fn schema() -> MergeEventSchema {
        MergeEventSchema::new().expect("bundled schema compiles")
    }

    fn valid_line() -> Value {
        json!({
            "event": "MERGE_PROFILE",
            "timestamp": "2025-03-01T12:00:00Z",
            "primary_id": 3,
            "merged_ids": [5, 6],
            "field_resolutions": {"phone": "kept_primary", "email": "kept_longest"}
        })
    }

    #[test]
    fn accepts_a_well_formed_line() {
        assert!(schema().validate_value(&valid_line()).is_ok());
    }

    #[test]
    fn typed_events_always_validate() {
        let mut resolutions = BTreeMap::new();
        resolutions.insert(MergeField::TnbaId, ResolutionTag::KeptDuplicate);
        let event = MergeEvent::new(
            UserId::new(1).unwrap(),
            vec![UserId::new(2).unwrap()],
            resolutions,
        );
        let value = schema().validate_event(&event).unwrap();
        assert_eq!(value["field_resolutions"]["tnba_id"], "kept_duplicate");
    }

    #[test]
    fn every_required_field_is_enforced() {
        let schema = schema();
        for field in ["event", "timestamp", "primary_id", "merged_ids", "field_resolutions"] {
            let mut line = valid_line();
            line.as_object_mut().unwrap().remove(field);
            assert!(!schema.is_valid(&line), "missing {field} must be rejected");
        }
    }

    #[test]
    fn rejects_unknown_resolution_tag() {
        let mut line = valid_line();
        line["field_resolutions"]["phone"] = json!("kept_both");
        let err = schema().validate_value(&line).unwrap_err();
        assert!(matches!(err, AuditError::SchemaViolation(ref v) if !v.is_empty()));
    }

    #[test]
    fn rejects_timestamp_that_is_not_rfc3339() {
        let schema = schema();
        for bad in ["yesterday", "2025-03-01", "2025-03-01 12:00:00", "2025-13-01T12:00:00Z"] {
            let mut line = valid_line();
            line["timestamp"] = json!(bad);
            assert!(!schema.is_valid(&line), "timestamp {bad:?} must be rejected");
        }

        let mut line = valid_line();
        line["timestamp"] = json!("2025-03-01T12:00:00.123456+02:00");
        assert!(schema.is_valid(&line));
    }

    #[test]
    fn rejects_unknown_field_name() {
        let mut line = valid_line();
        line["field_resolutions"]["password"] = json!("kept_primary");
        assert!(!schema().is_valid(&line));
    }

    #[test]
    fn rejects_wrong_event_and_types() {
        let schema = schema();

        let mut line = valid_line();
        line["event"] = json!("MERGE");
        assert!(!schema.is_valid(&line));

        let mut line = valid_line();
        line["primary_id"] = json!("3");
        assert!(!schema.is_valid(&line));

        let mut line = valid_line();
        line["merged_ids"] = json!([]);
        assert!(!schema.is_valid(&line));
    }
}
