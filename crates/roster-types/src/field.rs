use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::TypeError;

/// A scalar user field that a profile merge may fill or resolve.
///
/// Names, credentials, and timestamps are deliberately absent: they belong to
/// the surviving record and are never taken from a duplicate.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeField {
    Email,
    Phone,
    Address,
    UsbcId,
    TnbaId,
}

impl MergeField {
    /// Every mergeable field, in comparison order.
    pub const ALL: [MergeField; 5] = [
        MergeField::Email,
        MergeField::Phone,
        MergeField::Address,
        MergeField::UsbcId,
        MergeField::TnbaId,
    ];

    /// Stable wire name used in audit events and CLI output.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Email => "email",
            Self::Phone => "phone",
            Self::Address => "address",
            Self::UsbcId => "usbc_id",
            Self::TnbaId => "tnba_id",
        }
    }

    /// Human-readable label ("USBC ID", "Phone", ...).
    pub fn label(self) -> &'static str {
        match self {
            Self::Email => "Email",
            Self::Phone => "Phone",
            Self::Address => "Address",
            Self::UsbcId => "USBC ID",
            Self::TnbaId => "TNBA ID",
        }
    }

    /// Whether the field must be unique among active records.
    pub fn is_unique_among_active(self) -> bool {
        matches!(self, Self::Email | Self::UsbcId | Self::TnbaId)
    }

    /// Normalize a raw value for comparison.
    ///
    /// Returns `None` for absent or whitespace-only values. Emails are
    /// case-folded; every other field is only trimmed.
    pub fn normalize(self, raw: Option<&str>) -> Option<String> {
        let trimmed = raw?.trim();
        if trimmed.is_empty() {
            return None;
        }
        match self {
            Self::Email => Some(trimmed.to_lowercase()),
            _ => Some(trimmed.to_string()),
        }
    }
}

impl fmt::Display for MergeField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MergeField {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|field| field.as_str() == s)
            .ok_or_else(|| TypeError::UnknownField(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_round_trip_through_from_str() {
        for field in MergeField::ALL {
            assert_eq!(field.as_str().parse::<MergeField>().unwrap(), field);
        }
        assert!(matches!(
            "password".parse::<MergeField>(),
            Err(TypeError::UnknownField(_))
        ));
    }

    #[test]
    fn serde_uses_snake_case() {
        let json = serde_json::to_string(&MergeField::UsbcId).unwrap();
        assert_eq!(json, "\"usbc_id\"");
    }

    #[test]
    fn normalize_treats_blank_as_empty() {
        assert_eq!(MergeField::Phone.normalize(None), None);
        assert_eq!(MergeField::Phone.normalize(Some("   ")), None);
        assert_eq!(
            MergeField::Phone.normalize(Some(" 555-1234 ")),
            Some("555-1234".into())
        );
    }

    #[test]
    fn normalize_case_folds_email_only() {
        assert_eq!(
            MergeField::Email.normalize(Some(" X@Example.COM")),
            Some("x@example.com".into())
        );
        assert_eq!(
            MergeField::Address.normalize(Some("1 Main ST")),
            Some("1 Main ST".into())
        );
    }

    #[test]
    fn unique_fields() {
        assert!(MergeField::Email.is_unique_among_active());
        assert!(MergeField::TnbaId.is_unique_among_active());
        assert!(!MergeField::Phone.is_unique_among_active());
        assert!(!MergeField::Address.is_unique_among_active());
    }
}
