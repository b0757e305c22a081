use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::TypeError;

/// How a conflicting field was settled.
///
/// The engine treats tags as opaque labels; audit consumers read them.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionTag {
    KeptPrimary,
    KeptDuplicate,
    KeptLongest,
}

impl ResolutionTag {
    pub const ALL: [ResolutionTag; 3] = [
        ResolutionTag::KeptPrimary,
        ResolutionTag::KeptDuplicate,
        ResolutionTag::KeptLongest,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::KeptPrimary => "kept_primary",
            Self::KeptDuplicate => "kept_duplicate",
            Self::KeptLongest => "kept_longest",
        }
    }
}

impl fmt::Display for ResolutionTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResolutionTag {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|tag| tag.as_str() == s)
            .ok_or_else(|| TypeError::UnknownResolution(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_names() {
        assert_eq!(
            serde_json::to_string(&ResolutionTag::KeptLongest).unwrap(),
            "\"kept_longest\""
        );
        for tag in ResolutionTag::ALL {
            assert_eq!(tag.as_str().parse::<ResolutionTag>().unwrap(), tag);
        }
        assert!("kept_both".parse::<ResolutionTag>().is_err());
    }
}
