use std::fmt;
use std::str::FromStr;

use roster_types::{MergeField, ResolutionTag};
use serde::{Deserialize, Serialize};

use crate::detector::Conflict;
use crate::error::{MergeError, MergeResult};
use crate::report::MergePreview;

/// Strategy for deciding conflicting fields, selected once per invocation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionMode {
    /// Ask the operator for each conflict.
    Interactive,
    PreferPrimary,
    PreferDuplicate,
    /// Longer trimmed value wins; ties keep the primary.
    PreferLongest,
}

impl ResolutionMode {
    pub const ALL: [ResolutionMode; 4] = [
        ResolutionMode::Interactive,
        ResolutionMode::PreferPrimary,
        ResolutionMode::PreferDuplicate,
        ResolutionMode::PreferLongest,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Interactive => "interactive",
            Self::PreferPrimary => "prefer_primary",
            Self::PreferDuplicate => "prefer_duplicate",
            Self::PreferLongest => "prefer_longest",
        }
    }

    /// The pure decision function for automatic modes.
    ///
    /// `None` for [`ResolutionMode::Interactive`], which needs a prompter.
    pub fn strategy(self) -> Option<fn(&Conflict) -> Resolution> {
        match self {
            Self::Interactive => None,
            Self::PreferPrimary => Some(prefer_primary),
            Self::PreferDuplicate => Some(prefer_duplicate),
            Self::PreferLongest => Some(prefer_longest),
        }
    }
}

impl fmt::Display for ResolutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResolutionMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|mode| mode.as_str() == s)
            .ok_or_else(|| format!("unknown resolution mode: {s}"))
    }
}

/// Which record a resolved value came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Primary,
    Duplicate,
}

/// The decided value of one conflicting field.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Resolution {
    pub field: MergeField,
    pub value: String,
    pub side: Side,
    pub tag: ResolutionTag,
}

impl Resolution {
    fn keep(conflict: &Conflict, side: Side, tag: ResolutionTag) -> Self {
        let value = match side {
            Side::Primary => conflict.primary.clone(),
            Side::Duplicate => conflict.duplicate.clone(),
        };
        Self {
            field: conflict.field,
            value,
            side,
            tag,
        }
    }
}

pub fn prefer_primary(conflict: &Conflict) -> Resolution {
    Resolution::keep(conflict, Side::Primary, ResolutionTag::KeptPrimary)
}

pub fn prefer_duplicate(conflict: &Conflict) -> Resolution {
    Resolution::keep(conflict, Side::Duplicate, ResolutionTag::KeptDuplicate)
}

pub fn prefer_longest(conflict: &Conflict) -> Resolution {
    let primary_len = conflict.primary.trim().chars().count();
    let duplicate_len = conflict.duplicate.trim().chars().count();
    let side = if duplicate_len > primary_len {
        Side::Duplicate
    } else {
        Side::Primary
    };
    Resolution::keep(conflict, side, ResolutionTag::KeptLongest)
}

/// An operator's answer to a single conflict.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Choice {
    KeepPrimary,
    KeepDuplicate,
    /// Leave the primary's value in place.
    Skip,
    /// Abort the whole merge.
    Cancel,
}

/// Source of operator decisions for interactive merges.
///
/// Called only during the lock-free preview phase; no row lock is held
/// while an implementation waits for input.
pub trait ConflictPrompter {
    /// Decide one conflicting field.
    fn choose(&mut self, conflict: &Conflict) -> Choice;

    /// Approve the full set of planned changes. `false` aborts.
    fn confirm(&mut self, preview: &MergePreview) -> bool;
}

/// Ask the prompter about one conflict.
pub fn resolve_interactively(
    prompter: &mut dyn ConflictPrompter,
    conflict: &Conflict,
) -> MergeResult<Resolution> {
    match prompter.choose(conflict) {
        Choice::KeepPrimary | Choice::Skip => Ok(prefer_primary(conflict)),
        Choice::KeepDuplicate => Ok(prefer_duplicate(conflict)),
        Choice::Cancel => Err(MergeError::Aborted),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use roster_types::UserId;

    fn conflict(primary: &str, duplicate: &str) -> Conflict {
        Conflict {
            field: MergeField::Address,
            primary_id: UserId::new(1).unwrap(),
            primary: primary.into(),
            duplicate_id: UserId::new(2).unwrap(),
            duplicate: duplicate.into(),
        }
    }

    struct Scripted(Vec<Choice>);

    impl ConflictPrompter for Scripted {
        fn choose(&mut self, _: &Conflict) -> Choice {
            self.0.remove(0)
        }

        fn confirm(&mut self, _: &MergePreview) -> bool {
            true
        }
    }

    // -----------------------------------------------------------------------
    // Automatic strategies
    // -----------------------------------------------------------------------

    #[test]
    fn prefer_sides() {
        let c = conflict("1 Elm St", "22 Oak Ave");
        let kept = prefer_primary(&c);
        assert_eq!((kept.value.as_str(), kept.tag), ("1 Elm St", ResolutionTag::KeptPrimary));
        let kept = prefer_duplicate(&c);
        assert_eq!(
            (kept.value.as_str(), kept.tag),
            ("22 Oak Ave", ResolutionTag::KeptDuplicate)
        );
    }

    #[test]
    fn longest_ties_keep_primary() {
        let kept = prefer_longest(&conflict("abcd", "wxyz"));
        assert_eq!(kept.side, Side::Primary);
        assert_eq!(kept.tag, ResolutionTag::KeptLongest);
    }

    #[test]
    fn longest_counts_characters_not_bytes() {
        let kept = prefer_longest(&conflict("Zürich", "Zurichs"));
        assert_eq!(kept.side, Side::Duplicate);
    }

    #[test]
    fn interactive_has_no_automatic_strategy() {
        assert!(ResolutionMode::Interactive.strategy().is_none());
        for mode in [
            ResolutionMode::PreferPrimary,
            ResolutionMode::PreferDuplicate,
            ResolutionMode::PreferLongest,
        ] {
            assert!(mode.strategy().is_some());
        }
    }

    #[test]
    fn mode_names_parse() {
        for mode in ResolutionMode::ALL {
            assert_eq!(mode.as_str().parse::<ResolutionMode>().unwrap(), mode);
        }
        assert!("prefer_main".parse::<ResolutionMode>().is_err());
    }

    // -----------------------------------------------------------------------
    // Interactive
    // -----------------------------------------------------------------------

    #[test]
    fn skip_keeps_primary_and_cancel_aborts() {
        let c = conflict("a", "b");
        let mut prompter = Scripted(vec![Choice::Skip, Choice::KeepDuplicate, Choice::Cancel]);

        let skipped = resolve_interactively(&mut prompter, &c).unwrap();
        assert_eq!(skipped.tag, ResolutionTag::KeptPrimary);
        let taken = resolve_interactively(&mut prompter, &c).unwrap();
        assert_eq!(taken.value, "b");
        assert!(matches!(
            resolve_interactively(&mut prompter, &c),
            Err(MergeError::Aborted)
        ));
    }

    proptest! {
        #[test]
        fn longest_picks_strictly_longer(a in "[a-z ]{1,12}", b in "[a-z ]{1,12}") {
            prop_assume!(!a.trim().is_empty() && !b.trim().is_empty());
            let c = conflict(a.trim(), b.trim());
            let kept = prefer_longest(&c);
            let expected = if b.trim().len() > a.trim().len() { b.trim() } else { a.trim() };
            prop_assert_eq!(kept.value.as_str(), expected);
            prop_assert_eq!(kept.tag, ResolutionTag::KeptLongest);
        }
    }
}
