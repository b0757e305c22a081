//! Descriptors for tables that store a user id.
//!
//! Feature modules (organisation memberships, scores, brackets, ...) register
//! one [`DependentReference`] per foreign-key column. The merge engine only
//! sees these descriptors, never the feature modules themselves.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::error::TypeError;

/// One foreign-key column that references `users.id`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DependentReference {
    /// Table holding the reference.
    pub table: String,
    /// Column holding the user id.
    pub column: String,
    /// Additional columns that, together with `column`, form a unique key.
    ///
    /// Empty means the reference carries no uniqueness constraint.
    #[serde(default)]
    pub unique_scope: Vec<String>,
}

impl DependentReference {
    /// A reference without a uniqueness constraint.
    pub fn new(table: impl Into<String>, column: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            column: column.into(),
            unique_scope: Vec::new(),
        }
    }

    /// Add a uniqueness scope (e.g. `["organization_id"]` for user+org).
    pub fn unique_with<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.unique_scope = columns.into_iter().map(Into::into).collect();
        self
    }

    /// Returns `true` if relinking may collide with an existing row.
    pub fn is_scoped(&self) -> bool {
        !self.unique_scope.is_empty()
    }

    /// Check structural well-formedness.
    pub fn validate(&self) -> Result<(), TypeError> {
        if self.table.trim().is_empty() {
            return Err(TypeError::InvalidReference("table name is empty".into()));
        }
        if self.column.trim().is_empty() {
            return Err(TypeError::InvalidReference(format!(
                "{}: column name is empty",
                self.table
            )));
        }
        let mut seen = BTreeSet::new();
        for col in &self.unique_scope {
            if col.trim().is_empty() {
                return Err(TypeError::InvalidReference(format!(
                    "{}.{}: unique scope contains an empty column",
                    self.table, self.column
                )));
            }
            if *col == self.column || !seen.insert(col.as_str()) {
                return Err(TypeError::InvalidReference(format!(
                    "{}.{}: unique scope repeats column {col}",
                    self.table, self.column
                )));
            }
        }
        Ok(())
    }
}

/// The static set of dependent references supplied at startup.
///
/// An empty registry is valid: merging then touches only the `users` table.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReferenceRegistry {
    entries: Vec<DependentReference>,
}

impl ReferenceRegistry {
    /// Build a registry, validating each entry and rejecting duplicates.
    pub fn new(entries: Vec<DependentReference>) -> Result<Self, TypeError> {
        let mut seen = BTreeSet::new();
        for entry in &entries {
            entry.validate()?;
            if !seen.insert((entry.table.as_str(), entry.column.as_str())) {
                return Err(TypeError::InvalidReference(format!(
                    "{}.{} registered twice",
                    entry.table, entry.column
                )));
            }
        }
        Ok(Self { entries })
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn iter(&self) -> impl Iterator<Item = &DependentReference> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
