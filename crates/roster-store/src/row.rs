use std::collections::BTreeMap;
use std::fmt;

use roster_types::UserId;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Primary key of a row in a dependent table.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RowId(pub u64);

impl fmt::Display for RowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A row in a dependent table: an id plus named column values.
///
/// Column values are untyped JSON; user references are stored as integers.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Row {
    pub id: RowId,
    #[serde(flatten)]
    pub columns: BTreeMap<String, Value>,
}

impl Row {
    pub fn new(id: RowId) -> Self {
        Self {
            id,
            columns: BTreeMap::new(),
        }
    }

    /// Builder-style column setter.
    pub fn with(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.columns.insert(column.into(), value.into());
        self
    }

    pub fn get(&self, column: &str) -> Option<&Value> {
        self.columns.get(column)
    }

    /// The user id stored in `column`, if it holds one.
    pub fn user_ref(&self, column: &str) -> Option<UserId> {
        self.get(column)
            .and_then(Value::as_i64)
            .and_then(|raw| UserId::new(raw).ok())
    }

    /// Returns `true` if every filter column is present with an equal value.
    pub fn matches(&self, filter: &RowFilter) -> bool {
        filter
            .iter()
            .all(|(column, expected)| self.columns.get(column) == Some(expected))
    }

    /// Project the given columns; missing columns project to `null`.
    pub fn project(&self, columns: &[String]) -> RowFilter {
        columns
            .iter()
            .map(|c| (c.clone(), self.get(c).cloned().unwrap_or(Value::Null)))
            .collect()
    }
}

/// Column equality filter, the store's only query shape.
pub type RowFilter = BTreeMap<String, Value>;
