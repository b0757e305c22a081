use std::collections::{BTreeMap, BTreeSet};

use roster_store::{RowId, StoreResult, Transaction};
use roster_types::{DependentReference, ReferenceRegistry, UserId};
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

/// Planned changes to one registered reference.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct RelinkPlan {
    pub table: String,
    pub column: String,
    /// Rows to repoint at the primary, in duplicate then row id order.
    pub relinked: Vec<RowId>,
    /// Rows dropped because the primary already holds the same scoped key.
    pub dropped: Vec<RowId>,
}

impl RelinkPlan {
    pub fn is_empty(&self) -> bool {
        self.relinked.is_empty() && self.dropped.is_empty()
    }
}

/// Work out how every registered reference moves from the duplicates to the
/// primary, without writing.
///
/// For scoped references the primary's existing row wins: a duplicate row
/// whose scope key the primary already holds is dropped, as is a later
/// duplicate's row whose key an earlier duplicate already contributed. Rows
/// with a null in any scope column never collide. A row dropped for one
/// reference is not planned again for a later reference on the same table.
pub fn plan(
    tx: &dyn Transaction,
    registry: &ReferenceRegistry,
    primary: UserId,
    duplicates: &[UserId],
) -> StoreResult<Vec<RelinkPlan>> {
    let mut plans = Vec::with_capacity(registry.len());
    let mut gone: BTreeMap<&str, BTreeSet<RowId>> = BTreeMap::new();
    for reference in registry.iter() {
        let dropped = gone.entry(reference.table.as_str()).or_default();
        let plan = plan_reference(tx, reference, primary, duplicates, dropped)?;
        dropped.extend(plan.dropped.iter().copied());
        plans.push(plan);
    }
    Ok(plans)
}

/// Plan and stage every registered reference inside `tx`, one at a time.
///
/// Each reference is planned against the transaction's own view, so rows
/// dropped or repointed for an earlier reference are seen by later ones.
pub fn relink(
    tx: &mut dyn Transaction,
    registry: &ReferenceRegistry,
    primary: UserId,
    duplicates: &[UserId],
) -> StoreResult<Vec<RelinkPlan>> {
    let mut plans = Vec::with_capacity(registry.len());
    for reference in registry.iter() {
        let plan = plan_reference(&*tx, reference, primary, duplicates, &BTreeSet::new())?;
        apply(tx, &plan, primary)?;
        plans.push(plan);
    }
    Ok(plans)
}

fn plan_reference(
    tx: &dyn Transaction,
    reference: &DependentReference,
    primary: UserId,
    duplicates: &[UserId],
    skip: &BTreeSet<RowId>,
) -> StoreResult<RelinkPlan> {
    let mut plan = RelinkPlan {
        table: reference.table.clone(),
        column: reference.column.clone(),
        relinked: Vec::new(),
        dropped: Vec::new(),
    };

    let mut claimed = BTreeSet::new();
    if reference.is_scoped() {
        for row in tx.rows_referencing(reference, primary)? {
            if let Some(key) = scope_key(&row.project(&reference.unique_scope)) {
                claimed.insert(key);
            }
        }
    }

    for duplicate in duplicates {
        for row in tx.rows_referencing(reference, *duplicate)? {
            if skip.contains(&row.id) {
                continue;
            }
            let key = if reference.is_scoped() {
                scope_key(&row.project(&reference.unique_scope))
            } else {
                None
            };
            match key {
                Some(key) => {
                    if claimed.insert(key) {
                        plan.relinked.push(row.id);
                    } else {
                        plan.dropped.push(row.id);
                    }
                }
                None => plan.relinked.push(row.id),
            }
        }
    }

    debug!(
        table = %plan.table,
        column = %plan.column,
        relinked = plan.relinked.len(),
        dropped = plan.dropped.len(),
        "relink planned"
    );
    Ok(plan)
}

/// Scope values as comparable strings, or `None` if any is null.
fn scope_key(projected: &roster_store::RowFilter) -> Option<Vec<String>> {
    if projected.values().any(Value::is_null) {
        return None;
    }
    Some(projected.values().map(Value::to_string).collect())
}

/// Stage one plan inside `tx`. Drops are applied before relinks.
fn apply(tx: &mut dyn Transaction, plan: &RelinkPlan, primary: UserId) -> StoreResult<()> {
    for row in &plan.dropped {
        tx.delete_row(&plan.table, *row)?;
    }
    for row in &plan.relinked {
        tx.set_column(&plan.table, *row, &plan.column, Value::from(primary.get()))?;
    }
    Ok(())
}
