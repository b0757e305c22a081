use std::time::Duration;

use roster_types::{DependentReference, UserId, UserRecord};
use serde_json::Value;

use crate::error::StoreResult;
use crate::lock::RowLocks;
use crate::row::{Row, RowFilter, RowId};

/// Persistent store of user records and the rows that reference them.
///
/// All implementations must satisfy these invariants:
/// - Reads through the store return committed state only.
/// - `lock_users` is all-or-nothing and bounded by the given timeout.
/// - A [`Transaction`] sees its own writes and nothing else uncommitted.
/// - The store is passed explicitly to its users; there is no global handle.
pub trait RecordStore: Send + Sync {
    /// Read a user record by id.
    ///
    /// Returns `Ok(None)` if no record with this id exists.
    fn user(&self, id: UserId) -> StoreResult<Option<UserRecord>>;

    /// Read several user records.
    ///
    /// Default implementation calls `user()` for each id.
    fn users(&self, ids: &[UserId]) -> StoreResult<Vec<Option<UserRecord>>> {
        ids.iter().map(|id| self.user(*id)).collect()
    }

    /// Acquire row-level locks on every id, waiting at most `timeout`.
    fn lock_users(&self, ids: &[UserId], timeout: Duration) -> StoreResult<RowLocks>;

    /// Open a transaction. Nothing it writes is visible until `commit`.
    fn begin(&self) -> StoreResult<Box<dyn Transaction + '_>>;
}

/// A unit of work against a [`RecordStore`].
pub trait Transaction {
    /// Read a user record, including this transaction's own writes.
    fn user(&self, id: UserId) -> StoreResult<Option<UserRecord>>;

    /// Replace a user record. The record must already exist.
    fn update_user(&mut self, record: UserRecord) -> StoreResult<()>;

    /// Rows in `table` whose columns equal every entry of `filter`, in row
    /// id order.
    fn find_rows(&self, table: &str, filter: &RowFilter) -> StoreResult<Vec<Row>>;

    /// Overwrite one column of an existing row.
    fn set_column(&mut self, table: &str, row: RowId, column: &str, value: Value)
        -> StoreResult<()>;

    /// Remove a row.
    fn delete_row(&mut self, table: &str, row: RowId) -> StoreResult<()>;

    /// Make every buffered write visible atomically, or none of them.
    fn commit(self: Box<Self>) -> StoreResult<()>;

    /// Discard every buffered write.
    fn rollback(self: Box<Self>);

    /// Rows whose reference column points at `user`.
    fn rows_referencing(
        &self,
        reference: &DependentReference,
        user: UserId,
    ) -> StoreResult<Vec<Row>> {
        let mut filter = RowFilter::new();
        filter.insert(reference.column.clone(), Value::from(user.get()));
        self.find_rows(&reference.table, &filter)
    }
}
