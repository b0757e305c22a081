use std::collections::{BTreeMap, BTreeSet};
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use fs2::FileExt;
use roster_types::{MergeField, UserId, UserRecord};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tempfile::NamedTempFile;
use tracing::debug;

use crate::error::{StoreError, StoreResult};
use crate::lock::{RowLockTable, RowLocks};
use crate::row::{Row, RowFilter, RowId};
use crate::traits::{RecordStore, Transaction};

/// Serializable image of a whole store, used for persistence and for
/// before/after state comparison.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreSnapshot {
    #[serde(default)]
    pub users: Vec<UserRecord>,
    #[serde(default)]
    pub tables: BTreeMap<String, Vec<Row>>,
    /// Per-table unique keys; each key is a list of column names.
    #[serde(default)]
    pub unique_keys: BTreeMap<String, Vec<Vec<String>>>,
    /// Incremented by every commit to a file-backed store.
    #[serde(default)]
    pub version: u64,
}

#[derive(Deserialize)]
struct SnapshotVersion {
    #[serde(default)]
    version: u64,
}

#[derive(Clone, Debug, Default)]
struct Table {
    rows: BTreeMap<RowId, Row>,
    unique_keys: Vec<Vec<String>>,
}

#[derive(Debug, Default)]
struct StoreState {
    users: BTreeMap<UserId, UserRecord>,
    tables: BTreeMap<String, Table>,
    version: u64,
}

#[derive(Debug, Default)]
struct Faults {
    fail_after_writes: Option<usize>,
    fail_on_commit: bool,
}

/// In-memory record store.
///
/// Committed state lives behind a `RwLock`; transactions buffer their writes
/// in an overlay and apply it under a single write lock on commit. A store
/// opened with [`InMemoryRecordStore::open`] is backed by a JSON snapshot
/// file that every commit rewrites before the new state becomes visible, so
/// a failed write fails the commit. Commits to the file are serialized
/// across processes by an exclusive lock on a sibling `.lock` file, and a
/// commit is refused if the file's version moved since this store read it.
pub struct InMemoryRecordStore {
    state: RwLock<StoreState>,
    locks: Arc<RowLockTable>,
    faults: Mutex<Faults>,
    backing: Option<PathBuf>,
}

impl InMemoryRecordStore {
    /// Create a new empty store.
    pub fn new() -> Self {
        Self {
            state: RwLock::new(StoreState::default()),
            locks: RowLockTable::new(),
            faults: Mutex::new(Faults::default()),
            backing: None,
        }
    }

    /// Build a store from a snapshot, checking every constraint.
    pub fn from_snapshot(snapshot: StoreSnapshot) -> StoreResult<Self> {
        let mut state = StoreState {
            version: snapshot.version,
            ..StoreState::default()
        };
        for record in snapshot.users {
            if state.users.insert(record.id, record.clone()).is_some() {
                return Err(StoreError::DuplicateUser(record.id));
            }
        }
        check_active_uniqueness(state.users.values())?;

        let mut names: BTreeSet<String> = snapshot.tables.keys().cloned().collect();
        names.extend(snapshot.unique_keys.keys().cloned());
        for name in names {
            let mut table = Table {
                rows: BTreeMap::new(),
                unique_keys: snapshot.unique_keys.get(&name).cloned().unwrap_or_default(),
            };
            for row in snapshot.tables.get(&name).into_iter().flatten() {
                if table.rows.insert(row.id, row.clone()).is_some() {
                    return Err(StoreError::ConstraintViolation(format!(
                        "{name}: duplicate row id {}",
                        row.id
                    )));
                }
            }
            check_unique_keys(&name, &table)?;
            state.tables.insert(name, table);
        }

        Ok(Self {
            state: RwLock::new(state),
            locks: RowLockTable::new(),
            faults: Mutex::new(Faults::default()),
            backing: None,
        })
    }

    /// Load a store from a JSON snapshot file.
    pub fn load(path: &Path) -> StoreResult<Self> {
        let bytes = fs::read(path)?;
        let snapshot: StoreSnapshot = serde_json::from_slice(&bytes)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        let store = Self::from_snapshot(snapshot)?;
        debug!(path = %path.display(), users = store.user_count(), "store loaded");
        Ok(store)
    }

    /// Open a file-backed store. A missing file starts an empty store that
    /// is created on first commit.
    pub fn open(path: &Path) -> StoreResult<Self> {
        let mut store = if path.exists() {
            Self::load(path)?
        } else {
            debug!(path = %path.display(), "store file missing, starting empty");
            Self::new()
        };
        store.backing = Some(path.to_path_buf());
        Ok(store)
    }

    /// The snapshot file commits are written to, if any.
    pub fn backing_path(&self) -> Option<&Path> {
        self.backing.as_deref()
    }

    /// Write the committed state to `path` atomically (temp file + rename).
    pub fn save(&self, path: &Path) -> StoreResult<()> {
        let snapshot = self.snapshot()?;
        write_snapshot(path, &snapshot)
    }

    /// Copy of the full committed state.
    pub fn snapshot(&self) -> StoreResult<StoreSnapshot> {
        let state = self.read_state()?;
        Ok(snapshot_of(&state.users, &state.tables, state.version))
    }

    /// Insert a new user record (the user-creation boundary).
    pub fn insert_user(&self, record: UserRecord) -> StoreResult<()> {
        let mut state = self.write_state()?;
        if state.users.contains_key(&record.id) {
            return Err(StoreError::DuplicateUser(record.id));
        }
        check_active_uniqueness(state.users.values().chain(std::iter::once(&record)))?;
        state.users.insert(record.id, record);
        Ok(())
    }

    /// Declare a dependent table and its unique keys. Re-declaring an
    /// existing table replaces its keys and keeps its rows.
    pub fn define_table(&self, name: &str, unique_keys: Vec<Vec<String>>) -> StoreResult<()> {
        let mut state = self.write_state()?;
        let mut table = state.tables.get(name).cloned().unwrap_or_default();
        table.unique_keys = unique_keys;
        check_unique_keys(name, &table)?;
        state.tables.insert(name.to_string(), table);
        Ok(())
    }

    /// Insert a row into a declared table and return its id.
    pub fn insert_row(&self, table: &str, columns: RowFilter) -> StoreResult<RowId> {
        let mut state = self.write_state()?;
        let target = state
            .tables
            .get_mut(table)
            .ok_or_else(|| StoreError::UnknownTable(table.to_string()))?;
        let id = RowId(target.rows.keys().next_back().map_or(1, |last| last.0 + 1));

        let mut candidate = target.clone();
        candidate.rows.insert(id, Row { id, columns });
        check_unique_keys(table, &candidate)?;
        *target = candidate;
        Ok(id)
    }

    pub fn has_table(&self, name: &str) -> bool {
        self.read_state()
            .map(|s| s.tables.contains_key(name))
            .unwrap_or(false)
    }

    /// Committed rows of a table, in id order.
    pub fn rows(&self, table: &str) -> StoreResult<Vec<Row>> {
        let state = self.read_state()?;
        let target = state
            .tables
            .get(table)
            .ok_or_else(|| StoreError::UnknownTable(table.to_string()))?;
        Ok(target.rows.values().cloned().collect())
    }

    /// Number of user records, active or not.
    pub fn user_count(&self) -> usize {
        self.read_state().map(|s| s.users.len()).unwrap_or(0)
    }

    /// Make every transaction fail on its `(n + 1)`-th write.
    pub fn fail_after_writes(&self, n: usize) {
        if let Ok(mut faults) = self.faults.lock() {
            faults.fail_after_writes = Some(n);
        }
    }

    /// Make every commit fail before applying anything.
    pub fn fail_on_commit(&self) {
        if let Ok(mut faults) = self.faults.lock() {
            faults.fail_on_commit = true;
        }
    }

    pub fn clear_faults(&self) {
        if let Ok(mut faults) = self.faults.lock() {
            *faults = Faults::default();
        }
    }

    fn read_state(&self) -> StoreResult<std::sync::RwLockReadGuard<'_, StoreState>> {
        self.state.read().map_err(|_| StoreError::LockPoisoned)
    }

    fn write_state(&self) -> StoreResult<std::sync::RwLockWriteGuard<'_, StoreState>> {
        self.state.write().map_err(|_| StoreError::LockPoisoned)
    }
}

impl Default for InMemoryRecordStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for InMemoryRecordStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let tables = self.read_state().map(|s| s.tables.len()).unwrap_or(0);
        f.debug_struct("InMemoryRecordStore")
            .field("user_count", &self.user_count())
            .field("table_count", &tables)
            .finish()
    }
}

impl RecordStore for InMemoryRecordStore {
    fn user(&self, id: UserId) -> StoreResult<Option<UserRecord>> {
        Ok(self.read_state()?.users.get(&id).cloned())
    }

    fn lock_users(&self, ids: &[UserId], timeout: Duration) -> StoreResult<RowLocks> {
        self.locks.acquire(ids, timeout)
    }

    fn begin(&self) -> StoreResult<Box<dyn Transaction + '_>> {
        Ok(Box::new(MemoryTransaction {
            store: self,
            users: BTreeMap::new(),
            rows: BTreeMap::new(),
            writes: 0,
        }))
    }
}

// ---------------------------------------------------------------------------
// Transaction
// ---------------------------------------------------------------------------

/// Write overlay on top of the committed state. `None` marks a deleted row.
struct MemoryTransaction<'a> {
    store: &'a InMemoryRecordStore,
    users: BTreeMap<UserId, UserRecord>,
    rows: BTreeMap<String, BTreeMap<RowId, Option<Row>>>,
    writes: usize,
}

impl MemoryTransaction<'_> {
    fn record_write(&mut self, what: &str) -> StoreResult<()> {
        self.writes += 1;
        let faults = self.store.faults.lock().map_err(|_| StoreError::LockPoisoned)?;
        if let Some(limit) = faults.fail_after_writes {
            if self.writes > limit {
                return Err(StoreError::InjectedFault(format!(
                    "write #{} ({what}) refused",
                    self.writes
                )));
            }
        }
        Ok(())
    }

    fn current_row(&self, table: &str, id: RowId) -> StoreResult<Row> {
        if let Some(staged) = self.rows.get(table).and_then(|t| t.get(&id)) {
            return staged.clone().ok_or_else(|| StoreError::RowNotFound {
                table: table.to_string(),
                row: id.0,
            });
        }
        let state = self.store.read_state()?;
        state
            .tables
            .get(table)
            .ok_or_else(|| StoreError::UnknownTable(table.to_string()))?
            .rows
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::RowNotFound {
                table: table.to_string(),
                row: id.0,
            })
    }
}

impl Transaction for MemoryTransaction<'_> {
    fn user(&self, id: UserId) -> StoreResult<Option<UserRecord>> {
        if let Some(staged) = self.users.get(&id) {
            return Ok(Some(staged.clone()));
        }
        self.store.user(id)
    }

    fn update_user(&mut self, record: UserRecord) -> StoreResult<()> {
        if self.user(record.id)?.is_none() {
            return Err(StoreError::UserNotFound(record.id));
        }
        self.record_write("update user")?;
        self.users.insert(record.id, record);
        Ok(())
    }

    fn find_rows(&self, table: &str, filter: &RowFilter) -> StoreResult<Vec<Row>> {
        let state = self.store.read_state()?;
        let base = state
            .tables
            .get(table)
            .ok_or_else(|| StoreError::UnknownTable(table.to_string()))?;
        let staged = self.rows.get(table);

        let rows = base
            .rows
            .iter()
            .filter_map(|(id, row)| match staged.and_then(|s| s.get(id)) {
                Some(overlay) => overlay.clone(),
                None => Some(row.clone()),
            })
            .filter(|row| row.matches(filter))
            .collect();
        Ok(rows)
    }

    fn set_column(
        &mut self,
        table: &str,
        row: RowId,
        column: &str,
        value: Value,
    ) -> StoreResult<()> {
        let mut current = self.current_row(table, row)?;
        self.record_write("set column")?;
        current.columns.insert(column.to_string(), value);
        self.rows
            .entry(table.to_string())
            .or_default()
            .insert(row, Some(current));
        Ok(())
    }

    fn delete_row(&mut self, table: &str, row: RowId) -> StoreResult<()> {
        self.current_row(table, row)?;
        self.record_write("delete row")?;
        self.rows.entry(table.to_string()).or_default().insert(row, None);
        Ok(())
    }

    fn commit(self: Box<Self>) -> StoreResult<()> {
        if self
            .store
            .faults
            .lock()
            .map_err(|_| StoreError::LockPoisoned)?
            .fail_on_commit
        {
            return Err(StoreError::InjectedFault("commit refused".into()));
        }

        let mut state = self.store.write_state()?;

        let mut users = None;
        if !self.users.is_empty() {
            let mut candidate = state.users.clone();
            candidate.extend(self.users.iter().map(|(id, r)| (*id, r.clone())));
            check_active_uniqueness(candidate.values())?;
            users = Some(candidate);
        }

        let mut tables = Vec::with_capacity(self.rows.len());
        for (name, staged) in &self.rows {
            let mut candidate = state
                .tables
                .get(name)
                .cloned()
                .ok_or_else(|| StoreError::UnknownTable(name.clone()))?;
            for (id, row) in staged {
                match row {
                    Some(row) => candidate.rows.insert(*id, row.clone()),
                    None => candidate.rows.remove(id),
                };
            }
            check_unique_keys(name, &candidate)?;
            tables.push((name.clone(), candidate));
        }

        let mut version = state.version;
        if let Some(path) = &self.store.backing {
            let _file_lock = lock_snapshot_file(path)?;
            let found = version_on_disk(path)?;
            if found != state.version {
                return Err(StoreError::ConcurrentModification {
                    path: path.clone(),
                    expected: state.version,
                    found,
                });
            }
            version += 1;
            let mut next_tables = state.tables.clone();
            next_tables.extend(tables.iter().cloned());
            let next_users = users.as_ref().unwrap_or(&state.users);
            write_snapshot(path, &snapshot_of(next_users, &next_tables, version))?;
        }

        // Every check passed and the file is written; nothing below can fail.
        if let Some(users) = users {
            state.users = users;
        }
        for (name, table) in tables {
            state.tables.insert(name, table);
        }
        state.version = version;

        debug!(
            users = self.users.len(),
            tables = self.rows.len(),
            writes = self.writes,
            "transaction committed"
        );
        Ok(())
    }

    fn rollback(self: Box<Self>) {
        debug!(writes = self.writes, "transaction rolled back");
    }
}

// ---------------------------------------------------------------------------
// Snapshots
// ---------------------------------------------------------------------------

fn snapshot_of(
    users: &BTreeMap<UserId, UserRecord>,
    tables: &BTreeMap<String, Table>,
    version: u64,
) -> StoreSnapshot {
    StoreSnapshot {
        users: users.values().cloned().collect(),
        tables: tables
            .iter()
            .map(|(name, t)| (name.clone(), t.rows.values().cloned().collect()))
            .collect(),
        unique_keys: tables
            .iter()
            .filter(|(_, t)| !t.unique_keys.is_empty())
            .map(|(name, t)| (name.clone(), t.unique_keys.clone()))
            .collect(),
        version,
    }
}

/// Take the cross-process commit lock for `path`. Released when the
/// returned file is dropped.
fn lock_snapshot_file(path: &Path) -> StoreResult<File> {
    let mut name = path.as_os_str().to_owned();
    name.push(".lock");
    let lock_path = PathBuf::from(name);
    if let Some(parent) = lock_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let file = OpenOptions::new()
        .create(true)
        .truncate(false)
        .read(true)
        .write(true)
        .open(&lock_path)?;
    file.lock_exclusive()?;
    Ok(file)
}

/// Version recorded in the snapshot file; a missing file is version 0.
fn version_on_disk(path: &Path) -> StoreResult<u64> {
    if !path.exists() {
        return Ok(0);
    }
    let bytes = fs::read(path)?;
    let header: SnapshotVersion = serde_json::from_slice(&bytes)
        .map_err(|e| StoreError::Serialization(e.to_string()))?;
    Ok(header.version)
}

fn write_snapshot(path: &Path, snapshot: &StoreSnapshot) -> StoreResult<()> {
    let json = serde_json::to_vec_pretty(snapshot)
        .map_err(|e| StoreError::Serialization(e.to_string()))?;

    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir)?;
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(&json)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| StoreError::Io(e.error))?;

    debug!(path = %path.display(), bytes = json.len(), "store saved");
    Ok(())
}

// ---------------------------------------------------------------------------
// Constraints
// ---------------------------------------------------------------------------

/// Email (case-insensitive), USBC id, and TNBA id are unique among active
/// records. Soft-deleted records are ignored.
fn check_active_uniqueness<'r>(records: impl Iterator<Item = &'r UserRecord>) -> StoreResult<()> {
    let mut seen: BTreeMap<(MergeField, String), UserId> = BTreeMap::new();
    for record in records.filter(|r| r.is_active()) {
        for field in MergeField::ALL.into_iter().filter(|f| f.is_unique_among_active()) {
            let Some(value) = field.normalize(record.field(field)) else {
                continue;
            };
            if let Some(other) = seen.insert((field, value.clone()), record.id) {
                if other != record.id {
                    return Err(StoreError::ConstraintViolation(format!(
                        "users {other} and {} are both active with {field} {value:?}",
                        record.id
                    )));
                }
            }
        }
    }
    Ok(())
}

/// Rows with a null in any key column do not participate in the key.
fn check_unique_keys(name: &str, table: &Table) -> StoreResult<()> {
    for key in &table.unique_keys {
        let mut seen: BTreeMap<Vec<String>, RowId> = BTreeMap::new();
        for row in table.rows.values() {
            let projected = row.project(key);
            if projected.values().any(Value::is_null) {
                continue;
            }
            let fingerprint = projected.values().map(Value::to_string).collect();
            if let Some(other) = seen.insert(fingerprint, row.id) {
                return Err(StoreError::ConstraintViolation(format!(
                    "{name}: rows {other} and {} share unique key ({})",
                    row.id,
                    key.join(", ")
                )));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn uid(raw: i64) -> UserId {
        UserId::new(raw).unwrap()
    }

    fn user(raw: i64, email: Option<&str>) -> UserRecord {
        let mut record = UserRecord::new(uid(raw), "First", format!("Last{raw}"));
        record.email = email.map(String::from);
        record
    }

    fn columns(pairs: &[(&str, Value)]) -> RowFilter {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    fn store_with_memberships() -> InMemoryRecordStore {
        let store = InMemoryRecordStore::new();
        store.insert_user(user(1, Some("a@example.com"))).unwrap();
        store.insert_user(user(2, Some("b@example.com"))).unwrap();
        store
            .define_table(
                "organization_memberships",
                vec![vec!["user_id".into(), "organization_id".into()]],
            )
            .unwrap();
        store
            .insert_row(
                "organization_memberships",
                columns(&[("user_id", json!(1)), ("organization_id", json!(10))]),
            )
            .unwrap();
        store
            .insert_row(
                "organization_memberships",
                columns(&[("user_id", json!(2)), ("organization_id", json!(10))]),
            )
            .unwrap();
        store
    }

    // -----------------------------------------------------------------------
    // Fixtures / CRUD boundary
    // -----------------------------------------------------------------------

    #[test]
    fn insert_and_read_user() {
        let store = InMemoryRecordStore::new();
        store.insert_user(user(1, None)).unwrap();
        assert_eq!(store.user(uid(1)).unwrap().unwrap().id, uid(1));
        assert!(store.user(uid(2)).unwrap().is_none());
        assert!(matches!(
            store.insert_user(user(1, None)),
            Err(StoreError::DuplicateUser(_))
        ));
    }

    #[test]
    fn active_email_uniqueness_is_case_insensitive() {
        let store = InMemoryRecordStore::new();
        store.insert_user(user(1, Some("x@example.com"))).unwrap();
        let err = store.insert_user(user(2, Some("X@Example.com "))).unwrap_err();
        assert!(matches!(err, StoreError::ConstraintViolation(_)));
    }

    #[test]
    fn soft_deleted_records_do_not_block_uniqueness() {
        let store = InMemoryRecordStore::new();
        let mut gone = user(1, Some("x@example.com"));
        gone.soft_delete(chrono::Utc::now());
        store.insert_user(gone).unwrap();
        store.insert_user(user(2, Some("x@example.com"))).unwrap();
    }

    #[test]
    fn row_ids_are_sequential_and_keys_enforced() {
        let store = store_with_memberships();
        let rows = store.rows("organization_memberships").unwrap();
        assert_eq!(rows.iter().map(|r| r.id).collect::<Vec<_>>(), vec![RowId(1), RowId(2)]);

        let err = store
            .insert_row(
                "organization_memberships",
                columns(&[("user_id", json!(1)), ("organization_id", json!(10))]),
            )
            .unwrap_err();
        assert!(matches!(err, StoreError::ConstraintViolation(_)));
        assert!(matches!(
            store.insert_row("nope", RowFilter::new()),
            Err(StoreError::UnknownTable(_))
        ));
        assert!(store.has_table("organization_memberships"));
        assert!(!store.has_table("nope"));
    }

    // -----------------------------------------------------------------------
    // Transactions
    // -----------------------------------------------------------------------

    #[test]
    fn writes_are_invisible_until_commit() {
        let store = store_with_memberships();
        let mut tx = store.begin().unwrap();
        let mut record = tx.user(uid(1)).unwrap().unwrap();
        record.phone = Some("555".into());
        tx.update_user(record).unwrap();

        assert_eq!(tx.user(uid(1)).unwrap().unwrap().phone.as_deref(), Some("555"));
        assert!(store.user(uid(1)).unwrap().unwrap().phone.is_none());

        tx.commit().unwrap();
        assert_eq!(store.user(uid(1)).unwrap().unwrap().phone.as_deref(), Some("555"));
    }

    #[test]
    fn rollback_discards_everything() {
        let store = store_with_memberships();
        let before = store.snapshot().unwrap();

        let mut tx = store.begin().unwrap();
        tx.delete_row("organization_memberships", RowId(1)).unwrap();
        tx.set_column("organization_memberships", RowId(2), "role", json!("x"))
            .unwrap();
        assert_eq!(
            tx.find_rows("organization_memberships", &RowFilter::new()).unwrap().len(),
            1
        );
        tx.rollback();

        assert_eq!(store.snapshot().unwrap(), before);
    }

    #[test]
    fn dropping_a_transaction_is_a_rollback() {
        let store = store_with_memberships();
        let before = store.snapshot().unwrap();
        {
            let mut tx = store.begin().unwrap();
            tx.delete_row("organization_memberships", RowId(1)).unwrap();
        }
        assert_eq!(store.snapshot().unwrap(), before);
    }

    #[test]
    fn find_rows_sees_staged_changes() {
        let store = store_with_memberships();
        let mut tx = store.begin().unwrap();
        tx.set_column("organization_memberships", RowId(2), "organization_id", json!(11))
            .unwrap();

        let in_ten = tx
            .find_rows(
                "organization_memberships",
                &columns(&[("organization_id", json!(10))]),
            )
            .unwrap();
        assert_eq!(in_ten.len(), 1);
        assert_eq!(in_ten[0].id, RowId(1));
    }

    #[test]
    fn rows_referencing_uses_the_reference_column() {
        let store = store_with_memberships();
        let tx = store.begin().unwrap();
        let reference =
            roster_types::DependentReference::new("organization_memberships", "user_id");
        let rows = tx.rows_referencing(&reference, uid(2)).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].id, RowId(2));
    }

    #[test]
    fn commit_rejects_unique_key_collision_atomically() {
        let store = store_with_memberships();
        let before = store.snapshot().unwrap();

        let mut tx = store.begin().unwrap();
        let mut record = tx.user(uid(1)).unwrap().unwrap();
        record.phone = Some("555".into());
        tx.update_user(record).unwrap();
        // Points row 2 at user 1 while row 1 already holds (1, 10).
        tx.set_column("organization_memberships", RowId(2), "user_id", json!(1))
            .unwrap();

        let err = tx.commit().unwrap_err();
        assert!(matches!(err, StoreError::ConstraintViolation(_)));
        assert_eq!(store.snapshot().unwrap(), before);
    }

    #[test]
    fn commit_rejects_duplicate_active_email() {
        let store = store_with_memberships();
        let mut tx = store.begin().unwrap();
        let mut record = tx.user(uid(1)).unwrap().unwrap();
        record.email = Some("b@example.com".into());
        tx.update_user(record).unwrap();
        assert!(matches!(tx.commit(), Err(StoreError::ConstraintViolation(_))));
    }

    #[test]
    fn email_can_move_when_source_is_soft_deleted_in_same_transaction() {
        let store = store_with_memberships();
        let mut tx = store.begin().unwrap();
        let mut dup = tx.user(uid(2)).unwrap().unwrap();
        dup.soft_delete(chrono::Utc::now());
        tx.update_user(dup).unwrap();
        let mut primary = tx.user(uid(1)).unwrap().unwrap();
        primary.email = Some("b@example.com".into());
        tx.update_user(primary).unwrap();
        tx.commit().unwrap();
    }

    #[test]
    fn update_of_missing_user_fails() {
        let store = InMemoryRecordStore::new();
        let mut tx = store.begin().unwrap();
        assert!(matches!(
            tx.update_user(user(9, None)),
            Err(StoreError::UserNotFound(_))
        ));
    }

    #[test]
    fn deleted_row_cannot_be_updated() {
        let store = store_with_memberships();
        let mut tx = store.begin().unwrap();
        tx.delete_row("organization_memberships", RowId(1)).unwrap();
        assert!(matches!(
            tx.set_column("organization_memberships", RowId(1), "role", json!("x")),
            Err(StoreError::RowNotFound { .. })
        ));
    }

    // -----------------------------------------------------------------------
    // Fault injection
    // -----------------------------------------------------------------------

    #[test]
    fn injected_write_fault_fires_after_limit() {
        let store = store_with_memberships();
        store.fail_after_writes(1);
        let mut tx = store.begin().unwrap();
        tx.delete_row("organization_memberships", RowId(1)).unwrap();
        let err = tx.delete_row("organization_memberships", RowId(2)).unwrap_err();
        assert!(matches!(err, StoreError::InjectedFault(_)));

        store.clear_faults();
        let mut tx = store.begin().unwrap();
        tx.delete_row("organization_memberships", RowId(1)).unwrap();
        tx.delete_row("organization_memberships", RowId(2)).unwrap();
    }

    #[test]
    fn injected_commit_fault_applies_nothing() {
        let store = store_with_memberships();
        let before = store.snapshot().unwrap();
        store.fail_on_commit();
        let mut tx = store.begin().unwrap();
        tx.delete_row("organization_memberships", RowId(1)).unwrap();
        assert!(matches!(tx.commit(), Err(StoreError::InjectedFault(_))));
        assert_eq!(store.snapshot().unwrap(), before);
    }

    // -----------------------------------------------------------------------
    // Persistence
    // -----------------------------------------------------------------------

    #[test]
    fn save_and_load_preserve_state() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("roster.json");
        let store = store_with_memberships();
        store.save(&path).unwrap();

        let loaded = InMemoryRecordStore::load(&path).unwrap();
        assert_eq!(loaded.snapshot().unwrap(), store.snapshot().unwrap());

        // Unique keys survive the round trip.
        let err = loaded
            .insert_row(
                "organization_memberships",
                columns(&[("user_id", json!(2)), ("organization_id", json!(10))]),
            )
            .unwrap_err();
        assert!(matches!(err, StoreError::ConstraintViolation(_)));
    }

    #[test]
    fn open_missing_file_starts_empty_and_commits_write_through() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("roster.json");
        let store = InMemoryRecordStore::open(&path).unwrap();
        assert_eq!(store.user_count(), 0);
        assert_eq!(store.backing_path(), Some(path.as_path()));
        assert!(!path.exists());

        store.insert_user(user(1, None)).unwrap();
        let mut tx = store.begin().unwrap();
        tx.update_user(user(1, Some("new@example.com"))).unwrap();
        tx.commit().unwrap();

        let reopened = InMemoryRecordStore::open(&path).unwrap();
        assert_eq!(
            reopened.user(uid(1)).unwrap().unwrap().email.as_deref(),
            Some("new@example.com")
        );
    }

    #[test]
    fn failed_write_through_fails_the_commit() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not-a-dir");
        fs::write(&blocker, b"x").unwrap();
        let store = InMemoryRecordStore::open(&blocker.join("roster.json")).unwrap();
        store.insert_user(user(1, None)).unwrap();
        let before = store.snapshot().unwrap();

        let mut tx = store.begin().unwrap();
        tx.update_user(user(1, Some("new@example.com"))).unwrap();
        assert!(matches!(tx.commit(), Err(StoreError::Io(_))));
        assert_eq!(store.snapshot().unwrap(), before);
    }

    #[test]
    fn commit_refuses_file_changed_by_another_store() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("roster.json");
        let seed = InMemoryRecordStore::new();
        seed.insert_user(user(1, None)).unwrap();
        seed.insert_user(user(2, None)).unwrap();
        seed.save(&path).unwrap();

        let first = InMemoryRecordStore::open(&path).unwrap();
        let second = InMemoryRecordStore::open(&path).unwrap();

        let mut tx = first.begin().unwrap();
        tx.update_user(user(1, Some("one@example.com"))).unwrap();
        tx.commit().unwrap();
        assert_eq!(first.snapshot().unwrap().version, 1);

        let before = second.snapshot().unwrap();
        let mut tx = second.begin().unwrap();
        tx.update_user(user(2, Some("two@example.com"))).unwrap();
        assert!(matches!(
            tx.commit(),
            Err(StoreError::ConcurrentModification { expected: 0, found: 1, .. })
        ));
        assert_eq!(second.snapshot().unwrap(), before);

        let on_disk = InMemoryRecordStore::load(&path).unwrap();
        assert_eq!(
            on_disk.user(uid(1)).unwrap().unwrap().email.as_deref(),
            Some("one@example.com")
        );
        assert_eq!(on_disk.user(uid(2)).unwrap().unwrap().email, None);

        let reopened = InMemoryRecordStore::open(&path).unwrap();
        let mut tx = reopened.begin().unwrap();
        tx.update_user(user(2, Some("two@example.com"))).unwrap();
        tx.commit().unwrap();
        assert_eq!(InMemoryRecordStore::load(&path).unwrap().snapshot().unwrap().version, 2);
    }

    #[test]
    fn store_created_elsewhere_after_open_is_detected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("roster.json");
        let late = InMemoryRecordStore::open(&path).unwrap();
        late.insert_user(user(1, None)).unwrap();

        let early = InMemoryRecordStore::open(&path).unwrap();
        early.insert_user(user(1, None)).unwrap();
        let mut tx = early.begin().unwrap();
        tx.update_user(user(1, Some("a@example.com"))).unwrap();
        tx.commit().unwrap();

        let mut tx = late.begin().unwrap();
        tx.update_user(user(1, Some("b@example.com"))).unwrap();
        assert!(matches!(
            tx.commit(),
            Err(StoreError::ConcurrentModification { .. })
        ));
    }

    #[test]
    fn load_rejects_inconsistent_snapshot() {
        let snapshot = StoreSnapshot {
            users: vec![user(1, Some("x@example.com")), user(2, Some("x@example.com"))],
            ..StoreSnapshot::default()
        };
        assert!(matches!(
            InMemoryRecordStore::from_snapshot(snapshot),
            Err(StoreError::ConstraintViolation(_))
        ));
    }

    #[test]
    fn load_missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = InMemoryRecordStore::load(&dir.path().join("absent.json")).unwrap_err();
        assert!(matches!(err, StoreError::Io(_)));
    }

    #[test]
    fn debug_format() {
        let store = store_with_memberships();
        let debug = format!("{store:?}");
        assert!(debug.contains("InMemoryRecordStore"));
        assert!(debug.contains("user_count"));
    }
}
