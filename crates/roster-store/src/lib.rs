//! Record store adapter for the roster administration tool.
//!
//! The merge engine reads, locks, and writes user records and their
//! dependent rows exclusively through the [`RecordStore`] and
//! [`Transaction`] traits defined here.
//!
//! # Storage Backends
//!
//! - [`InMemoryRecordStore`] -- `BTreeMap`-based store, optionally backed by
//!   a JSON snapshot file rewritten on every commit; used by the CLI and by
//!   tests
//!
//! # Design Rules
//!
//! 1. Reads outside a transaction see only committed state.
//! 2. A transaction buffers every write; nothing is visible until commit.
//! 3. Commit is all-or-nothing: constraints are checked against the final
//!    state before any change is applied.
//! 4. Dropping an uncommitted transaction discards it.
//! 5. Row locks are taken all at once, so lockers never deadlock.
//! 6. All I/O errors are propagated, never silently ignored.

pub mod error;
pub mod lock;
pub mod memory;
pub mod row;
pub mod traits;

pub use error::{StoreError, StoreResult};
pub use lock::{RowLockTable, RowLocks};
pub use memory::{InMemoryRecordStore, StoreSnapshot};
pub use row::{Row, RowFilter, RowId};
pub use traits::{RecordStore, Transaction};
