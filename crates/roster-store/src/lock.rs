//! Row-level locks on user records.
//!
//! Merges that share no user id run concurrently; merges that contend on any
//! id serialize. A locker takes its whole id set in one step, which rules out
//! lock-order deadlocks between overlapping merges.

use std::collections::BTreeSet;
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::{Duration, Instant};

use roster_types::UserId;
use tracing::debug;

use crate::error::{StoreError, StoreResult};

/// Shared table of currently locked user ids.
#[derive(Debug, Default)]
pub struct RowLockTable {
    held: Mutex<BTreeSet<UserId>>,
    released: Condvar,
}

impl RowLockTable {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Lock every id in `ids`, waiting at most `timeout` for contenders.
    ///
    /// Either all ids are locked or none are.
    pub fn acquire(self: &Arc<Self>, ids: &[UserId], timeout: Duration) -> StoreResult<RowLocks> {
        let wanted: BTreeSet<UserId> = ids.iter().copied().collect();
        let deadline = Instant::now() + timeout;
        let started = Instant::now();

        let mut held = self.held.lock().map_err(|_| StoreError::LockPoisoned)?;
        while wanted.iter().any(|id| held.contains(id)) {
            let now = Instant::now();
            if now >= deadline {
                return Err(StoreError::LockTimeout {
                    ids: wanted.into_iter().collect(),
                    waited: started.elapsed(),
                });
            }
            let (guard, _) = self
                .released
                .wait_timeout(held, deadline - now)
                .map_err(|_| StoreError::LockPoisoned)?;
            held = guard;
        }
        held.extend(wanted.iter().copied());
        drop(held);

        debug!(ids = ?wanted, waited = ?started.elapsed(), "row locks acquired");
        Ok(RowLocks {
            table: Arc::clone(self),
            ids: wanted.into_iter().collect(),
        })
    }

    /// Returns `true` if `id` is currently locked by anyone.
    pub fn is_locked(&self, id: UserId) -> bool {
        self.held
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&id)
    }

    fn release(&self, ids: &[UserId]) {
        let mut held = self.held.lock().unwrap_or_else(PoisonError::into_inner);
        for id in ids {
            held.remove(id);
        }
        drop(held);
        self.released.notify_all();
    }
}

/// Guard over a set of locked user ids. Dropping it releases the locks.
#[derive(Debug)]
pub struct RowLocks {
    table: Arc<RowLockTable>,
    ids: Vec<UserId>,
}

impl RowLocks {
    /// Locked ids in ascending order.
    pub fn ids(&self) -> &[UserId] {
        &self.ids
    }
}

impl Drop for RowLocks {
    fn drop(&mut self) {
        self.table.release(&self.ids);
        debug!(ids = ?self.ids, "row locks released");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::thread;

    fn ids(raw: &[i64]) -> Vec<UserId> {
        raw.iter().map(|r| UserId::new(*r).unwrap()).collect()
    }

    #[test]
    fn acquire_and_release() {
        let table = RowLockTable::new();
        let guard = table.acquire(&ids(&[5, 3, 5]), Duration::from_millis(10)).unwrap();
        assert_eq!(guard.ids(), ids(&[3, 5]).as_slice());
        assert!(table.is_locked(UserId::new(3).unwrap()));

        drop(guard);
        assert!(!table.is_locked(UserId::new(3).unwrap()));
    }

    #[test]
    fn disjoint_sets_do_not_block() {
        let table = RowLockTable::new();
        let _a = table.acquire(&ids(&[1, 2]), Duration::from_millis(10)).unwrap();
        let b = table.acquire(&ids(&[3, 4]), Duration::from_millis(10));
        assert!(b.is_ok());
    }

    #[test]
    fn overlapping_set_times_out() {
        let table = RowLockTable::new();
        let _a = table.acquire(&ids(&[1, 2]), Duration::from_millis(10)).unwrap();
        let err = table
            .acquire(&ids(&[2, 9]), Duration::from_millis(20))
            .unwrap_err();
        assert!(matches!(err, StoreError::LockTimeout { .. }));
        // All-or-nothing: 9 must not have been taken.
        assert!(!table.is_locked(UserId::new(9).unwrap()));
    }

    #[test]
    fn contender_proceeds_after_release() {
        let table = RowLockTable::new();
        let first = table.acquire(&ids(&[7]), Duration::from_millis(10)).unwrap();

        let (tx, rx) = mpsc::channel();
        let contender = {
            let table = Arc::clone(&table);
            thread::spawn(move || {
                let guard = table.acquire(&ids(&[7, 8]), Duration::from_secs(5)).unwrap();
                tx.send(guard.ids().to_vec()).unwrap();
            })
        };

        thread::sleep(Duration::from_millis(30));
        assert!(rx.try_recv().is_err(), "contender must wait");
        drop(first);

        let got = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(got, ids(&[7, 8]));
        contender.join().expect("thread should not panic");
    }
}
