//! Row visibility for multi-version readers.
//!
//! The index never decides visibility itself. Search and iteration take an
//! optional [`RowVisibility`]: `None` returns every version, `Some` filters
//! versions through `can_read`. [`TxnManager`] and [`TxnContext`] provide a
//! snapshot-isolation implementation over the xmin/xmax header of [`Row`].

use crate::row::{Row, FROZEN_XID, INVALID_XID};
use arbor_common::{ArborError, Result};
use parking_lot::RwLock;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

/// Purpose of a visibility check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReadMode {
    /// Ordinary read under the caller's snapshot.
    Read,
    /// Uniqueness check: does this version still occupy its key?
    Dup,
    /// Referential check: does a parent row exist for a child reference?
    Ref,
}

/// Visibility predicate injected into index searches.
pub trait RowVisibility: Send + Sync {
    /// Returns true if `row` is visible for `mode`.
    fn can_read(&self, row: &Row, mode: ReadMode) -> bool;

    /// Returns true when several versions of one key can coexist.
    /// Unique inserts only re-check visibility when this holds.
    fn is_multi_version(&self) -> bool {
        true
    }
}

/// Outcome of every issued id. An id below `next_xid` that is neither
/// active nor aborted has committed, so only aborts need remembering.
#[derive(Debug, Default)]
struct TxnTable {
    active: HashSet<u32>,
    aborted: HashSet<u32>,
}

/// Allocates transaction ids and records their outcome.
#[derive(Debug)]
pub struct TxnManager {
    next_xid: AtomicU32,
    state: RwLock<TxnTable>,
}

impl TxnManager {
    /// Creates a transaction manager. Ids start after [`FROZEN_XID`].
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            next_xid: AtomicU32::new(FROZEN_XID + 1),
            state: RwLock::new(TxnTable::default()),
        })
    }

    /// Starts a transaction and captures its snapshot.
    pub fn begin(self: &Arc<Self>) -> TxnContext {
        let mut state = self.state.write();
        let xid = self.next_xid.fetch_add(1, Ordering::Relaxed);
        let in_progress = state.active.clone();
        state.active.insert(xid);

        TxnContext {
            xid,
            snapshot_bound: xid,
            in_progress,
            manager: Arc::clone(self),
        }
    }

    /// Commits the transaction.
    pub fn commit(&self, ctx: &TxnContext) -> Result<()> {
        self.finish(ctx.xid, true)
    }

    /// Aborts the transaction. Versions it created become dead, versions it
    /// deleted become live again.
    pub fn abort(&self, ctx: &TxnContext) -> Result<()> {
        self.finish(ctx.xid, false)
    }

    fn finish(&self, xid: u32, commit: bool) -> Result<()> {
        let mut state = self.state.write();
        if !state.active.remove(&xid) {
            return Err(ArborError::TransactionClosed(xid));
        }
        if !commit {
            state.aborted.insert(xid);
        }
        Ok(())
    }

    /// Returns true if `xid` has committed. The frozen id is always committed.
    pub fn is_committed(&self, xid: u32) -> bool {
        if xid == FROZEN_XID {
            return true;
        }
        let state = self.state.read();
        xid != INVALID_XID
            && xid < self.next_xid.load(Ordering::Relaxed)
            && !state.active.contains(&xid)
            && !state.aborted.contains(&xid)
    }

    /// Returns true if `xid` has aborted.
    pub fn is_aborted(&self, xid: u32) -> bool {
        self.state.read().aborted.contains(&xid)
    }

    /// Returns true if `xid` has started and not yet finished.
    pub fn is_active(&self, xid: u32) -> bool {
        self.state.read().active.contains(&xid)
    }

    /// Returns true while any transaction is running.
    pub fn has_active(&self) -> bool {
        !self.state.read().active.is_empty()
    }

    /// Ids of the aborted transactions still remembered.
    pub fn aborted_xids(&self) -> Vec<u32> {
        self.state.read().aborted.iter().copied().collect()
    }

    /// Drops aborted ids whose versions are gone from every store. A version
    /// still stamped with a forgotten id would read as committed.
    pub fn forget_aborted(&self, xids: &[u32]) {
        let mut state = self.state.write();
        for xid in xids {
            state.aborted.remove(xid);
        }
    }
}

/// A transaction and its snapshot.
#[derive(Debug)]
pub struct TxnContext {
    xid: u32,
    /// Transactions with ids at or above this started after the snapshot.
    snapshot_bound: u32,
    /// Transactions that were running when the snapshot was taken.
    in_progress: HashSet<u32>,
    manager: Arc<TxnManager>,
}

impl TxnContext {
    /// Returns this transaction's id.
    #[inline]
    pub fn xid(&self) -> u32 {
        self.xid
    }

    /// Returns the manager that owns this transaction.
    pub fn manager(&self) -> &Arc<TxnManager> {
        &self.manager
    }

    /// Fails with `TransactionClosed` once the transaction has finished.
    pub fn ensure_active(&self) -> Result<()> {
        if self.manager.is_active(self.xid) {
            Ok(())
        } else {
            Err(ArborError::TransactionClosed(self.xid))
        }
    }

    /// True if `xid` committed before this snapshot was taken.
    fn sees_committed(&self, xid: u32) -> bool {
        if xid == FROZEN_XID {
            return true;
        }
        xid < self.snapshot_bound
            && !self.in_progress.contains(&xid)
            && self.manager.is_committed(xid)
    }

    /// True if `xid` has committed by now, regardless of the snapshot.
    fn committed_now(&self, xid: u32) -> bool {
        self.manager.is_committed(xid)
    }
}

impl RowVisibility for TxnContext {
    fn can_read(&self, row: &Row, mode: ReadMode) -> bool {
        let version = row.version();
        let xmin = version.xmin();
        let xmax = version.xmax();

        match mode {
            ReadMode::Read => {
                let created = xmin == self.xid || self.sees_committed(xmin);
                created
                    && match xmax {
                        None => true,
                        Some(x) => x != self.xid && !self.sees_committed(x),
                    }
            }
            ReadMode::Dup => {
                if self.manager.is_aborted(xmin) {
                    return false;
                }
                match xmax {
                    None => true,
                    Some(x) => x != self.xid && !self.committed_now(x),
                }
            }
            ReadMode::Ref => {
                let created = xmin == self.xid || self.committed_now(xmin);
                created
                    && match xmax {
                        None => true,
                        Some(x) => x != self.xid && !self.committed_now(x),
                    }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arbor_common::Value;

    fn row(id: u64, xmin: u32) -> Row {
        Row::with_version(id, vec![Value::BigInt(id as i64)], xmin)
    }

    #[test]
    fn test_frozen_rows_visible_to_all() {
        let mgr = TxnManager::new();
        let t = mgr.begin();
        let r = Row::new(1, vec![Value::Null]);
        assert!(t.can_read(&r, ReadMode::Read));
        assert!(t.can_read(&r, ReadMode::Dup));
        assert!(t.can_read(&r, ReadMode::Ref));
    }

    #[test]
    fn test_uncommitted_insert_visibility() {
        let mgr = TxnManager::new();
        let writer = mgr.begin();
        let reader = mgr.begin();
        let r = row(1, writer.xid());

        assert!(writer.can_read(&r, ReadMode::Read));
        assert!(!reader.can_read(&r, ReadMode::Read));
        // Still occupies its key for uniqueness purposes.
        assert!(reader.can_read(&r, ReadMode::Dup));
        assert!(!reader.can_read(&r, ReadMode::Ref));
    }

    #[test]
    fn test_snapshot_ignores_later_commits() {
        let mgr = TxnManager::new();
        let writer = mgr.begin();
        let reader = mgr.begin();
        let r = row(1, writer.xid());
        mgr.commit(&writer).unwrap();

        assert!(!reader.can_read(&r, ReadMode::Read));
        assert!(reader.can_read(&r, ReadMode::Ref));

        let late = mgr.begin();
        assert!(late.can_read(&r, ReadMode::Read));
    }

    #[test]
    fn test_deleted_versions() {
        let mgr = TxnManager::new();
        let deleter = mgr.begin();
        let other = mgr.begin();
        let r = Row::new(1, vec![Value::BigInt(1)]);
        r.version().mark_deleted(deleter.xid(), |_| false).unwrap();

        assert!(!deleter.can_read(&r, ReadMode::Read));
        assert!(!deleter.can_read(&r, ReadMode::Dup));
        assert!(other.can_read(&r, ReadMode::Read));
        assert!(other.can_read(&r, ReadMode::Dup));

        mgr.commit(&deleter).unwrap();
        assert!(other.can_read(&r, ReadMode::Read));
        assert!(!other.can_read(&r, ReadMode::Dup));
        assert!(!other.can_read(&r, ReadMode::Ref));
    }

    #[test]
    fn test_aborted_insert_is_not_a_duplicate() {
        let mgr = TxnManager::new();
        let writer = mgr.begin();
        let r = row(1, writer.xid());
        mgr.abort(&writer).unwrap();

        let t = mgr.begin();
        assert!(!t.can_read(&r, ReadMode::Read));
        assert!(!t.can_read(&r, ReadMode::Dup));
    }

    #[test]
    fn test_finish_twice_fails() {
        let mgr = TxnManager::new();
        let t = mgr.begin();
        assert!(t.ensure_active().is_ok());
        mgr.commit(&t).unwrap();
        assert!(matches!(
            mgr.commit(&t),
            Err(ArborError::TransactionClosed(_))
        ));
        assert!(t.ensure_active().is_err());
        assert!(mgr.is_committed(t.xid()));
        assert!(!mgr.is_aborted(t.xid()));
        assert!(!mgr.has_active());
    }

    #[test]
    fn test_outcome_of_unknown_ids() {
        let mgr = TxnManager::new();
        let t = mgr.begin();
        assert!(!mgr.is_committed(t.xid()));
        assert!(!mgr.is_committed(t.xid() + 1));
        assert!(!mgr.is_committed(INVALID_XID));
        assert!(mgr.is_committed(FROZEN_XID));
    }

    #[test]
    fn test_forget_aborted() {
        let mgr = TxnManager::new();
        let a = mgr.begin();
        let b = mgr.begin();
        mgr.abort(&a).unwrap();
        mgr.abort(&b).unwrap();
        let mut xids = mgr.aborted_xids();
        xids.sort_unstable();
        assert_eq!(xids, vec![a.xid(), b.xid()]);

        mgr.forget_aborted(&[a.xid()]);
        assert_eq!(mgr.aborted_xids(), vec![b.xid()]);
        assert!(!mgr.is_aborted(a.xid()));
        assert!(mgr.is_aborted(b.xid()));
    }
}
