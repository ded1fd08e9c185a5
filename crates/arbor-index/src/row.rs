//! Row versions stored in the index.

use arbor_common::Value;
use std::sync::atomic::{AtomicU32, Ordering};

/// Stable identifier of a row version. Used as the tie-break between
/// versions whose key columns compare equal.
pub type RowId = u64;

/// Transaction id that is committed for every reader.
pub const FROZEN_XID: u32 = 0;

/// Marker in `xmax` for a version that has not been deleted.
pub const INVALID_XID: u32 = u32::MAX;

/// MVCC header of a row version.
///
/// - xmin: transaction that created this version
/// - xmax: transaction that deleted or superseded it (`INVALID_XID` if live)
#[derive(Debug)]
pub struct RowVersion {
    xmin: u32,
    xmax: AtomicU32,
}

impl RowVersion {
    /// Creates a live version header.
    pub fn new(xmin: u32) -> Self {
        Self {
            xmin,
            xmax: AtomicU32::new(INVALID_XID),
        }
    }

    /// Transaction that created this version.
    #[inline]
    pub fn xmin(&self) -> u32 {
        self.xmin
    }

    /// Transaction that deleted this version, if any.
    #[inline]
    pub fn xmax(&self) -> Option<u32> {
        match self.xmax.load(Ordering::Acquire) {
            INVALID_XID => None,
            xid => Some(xid),
        }
    }

    /// Stamps `xmax` if the version is still live or was deleted by a
    /// transaction for which `replaceable` returns true.
    /// Returns the previous deleter on failure.
    pub fn mark_deleted(&self, xid: u32, replaceable: impl Fn(u32) -> bool) -> Result<(), u32> {
        let mut current = self.xmax.load(Ordering::Acquire);
        loop {
            if current != INVALID_XID && current != xid && !replaceable(current) {
                return Err(current);
            }
            match self
                .xmax
                .compare_exchange_weak(current, xid, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => return Ok(()),
                Err(actual) => current = actual,
            }
        }
    }

    /// Clears `xmax` when it still holds `xid`.
    pub fn clear_deleted(&self, xid: u32) {
        let _ = self
            .xmax
            .compare_exchange(xid, INVALID_XID, Ordering::AcqRel, Ordering::Acquire);
    }
}

/// A row version: column data plus its MVCC header.
#[derive(Debug)]
pub struct Row {
    id: RowId,
    data: Vec<Value>,
    version: RowVersion,
}

impl Row {
    /// Creates a row version visible to every reader.
    pub fn new(id: RowId, data: Vec<Value>) -> Self {
        Self::with_version(id, data, FROZEN_XID)
    }

    /// Creates a row version created by transaction `xmin`.
    pub fn with_version(id: RowId, data: Vec<Value>, xmin: u32) -> Self {
        Self {
            id,
            data,
            version: RowVersion::new(xmin),
        }
    }

    /// Returns the row id.
    #[inline]
    pub fn id(&self) -> RowId {
        self.id
    }

    /// Returns the column values.
    #[inline]
    pub fn data(&self) -> &[Value] {
        &self.data
    }

    /// Returns the MVCC header.
    #[inline]
    pub fn version(&self) -> &RowVersion {
        &self.version
    }
}
