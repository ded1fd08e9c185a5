//! Ordered secondary indexes for Arbor.
//!
//! This crate provides:
//! - AVL tree index over row versions, unique or non-unique
//! - Multi-column keys with per-column descending and nulls-last order
//! - Positioned search and forward/reverse iteration filtered by MVCC visibility
//! - Snapshot-isolation transaction manager over xmin/xmax row headers
//! - In-memory tree store shared by any number of index definitions
//! - A table layer that keeps all of a table's indexes in step

mod avl;
mod mvcc;
mod row;
mod store;
mod table;

pub use avl::{
    AvlNode, IndexAvl, IndexComparator, IndexDef, IndexRowIterator, MatchType, MemoryTree,
    NodeArena, NodeId, TreeStorage, DELETED_BALANCE,
};
pub use mvcc::{ReadMode, RowVisibility, TxnContext, TxnManager};
pub use row::{Row, RowId, RowVersion, FROZEN_XID, INVALID_XID};
pub use store::{MemoryStore, PersistentStore};
pub use table::Table;
