//! AVL tree index with MVCC-aware traversal.
//!
//! ```text
//!                 IndexAvl (definition + comparator)
//!                    |
//!        PersistentStore::tree(index)  ->  RwLock<TreeStorage>
//!                                              |
//!                                   root accessor + node arena
//! ```
//!
//! Nodes are addressed by [`NodeId`] handles into the store's arena and
//! carry parent links, so iteration needs no stack. A node's balance is
//! height(right) - height(left); a released node carries
//! [`DELETED_BALANCE`].
//!
//! Ordering: key columns in index order, each compared by its column type
//! with the descending and nulls-last flags applied. Non-unique indexes, and
//! unique indexes for rows with a NULL key column, break ties by row id.

pub mod check;
pub mod comparator;
pub mod index;
pub mod iterator;
pub mod node;
pub mod search;
pub mod storage;

pub use comparator::IndexComparator;
pub use index::{IndexAvl, IndexDef};
pub use iterator::IndexRowIterator;
pub use node::{AvlNode, NodeArena, NodeId, DELETED_BALANCE};
pub use search::MatchType;
pub use storage::{MemoryTree, TreeStorage};
