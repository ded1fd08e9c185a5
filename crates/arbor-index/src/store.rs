//! Per-table storage of index trees.
//!
//! A store owns one tree per index of its table, addressed by the index's
//! position. Indexes reach their tree through [`PersistentStore::tree`]; the
//! per-tree `RwLock` is the index-level lock, and [`PersistentStore::lock`]
//! serializes writers across the whole store. Writers always take the tree
//! lock first and the store lock second.

use crate::avl::{IndexAvl, MemoryTree, TreeStorage};
use arbor_common::{ArborError, Result, StoreConfig};
use parking_lot::{Mutex, MutexGuard, RwLock};
use tracing::debug;

/// Holds the trees of a table's indexes.
pub trait PersistentStore: Send + Sync {
    type Tree: TreeStorage;

    /// Returns the tree (root accessor and nodes) kept for `index`.
    fn tree(&self, index: &IndexAvl) -> Result<&RwLock<Self::Tree>>;

    /// Takes the store-level write lock.
    fn lock(&self) -> MutexGuard<'_, ()>;
}

/// In-memory store: one [`MemoryTree`] per index.
#[derive(Debug)]
pub struct MemoryStore {
    trees: Vec<RwLock<MemoryTree>>,
    write_lock: Mutex<()>,
    config: StoreConfig,
}

impl MemoryStore {
    /// Creates a store with an empty tree for each of `index_count` indexes.
    pub fn new(index_count: usize, config: StoreConfig) -> Result<Self> {
        config.validate()?;
        let trees = (0..index_count)
            .map(|_| RwLock::new(MemoryTree::with_capacity(config.initial_node_capacity)))
            .collect();
        Ok(Self {
            trees,
            write_lock: Mutex::new(()),
            config,
        })
    }

    #[inline]
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Number of index trees in the store.
    #[inline]
    pub fn tree_count(&self) -> usize {
        self.trees.len()
    }

    /// Appends an empty tree for a new index and returns its position.
    pub fn add_tree(&mut self) -> usize {
        self.trees
            .push(RwLock::new(MemoryTree::with_capacity(self.config.initial_node_capacity)));
        let position = self.trees.len() - 1;
        debug!(position, "added index tree");
        position
    }

    /// Makes the node slots released by deletes reusable, in every tree.
    ///
    /// Iterators borrow the store, so holding it exclusively here means none
    /// of them can still be positioned on a released slot.
    pub fn reclaim_nodes(&mut self) -> usize {
        let reclaimed: usize = self.trees.iter_mut().map(|t| t.get_mut().reclaim()).sum();
        debug!(reclaimed, "reclaimed node slots");
        reclaimed
    }

    /// Drops the trees at `len` and beyond.
    pub fn truncate_trees(&mut self, len: usize) {
        self.trees.truncate(len);
    }
}

impl PersistentStore for MemoryStore {
    type Tree = MemoryTree;

    fn tree(&self, index: &IndexAvl) -> Result<&RwLock<MemoryTree>> {
        self.trees
            .get(index.position())
            .ok_or_else(|| ArborError::IndexNotFound(index.name().to_string()))
    }

    fn lock(&self) -> MutexGuard<'_, ()> {
        self.write_lock.lock()
    }
}
