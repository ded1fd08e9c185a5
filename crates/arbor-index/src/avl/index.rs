//! AVL index: definition, insert, delete and rebalancing.
//!
//! The tree keeps parent pointers in its nodes. Rotations are written once,
//! parameterised by an `is_left` direction flag, instead of separate
//! left/right code paths. Balance factors are height(right) - height(left).

use super::comparator::IndexComparator;
use super::node::NodeId;
use super::storage::TreeStorage;
use crate::mvcc::{ReadMode, RowVisibility};
use crate::row::Row;
use crate::store::PersistentStore;
use arbor_common::{ArborError, ColumnType, IndexConfig, Result, Value};
use std::cmp::Ordering;
use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
use std::sync::Arc;
use tracing::debug;

/// Schema-level description of an index.
#[derive(Debug, Clone)]
pub struct IndexDef {
    name: String,
    persistence_id: u64,
    columns: Vec<usize>,
    types: Vec<ColumnType>,
    descending: Vec<bool>,
    nulls_last: Vec<bool>,
    primary_key: bool,
    unique: bool,
    constraint: Option<String>,
    forward: bool,
}

impl IndexDef {
    /// Creates an ascending, nulls-first, non-unique index definition.
    pub fn new(
        name: impl Into<String>,
        persistence_id: u64,
        columns: Vec<usize>,
        types: Vec<ColumnType>,
    ) -> Self {
        let n = columns.len();
        Self {
            name: name.into(),
            persistence_id,
            columns,
            types,
            descending: vec![false; n],
            nulls_last: vec![false; n],
            primary_key: false,
            unique: false,
            constraint: None,
            forward: false,
        }
    }

    pub fn with_unique(mut self, unique: bool) -> Self {
        self.unique = unique;
        self
    }

    /// Marks the index as a primary key index. Implies unique.
    pub fn with_primary_key(mut self) -> Self {
        self.primary_key = true;
        self.unique = true;
        self
    }

    pub fn with_descending(mut self, descending: Vec<bool>) -> Self {
        self.descending = descending;
        self
    }

    pub fn with_nulls_last(mut self, nulls_last: Vec<bool>) -> Self {
        self.nulls_last = nulls_last;
        self
    }

    /// Attaches the index to a constraint. Unique violations are then
    /// reported against the constraint name.
    pub fn with_constraint(mut self, name: impl Into<String>) -> Self {
        self.constraint = Some(name.into());
        self
    }

    /// Marks an auto-index for a foreign key that refers to a table defined
    /// after this one.
    pub fn with_forward(mut self) -> Self {
        self.forward = true;
        self
    }
}

/// An ordered, optionally unique index over table rows, kept as an AVL tree.
///
/// The index holds no tree: each [`PersistentStore`] keeps the root and nodes
/// for it, so stores can share one `IndexAvl`. Writers hold the tree's write
/// lock and then the store lock for the whole operation; readers hold the
/// tree's read lock while they traverse.
#[derive(Debug)]
pub struct IndexAvl {
    name: String,
    persistence_id: u64,
    comparator: IndexComparator,
    primary_key: bool,
    unique: bool,
    constraint: Option<String>,
    forward: bool,
    position: usize,
    is_simple: bool,
    pub(crate) default_col_map: Vec<usize>,
    pub(crate) null_data: Vec<Value>,
    /// Leftmost path length seen by the last `first_row`.
    pub(crate) depth: AtomicUsize,
    pub(crate) config: IndexConfig,
}

impl IndexAvl {
    /// Creates an index at slot `position` of its table's index list.
    pub fn new(def: IndexDef, position: usize, config: IndexConfig) -> Result<Self> {
        let comparator =
            IndexComparator::new(def.columns, def.types, def.descending, def.nulls_last)?;
        let n = comparator.column_count();
        let is_simple = comparator.is_simple_order() && n == 1;

        Ok(Self {
            name: def.name,
            persistence_id: def.persistence_id,
            comparator,
            primary_key: def.primary_key,
            unique: def.unique,
            constraint: def.constraint,
            forward: def.forward,
            position,
            is_simple,
            default_col_map: (0..n).collect(),
            null_data: vec![Value::Null; n],
            depth: AtomicUsize::new(0),
            config,
        })
    }

    // =========================================================================
    // Definition accessors
    // =========================================================================

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn persistence_id(&self) -> u64 {
        self.persistence_id
    }

    /// Slot of this index in its table; stores keep one tree per slot.
    #[inline]
    pub fn position(&self) -> usize {
        self.position
    }

    #[inline]
    pub fn comparator(&self) -> &IndexComparator {
        &self.comparator
    }

    /// Table column positions of the key.
    #[inline]
    pub fn columns(&self) -> &[usize] {
        self.comparator.columns()
    }

    #[inline]
    pub fn column_types(&self) -> &[ColumnType] {
        self.comparator.types()
    }

    #[inline]
    pub fn column_desc(&self) -> &[bool] {
        self.comparator.descending()
    }

    #[inline]
    pub fn column_count(&self) -> usize {
        self.comparator.column_count()
    }

    /// Identity map `0..column_count`, for search keys laid out in key order.
    #[inline]
    pub fn default_column_map(&self) -> &[usize] {
        &self.default_col_map
    }

    #[inline]
    pub fn is_unique(&self) -> bool {
        self.unique
    }

    #[inline]
    pub fn is_primary_key(&self) -> bool {
        self.primary_key
    }

    /// Does this index belong to a constraint?
    #[inline]
    pub fn is_constraint(&self) -> bool {
        self.constraint.is_some()
    }

    #[inline]
    pub fn constraint_name(&self) -> Option<&str> {
        self.constraint.as_deref()
    }

    #[inline]
    pub fn is_forward(&self) -> bool {
        self.forward
    }

    /// Single ascending, nulls-first key column.
    #[inline]
    pub fn is_simple(&self) -> bool {
        self.is_simple
    }

    #[inline]
    pub fn config(&self) -> &IndexConfig {
        &self.config
    }

    /// Position of this kind of index in a table's index list:
    /// primary key and unique constraints first, then foreign key
    /// constraints, user indexes, and forward foreign key indexes last.
    pub fn order_value(&self) -> u8 {
        if self.primary_key {
            return 0;
        }
        if self.is_constraint() {
            if self.forward {
                4
            } else if self.unique {
                0
            } else {
                1
            }
        } else {
            2
        }
    }

    // =========================================================================
    // Size
    // =========================================================================

    /// Number of nodes in the store's tree, visible or not.
    pub fn size<S: PersistentStore>(&self, store: &S) -> Result<usize> {
        let tree = store.tree(self)?.read();
        Ok(tree.element_count())
    }

    /// Returns true if the store's tree has no root.
    pub fn is_empty<S: PersistentStore>(&self, store: &S) -> Result<bool> {
        let tree = store.tree(self)?.read();
        Ok(tree.root().is_none())
    }

    /// Counts rows by walking the tree, keeping only rows readable by
    /// `visibility` when one is given.
    pub fn node_count<S: PersistentStore>(
        &self,
        visibility: Option<&dyn RowVisibility>,
        store: &S,
    ) -> Result<usize> {
        let tree = store.tree(self)?.read();
        let Some(root) = tree.root() else {
            return Ok(0);
        };

        let (first, _) = tree.leftmost(root)?;
        let mut node = Some(first);
        if let Some(vis) = visibility {
            if !vis.can_read(tree.row(first)?, ReadMode::Read) {
                node = self.next_visible(visibility, &*tree, first)?;
            }
        }

        let mut count = 0;
        while let Some(n) = node {
            count += 1;
            node = self.next_visible(visibility, &*tree, n)?;
        }
        Ok(count)
    }

    /// Rough row count: two to the power of the leftmost path length seen by
    /// the last [`first_row`](Self::first_row). The path is measured here
    /// only if no scan has recorded one yet.
    pub fn size_estimate<S: PersistentStore>(&self, store: &S) -> Result<usize> {
        let mut depth = self.depth.load(AtomicOrdering::Relaxed);
        if depth == 0 {
            let tree = store.tree(self)?.read();
            if let Some(root) = tree.root() {
                depth = tree.leftmost(root)?.1;
                self.depth.store(depth, AtomicOrdering::Relaxed);
            }
        }
        Ok(1usize << depth.min(usize::BITS as usize - 1))
    }

    /// Number of distinct keys among the rows readable by `visibility`.
    /// Rows with a NULL key column each count once.
    pub fn size_unique<S: PersistentStore>(
        &self,
        visibility: Option<&dyn RowVisibility>,
        store: &S,
    ) -> Result<usize> {
        let mut count = 0;
        let mut prev: Option<Arc<Row>> = None;
        for row in self.first_row(visibility, store)? {
            let distinct = match &prev {
                None => true,
                Some(p) => {
                    let data = row.data();
                    self.columns().iter().any(|&c| data.get(c).is_some_and(Value::is_null))
                        || self.comparator().compare_row_prefix(p.data(), data, self.column_count())
                            != Ordering::Equal
                }
            };
            if distinct {
                count += 1;
            }
            prev = Some(row);
        }
        Ok(count)
    }

    /// Height of the store's tree. An empty tree has height 0.
    pub fn height<S: PersistentStore>(&self, store: &S) -> Result<usize> {
        let tree = store.tree(self)?.read();
        subtree_height(&*tree, tree.root())
    }

    // =========================================================================
    // Insert
    // =========================================================================

    /// Inserts a row version into the store's tree.
    ///
    /// On a unique index an equal key is a conflict unless the row has a NULL
    /// key column. When `visibility` is multi-version and none of the equal
    /// versions still occupies the key (`ReadMode::Dup`), the insert falls
    /// back to the row-id tie-break instead of failing.
    pub fn insert<S: PersistentStore>(
        &self,
        visibility: Option<&dyn RowVisibility>,
        store: &S,
        row: Arc<Row>,
    ) -> Result<()> {
        let mut compare_row_id = !self.unique || self.comparator.has_nulls(row.data());

        let mut guard = store.tree(self)?.write();
        let _store_lock = store.lock();
        let tree = &mut *guard;

        let Some(mut n) = tree.root() else {
            let id = tree.allocate(row);
            tree.set_root(Some(id));
            tree.update_element_count(1);
            return Ok(());
        };

        let (parent, is_left) = loop {
            let current = Arc::clone(tree.row(n)?);
            let mut ord =
                self.comparator
                    .compare_for_insert_or_delete(&row, &current, compare_row_id, 0);

            // After the first match and check, all compares are by row id.
            if ord == Ordering::Equal && !compare_row_id {
                if let Some(vis) = visibility.filter(|v| v.is_multi_version()) {
                    if !self.is_equal_readable(vis, &*tree, n)? {
                        debug!(
                            index = %self.name,
                            row = row.id(),
                            existing = current.id(),
                            "equal key is not live, ordering by row id"
                        );
                        compare_row_id = true;
                        ord = self.comparator.compare_for_insert_or_delete(
                            &row,
                            &current,
                            true,
                            self.column_count(),
                        );
                    }
                }
            }

            if ord == Ordering::Equal {
                return Err(self.duplicate_error(visibility, &*tree, n)?);
            }

            let is_left = ord == Ordering::Less;
            match tree.child(n, is_left)? {
                Some(child) => n = child,
                None => break (n, is_left),
            }
        };

        let id = tree.allocate(row);
        tree.set_child(parent, is_left, Some(id))?;
        self.balance_after_insert(tree, parent, is_left)?;
        tree.update_element_count(1);

        if self.config.verify_after_write {
            self.check_tree(&*tree);
        }
        Ok(())
    }

    /// Builds the error for a unique conflict at `node`.
    fn duplicate_error<T: TreeStorage>(
        &self,
        visibility: Option<&dyn RowVisibility>,
        tree: &T,
        node: NodeId,
    ) -> Result<ArborError> {
        debug!(index = %self.name, node = %node, "unique key conflict");

        if self.config.report_pending_duplicates {
            if let Some(vis) = visibility {
                let readable =
                    self.any_equal_key(tree, node, |row| vis.can_read(row, ReadMode::Read))?;
                if !readable {
                    return Ok(ArborError::PendingDuplicate {
                        index: self.name.clone(),
                    });
                }
            }
        }

        Ok(ArborError::DuplicateKey {
            index: self.name.clone(),
            constraint: self.constraint.clone(),
        })
    }

    /// True if `node` or any version with the same key still occupies the
    /// key for `visibility`.
    pub(crate) fn is_equal_readable<T: TreeStorage>(
        &self,
        visibility: &dyn RowVisibility,
        tree: &T,
        node: NodeId,
    ) -> Result<bool> {
        self.any_equal_key(tree, node, |row| visibility.can_read(row, ReadMode::Dup))
    }

    /// Tests `pred` on `node` and on its neighbours with an equal key,
    /// walking backward and then forward.
    fn any_equal_key<T: TreeStorage>(
        &self,
        tree: &T,
        node: NodeId,
        pred: impl Fn(&Row) -> bool,
    ) -> Result<bool> {
        let row = tree.row(node)?;
        if pred(row) {
            return Ok(true);
        }
        let data = row.data();

        let mut c = tree.predecessor(node)?;
        while let Some(id) = c {
            let other = tree.row(id)?;
            if self.comparator.compare_row(data, other.data()) != Ordering::Equal {
                break;
            }
            if pred(other) {
                return Ok(true);
            }
            c = tree.predecessor(id)?;
        }

        let mut c = tree.successor(node)?;
        while let Some(id) = c {
            let other = tree.row(id)?;
            if self.comparator.compare_row(data, other.data()) != Ordering::Equal {
                break;
            }
            if pred(other) {
                return Ok(true);
            }
            c = tree.successor(id)?;
        }

        Ok(false)
    }

    /// Restores balance after a node was attached below `x` on the
    /// `is_left` side. Stops as soon as a subtree keeps its height.
    fn balance_after_insert<T: TreeStorage>(
        &self,
        tree: &mut T,
        mut x: NodeId,
        mut is_left: bool,
    ) -> Result<()> {
        loop {
            let sign: i8 = if is_left { 1 } else { -1 };

            match tree.balance(x)? * sign {
                1 => {
                    tree.set_balance(x, 0)?;
                    return Ok(());
                }
                0 => tree.set_balance(x, -sign)?,
                -1 => {
                    let l = tree.existing_child(x, is_left)?;

                    if tree.balance(l)? == -sign {
                        // Single rotation.
                        tree.replace(x, Some(l))?;
                        let inner = tree.child(l, !is_left)?;
                        tree.set_child(x, is_left, inner)?;
                        tree.set_child(l, !is_left, Some(x))?;
                        tree.set_balance(x, 0)?;
                        tree.set_balance(l, 0)?;
                    } else {
                        // Double rotation.
                        let r = tree.existing_child(l, !is_left)?;
                        tree.replace(x, Some(r))?;
                        let r_outer = tree.child(r, is_left)?;
                        tree.set_child(l, !is_left, r_outer)?;
                        tree.set_child(r, is_left, Some(l))?;
                        let r_inner = tree.child(r, !is_left)?;
                        tree.set_child(x, is_left, r_inner)?;
                        tree.set_child(r, !is_left, Some(x))?;

                        let rb = tree.balance(r)?;
                        tree.set_balance(x, if rb == -sign { sign } else { 0 })?;
                        tree.set_balance(l, if rb == sign { -sign } else { 0 })?;
                        tree.set_balance(r, 0)?;
                    }
                    return Ok(());
                }
                other => return Err(bad_balance(x, other)),
            }

            if tree.is_root(x)? {
                return Ok(());
            }
            is_left = tree.is_from_left(x)?;
            x = tree.parent(x)?.ok_or_else(|| {
                ArborError::InternalInconsistency(format!("node {} lost its parent", x))
            })?;
        }
    }

    // =========================================================================
    // Delete
    // =========================================================================

    /// Removes the node bound to `row` from the store's tree.
    /// Returns false if the row is not in this tree.
    pub fn delete<S: PersistentStore>(&self, store: &S, row: &Row) -> Result<bool> {
        let mut guard = store.tree(self)?.write();
        let _store_lock = store.lock();
        let tree = &mut *guard;

        let Some(node) = tree.node_of(row.id()) else {
            return Ok(false);
        };

        self.delete_node(tree, node)?;
        tree.update_element_count(-1);

        if self.config.verify_after_write {
            self.check_tree(&*tree);
        }
        Ok(true)
    }

    /// Unlinks `target`, releases it, and rebalances up to the root.
    fn delete_node<T: TreeStorage>(&self, tree: &mut T, target: NodeId) -> Result<()> {
        let mut x = target;
        let n: Option<NodeId>;

        if tree.left(x)?.is_none() {
            n = tree.right(x)?;
        } else if tree.right(x)?.is_none() {
            n = tree.left(x)?;
        } else {
            // Two children: move the in-order predecessor into the target's
            // place, then remove the target from the predecessor's old slot.
            let d = x;
            x = tree.rightmost(tree.existing_child(d, true)?)?;

            // x will be replaced with n later.
            n = tree.left(x)?;

            let xb = tree.balance(x)?;
            let db = tree.balance(d)?;
            tree.set_balance(x, db)?;
            tree.set_balance(d, xb)?;

            let xp = tree.parent(x)?;
            let dp = tree.parent(d)?;

            if dp.is_none() {
                tree.set_root(Some(x));
            }
            tree.set_parent(x, dp)?;
            if let Some(dp) = dp {
                let d_from_left = tree.left(dp)? == Some(d);
                tree.set_link(dp, d_from_left, Some(x))?;
            }

            let dr = tree.right(d)?;
            if xp == Some(d) {
                // x was d's left child.
                tree.set_parent(d, Some(x))?;
                tree.set_link(x, true, Some(d))?;
                tree.set_link(x, false, dr)?;
            } else {
                let xp = xp.ok_or_else(|| {
                    ArborError::InternalInconsistency(format!("predecessor {} has no parent", x))
                })?;
                tree.set_parent(d, Some(xp))?;
                tree.set_link(xp, false, Some(d))?;
                let dl = tree.left(d)?;
                tree.set_link(x, true, dl)?;
                tree.set_link(x, false, dr)?;
            }

            if let Some(r) = tree.right(x)? {
                tree.set_parent(r, Some(x))?;
            }
            if let Some(l) = tree.left(x)? {
                tree.set_parent(l, Some(x))?;
            }

            tree.set_child(d, true, n)?;
            tree.set_link(d, false, None)?;
            x = d;
        }

        let mut is_left = tree.is_from_left(x)?;
        tree.replace(x, n)?;
        let mut parent = tree.parent(x)?;
        tree.release(x);

        while let Some(p) = parent {
            let mut x = p;
            let sign: i8 = if is_left { 1 } else { -1 };

            match tree.balance(x)? * sign {
                -1 => tree.set_balance(x, 0)?,
                0 => {
                    tree.set_balance(x, sign)?;
                    return Ok(());
                }
                1 => {
                    let r = tree.existing_child(x, !is_left)?;
                    let b = tree.balance(r)?;

                    if b * sign >= 0 {
                        // Single rotation.
                        tree.replace(x, Some(r))?;
                        let inner = tree.child(r, is_left)?;
                        tree.set_child(x, !is_left, inner)?;
                        tree.set_child(r, is_left, Some(x))?;

                        if b == 0 {
                            tree.set_balance(x, sign)?;
                            tree.set_balance(r, -sign)?;
                            return Ok(());
                        }
                        tree.set_balance(x, 0)?;
                        tree.set_balance(r, 0)?;
                        x = r;
                    } else {
                        // Double rotation.
                        let l = tree.existing_child(r, is_left)?;
                        tree.replace(x, Some(l))?;
                        let lb = tree.balance(l)?;
                        let l_outer = tree.child(l, !is_left)?;
                        tree.set_child(r, is_left, l_outer)?;
                        tree.set_child(l, !is_left, Some(r))?;
                        let l_inner = tree.child(l, is_left)?;
                        tree.set_child(x, !is_left, l_inner)?;
                        tree.set_child(l, is_left, Some(x))?;

                        tree.set_balance(x, if lb == sign { -sign } else { 0 })?;
                        tree.set_balance(r, if lb == -sign { sign } else { 0 })?;
                        tree.set_balance(l, 0)?;
                        x = l;
                    }
                }
                other => return Err(bad_balance(x, other)),
            }

            is_left = tree.is_from_left(x)?;
            parent = tree.parent(x)?;
        }

        Ok(())
    }
}

fn bad_balance(node: NodeId, value: i8) -> ArborError {
    ArborError::InternalInconsistency(format!(
        "node {} has balance {} during rebalance",
        node, value
    ))
}

pub(crate) fn subtree_height<T: TreeStorage>(tree: &T, node: Option<NodeId>) -> Result<usize> {
    match node {
        None => Ok(0),
        Some(id) => {
            let l = subtree_height(tree, tree.left(id)?)?;
            let r = subtree_height(tree, tree.right(id)?)?;
            Ok(1 + l.max(r))
        }
    }
}
