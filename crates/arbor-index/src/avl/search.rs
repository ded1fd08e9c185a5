//! Positioned search over an AVL index.
//!
//! A search descends from the root to the first node that satisfies the
//! match condition, then, when a visibility filter is given, walks forward
//! (or backward for reversed searches) to the first version it can read.

use super::index::IndexAvl;
use super::iterator::IndexRowIterator;
use super::node::NodeId;
use super::storage::TreeStorage;
use crate::mvcc::{ReadMode, RowVisibility};
use crate::store::PersistentStore;
use arbor_common::{ArborError, Result, Value};
use std::cmp::Ordering;
use std::sync::atomic::Ordering as AtomicOrdering;

/// How a search key selects the first node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MatchType {
    /// First node whose key equals the search key.
    Equal,
    /// First node strictly after the search key.
    Greater,
    /// First node at or after the search key.
    GreaterEqual,
    /// First node whose leading key column is not NULL.
    Not,
    /// First node whose key is NULL; the search key is all NULLs.
    IsNull,
    /// Last node of the index.
    Max,
}

impl MatchType {
    /// Does the match stop at the first key that differs from the search key?
    #[inline]
    fn is_exact(self) -> bool {
        matches!(self, MatchType::Equal | MatchType::IsNull)
    }
}

impl IndexAvl {
    /// Iterator over all rows readable by `visibility`, in index order.
    pub fn first_row<'a, S: PersistentStore>(
        &'a self,
        visibility: Option<&'a dyn RowVisibility>,
        store: &'a S,
    ) -> Result<IndexRowIterator<'a, S::Tree>> {
        let lock = store.tree(self)?;
        let node = {
            let tree = lock.read();
            match tree.root() {
                None => None,
                Some(root) => {
                    let (first, depth) = tree.leftmost(root)?;
                    self.depth.store(depth, AtomicOrdering::Relaxed);
                    self.skip_invisible(visibility, &*tree, Some(first), ReadMode::Read, false)?
                }
            }
        };
        Ok(IndexRowIterator::new(self, lock, visibility, node, false, false))
    }

    /// Iterator over all rows readable by `visibility`, in reverse index order.
    pub fn last_row<'a, S: PersistentStore>(
        &'a self,
        visibility: Option<&'a dyn RowVisibility>,
        store: &'a S,
    ) -> Result<IndexRowIterator<'a, S::Tree>> {
        let lock = store.tree(self)?;
        let node = {
            let tree = lock.read();
            match tree.root() {
                None => None,
                Some(root) => {
                    let last = tree.rightmost(root)?;
                    self.skip_invisible(visibility, &*tree, Some(last), ReadMode::Read, true)?
                }
            }
        };
        Ok(IndexRowIterator::new(self, lock, visibility, node, false, true))
    }

    /// Positions on the first row matching the first `match_count` values of
    /// `rowdata`, a search key laid out in key order.
    ///
    /// A reversed `Equal` search lands on the last equal key and iterates
    /// backward. `MatchType::Max` is the same as [`last_row`](Self::last_row).
    pub fn find_first_row<'a, S: PersistentStore>(
        &'a self,
        visibility: Option<&'a dyn RowVisibility>,
        store: &'a S,
        rowdata: &[Value],
        match_count: usize,
        match_type: MatchType,
        reversed: bool,
    ) -> Result<IndexRowIterator<'a, S::Tree>> {
        if match_type == MatchType::Max {
            return self.last_row(visibility, store);
        }

        let lock = store.tree(self)?;
        let node = {
            let tree = lock.read();
            self.find_node(
                visibility,
                &*tree,
                rowdata,
                &self.default_col_map,
                match_count,
                match_type,
                ReadMode::Read,
                reversed,
            )?
        };
        Ok(IndexRowIterator::new(self, lock, visibility, node, false, reversed))
    }

    /// Positions on the first row whose key equals the key columns of
    /// `row_data`, a full row of this index's table.
    pub fn find_first_row_for_row<'a, S: PersistentStore>(
        &'a self,
        visibility: Option<&'a dyn RowVisibility>,
        store: &'a S,
        row_data: &[Value],
    ) -> Result<IndexRowIterator<'a, S::Tree>> {
        let lock = store.tree(self)?;
        let node = {
            let tree = lock.read();
            self.find_node(
                visibility,
                &*tree,
                row_data,
                self.columns(),
                self.column_count(),
                MatchType::Equal,
                ReadMode::Read,
                false,
            )?
        };
        Ok(IndexRowIterator::new(self, lock, visibility, node, false, false))
    }

    /// Positions on the first row whose key equals the values of `rowdata`
    /// picked by `row_col_map`, typically a row of another table.
    pub fn find_first_row_mapped<'a, S: PersistentStore>(
        &'a self,
        visibility: Option<&'a dyn RowVisibility>,
        store: &'a S,
        rowdata: &[Value],
        row_col_map: &[usize],
    ) -> Result<IndexRowIterator<'a, S::Tree>> {
        let lock = store.tree(self)?;
        let node = {
            let tree = lock.read();
            self.find_node(
                visibility,
                &*tree,
                rowdata,
                row_col_map,
                row_col_map.len(),
                MatchType::Equal,
                ReadMode::Read,
                false,
            )?
        };
        Ok(IndexRowIterator::new(self, lock, visibility, node, false, false))
    }

    /// Positions on the first row whose leading key column is not NULL.
    pub fn find_first_row_not_null<'a, S: PersistentStore>(
        &'a self,
        visibility: Option<&'a dyn RowVisibility>,
        store: &'a S,
    ) -> Result<IndexRowIterator<'a, S::Tree>> {
        let lock = store.tree(self)?;
        let node = {
            let tree = lock.read();
            self.find_node(
                visibility,
                &*tree,
                &self.null_data,
                &self.default_col_map,
                1,
                MatchType::Not,
                ReadMode::Read,
                false,
            )?
        };
        Ok(IndexRowIterator::new(self, lock, visibility, node, false, false))
    }

    /// Single-column search on the leading key column.
    pub fn find_first_value<'a, S: PersistentStore>(
        &'a self,
        visibility: Option<&'a dyn RowVisibility>,
        store: &'a S,
        value: &Value,
        match_type: MatchType,
    ) -> Result<IndexRowIterator<'a, S::Tree>> {
        if match_type == MatchType::Max {
            return self.last_row(visibility, store);
        }

        let lock = store.tree(self)?;
        let node = {
            let tree = lock.read();
            self.find_node_value(visibility, &*tree, value, match_type, ReadMode::Read)?
        };
        Ok(IndexRowIterator::new(self, lock, visibility, node, false, false))
    }

    /// Is there a committed parent row for a referencing row?
    ///
    /// `rowdata` is the child row and `row_col_map` picks its referencing
    /// columns, in this index's key order.
    pub fn exists_parent<S: PersistentStore>(
        &self,
        visibility: Option<&dyn RowVisibility>,
        store: &S,
        rowdata: &[Value],
        row_col_map: &[usize],
    ) -> Result<bool> {
        let tree = store.tree(self)?.read();
        let node = self.find_node(
            visibility,
            &*tree,
            rowdata,
            row_col_map,
            row_col_map.len(),
            MatchType::Equal,
            ReadMode::Ref,
            false,
        )?;
        Ok(node.is_some())
    }

    // =========================================================================
    // Tree search
    // =========================================================================

    /// General search. Compares `rowdata` through `row_col_map` on the first
    /// `field_count` key columns.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn find_node<T: TreeStorage>(
        &self,
        visibility: Option<&dyn RowVisibility>,
        tree: &T,
        rowdata: &[Value],
        row_col_map: &[usize],
        field_count: usize,
        match_type: MatchType,
        mode: ReadMode,
        reversed: bool,
    ) -> Result<Option<NodeId>> {
        let found = self.descend(tree, match_type, reversed, |node| {
            self.comparator()
                .compare_search(rowdata, row_col_map, field_count, node)
        })?;

        let Some(vis) = visibility else {
            return Ok(found);
        };
        self.first_readable(vis, tree, found, match_type, mode, reversed, |node| {
            field_count == 0
                || self
                    .comparator()
                    .compare_row_non_unique(node, rowdata, row_col_map, field_count)
                    == Ordering::Equal
        })
    }

    /// Search on the leading key column only, comparing raw values.
    pub(crate) fn find_node_value<T: TreeStorage>(
        &self,
        visibility: Option<&dyn RowVisibility>,
        tree: &T,
        value: &Value,
        match_type: MatchType,
        mode: ReadMode,
    ) -> Result<Option<NodeId>> {
        let comparator = self.comparator();
        let found = self.descend(tree, match_type, false, |node| {
            comparator.compare_value(0, value, node)
        })?;

        let Some(vis) = visibility else {
            return Ok(found);
        };
        self.first_readable(vis, tree, found, match_type, mode, false, |node| {
            comparator.compare_value(0, value, node) == Ordering::Equal
        })
    }

    /// Structural descent. `cmp` orders the search key against a node row.
    fn descend<T: TreeStorage>(
        &self,
        tree: &T,
        match_type: MatchType,
        reversed: bool,
        cmp: impl Fn(&[Value]) -> Ordering,
    ) -> Result<Option<NodeId>> {
        let mut x = tree.root();
        let mut result = None;

        // With NULLs sorted last the non-null keys start at the leftmost node.
        if match_type == MatchType::Not && self.comparator().nulls_last()[0] {
            let Some(root) = x else {
                return Ok(None);
            };
            let (first, _) = tree.leftmost(root)?;
            return Ok(self.leading_not_null(tree, first)?.then_some(first));
        }

        while let Some(n) = x {
            let i = cmp(tree.row(n)?.data());

            let go_left = match match_type {
                MatchType::Equal | MatchType::IsNull => {
                    if i == Ordering::Equal {
                        result = Some(n);
                        !reversed
                    } else {
                        i == Ordering::Less
                    }
                }
                MatchType::Greater | MatchType::Not => {
                    if i != Ordering::Less {
                        false
                    } else {
                        result = Some(n);
                        true
                    }
                }
                MatchType::GreaterEqual => {
                    if i == Ordering::Greater {
                        false
                    } else {
                        result = Some(n);
                        true
                    }
                }
                MatchType::Max => {
                    return Err(ArborError::InternalInconsistency(
                        "MAX is not a node search".to_string(),
                    ));
                }
            };

            x = tree.child(n, go_left)?;
        }

        Ok(result)
    }

    /// Walks from `found` to the first version readable under `mode`.
    /// Exact matches give up once the key stops matching; a `Not` match gives
    /// up when it reaches the NULL keys.
    #[allow(clippy::too_many_arguments)]
    fn first_readable<T: TreeStorage>(
        &self,
        visibility: &dyn RowVisibility,
        tree: &T,
        found: Option<NodeId>,
        match_type: MatchType,
        mode: ReadMode,
        reversed: bool,
        still_matches: impl Fn(&[Value]) -> bool,
    ) -> Result<Option<NodeId>> {
        let mut x = found;

        while let Some(n) = x {
            if visibility.can_read(tree.row(n)?, mode) {
                return Ok(Some(n));
            }

            x = if reversed {
                tree.predecessor(n)?
            } else {
                tree.successor(n)?
            };

            if let Some(next) = x {
                let keep = if match_type.is_exact() {
                    still_matches(tree.row(next)?.data())
                } else if match_type == MatchType::Not {
                    self.leading_not_null(tree, next)?
                } else {
                    true
                };
                if !keep {
                    return Ok(None);
                }
            }
        }

        Ok(None)
    }

    fn leading_not_null<T: TreeStorage>(&self, tree: &T, node: NodeId) -> Result<bool> {
        let pos = self.columns()[0];
        Ok(tree
            .row(node)?
            .data()
            .get(pos)
            .is_some_and(|v| !v.is_null()))
    }

    /// Skips versions `visibility` cannot read, starting at `node`.
    pub(crate) fn skip_invisible<T: TreeStorage>(
        &self,
        visibility: Option<&dyn RowVisibility>,
        tree: &T,
        node: Option<NodeId>,
        mode: ReadMode,
        reversed: bool,
    ) -> Result<Option<NodeId>> {
        let Some(vis) = visibility else {
            return Ok(node);
        };
        let mut x = node;
        while let Some(n) = x {
            if vis.can_read(tree.row(n)?, mode) {
                break;
            }
            x = if reversed {
                tree.predecessor(n)?
            } else {
                tree.successor(n)?
            };
        }
        Ok(x)
    }

    /// Next readable node after `node` in index order.
    pub(crate) fn next_visible<T: TreeStorage>(
        &self,
        visibility: Option<&dyn RowVisibility>,
        tree: &T,
        node: NodeId,
    ) -> Result<Option<NodeId>> {
        let next = tree.successor(node)?;
        self.skip_invisible(visibility, tree, next, ReadMode::Read, false)
    }

    /// Previous readable node before `node` in index order.
    pub(crate) fn prev_visible<T: TreeStorage>(
        &self,
        visibility: Option<&dyn RowVisibility>,
        tree: &T,
        node: NodeId,
    ) -> Result<Option<NodeId>> {
        let prev = tree.predecessor(node)?;
        self.skip_invisible(visibility, tree, prev, ReadMode::Read, true)
    }
}
