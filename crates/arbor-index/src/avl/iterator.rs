//! Cursor over the rows of one index tree.

use super::index::IndexAvl;
use super::node::NodeId;
use super::storage::TreeStorage;
use crate::mvcc::RowVisibility;
use crate::row::{Row, RowId};
use arbor_common::Result;
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::warn;

/// Iterator over index rows, forward or reversed.
///
/// Each step takes the tree's read lock, reads the current row and moves to
/// the next row readable by the iterator's visibility filter. The lock is not
/// held between steps, so writers may change the tree in between. If the
/// node the iterator is positioned on is deleted meanwhile, the iterator
/// ends. Deleted slots are not reused while the iterator borrows the store.
pub struct IndexRowIterator<'a, T: TreeStorage> {
    cursor: Option<(&'a IndexAvl, &'a RwLock<T>)>,
    visibility: Option<&'a dyn RowVisibility>,
    next_node: Option<NodeId>,
    last_row: Option<Arc<Row>>,
    single: bool,
    reversed: bool,
}

impl<'a, T: TreeStorage> IndexRowIterator<'a, T> {
    pub(crate) fn new(
        index: &'a IndexAvl,
        tree: &'a RwLock<T>,
        visibility: Option<&'a dyn RowVisibility>,
        node: Option<NodeId>,
        single: bool,
        reversed: bool,
    ) -> Self {
        Self {
            cursor: Some((index, tree)),
            visibility,
            next_node: node,
            last_row: None,
            single,
            reversed,
        }
    }

    /// An iterator that yields nothing.
    pub fn empty() -> Self {
        Self {
            cursor: None,
            visibility: None,
            next_node: None,
            last_row: None,
            single: false,
            reversed: false,
        }
    }

    /// Limits the iterator to the row it is positioned on.
    pub fn single(mut self) -> Self {
        self.single = true;
        self
    }

    #[inline]
    pub fn has_next(&self) -> bool {
        self.next_node.is_some()
    }

    #[inline]
    pub fn is_reversed(&self) -> bool {
        self.reversed
    }

    /// Returns the row the iterator will yield next and advances past it.
    pub fn next_row(&mut self) -> Result<Option<Arc<Row>>> {
        let (Some(node), Some((index, lock))) = (self.next_node, self.cursor) else {
            return Ok(None);
        };

        let tree = lock.read();
        let current = tree.get(node)?;
        if current.is_deleted() {
            self.next_node = None;
            return Ok(None);
        }
        let row = Arc::clone(current.row());

        self.next_node = if self.single {
            None
        } else if self.reversed {
            index.prev_visible(self.visibility, &*tree, node)?
        } else {
            index.next_visible(self.visibility, &*tree, node)?
        };

        self.last_row = Some(Arc::clone(&row));
        Ok(Some(row))
    }

    /// Id of the row the iterator will yield next.
    pub fn row_id(&self) -> Option<RowId> {
        let (node, (_, lock)) = (self.next_node?, self.cursor?);
        let tree = lock.read();
        tree.node(node)
            .filter(|n| !n.is_deleted())
            .map(|n| n.row().id())
    }

    /// The row most recently returned.
    pub fn current_row(&self) -> Option<&Arc<Row>> {
        self.last_row.as_ref()
    }

    /// Ends the iteration.
    pub fn release(&mut self) {
        self.next_node = None;
    }
}

impl<T: TreeStorage> Iterator for IndexRowIterator<'_, T> {
    type Item = Arc<Row>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.next_row() {
            Ok(row) => row,
            Err(e) => {
                let index = self.cursor.map(|(index, _)| index.name()).unwrap_or("");
                warn!(index = %index, error = %e, "index iteration stopped");
                self.next_node = None;
                None
            }
        }
    }
}

impl<T: TreeStorage> std::fmt::Debug for IndexRowIterator<'_, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexRowIterator")
            .field("index", &self.cursor.map(|(index, _)| index.name()))
            .field("next_node", &self.next_node)
            .field("single", &self.single)
            .field("reversed", &self.reversed)
            .finish()
    }
}
