//! Tree storage: where an index keeps its root and nodes.
//!
//! An [`IndexAvl`](super::IndexAvl) holds no tree state. Each store gives it
//! a [`TreeStorage`] per index, so one index definition can drive several
//! independent trees.

use super::node::{AvlNode, NodeArena, NodeId};
use crate::row::{Row, RowId};
use arbor_common::{ArborError, Result};
use std::collections::HashMap;
use std::sync::Arc;

/// Root accessor and node access for one AVL tree.
///
/// The required methods are the storage primitives. The provided methods
/// build the direction-parameterised link operations used by rotations.
pub trait TreeStorage: Send + Sync {
    /// Returns the current root (the accessor).
    fn root(&self) -> Option<NodeId>;

    /// Replaces the root.
    fn set_root(&mut self, root: Option<NodeId>);

    fn node(&self, id: NodeId) -> Option<&AvlNode>;

    fn node_mut(&mut self, id: NodeId) -> Option<&mut AvlNode>;

    /// Allocates an unlinked node bound to `row`.
    fn allocate(&mut self, row: Arc<Row>) -> NodeId;

    /// Marks a node deleted and unbinds it from its row.
    fn release(&mut self, id: NodeId);

    /// Returns the node bound to a row, if the row is in this tree.
    fn node_of(&self, row: RowId) -> Option<NodeId>;

    fn element_count(&self) -> usize;

    fn update_element_count(&mut self, delta: isize);

    // =========================================================================
    // Provided link operations
    // =========================================================================

    /// Returns the node or an inconsistency error for a dangling handle.
    #[inline]
    fn get(&self, id: NodeId) -> Result<&AvlNode> {
        self.node(id).ok_or_else(|| dangling(id))
    }

    #[inline]
    fn get_mut(&mut self, id: NodeId) -> Result<&mut AvlNode> {
        self.node_mut(id).ok_or_else(|| dangling(id))
    }

    #[inline]
    fn row(&self, id: NodeId) -> Result<&Arc<Row>> {
        Ok(&self.get(id)?.row)
    }

    #[inline]
    fn left(&self, id: NodeId) -> Result<Option<NodeId>> {
        Ok(self.get(id)?.left)
    }

    #[inline]
    fn right(&self, id: NodeId) -> Result<Option<NodeId>> {
        Ok(self.get(id)?.right)
    }

    #[inline]
    fn parent(&self, id: NodeId) -> Result<Option<NodeId>> {
        Ok(self.get(id)?.parent)
    }

    #[inline]
    fn balance(&self, id: NodeId) -> Result<i8> {
        Ok(self.get(id)?.balance)
    }

    #[inline]
    fn set_balance(&mut self, id: NodeId, balance: i8) -> Result<()> {
        self.get_mut(id)?.balance = balance;
        Ok(())
    }

    #[inline]
    fn set_parent(&mut self, id: NodeId, parent: Option<NodeId>) -> Result<()> {
        self.get_mut(id)?.parent = parent;
        Ok(())
    }

    /// Returns the left child when `is_left`, else the right child.
    #[inline]
    fn child(&self, id: NodeId, is_left: bool) -> Result<Option<NodeId>> {
        let node = self.get(id)?;
        Ok(if is_left { node.left } else { node.right })
    }

    /// Like [`child`](Self::child) but the child must exist.
    fn existing_child(&self, id: NodeId, is_left: bool) -> Result<NodeId> {
        self.child(id, is_left)?.ok_or_else(|| {
            ArborError::InternalInconsistency(format!(
                "node {} has no {} child during rebalance",
                id,
                if is_left { "left" } else { "right" }
            ))
        })
    }

    /// Sets one child pointer without touching the child's parent.
    fn set_link(&mut self, id: NodeId, is_left: bool, child: Option<NodeId>) -> Result<()> {
        let node = self.get_mut(id)?;
        if is_left {
            node.left = child;
        } else {
            node.right = child;
        }
        Ok(())
    }

    /// Sets one child pointer and points the child back at `id`.
    fn set_child(&mut self, id: NodeId, is_left: bool, child: Option<NodeId>) -> Result<()> {
        self.set_link(id, is_left, child)?;
        if let Some(c) = child {
            self.set_parent(c, Some(id))?;
        }
        Ok(())
    }

    fn is_root(&self, id: NodeId) -> Result<bool> {
        Ok(self.parent(id)?.is_none())
    }

    /// True if the node hangs on its parent's left. The root counts as left.
    fn is_from_left(&self, id: NodeId) -> Result<bool> {
        match self.parent(id)? {
            None => Ok(true),
            Some(p) => Ok(self.left(p)? == Some(id)),
        }
    }

    /// Puts `replacement` where `id` hangs: in the parent's slot, or as the
    /// new root.
    fn replace(&mut self, id: NodeId, replacement: Option<NodeId>) -> Result<()> {
        match self.parent(id)? {
            None => {
                if let Some(r) = replacement {
                    self.set_parent(r, None)?;
                }
                self.set_root(replacement);
            }
            Some(p) => {
                let from_left = self.left(p)? == Some(id);
                self.set_child(p, from_left, replacement)?;
            }
        }
        Ok(())
    }

    /// Leftmost node of the subtree at `id`, with the number of steps taken.
    fn leftmost(&self, id: NodeId) -> Result<(NodeId, usize)> {
        let mut x = id;
        let mut depth = 1;
        while let Some(l) = self.left(x)? {
            x = l;
            depth += 1;
        }
        Ok((x, depth))
    }

    /// Rightmost node of the subtree at `id`.
    fn rightmost(&self, id: NodeId) -> Result<NodeId> {
        let mut x = id;
        while let Some(r) = self.right(x)? {
            x = r;
        }
        Ok(x)
    }

    /// In-order successor.
    fn successor(&self, id: NodeId) -> Result<Option<NodeId>> {
        if let Some(r) = self.right(id)? {
            return Ok(Some(self.leftmost(r)?.0));
        }
        let mut child = id;
        let mut x = self.parent(id)?;
        while let Some(p) = x {
            if self.right(p)? != Some(child) {
                break;
            }
            child = p;
            x = self.parent(p)?;
        }
        Ok(x)
    }

    /// In-order predecessor.
    fn predecessor(&self, id: NodeId) -> Result<Option<NodeId>> {
        if let Some(l) = self.left(id)? {
            return Ok(Some(self.rightmost(l)?));
        }
        let mut child = id;
        let mut x = self.parent(id)?;
        while let Some(p) = x {
            if self.left(p)? != Some(child) {
                break;
            }
            child = p;
            x = self.parent(p)?;
        }
        Ok(x)
    }
}

fn dangling(id: NodeId) -> ArborError {
    ArborError::InternalInconsistency(format!("dangling node handle {}", id))
}

/// In-memory tree: an arena of nodes plus the row-to-node binding.
#[derive(Debug, Default)]
pub struct MemoryTree {
    arena: NodeArena,
    root: Option<NodeId>,
    row_nodes: HashMap<RowId, NodeId>,
    element_count: usize,
}

impl MemoryTree {
    /// Creates an empty tree with `capacity` preallocated node slots.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            arena: NodeArena::with_capacity(capacity),
            root: None,
            row_nodes: HashMap::with_capacity(capacity),
            element_count: 0,
        }
    }

    /// Returns the underlying arena.
    pub fn arena(&self) -> &NodeArena {
        &self.arena
    }

    /// Makes released node slots reusable. See
    /// [`MemoryStore::reclaim_nodes`](crate::MemoryStore::reclaim_nodes).
    pub fn reclaim(&mut self) -> usize {
        self.arena.reclaim()
    }
}

impl TreeStorage for MemoryTree {
    #[inline]
    fn root(&self) -> Option<NodeId> {
        self.root
    }

    #[inline]
    fn set_root(&mut self, root: Option<NodeId>) {
        self.root = root;
    }

    #[inline]
    fn node(&self, id: NodeId) -> Option<&AvlNode> {
        self.arena.get(id)
    }

    #[inline]
    fn node_mut(&mut self, id: NodeId) -> Option<&mut AvlNode> {
        self.arena.get_mut(id)
    }

    fn allocate(&mut self, row: Arc<Row>) -> NodeId {
        let row_id = row.id();
        let id = self.arena.allocate(row);
        self.row_nodes.insert(row_id, id);
        id
    }

    fn release(&mut self, id: NodeId) {
        if let Some(node) = self.arena.get(id) {
            let row_id = node.row.id();
            if self.row_nodes.get(&row_id) == Some(&id) {
                self.row_nodes.remove(&row_id);
            }
        }
        self.arena.release(id);
    }

    #[inline]
    fn node_of(&self, row: RowId) -> Option<NodeId> {
        self.row_nodes.get(&row).copied()
    }

    #[inline]
    fn element_count(&self) -> usize {
        self.element_count
    }

    fn update_element_count(&mut self, delta: isize) {
        self.element_count = self.element_count.saturating_add_signed(delta);
    }
}
