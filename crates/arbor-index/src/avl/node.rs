//! Arena-allocated AVL tree nodes.

use crate::row::Row;
use std::sync::Arc;

/// Balance value that marks a node as removed from its tree.
pub const DELETED_BALANCE: i8 = -2;

/// Handle to a node slot in a [`NodeArena`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub u32);

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A tree node bound to one row version.
///
/// `balance` is height(right) - height(left), within -1..=1 for linked
/// nodes. `parent` is a back reference only; children are owned by the
/// node until a rotation or delete re-links them.
#[derive(Debug, Clone)]
pub struct AvlNode {
    pub(crate) row: Arc<Row>,
    pub(crate) left: Option<NodeId>,
    pub(crate) right: Option<NodeId>,
    pub(crate) parent: Option<NodeId>,
    pub(crate) balance: i8,
}

impl AvlNode {
    /// Creates an unlinked node for `row`.
    pub fn new(row: Arc<Row>) -> Self {
        Self {
            row,
            left: None,
            right: None,
            parent: None,
            balance: 0,
        }
    }

    /// Returns the row version this node indexes.
    #[inline]
    pub fn row(&self) -> &Arc<Row> {
        &self.row
    }

    /// Returns the balance factor.
    #[inline]
    pub fn balance(&self) -> i8 {
        self.balance
    }

    #[inline]
    pub fn left(&self) -> Option<NodeId> {
        self.left
    }

    #[inline]
    pub fn right(&self) -> Option<NodeId> {
        self.right
    }

    #[inline]
    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    /// Returns true once the node has been unlinked by a delete.
    #[inline]
    pub fn is_deleted(&self) -> bool {
        self.balance == DELETED_BALANCE
    }

    /// Detaches the node from the tree and marks it deleted.
    pub(crate) fn mark_deleted(&mut self) {
        self.left = None;
        self.right = None;
        self.parent = None;
        self.balance = DELETED_BALANCE;
    }
}

/// Slot arena for tree nodes.
///
/// A released slot stays marked deleted until [`reclaim`](Self::reclaim)
/// moves it to the free list. Only then can an allocation hand it out again,
/// so a stale handle keeps resolving to a deleted node in the meantime.
#[derive(Debug, Default)]
pub struct NodeArena {
    slots: Vec<AvlNode>,
    retired: Vec<NodeId>,
    free: Vec<NodeId>,
}

impl NodeArena {
    /// Creates an arena with room for `capacity` nodes before reallocating.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: Vec::with_capacity(capacity),
            retired: Vec::new(),
            free: Vec::new(),
        }
    }

    /// Allocates a slot for `row` and returns its handle.
    pub fn allocate(&mut self, row: Arc<Row>) -> NodeId {
        if let Some(id) = self.free.pop() {
            self.slots[id.0 as usize] = AvlNode::new(row);
            return id;
        }
        let id = NodeId(self.slots.len() as u32);
        self.slots.push(AvlNode::new(row));
        id
    }

    /// Marks the slot deleted. The slot is not reused before the next
    /// [`reclaim`](Self::reclaim).
    pub fn release(&mut self, id: NodeId) {
        if let Some(node) = self.slots.get_mut(id.0 as usize) {
            if !node.is_deleted() {
                node.mark_deleted();
                self.retired.push(id);
            }
        }
    }

    /// Makes every released slot available to later allocations and returns
    /// how many were moved. The caller must know that no handle to a
    /// released slot is still in use.
    pub fn reclaim(&mut self) -> usize {
        let n = self.retired.len();
        self.free.append(&mut self.retired);
        n
    }

    #[inline]
    pub fn get(&self, id: NodeId) -> Option<&AvlNode> {
        self.slots.get(id.0 as usize)
    }

    #[inline]
    pub fn get_mut(&mut self, id: NodeId) -> Option<&mut AvlNode> {
        self.slots.get_mut(id.0 as usize)
    }

    /// Number of slots ever allocated, live or released.
    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    /// Number of released slots not yet reclaimed.
    pub fn retired_count(&self) -> usize {
        self.retired.len()
    }

    /// Number of reclaimed slots waiting for reuse.
    pub fn free_count(&self) -> usize {
        self.free.len()
    }
}
