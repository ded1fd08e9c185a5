//! Structural integrity check for an index tree.

use super::index::IndexAvl;
use super::node::NodeId;
use super::storage::TreeStorage;
use crate::store::PersistentStore;
use arbor_common::Result;
use std::cmp::Ordering;
use tracing::warn;

impl IndexAvl {
    /// Walks the store's tree and logs every integrity violation found.
    /// Returns the number of violations; the tree is not modified.
    pub fn check_index<S: PersistentStore>(&self, store: &S) -> Result<usize> {
        let tree = store.tree(self)?.read();
        Ok(self.check_tree(&*tree))
    }

    pub(crate) fn check_tree<T: TreeStorage>(&self, tree: &T) -> usize {
        let Some(root) = tree.root() else {
            return 0;
        };

        let mut violations = 0;
        match tree.parent(root) {
            Ok(None) => {}
            Ok(Some(p)) => {
                warn!(index = %self.name(), node = %root, parent = %p, "root has a parent");
                violations += 1;
            }
            Err(e) => {
                warn!(index = %self.name(), node = %root, error = %e, "root is unreadable");
                return violations + 1;
            }
        }

        let mut node = match tree.leftmost(root) {
            Ok((first, _)) => Some(first),
            Err(e) => {
                warn!(index = %self.name(), error = %e, "left spine is unreadable");
                return violations + 1;
            }
        };
        let mut count = 0usize;
        let mut prev: Option<NodeId> = None;

        while let Some(n) = node {
            count += 1;
            violations += self.check_node(tree, n);
            if let Some(p) = prev {
                violations += self.check_order(tree, p, n);
            }
            prev = Some(n);
            node = match tree.successor(n) {
                Ok(next) => next,
                Err(e) => {
                    warn!(index = %self.name(), node = %n, error = %e, "in-order walk stopped");
                    return violations + 1;
                }
            };
        }

        if count != tree.element_count() {
            warn!(
                index = %self.name(),
                walked = count,
                recorded = tree.element_count(),
                "element count mismatch"
            );
            violations += 1;
        }

        violations
    }

    /// Checks that `prev` sorts strictly before `next`. Equal keys only
    /// coexist in row id order.
    fn check_order<T: TreeStorage>(&self, tree: &T, prev: NodeId, next: NodeId) -> usize {
        let (Ok(a), Ok(b)) = (tree.row(prev), tree.row(next)) else {
            return 0;
        };
        if self.comparator().compare_for_insert_or_delete(a, b, true, 0) == Ordering::Less {
            return 0;
        }
        warn!(
            index = %self.name(),
            node = %next,
            prev = %prev,
            "key out of order"
        );
        1
    }

    /// Checks one node: it is not deleted, its balance is in range, and its
    /// children point back to it.
    fn check_node<T: TreeStorage>(&self, tree: &T, id: NodeId) -> usize {
        let Ok(node) = tree.get(id) else {
            warn!(index = %self.name(), node = %id, "dangling node");
            return 1;
        };
        let mut violations = 0;

        if node.is_deleted() {
            warn!(index = %self.name(), node = %id, "deleted node reachable from root");
            violations += 1;
        }
        if !(-1..=1).contains(&node.balance()) {
            warn!(
                index = %self.name(),
                node = %id,
                balance = node.balance(),
                "balance out of range"
            );
            violations += 1;
        }

        for child in [node.left(), node.right()] {
            let Some(c) = child else { continue };
            let Ok(child_node) = tree.get(c) else {
                warn!(index = %self.name(), node = %id, child = %c, "dangling child");
                violations += 1;
                continue;
            };

            if child_node.parent() != Some(id) {
                warn!(
                    index = %self.name(),
                    node = %id,
                    child = %c,
                    "child does not point back to its parent"
                );
                violations += 1;
            }
        }

        violations
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::avl::index::IndexDef;
    use crate::avl::storage::MemoryTree;
    use crate::row::Row;
    use arbor_common::{ColumnType, IndexConfig, Value};
    use std::sync::Arc;

    fn index() -> IndexAvl {
        let def = IndexDef::new("idx_chk", 1, vec![0], vec![ColumnType::BigInt]).with_unique(true);
        IndexAvl::new(def, 0, IndexConfig::default()).unwrap()
    }

    fn row(id: u64, key: i64) -> Arc<Row> {
        Arc::new(Row::new(id, vec![Value::BigInt(key)]))
    }

    #[test]
    fn test_valid_tree_has_no_violations() {
        let index = index();
        let mut tree = MemoryTree::default();
        let a = tree.allocate(row(1, 1));
        let b = tree.allocate(row(2, 2));
        tree.set_root(Some(b));
        tree.set_child(b, true, Some(a)).unwrap();
        tree.set_balance(b, -1).unwrap();
        tree.update_element_count(2);
        assert_eq!(index.check_tree(&tree), 0);
    }

    #[test]
    fn test_detects_out_of_order_child() {
        let index = index();
        let mut tree = MemoryTree::default();
        let a = tree.allocate(row(1, 5));
        let b = tree.allocate(row(2, 2));
        tree.set_root(Some(b));
        tree.set_child(b, true, Some(a)).unwrap();
        tree.set_balance(b, -1).unwrap();
        tree.update_element_count(2);
        assert_eq!(index.check_tree(&tree), 1);
    }

    #[test]
    fn test_detects_broken_parent_link_and_count() {
        let index = index();
        let mut tree = MemoryTree::default();
        let a = tree.allocate(row(1, 1));
        let b = tree.allocate(row(2, 2));
        let c = tree.allocate(row(3, 3));
        tree.set_root(Some(b));
        tree.set_child(b, true, Some(a)).unwrap();
        tree.set_link(b, false, Some(c)).unwrap();
        tree.update_element_count(4);

        // c has no parent link, and 3 nodes are reachable instead of 4.
        assert_eq!(index.check_tree(&tree), 2);
    }

    #[test]
    fn test_empty_tree() {
        assert_eq!(index().check_tree(&MemoryTree::default()), 0);
    }
}
