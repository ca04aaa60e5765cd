//! Tree walks
//!
//! In-order traversal yields the operators in physical time order. The walk
//! keeps an explicit stack of pending ancestors, O(height) ids.

use super::{NodeId, OpTree};

/// Which child link a node hangs from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Earlier-time child
    Left,

    /// Later-time child
    Right,
}

/// In-order (time-ordered) iterator over node ids
#[derive(Debug)]
pub struct InOrder<'a> {
    tree: &'a OpTree,
    /// Ancestors whose left subtree is being visited
    path_stack: Vec<NodeId>,
    current: Option<NodeId>,
}

impl<'a> InOrder<'a> {
    /// Walk the subtree rooted at `start`
    pub fn new(tree: &'a OpTree, start: Option<NodeId>) -> Self {
        Self {
            tree,
            path_stack: Vec::new(),
            current: start,
        }
    }

    /// Number of pending ancestors
    pub fn depth(&self) -> usize {
        self.path_stack.len()
    }
}

impl Iterator for InOrder<'_> {
    type Item = NodeId;

    fn next(&mut self) -> Option<NodeId> {
        while let Some(id) = self.current {
            self.path_stack.push(id);
            self.current = self.tree.node(id).left();
        }
        let id = self.path_stack.pop()?;
        self.current = self.tree.node(id).right();
        Some(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operator::{OpDesc, TimePoint};

    #[test]
    fn test_in_order_is_time_order() {
        let mut tree = OpTree::new(1);
        for tau in [0.7, 0.2, 0.9, 0.1, 0.5] {
            let id = tree.arena_mut().alloc();
            tree.node_mut(id).reset(TimePoint::new(tau), OpDesc::creation(0));
            tree.insert(id);
        }

        let keys: Vec<f64> = InOrder::new(&tree, tree.root())
            .map(|id| tree.node(id).key().value())
            .collect();
        assert_eq!(keys, vec![0.1, 0.2, 0.5, 0.7, 0.9]);
    }

    #[test]
    fn test_empty_walk() {
        let tree = OpTree::new(1);
        assert_eq!(InOrder::new(&tree, None).count(), 0);
    }
}
