//! Time-ordered operator tree
//!
//! A left-leaning red-black tree keyed by imaginary time, with nodes stored
//! in an index arena. There are no parent links: every root-to-node path is
//! found again by key descent.
//!
//! Every balanced operation flags the nodes whose subtree changed as
//! `modified`. The flagged set is always closed towards the root, so walks
//! that only follow flagged children reach every stale node and nothing else.

mod node;
mod pool;
mod traversal;

pub use node::{Node, NodeCache, NodeId};
pub use pool::{NodeArena, NodePool};
pub use traversal::{Direction, InOrder};

use crate::operator::TimePoint;
use std::cmp::Ordering;

/// Attachment record of a node glued in by plain BST insertion
///
/// `parent == None` means the node became the root of an empty tree.
#[derive(Debug, Clone, Copy)]
pub struct TrialLink {
    /// The trial node
    pub node: NodeId,
    /// Parent and side it hangs from
    pub parent: Option<(NodeId, Direction)>,
}

/// Arena-backed red-black tree of operators
#[derive(Debug)]
pub struct OpTree {
    arena: NodeArena,
    root: Option<NodeId>,
    /// Number of nodes linked by balanced insertion
    len: usize,
}

impl OpTree {
    /// Empty tree for nodes caching `n_blocks` blocks
    pub fn new(n_blocks: usize) -> Self {
        Self {
            arena: NodeArena::new(n_blocks),
            root: None,
            len: 0,
        }
    }

    /// Root node
    pub fn root(&self) -> Option<NodeId> {
        self.root
    }

    pub(crate) fn set_root(&mut self, root: Option<NodeId>) {
        self.root = root;
    }

    /// Node by id
    #[inline(always)]
    pub fn node(&self, id: NodeId) -> &Node {
        self.arena.get(id)
    }

    #[inline(always)]
    pub(crate) fn node_mut(&mut self, id: NodeId) -> &mut Node {
        self.arena.get_mut(id)
    }

    /// Backing arena
    pub fn arena(&self) -> &NodeArena {
        &self.arena
    }

    pub(crate) fn arena_mut(&mut self) -> &mut NodeArena {
        &mut self.arena
    }

    /// Number of nodes owned by the balanced tree (trial nodes excluded)
    pub fn len(&self) -> usize {
        self.len
    }

    /// True if no node is owned by the balanced tree
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Time-ordered walk over every linked node
    pub fn iter(&self) -> InOrder<'_> {
        InOrder::new(self, self.root)
    }

    /// Keys in time order
    pub fn keys(&self) -> Vec<TimePoint> {
        self.iter().map(|id| self.node(id).key).collect()
    }

    /// Node holding `key`
    pub fn find(&self, key: TimePoint) -> Option<NodeId> {
        let mut current = self.root;
        while let Some(id) = current {
            let node = self.node(id);
            current = match key.cmp(&node.key) {
                Ordering::Less => node.left,
                Ordering::Greater => node.right,
                Ordering::Equal => return Some(id),
            };
        }
        None
    }

    /// True if some linked node holds `key`
    pub fn contains(&self, key: TimePoint) -> bool {
        self.find(key).is_some()
    }

    /// Earliest node of the subtree at `id`
    pub fn subtree_min(&self, mut id: NodeId) -> NodeId {
        while let Some(left) = self.node(id).left {
            id = left;
        }
        id
    }

    /// Latest node of the subtree at `id`
    pub fn subtree_max(&self, mut id: NodeId) -> NodeId {
        while let Some(right) = self.node(id).right {
            id = right;
        }
        id
    }

    /// Earliest key of the whole tree
    pub fn min_key(&self) -> Option<TimePoint> {
        self.root.map(|r| self.node(self.subtree_min(r)).key)
    }

    /// Latest key of the whole tree
    pub fn max_key(&self) -> Option<TimePoint> {
        self.root.map(|r| self.node(self.subtree_max(r)).key)
    }

    /// Flag every node from the root down to `key`; returns the node found
    pub(crate) fn mark_path_to(&mut self, key: TimePoint) -> Option<NodeId> {
        let mut current = self.root;
        while let Some(id) = current {
            let node = self.node_mut(id);
            node.modified = true;
            current = match key.cmp(&node.key) {
                Ordering::Less => node.left,
                Ordering::Greater => node.right,
                Ordering::Equal => return Some(id),
            };
        }
        None
    }

    /// Clear `modified` on every flagged node reachable from the root
    pub(crate) fn clear_modified(&mut self) {
        let mut stack: Vec<NodeId> = self.root.into_iter().collect();
        while let Some(id) = stack.pop() {
            let node = self.node_mut(id);
            if !node.modified {
                continue;
            }
            node.modified = false;
            stack.extend(node.left);
            stack.extend(node.right);
        }
    }

    // ===== Balanced insertion =====

    /// Link the detached node `id` (key and op already set) with rebalancing
    ///
    /// The caller guarantees the key is not present.
    pub(crate) fn insert(&mut self, id: NodeId) {
        debug_assert!(!self.contains(self.node(id).key), "duplicate key");
        {
            let node = self.node_mut(id);
            node.left = None;
            node.right = None;
            node.red = true;
            node.size = 1;
            node.modified = true;
            node.delete_flag = false;
        }
        let root = self.insert_at(self.root, id);
        self.node_mut(root).red = false;
        self.root = Some(root);
        self.len += 1;
    }

    fn insert_at(&mut self, h: Option<NodeId>, x: NodeId) -> NodeId {
        let Some(h) = h else { return x };
        if self.node(x).key < self.node(h).key {
            let left = self.insert_at(self.node(h).left, x);
            self.node_mut(h).left = Some(left);
        } else {
            let right = self.insert_at(self.node(h).right, x);
            self.node_mut(h).right = Some(right);
        }
        self.node_mut(h).modified = true;
        self.fix_up(h)
    }

    // ===== Balanced deletion =====

    /// Unlink the node holding `key` with rebalancing and return it
    ///
    /// The node keeps its slot; the caller decides where it goes next.
    pub(crate) fn remove(&mut self, key: TimePoint) -> Option<NodeId> {
        if !self.contains(key) {
            return None;
        }
        let root = self.root?;
        if !self.is_red(self.node(root).left) && !self.is_red(self.node(root).right) {
            self.node_mut(root).red = true;
        }

        let mut removed = None;
        self.root = self.delete_at(root, key, &mut removed);
        if let Some(r) = self.root {
            self.node_mut(r).red = false;
        }
        self.len -= 1;

        let removed = removed?;
        let node = self.node_mut(removed);
        node.left = None;
        node.right = None;
        Some(removed)
    }

    fn delete_at(
        &mut self,
        h: NodeId,
        key: TimePoint,
        removed: &mut Option<NodeId>,
    ) -> Option<NodeId> {
        let mut h = h;
        if key < self.node(h).key {
            let left = self.node(h).left;
            if !self.is_red(left) && !self.is_red(left.and_then(|l| self.node(l).left)) {
                h = self.move_red_left(h);
            }
            let left = self.node(h).left;
            let new_left = left.and_then(|l| self.delete_at(l, key, removed));
            self.node_mut(h).left = new_left;
        } else {
            if self.is_red(self.node(h).left) {
                h = self.rotate_right(h);
            }
            if key == self.node(h).key && self.node(h).right.is_none() {
                *removed = Some(h);
                return None;
            }
            let right = self.node(h).right;
            if !self.is_red(right) && !self.is_red(right.and_then(|r| self.node(r).left)) {
                h = self.move_red_right(h);
            }
            if key == self.node(h).key {
                // splice the successor into h's place so node identities
                // stay attached to their keys
                let right = self.node(h).right?;
                let successor = self.subtree_min(right);
                let new_right = self.delete_min(right);
                let (left, red) = (self.node(h).left, self.node(h).red);
                let s = self.node_mut(successor);
                s.left = left;
                s.right = new_right;
                s.red = red;
                *removed = Some(h);
                h = successor;
            } else {
                let right = self.node(h).right;
                let new_right = right.and_then(|r| self.delete_at(r, key, removed));
                self.node_mut(h).right = new_right;
            }
        }
        self.node_mut(h).modified = true;
        Some(self.fix_up(h))
    }

    /// Unlink the earliest node of the subtree at `h`
    fn delete_min(&mut self, h: NodeId) -> Option<NodeId> {
        let mut h = h;
        if self.node(h).left.is_none() {
            return None;
        }
        let left = self.node(h).left;
        if !self.is_red(left) && !self.is_red(left.and_then(|l| self.node(l).left)) {
            h = self.move_red_left(h);
        }
        let left = self.node(h).left;
        let new_left = left.and_then(|l| self.delete_min(l));
        self.node_mut(h).left = new_left;
        self.node_mut(h).modified = true;
        Some(self.fix_up(h))
    }

    // ===== Rotations and colour flips =====

    #[inline]
    fn is_red(&self, id: Option<NodeId>) -> bool {
        id.map_or(false, |id| self.node(id).red)
    }

    fn update_size(&mut self, h: NodeId) {
        let node = self.node(h);
        let size = 1
            + node.left.map_or(0, |l| self.node(l).size)
            + node.right.map_or(0, |r| self.node(r).size);
        self.node_mut(h).size = size;
    }

    fn rotate_left(&mut self, h: NodeId) -> NodeId {
        debug_assert!(self.node(h).right.is_some(), "rotate_left of {} without right child", h);
        let Some(x) = self.node(h).right else {
            return h;
        };
        let x_left = self.node(x).left;
        let h_red = self.node(h).red;
        self.node_mut(h).right = x_left;
        self.node_mut(x).left = Some(h);
        self.node_mut(x).red = h_red;
        self.node_mut(h).red = true;
        self.update_size(h);
        self.update_size(x);
        self.node_mut(h).modified = true;
        self.node_mut(x).modified = true;
        x
    }

    fn rotate_right(&mut self, h: NodeId) -> NodeId {
        debug_assert!(self.node(h).left.is_some(), "rotate_right of {} without left child", h);
        let Some(x) = self.node(h).left else {
            return h;
        };
        let x_right = self.node(x).right;
        let h_red = self.node(h).red;
        self.node_mut(h).left = x_right;
        self.node_mut(x).right = Some(h);
        self.node_mut(x).red = h_red;
        self.node_mut(h).red = true;
        self.update_size(h);
        self.update_size(x);
        self.node_mut(h).modified = true;
        self.node_mut(x).modified = true;
        x
    }

    fn flip_colors(&mut self, h: NodeId) {
        let node = self.node_mut(h);
        node.red = !node.red;
        let (left, right) = (node.left, node.right);
        for child in [left, right].into_iter().flatten() {
            let c = self.node_mut(child);
            c.red = !c.red;
        }
    }

    fn move_red_left(&mut self, h: NodeId) -> NodeId {
        self.flip_colors(h);
        let right = self.node(h).right;
        if self.is_red(right.and_then(|r| self.node(r).left)) {
            if let Some(r) = right {
                let new_right = self.rotate_right(r);
                self.node_mut(h).right = Some(new_right);
            }
            let h = self.rotate_left(h);
            self.flip_colors(h);
            return h;
        }
        h
    }

    fn move_red_right(&mut self, h: NodeId) -> NodeId {
        self.flip_colors(h);
        let left = self.node(h).left;
        if self.is_red(left.and_then(|l| self.node(l).left)) {
            let h = self.rotate_right(h);
            self.flip_colors(h);
            return h;
        }
        h
    }

    fn fix_up(&mut self, h: NodeId) -> NodeId {
        let mut h = h;
        if self.is_red(self.node(h).right) && !self.is_red(self.node(h).left) {
            h = self.rotate_left(h);
        }
        let left = self.node(h).left;
        if self.is_red(left) && self.is_red(left.and_then(|l| self.node(l).left)) {
            h = self.rotate_right(h);
        }
        if self.is_red(self.node(h).left) && self.is_red(self.node(h).right) {
            self.flip_colors(h);
        }
        self.update_size(h);
        h
    }

    // ===== Invariant checks =====

    /// Check ordering, size fields and left-leaning red-black shape
    pub fn is_balanced(&self) -> bool {
        let Some(root) = self.root else {
            return self.len == 0;
        };
        if self.node(root).red || self.node(root).size != self.len {
            return false;
        }
        self.check_subtree(root, None, None).is_some()
    }

    /// Black height of a valid subtree, `None` on any violation
    fn check_subtree(
        &self,
        id: NodeId,
        lower: Option<TimePoint>,
        upper: Option<TimePoint>,
    ) -> Option<usize> {
        let node = self.node(id);
        if lower.map_or(false, |l| node.key <= l) || upper.map_or(false, |u| node.key >= u) {
            return None;
        }
        if self.is_red(node.right) {
            return None;
        }
        if node.red && self.is_red(node.left) {
            return None;
        }
        let size = 1
            + node.left.map_or(0, |l| self.node(l).size)
            + node.right.map_or(0, |r| self.node(r).size);
        if size != node.size {
            return None;
        }
        let left_height = match node.left {
            Some(l) => self.check_subtree(l, lower, Some(node.key))?,
            None => 0,
        };
        let right_height = match node.right {
            Some(r) => self.check_subtree(r, Some(node.key), upper)?,
            None => 0,
        };
        if left_height != right_height {
            return None;
        }
        Some(left_height + usize::from(!node.red))
    }

    /// Longest root-to-leaf path, in nodes
    pub fn height(&self) -> usize {
        fn depth(tree: &OpTree, id: Option<NodeId>) -> usize {
            id.map_or(0, |id| {
                let node = tree.node(id);
                1 + depth(tree, node.left).max(depth(tree, node.right))
            })
        }
        depth(self, self.root)
    }
}
