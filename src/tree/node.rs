//! Tree nodes and their per-block cache
//!
//! Nodes are addressed by `NodeId` into an arena; links are indices, never
//! references, so ownership of a node moves between the live tree and the
//! pools simply by relinking.

use crate::hamiltonian::DenseMatrix;
use crate::operator::{OpDesc, TimePoint};
use bitvec::prelude::*;
use std::fmt;

/// Index of a node in the arena
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub(crate) u32);

impl NodeId {
    /// Position in the arena
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Cached result of applying a subtree to every block
///
/// Only meaningful while the owning node is not `modified`.
#[derive(Debug, Clone)]
pub struct NodeCache {
    /// Gap between this node and the latest operator of the left subtree
    pub(crate) dtau_l: f64,
    /// Gap between this node and the earliest operator of the right subtree
    pub(crate) dtau_r: f64,
    /// Output block per input block, `None` = vanished
    pub(crate) block_table: Vec<Option<usize>>,
    /// Partial products, valid where `matrix_valid` is set
    pub(crate) matrices: Vec<Option<DenseMatrix>>,
    /// `-ln` of the bound on each partial product
    pub(crate) matrix_lnorms: Vec<f64>,
    pub(crate) matrix_valid: BitVec,
}

impl NodeCache {
    pub(crate) fn new(n_blocks: usize) -> Self {
        Self {
            dtau_l: 0.0,
            dtau_r: 0.0,
            block_table: vec![None; n_blocks],
            matrices: vec![None; n_blocks],
            matrix_lnorms: vec![0.0; n_blocks],
            matrix_valid: bitvec![0; n_blocks],
        }
    }

    /// Drop every cached matrix; keeps the allocations of the tables
    pub(crate) fn invalidate(&mut self) {
        self.matrix_valid.fill(false);
        self.matrices.iter_mut().for_each(|m| *m = None);
    }

    /// Cached output block for `block`
    pub fn block_table(&self, block: usize) -> Option<usize> {
        self.block_table[block]
    }

    /// Cached `-ln(bound)` for `block`
    pub fn lnorm(&self, block: usize) -> f64 {
        self.matrix_lnorms[block]
    }

    /// Cached partial product for `block`, if materialised
    pub fn matrix(&self, block: usize) -> Option<&DenseMatrix> {
        if self.matrix_valid[block] {
            self.matrices[block].as_ref()
        } else {
            None
        }
    }

    /// Cached gaps `(dtau_l, dtau_r)`
    pub fn gaps(&self) -> (f64, f64) {
        (self.dtau_l, self.dtau_r)
    }
}

/// One operator insertion in the tree
#[derive(Debug, Clone)]
pub struct Node {
    pub(crate) key: TimePoint,
    pub(crate) op: OpDesc,
    pub(crate) left: Option<NodeId>,
    pub(crate) right: Option<NodeId>,
    pub(crate) red: bool,
    /// Subtree size, maintained by balanced operations only
    pub(crate) size: usize,
    pub(crate) modified: bool,
    pub(crate) delete_flag: bool,
    pub(crate) cache: NodeCache,
}

impl Node {
    pub(crate) fn detached(n_blocks: usize) -> Self {
        Self {
            key: TimePoint::new(0.0),
            op: OpDesc::default(),
            left: None,
            right: None,
            red: false,
            size: 1,
            modified: true,
            delete_flag: false,
            cache: NodeCache::new(n_blocks),
        }
    }

    /// Give the node a new identity as a fresh leaf; the cache is kept as
    /// storage but is stale until the next refresh
    pub(crate) fn reset(&mut self, key: TimePoint, op: OpDesc) {
        self.key = key;
        self.op = op;
        self.left = None;
        self.right = None;
        self.red = false;
        self.size = 1;
        self.modified = true;
        self.delete_flag = false;
    }

    /// Time key
    pub fn key(&self) -> TimePoint {
        self.key
    }

    /// Operator carried by the node
    pub fn op(&self) -> OpDesc {
        self.op
    }

    /// Earlier-time subtree
    pub fn left(&self) -> Option<NodeId> {
        self.left
    }

    /// Later-time subtree
    pub fn right(&self) -> Option<NodeId> {
        self.right
    }

    /// Colour bit of the red-black balancing
    pub fn is_red(&self) -> bool {
        self.red
    }

    /// Subtree size
    pub fn size(&self) -> usize {
        self.size
    }

    /// Whether cached data of this node is stale
    pub fn is_modified(&self) -> bool {
        self.modified
    }

    /// Whether the node is flagged by a pending deletion
    pub fn is_deleted(&self) -> bool {
        self.delete_flag
    }

    /// Per-block cache
    pub fn cache(&self) -> &NodeCache {
        &self.cache
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reset_gives_fresh_leaf() {
        let mut node = Node::detached(3);
        node.left = Some(NodeId(4));
        node.delete_flag = true;
        node.reset(TimePoint::new(1.5), OpDesc::creation(0));

        assert_eq!(node.key(), TimePoint::new(1.5));
        assert!(node.left().is_none() && node.right().is_none());
        assert!(node.is_modified());
        assert!(!node.is_deleted());
        assert_eq!(node.cache().block_table.len(), 3);
    }

    #[test]
    fn test_invalidate_clears_matrices() {
        let mut cache = NodeCache::new(2);
        cache.matrices[1] = Some(DenseMatrix::identity(1));
        cache.matrix_valid.set(1, true);
        assert!(cache.matrix(1).is_some());

        cache.invalidate();
        assert!(cache.matrix(1).is_none());
        assert!(!cache.matrix_valid[1]);
    }
}
