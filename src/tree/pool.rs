//! Node arena and reusable node pools
//!
//! All nodes are created by the arena. A pool is a set of arena slots set
//! aside for one purpose (trial insertions, replace backups), handed out in
//! order and handed back in reverse order, so that no move allocates once the
//! pools are warm.

use super::node::{Node, NodeId};

/// Vec-backed node storage with a free list
#[derive(Debug)]
pub struct NodeArena {
    nodes: Vec<Node>,
    free: Vec<NodeId>,
    n_blocks: usize,
}

impl NodeArena {
    /// Empty arena for nodes caching `n_blocks` blocks
    pub fn new(n_blocks: usize) -> Self {
        Self {
            nodes: Vec::new(),
            free: Vec::new(),
            n_blocks,
        }
    }

    /// Make a detached node, recycling a freed slot if possible
    pub fn alloc(&mut self) -> NodeId {
        if let Some(id) = self.free.pop() {
            return id;
        }
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(Node::detached(self.n_blocks));
        id
    }

    /// Return a node to the free list
    pub fn release(&mut self, id: NodeId) {
        let node = &mut self.nodes[id.index()];
        node.left = None;
        node.right = None;
        node.delete_flag = false;
        node.modified = true;
        debug_assert!(!self.free.contains(&id), "node {} released twice", id);
        self.free.push(id);
    }

    /// Total slots ever allocated
    pub fn capacity(&self) -> usize {
        self.nodes.len()
    }

    /// Slots currently on the free list
    pub fn free_count(&self) -> usize {
        self.free.len()
    }

    #[inline(always)]
    pub(crate) fn get(&self, id: NodeId) -> &Node {
        &self.nodes[id.index()]
    }

    #[inline(always)]
    pub(crate) fn get_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id.index()]
    }
}

/// Ordered set of detached nodes reserved for one kind of move
///
/// `taken` slots have been handed out, the rest are ready for use.
#[derive(Debug, Default)]
pub struct NodePool {
    slots: Vec<NodeId>,
    taken: usize,
}

impl NodePool {
    /// Pool of `capacity` fresh nodes
    pub fn with_capacity(arena: &mut NodeArena, capacity: usize) -> Self {
        let mut pool = Self::default();
        pool.reserve(arena, capacity);
        pool
    }

    /// Grow to at least `size` slots
    pub fn reserve(&mut self, arena: &mut NodeArena, size: usize) {
        while self.slots.len() < size {
            self.slots.push(arena.alloc());
        }
    }

    /// Number of slots
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Number of slots handed out since the last reset
    pub fn taken(&self) -> usize {
        self.taken
    }

    /// True if nothing is handed out
    pub fn is_reset(&self) -> bool {
        self.taken == 0
    }

    /// Nodes handed out since the last reset, in order
    pub fn taken_ids(&self) -> &[NodeId] {
        &self.slots[..self.taken]
    }

    /// Hand out the next node
    pub fn take_next(&mut self) -> Option<NodeId> {
        let id = *self.slots.get(self.taken)?;
        self.taken += 1;
        Some(id)
    }

    /// Give back the most recently taken node
    pub fn untake(&mut self) {
        self.taken = self.taken.saturating_sub(1);
    }

    /// Exchange `id` with the next pooled node: `id` is parked in the pool
    pub fn swap_next(&mut self, id: NodeId) -> Option<NodeId> {
        let slot = self.slots.get_mut(self.taken)?;
        let out = std::mem::replace(slot, id);
        self.taken += 1;
        Some(out)
    }

    /// Undo the last `swap_next`: park `id` again and return the node that
    /// was parked in its place
    pub fn swap_prev(&mut self, id: NodeId) -> Option<NodeId> {
        self.taken = self.taken.checked_sub(1)?;
        Some(std::mem::replace(&mut self.slots[self.taken], id))
    }

    /// Forget what was handed out; returns how many nodes were taken
    pub fn reset(&mut self) -> usize {
        std::mem::take(&mut self.taken)
    }

    /// Give the taken nodes away for good, refilling their slots from the
    /// arena, and reset
    pub fn hand_over(&mut self, arena: &mut NodeArena) -> Vec<NodeId> {
        let taken = self.reset();
        (0..taken)
            .map(|i| std::mem::replace(&mut self.slots[i], arena.alloc()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_arena_recycles_released_slots() {
        let mut arena = NodeArena::new(2);
        let a = arena.alloc();
        let b = arena.alloc();
        assert_ne!(a, b);
        arena.release(a);
        assert_eq!(arena.free_count(), 1);
        assert_eq!(arena.alloc(), a);
        assert_eq!(arena.capacity(), 2);
    }

    #[test]
    fn test_pool_take_and_exhaust() {
        let mut arena = NodeArena::new(1);
        let mut pool = NodePool::with_capacity(&mut arena, 2);
        assert!(pool.take_next().is_some());
        assert!(pool.take_next().is_some());
        assert!(pool.take_next().is_none());
        assert_eq!(pool.reset(), 2);
        assert!(pool.is_reset());
    }

    #[test]
    fn test_swap_prev_reverses_swap_next() {
        let mut arena = NodeArena::new(1);
        let mut pool = NodePool::with_capacity(&mut arena, 2);
        let original = arena.alloc();

        let shadow = pool.swap_next(original).unwrap();
        assert_ne!(shadow, original);
        assert_eq!(pool.swap_prev(shadow), Some(original));
        assert!(pool.is_reset());
    }

    #[test]
    fn test_hand_over_refills_slots() {
        let mut arena = NodeArena::new(1);
        let mut pool = NodePool::with_capacity(&mut arena, 2);
        let first = pool.take_next().unwrap();

        let given = pool.hand_over(&mut arena);
        assert_eq!(given, vec![first]);
        assert_eq!(pool.capacity(), 2);
        assert_ne!(pool.take_next(), Some(first));
    }
}
