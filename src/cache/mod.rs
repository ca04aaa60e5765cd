//! Per-node block cache
//!
//! For node `n` and incoming block `b`, the subtree of `n` acts as
//!
//! ```text
//! M_right · e^{-dtau_r H} · O_n · e^{-dtau_l H} · M_left
//! ```
//!
//! (left subtree first, it holds the earlier operators). Three traversals
//! share this shape:
//! - `resolve`: output block only
//! - `resolve_with_bound`: output block plus `-ln` of a conservative norm
//!   bound, with optional pruning
//! - `materialize`: the dense partial product
//!
//! Unmodified nodes answer from their cache. Modified nodes are recomputed on
//! the fly and never written to, so cancelling a move leaves every cache as it
//! was. `refresh` is the only place that rewrites the cache of modified nodes.

mod integrity;
mod stats;

pub use stats::RefreshStats;

use crate::hamiltonian::{AtomDiag, BlockSpectrum, DenseMatrix};
use crate::tree::{NodeId, OpTree};
use crate::{ImpurityTrace, TraceError};
use tracing::trace;

/// Outcome of applying a subtree to a block
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Resolution {
    /// The product maps the block to `block`, with norm at most `e^{-lnorm}`
    Resolved {
        /// Output block
        block: usize,
        /// `-ln` of the norm bound
        lnorm: f64,
    },

    /// Some operator annihilates the whole block
    Vanished,

    /// The bound fell below the caller's threshold before the walk finished
    Pruned,
}

impl Resolution {
    /// Output block, if resolved
    pub fn block(&self) -> Option<usize> {
        match self {
            Resolution::Resolved { block, .. } => Some(*block),
            _ => None,
        }
    }
}

/// Borrowed view of everything the cache traversals need
#[derive(Debug)]
pub(crate) struct CacheEngine<'a, D: AtomDiag> {
    pub(crate) tree: &'a mut OpTree,
    pub(crate) diag: &'a D,
    pub(crate) spectrum: &'a BlockSpectrum,
    pub(crate) stats: &'a mut RefreshStats,
    pub(crate) use_matrix_norms: bool,
}

impl<'a, D: AtomDiag> CacheEngine<'a, D> {
    /// Time gaps to the left and right subtrees
    fn gaps(&self, n: NodeId) -> (f64, f64) {
        let node = self.tree.node(n);
        if !node.modified {
            return node.cache.gaps();
        }
        let dtau_l = node.left.map_or(0.0, |l| {
            node.key.since(self.tree.node(self.tree.subtree_max(l)).key)
        });
        let dtau_r = node.right.map_or(0.0, |r| {
            self.tree.node(self.tree.subtree_min(r)).key.since(node.key)
        });
        (dtau_l, dtau_r)
    }

    /// Block reached by the subtree at `n` from `b`
    pub(crate) fn resolve(&self, n: NodeId, b: usize) -> Option<usize> {
        let node = self.tree.node(n);
        if !node.modified {
            return node.cache.block_table[b];
        }
        let mut block = match node.left {
            Some(l) => self.resolve(l, b)?,
            None => b,
        };
        if !node.delete_flag {
            block = self.diag.connection(&node.op, block)?;
        }
        match node.right {
            Some(r) => self.resolve(r, block),
            None => Some(block),
        }
    }

    /// Block reached from `b` plus `-ln` of a bound on the product norm
    ///
    /// With `use_threshold`, gives up with `Pruned` as soon as the
    /// accumulated `-ln` bound exceeds `threshold`. Evolution terms never
    /// lower the bound, operators lower it by at most
    /// `BlockSpectrum::op_slack` each; the caller's threshold must allow for
    /// that over the operators not yet visited.
    pub(crate) fn resolve_with_bound(
        &self,
        n: NodeId,
        b: usize,
        threshold: f64,
        use_threshold: bool,
    ) -> Resolution {
        let node = self.tree.node(n);
        if !node.modified {
            return match node.cache.block_table[b] {
                None => Resolution::Vanished,
                Some(_) if use_threshold && node.cache.matrix_lnorms[b] > threshold => {
                    Resolution::Pruned
                }
                Some(block) => Resolution::Resolved {
                    block,
                    lnorm: node.cache.matrix_lnorms[b],
                },
            };
        }

        let (dtau_l, dtau_r) = self.gaps(n);
        let (mut block, mut lnorm) = (b, 0.0);
        if let Some(l) = node.left {
            match self.resolve_with_bound(l, b, threshold, use_threshold) {
                Resolution::Resolved { block: bl, lnorm: ln } => {
                    block = bl;
                    lnorm = ln;
                }
                other => return other,
            }
        }
        lnorm += dtau_l * self.spectrum.emin(block);

        if !node.delete_flag {
            match self.diag.connection(&node.op, block) {
                Some(target) => {
                    lnorm += self.spectrum.op_lnorm(&node.op, block);
                    block = target;
                }
                None => return Resolution::Vanished,
            }
        }
        lnorm += dtau_r * self.spectrum.emin(block);
        if use_threshold && lnorm > threshold {
            return Resolution::Pruned;
        }

        if let Some(r) = node.right {
            match self.resolve_with_bound(r, block, threshold - lnorm, use_threshold) {
                Resolution::Resolved { block: br, lnorm: ln } => {
                    block = br;
                    lnorm += ln;
                }
                other => return other,
            }
        }
        Resolution::Resolved { block, lnorm }
    }

    /// Dense product of the subtree at `n` acting on block `b`
    ///
    /// `None` if the block vanishes, structurally or by underflow.
    pub(crate) fn materialize(&mut self, n: NodeId, b: usize) -> Option<(usize, DenseMatrix)> {
        let node = self.tree.node(n);
        let modified = node.modified;
        if !modified {
            let target = node.cache.block_table[b]?;
            if let Some(m) = node.cache.matrix(b) {
                return Some((target, m.clone()));
            }
        }
        let (left, right, op, deleted) = (node.left, node.right, node.op, node.delete_flag);
        let (dtau_l, dtau_r) = self.gaps(n);

        let (mut block, mut m) = match left {
            Some(l) => self.materialize(l, b)?,
            None => (b, DenseMatrix::identity(self.spectrum.dim(b))),
        };
        m.evolve_rows(dtau_l, self.spectrum.eigenvalues(block));
        if !deleted {
            let target = self.diag.connection(&op, block)?;
            m = self.diag.op_matrix(&op, block)?.matmul(&m);
            block = target;
        }
        m.evolve_rows(dtau_r, self.spectrum.eigenvalues(block));
        if let Some(r) = right {
            let (target, rm) = self.materialize(r, block)?;
            m = rm.matmul(&m);
            block = target;
        }
        self.stats.matrix_built();

        let norm = m.frobenius_norm();
        if norm == 0.0 {
            return None;
        }
        if !modified {
            let cache = &mut self.tree.node_mut(n).cache;
            cache.matrices[b] = Some(m.clone());
            cache.matrix_valid.set(b, true);
            if self.use_matrix_norms {
                cache.matrix_lnorms[b] = -norm.ln();
            }
        }
        Some((block, m))
    }

    /// Recompute the cache of every modified node, children first
    pub(crate) fn refresh(&mut self) {
        self.stats.begin_refresh();
        if let Some(root) = self.tree.root() {
            self.refresh_node(root);
        }
        trace!(
            visited = self.stats.last_refresh_visits,
            size = self.tree.len(),
            "cache refreshed"
        );
    }

    fn refresh_node(&mut self, n: NodeId) {
        let node = self.tree.node(n);
        if !node.modified {
            return;
        }
        let (left, right) = (node.left, node.right);
        if let Some(l) = left {
            self.refresh_node(l);
        }
        if let Some(r) = right {
            self.refresh_node(r);
        }
        self.stats.visit();

        let (dtau_l, dtau_r) = self.gaps(n);
        let results: Vec<Resolution> = (0..self.spectrum.n_blocks())
            .map(|b| self.resolve_with_bound(n, b, f64::INFINITY, false))
            .collect();

        let node = self.tree.node_mut(n);
        node.cache.dtau_l = dtau_l;
        node.cache.dtau_r = dtau_r;
        for (b, result) in results.into_iter().enumerate() {
            let (target, lnorm) = match result {
                Resolution::Resolved { block, lnorm } => (Some(block), lnorm),
                _ => (None, f64::INFINITY),
            };
            node.cache.block_table[b] = target;
            node.cache.matrix_lnorms[b] = lnorm;
        }
        node.cache.invalidate();
        node.modified = false;
    }
}

impl<D: AtomDiag> ImpurityTrace<D> {
    pub(crate) fn engine(&mut self) -> CacheEngine<'_, D> {
        CacheEngine {
            tree: &mut self.tree,
            diag: &self.diag,
            spectrum: &self.spectrum,
            stats: &mut self.stats,
            use_matrix_norms: self.config.use_norm_of_matrices_in_cache,
        }
    }

    /// Bring every cache up to date after a confirmed structural change
    pub(crate) fn update_cache(&mut self) {
        self.engine().refresh();
    }

    /// Block reached by the whole sequence from `block`
    pub fn resolve(&mut self, block: usize) -> Option<usize> {
        let root = self.tree.root()?;
        self.resolve_node(root, block)
    }

    /// Block reached by the subtree at `node` from `block`
    pub fn resolve_node(&mut self, node: NodeId, block: usize) -> Option<usize> {
        self.engine().resolve(node, block)
    }

    /// Block and bound for the whole sequence; identity on an empty tree
    pub fn resolve_with_bound(
        &mut self,
        block: usize,
        threshold: f64,
        use_threshold: bool,
    ) -> Resolution {
        match self.tree.root() {
            Some(root) => self.resolve_node_with_bound(root, block, threshold, use_threshold),
            None => Resolution::Resolved { block, lnorm: 0.0 },
        }
    }

    /// Block and bound for the subtree at `node`
    pub fn resolve_node_with_bound(
        &mut self,
        node: NodeId,
        block: usize,
        threshold: f64,
        use_threshold: bool,
    ) -> Resolution {
        self.engine()
            .resolve_with_bound(node, block, threshold, use_threshold)
    }

    /// Dense product of the whole sequence acting on `block`
    pub fn materialize(&mut self, block: usize) -> Option<(usize, DenseMatrix)> {
        let root = self.tree.root()?;
        self.engine().materialize(root, block)
    }

    /// Compare every cache with a linear recomputation
    pub fn check_cache_integrity(&mut self) -> Result<(), TraceError> {
        self.engine().check_integrity()
    }

    /// Integrity check when enabled by the configuration
    pub(crate) fn maybe_check_integrity(&mut self) -> Result<(), TraceError> {
        if self.config.check_integrity {
            self.check_cache_integrity()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{BlockDiag, OpDesc, TimePoint, TraceConfig};
    use proptest::prelude::*;

    fn hubbard(beta: f64) -> ImpurityTrace<BlockDiag> {
        let diag = BlockDiag::density_density(2, &[-1.0, -0.5], 2.0).unwrap();
        ImpurityTrace::new(TraceConfig::new(beta, 2), diag).unwrap()
    }

    fn fill(trace: &mut ImpurityTrace<BlockDiag>, ops: &[(f64, usize, bool)]) {
        for &(tau, orbital, dagger) in ops {
            let op = if dagger {
                OpDesc::creation(orbital)
            } else {
                OpDesc::annihilation(orbital)
            };
            if trace.tree().contains(TimePoint::new(tau)) {
                continue;
            }
            trace.try_insert(TimePoint::new(tau), op).unwrap();
            trace.confirm_insert().unwrap();
        }
    }

    #[test]
    fn test_single_pair_resolves_to_same_block() {
        let mut trace = hubbard(5.0);
        fill(&mut trace, &[(1.0, 0, false), (2.0, 0, true)]);
        // c at 1.0 first, then c† at 2.0: only blocks with orbital 0 filled survive
        assert_eq!(trace.resolve(1), Some(1));
        assert_eq!(trace.resolve(3), Some(3));
        assert_eq!(trace.resolve(0), None);
        assert_eq!(trace.resolve(2), None);
    }

    #[test]
    fn test_pruning_only_affects_small_bounds() {
        let mut trace = hubbard(5.0);
        fill(&mut trace, &[(1.0, 0, false), (2.0, 0, true)]);
        assert_eq!(trace.resolve_with_bound(1, -1.0, true), Resolution::Pruned);
        assert!(matches!(
            trace.resolve_with_bound(1, 1e3, true),
            Resolution::Resolved { block: 1, .. }
        ));
        assert_eq!(trace.resolve_with_bound(0, -1.0, true), Resolution::Vanished);
    }

    #[test]
    fn test_materialized_matrix_is_cached() {
        let mut trace = hubbard(5.0);
        fill(&mut trace, &[(1.0, 0, false), (2.0, 0, true), (3.0, 1, true)]);
        let built = trace.refresh_stats().matrices_built;
        let first = trace.materialize(1);
        let after_first = trace.refresh_stats().matrices_built;
        let second = trace.materialize(1);

        assert!(after_first > built);
        assert_eq!(trace.refresh_stats().matrices_built, after_first);
        assert_eq!(first.map(|(b, _)| b), second.map(|(b, _)| b));
        assert!(trace.check_cache_integrity().is_ok());
    }

    fn op_strategy() -> impl Strategy<Value = Vec<(f64, usize, bool)>> {
        proptest::collection::vec((0.0f64..10.0, 0usize..2, any::<bool>()), 1..40)
    }

    proptest! {
        #[test]
        fn bound_walk_agrees_with_plain_walk(ops in op_strategy()) {
            let mut trace = hubbard(10.0);
            fill(&mut trace, &ops);
            let ids: Vec<NodeId> = trace.tree().iter().collect();
            for id in ids {
                for b in 0..4 {
                    let plain = trace.resolve_node(id, b);
                    let bounded = trace.resolve_node_with_bound(id, b, f64::INFINITY, false);
                    prop_assert_eq!(plain, bounded.block());
                    prop_assert!(bounded != Resolution::Pruned);
                }
            }
        }

        #[test]
        fn cache_matches_linear_recomputation(ops in op_strategy()) {
            let mut trace = hubbard(10.0);
            fill(&mut trace, &ops);
            for b in 0..4 {
                let _ = trace.materialize(b);
            }
            prop_assert!(trace.check_cache_integrity().is_ok());
        }
    }
}
