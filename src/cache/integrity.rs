//! Consistency check of the cache against a linear recomputation
//!
//! Slow (quadratic in the tree size). Meant for tests and for the
//! `check_integrity` debugging switch.

use super::CacheEngine;
use crate::hamiltonian::{AtomDiag, DenseMatrix};
use crate::operator::{OpDesc, TimePoint};
use crate::tree::{InOrder, NodeId};
use crate::TraceError;
use tracing::warn;

const TOLERANCE: f64 = 1e-10;

impl<D: AtomDiag> CacheEngine<'_, D> {
    /// Verify gaps, block tables, bounds and materialised matrices of every
    /// unmodified node
    pub(crate) fn check_integrity(&self) -> Result<(), TraceError> {
        for id in self.tree.iter() {
            if self.tree.node(id).modified {
                continue;
            }
            self.check_node(id).map_err(|err| {
                warn!(node = %id, error = %err, "cache integrity failure");
                err
            })?;
        }
        Ok(())
    }

    fn check_node(&self, id: NodeId) -> Result<(), TraceError> {
        let node = self.tree.node(id);
        let tau = node.key.value();
        let mismatch = |block: usize, detail: String| TraceError::IntegrityMismatch {
            tau,
            block,
            detail,
        };

        let ops: Vec<(TimePoint, OpDesc, bool)> = InOrder::new(self.tree, Some(id))
            .map(|n| {
                let n = self.tree.node(n);
                (n.key, n.op, n.delete_flag)
            })
            .collect();

        let (dtau_l, dtau_r) = node.cache.gaps();
        let expected_l = node.left.map_or(0.0, |l| {
            node.key.since(self.tree.node(self.tree.subtree_max(l)).key)
        });
        let expected_r = node.right.map_or(0.0, |r| {
            self.tree.node(self.tree.subtree_min(r)).key.since(node.key)
        });
        if (dtau_l - expected_l).abs() > TOLERANCE || (dtau_r - expected_r).abs() > TOLERANCE {
            return Err(mismatch(
                0,
                format!(
                    "gaps ({}, {}) but neighbours give ({}, {})",
                    dtau_l, dtau_r, expected_l, expected_r
                ),
            ));
        }

        for b in 0..self.spectrum.n_blocks() {
            let linear = self.linear_product(&ops, b);
            let cached = node.cache.block_table[b];
            if linear.as_ref().map(|(target, _)| *target) != cached {
                return Err(mismatch(
                    b,
                    format!(
                        "block table says {:?}, linear product reaches {:?}",
                        cached,
                        linear.as_ref().map(|(target, _)| *target)
                    ),
                ));
            }
            let Some((_, product)) = linear else { continue };

            let norm = product.frobenius_norm();
            let bound = (-node.cache.matrix_lnorms[b]).exp();
            if norm > bound * (1.0 + TOLERANCE) + f64::MIN_POSITIVE {
                return Err(mismatch(
                    b,
                    format!("bound {} below actual norm {}", bound, norm),
                ));
            }

            if let Some(m) = node.cache.matrix(b) {
                let diff = m.max_abs_diff(&product);
                if diff > TOLERANCE * norm.max(1.0) {
                    return Err(mismatch(
                        b,
                        format!("cached matrix differs by {:e}", diff),
                    ));
                }
            }
        }
        Ok(())
    }

    /// Product over `ops` (time order) acting on `block`, evolving by plain
    /// key differences
    fn linear_product(
        &self,
        ops: &[(TimePoint, OpDesc, bool)],
        block: usize,
    ) -> Option<(usize, DenseMatrix)> {
        let mut block = block;
        let mut m = DenseMatrix::identity(self.spectrum.dim(block));
        let mut previous: Option<TimePoint> = None;
        for (key, op, deleted) in ops {
            if let Some(p) = previous {
                m.evolve_rows(key.since(p), self.spectrum.eigenvalues(block));
            }
            previous = Some(*key);
            if *deleted {
                continue;
            }
            let target = self.diag.connection(op, block)?;
            m = self.diag.op_matrix(op, block)?.matmul(&m);
            block = target;
        }
        Some((block, m))
    }
}
