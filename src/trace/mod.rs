//! Bound and trace evaluation at the root
//!
//! For a non-empty sequence with root product `M_b` on block `b`, the
//! contribution to the trace is `Tr[e^{-dtau_wrap H} M_b]` where
//! `dtau_wrap = β - τ_max + τ_min` closes the time circle. Its cheap bound is
//! `dim_b · e^{-lnorm_b - dtau_wrap emin_b}`.
//!
//! Internally energies are measured from the global ground state, so every
//! block quantity carries a factor `e^{β E0}`; results are scaled back
//! before they leave `compute`.
//!
//! Blocks are evaluated in order of decreasing bound so the sum can stop as
//! soon as what is left is negligible, or as soon as the Metropolis test is
//! certain to fail.

use crate::cache::Resolution;
use crate::diagnostics::TraceSample;
use crate::hamiltonian::{AtomDiag, BlockSpectrum, DenseMatrix};
use crate::{ImpurityTrace, TraceError};
use tracing::trace;

/// Matrix of one block together with a validity flag
#[derive(Debug, Clone)]
#[cfg_attr(feature = "visualize", derive(serde::Serialize))]
pub struct BlockMatrix {
    /// Whether `mat` was recomputed by the last evaluation
    pub is_valid: bool,
    /// Dense block matrix, in the eigenbasis
    pub mat: DenseMatrix,
}

/// Quantities of the empty configuration
#[derive(Debug, Clone)]
pub(crate) struct AtomicData {
    /// Unnormalised `e^{-βH}` per block
    pub(crate) rho: Vec<BlockMatrix>,
    /// Partition function `Σ_b Σ_i e^{-β E_bi}`
    pub(crate) z: f64,
    /// `Σ_b sqrt(dim_b) ||rho_b||_F`
    pub(crate) norm: f64,
    /// `Σ_b dim_b e^{-β emin_b}`
    pub(crate) bound: f64,
}

impl AtomicData {
    pub(crate) fn new<D: AtomDiag>(diag: &D, spectrum: &BlockSpectrum, beta: f64) -> Self {
        let rho: Vec<BlockMatrix> = (0..spectrum.n_blocks())
            .map(|b| {
                let weights: Vec<f64> = diag
                    .eigenvalues(b)
                    .iter()
                    .map(|e| (-beta * e).exp())
                    .collect();
                BlockMatrix {
                    is_valid: true,
                    mat: DenseMatrix::from_diagonal(&weights),
                }
            })
            .collect();

        let z = rho.iter().map(|r| r.mat.trace()).sum();
        let norm = rho
            .iter()
            .enumerate()
            .map(|(b, r)| (spectrum.dim(b) as f64).sqrt() * r.mat.frobenius_norm())
            .sum();
        let bound = (0..spectrum.n_blocks())
            .map(|b| spectrum.dim(b) as f64 * (-beta * diag.eigenvalue(b, 0)).exp())
            .sum();

        Self {
            rho,
            z,
            norm,
            bound,
        }
    }
}

/// A root block that survived pruning
#[derive(Debug, Clone, Copy)]
struct Candidate {
    block: usize,
    bound: f64,
}

impl<D: AtomDiag> ImpurityTrace<D> {
    /// Evaluate `(weight, trace)` of the current sequence, trial edits
    /// included
    ///
    /// `weight` is the conservative bound (or norm, with
    /// `use_norm_as_weight`) that dominates `|trace|`. With `p_yee >= 0`, the
    /// evaluation returns `(0, 0)` as soon as it is certain that
    /// `|trace| · p_yee < u_yee`, i.e. that the move will be rejected.
    pub fn compute(&mut self, p_yee: f64, u_yee: f64) -> Result<(f64, f64), TraceError> {
        let beta = self.config.beta;
        let epsilon = self.config.prune_epsilon;
        let measure_rho = self.config.measure_density_matrix;
        let use_norm = self.config.use_norm_as_weight;

        let root = match self.tree.root() {
            Some(root) if self.tree_size > 0 => root,
            _ => return Ok(self.compute_atomic(p_yee, u_yee)),
        };
        let (Some(min_key), Some(max_key)) = (self.tree.min_key(), self.tree.max_key()) else {
            return Ok(self.compute_atomic(p_yee, u_yee));
        };
        let dtau_wrap = beta - max_key.value() + min_key.value();
        let dtau_beg = min_key.value();
        let dtau_end = beta - max_key.value();

        // everything below is in units of e^{-β E0}
        let scale = (-beta * self.spectrum.ground()).exp();

        // first pass: cheap bounds, pruning against the best block so far
        let n_blocks = self.spectrum.n_blocks();
        let prune_lnorm = -epsilon.ln();
        let slack = self.spectrum.op_slack() * (self.tree.len() + self.trial_links.len()) as f64;
        let mut best_lnorm = f64::INFINITY;
        let mut at_root = Vec::with_capacity(n_blocks);
        let mut n_at_root = 0;
        for b in 0..n_blocks {
            // the walk sees neither the wrap-around evolution nor the trace
            // dimension, move them to the threshold side
            let threshold = best_lnorm + prune_lnorm + (self.spectrum.dim(b) as f64).ln()
                - dtau_wrap * self.spectrum.emin(b)
                + slack;
            let resolution = self
                .engine()
                .resolve_with_bound(root, b, threshold, threshold.is_finite());
            match resolution {
                Resolution::Resolved { block, lnorm } if block == b => {
                    let lnorm = lnorm + dtau_wrap * self.spectrum.emin(b)
                        - (self.spectrum.dim(b) as f64).ln();
                    best_lnorm = best_lnorm.min(lnorm);
                    at_root.push((b, lnorm));
                    n_at_root += 1;
                }
                Resolution::Pruned => n_at_root += 1,
                _ => {}
            }
        }

        let mut candidates: Vec<Candidate> = at_root
            .into_iter()
            .filter(|&(_, lnorm)| lnorm <= best_lnorm + prune_lnorm)
            .map(|(block, lnorm)| Candidate {
                block,
                bound: (-lnorm).exp(),
            })
            .collect();
        candidates.sort_by(|a, b| {
            b.bound
                .total_cmp(&a.bound)
                .then_with(|| a.block.cmp(&b.block))
        });

        let bound: f64 = candidates.iter().map(|c| c.bound).sum();
        if measure_rho {
            self.density_matrix.iter_mut().for_each(|r| r.is_valid = false);
        }
        let need_rho = measure_rho || use_norm || self.sink.is_some();

        // second pass: exact traces, largest bound first
        let mut remaining = bound;
        let mut trace: f64 = 0.0;
        let mut trace_abs_sum = 0.0;
        let mut norm = 0.0;
        let mut terms: Vec<(usize, f64)> = Vec::with_capacity(candidates.len());
        for candidate in &candidates {
            if remaining < epsilon * trace.abs() {
                break;
            }
            remaining = (remaining - candidate.bound).max(0.0);
            let b = candidate.block;

            let materialized = self.engine().materialize(root, b);
            let block_trace = match materialized {
                Some((_, mut m)) => {
                    let eigs = self.spectrum.eigenvalues(b);
                    let value: f64 = (0..m.rows())
                        .map(|i| m.get(i, i) * (-dtau_wrap * eigs[i]).exp())
                        .sum();
                    if need_rho {
                        m.evolve_rows(dtau_end, eigs);
                        let right: Vec<f64> =
                            eigs.iter().map(|e| scale * (-dtau_beg * e).exp()).collect();
                        m.scale_cols(&right);
                        norm += (self.spectrum.dim(b) as f64).sqrt() * m.frobenius_norm() / scale;
                        if measure_rho {
                            self.density_matrix[b] = BlockMatrix {
                                is_valid: true,
                                mat: m,
                            };
                        }
                    }
                    value
                }
                None => 0.0,
            };
            trace += block_trace;
            trace_abs_sum += block_trace.abs();
            terms.push((b, block_trace));

            if p_yee >= 0.0 && (trace.abs() + remaining) * scale * p_yee < u_yee {
                trace!(evaluated = terms.len(), "lazy rejection");
                return Ok((0.0, 0.0));
            }
        }

        let weight = scale * if use_norm { norm + remaining } else { bound };
        let trace = scale * trace;
        trace!(
            n_at_root,
            kept = candidates.len(),
            evaluated = terms.len(),
            weight,
            trace,
            "trace computed"
        );

        if self.sink.is_some() {
            let sample = self.sample(
                n_at_root,
                &candidates,
                &terms,
                SampleTotals {
                    scale,
                    trace,
                    trace_abs_sum: scale * trace_abs_sum,
                    norm: scale * norm,
                    bound: scale * bound,
                },
            );
            if let Some(sink) = self.sink.as_mut() {
                sink.record(&sample);
            }
        }
        Ok((weight, trace))
    }

    fn compute_atomic(&mut self, p_yee: f64, u_yee: f64) -> (f64, f64) {
        let z = self.atomic.z;
        if p_yee >= 0.0 && z.abs() * p_yee < u_yee {
            return (0.0, 0.0);
        }
        if self.config.measure_density_matrix {
            self.density_matrix.clone_from(&self.atomic.rho);
        }
        let weight = if self.config.use_norm_as_weight {
            self.atomic.norm
        } else {
            self.atomic.bound
        };
        (weight, z)
    }

    fn sample(
        &self,
        n_at_root: usize,
        candidates: &[Candidate],
        terms: &[(usize, f64)],
        totals: SampleTotals,
    ) -> TraceSample {
        let energy = |b: usize| self.spectrum.emin(b);

        let dominant_bound = candidates.first().map(|c| c.block);
        let dominant_trace = terms
            .iter()
            .max_by(|a, b| a.1.abs().total_cmp(&b.1.abs()))
            .map(|&(block, _)| block);

        TraceSample {
            n_blocks_at_root: n_at_root,
            n_blocks_kept: candidates.len(),
            dominant_block_bound: dominant_bound,
            dominant_block_trace: dominant_trace,
            dominant_energy_bound: dominant_bound.map(energy),
            dominant_energy_trace: dominant_trace.map(energy),
            trace: totals.trace,
            trace_abs_sum: totals.trace_abs_sum,
            norm: totals.norm,
            bound: totals.bound,
            first_term: terms.first().map(|t| totals.scale * t.1),
            second_term: terms.get(1).map(|t| totals.scale * t.1),
        }
    }

    /// Density matrix per block, from the last `compute` with
    /// `measure_density_matrix` set
    pub fn get_density_matrix(&self) -> &[BlockMatrix] {
        &self.density_matrix
    }

    /// Partition function of the empty configuration
    pub fn atomic_z(&self) -> f64 {
        self.atomic.z
    }

    /// Norm weight of the empty configuration
    pub fn atomic_norm(&self) -> f64 {
        self.atomic.norm
    }

    /// `e^{-βH}` per block
    pub fn atomic_rho(&self) -> &[BlockMatrix] {
        &self.atomic.rho
    }
}

#[derive(Debug, Clone, Copy)]
struct SampleTotals {
    /// `e^{-β E0}`, converting per-block terms to absolute units
    scale: f64,
    trace: f64,
    trace_abs_sum: f64,
    norm: f64,
    bound: f64,
}
