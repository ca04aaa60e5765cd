//! Block-diagonal Hamiltonian interface
//!
//! The diagonalisation of the local Hamiltonian is an external collaborator.
//! This module fixes what the trace needs from it:
//! - per-block dimension and ascending eigenvalues
//! - for every orbital and block, the block reached by `c`/`c†` (if any)
//! - the matrix of that operator between the two blocks, in the eigenbasis

mod block_diag;
mod matrix;

pub use block_diag::{BlockDiag, BlockDiagBuilder};
pub use matrix::DenseMatrix;

use crate::operator::OpDesc;
use std::sync::Arc;
use thiserror::Error;

/// Error type returned when Hamiltonian data is inconsistent
#[derive(Debug, Error)]
pub enum DiagError {
    /// No blocks at all
    #[error("the Hamiltonian must have at least one block")]
    NoBlocks,

    /// Block has dimension zero
    #[error("block {0} is empty")]
    EmptyBlock(usize),

    /// Eigenvalues not ascending
    #[error("eigenvalues of block {0} are not sorted")]
    UnsortedEigenvalues(usize),

    /// Block index out of range
    #[error("block {block} out of range (n_blocks = {n_blocks})")]
    BlockOutOfRange {
        /// Requested block
        block: usize,
        /// Number of blocks
        n_blocks: usize,
    },

    /// Orbital index out of range
    #[error("orbital {orbital} out of range (n_orbitals = {n_orbitals})")]
    OrbitalOutOfRange {
        /// Requested orbital
        orbital: usize,
        /// Number of orbitals
        n_orbitals: usize,
    },

    /// Operator matrix does not map between the declared blocks
    #[error("operator matrix is {rows}x{cols}, expected {expected_rows}x{expected_cols}")]
    DimensionMismatch {
        /// Rows supplied
        rows: usize,
        /// Columns supplied
        cols: usize,
        /// Dimension of the target block
        expected_rows: usize,
        /// Dimension of the source block
        expected_cols: usize,
    },

    /// Fock-space construction limited to a manageable number of orbitals
    #[error("{0} orbitals is too many for a Fock-space construction")]
    TooManyOrbitals(usize),
}

/// Diagonalised local Hamiltonian, as seen by the trace
pub trait AtomDiag: std::fmt::Debug {
    /// Number of symmetry blocks
    fn n_blocks(&self) -> usize;

    /// Number of orbital flavours
    fn n_orbitals(&self) -> usize;

    /// Dimension of `block`
    fn block_dim(&self, block: usize) -> usize;

    /// Ascending eigenvalues of `block`
    fn eigenvalues(&self, block: usize) -> &[f64];

    /// Block reached by `c[orbital]` from `block`, `None` if it annihilates it
    fn c_connection(&self, orbital: usize, block: usize) -> Option<usize>;

    /// Block reached by `c†[orbital]` from `block`
    fn cdag_connection(&self, orbital: usize, block: usize) -> Option<usize>;

    /// Matrix of `c[orbital]` from `block` to its image
    fn c_matrix(&self, orbital: usize, block: usize) -> Option<&DenseMatrix>;

    /// Matrix of `c†[orbital]` from `block` to its image
    fn cdag_matrix(&self, orbital: usize, block: usize) -> Option<&DenseMatrix>;

    /// The `i`-th eigenvalue of `block`
    fn eigenvalue(&self, block: usize, i: usize) -> f64 {
        self.eigenvalues(block)[i]
    }

    /// Image of `block` under `op`
    fn connection(&self, op: &OpDesc, block: usize) -> Option<usize> {
        if op.dagger {
            self.cdag_connection(op.orbital, block)
        } else {
            self.c_connection(op.orbital, block)
        }
    }

    /// Matrix of `op` from `block` to its image
    fn op_matrix(&self, op: &OpDesc, block: usize) -> Option<&DenseMatrix> {
        if op.dagger {
            self.cdag_matrix(op.orbital, block)
        } else {
            self.c_matrix(op.orbital, block)
        }
    }
}

impl<T: AtomDiag + ?Sized> AtomDiag for Arc<T> {
    fn n_blocks(&self) -> usize {
        (**self).n_blocks()
    }
    fn n_orbitals(&self) -> usize {
        (**self).n_orbitals()
    }
    fn block_dim(&self, block: usize) -> usize {
        (**self).block_dim(block)
    }
    fn eigenvalues(&self, block: usize) -> &[f64] {
        (**self).eigenvalues(block)
    }
    fn c_connection(&self, orbital: usize, block: usize) -> Option<usize> {
        (**self).c_connection(orbital, block)
    }
    fn cdag_connection(&self, orbital: usize, block: usize) -> Option<usize> {
        (**self).cdag_connection(orbital, block)
    }
    fn c_matrix(&self, orbital: usize, block: usize) -> Option<&DenseMatrix> {
        (**self).c_matrix(orbital, block)
    }
    fn cdag_matrix(&self, orbital: usize, block: usize) -> Option<&DenseMatrix> {
        (**self).cdag_matrix(orbital, block)
    }
}

/// Per-block quantities precomputed once from an [`AtomDiag`]
///
/// Eigenvalues are stored relative to the global ground energy `E0`, so
/// every evolution factor `e^{-dtau (E - E0)}` is at most one and partial
/// bounds only shrink as a walk proceeds. Results are scaled back by
/// `e^{-β E0}` at the root.
#[derive(Debug, Clone)]
pub(crate) struct BlockSpectrum {
    dims: Vec<usize>,
    /// Eigenvalues minus `ground`, ascending per block
    shifted: Vec<Vec<f64>>,
    ground: f64,
    /// `-ln ||c[orbital]||_F` from each block, `+inf` when not connected
    c_lnorm: Vec<Vec<f64>>,
    /// Same for `c†`
    cdag_lnorm: Vec<Vec<f64>>,
    /// `max(0, ln ||O||_F)` over every operator matrix
    op_slack: f64,
}

impl BlockSpectrum {
    pub(crate) fn new<D: AtomDiag + ?Sized>(diag: &D) -> Result<Self, DiagError> {
        let n_blocks = diag.n_blocks();
        if n_blocks == 0 {
            return Err(DiagError::NoBlocks);
        }

        let mut dims = Vec::with_capacity(n_blocks);
        for b in 0..n_blocks {
            let eigs = diag.eigenvalues(b);
            if diag.block_dim(b) == 0 || eigs.is_empty() {
                return Err(DiagError::EmptyBlock(b));
            }
            if eigs.windows(2).any(|w| w[0] > w[1]) {
                return Err(DiagError::UnsortedEigenvalues(b));
            }
            dims.push(diag.block_dim(b));
        }
        let ground = (0..n_blocks)
            .map(|b| diag.eigenvalues(b)[0])
            .fold(f64::INFINITY, f64::min);
        let shifted = (0..n_blocks)
            .map(|b| diag.eigenvalues(b).iter().map(|e| e - ground).collect())
            .collect();

        let lnorms = |matrix: Option<&DenseMatrix>| match matrix {
            Some(m) => -m.frobenius_norm().ln(),
            None => f64::INFINITY,
        };
        let c_lnorm: Vec<Vec<f64>> = (0..diag.n_orbitals())
            .map(|o| (0..n_blocks).map(|b| lnorms(diag.c_matrix(o, b))).collect())
            .collect();
        let cdag_lnorm: Vec<Vec<f64>> = (0..diag.n_orbitals())
            .map(|o| (0..n_blocks).map(|b| lnorms(diag.cdag_matrix(o, b))).collect())
            .collect();
        let op_slack = c_lnorm
            .iter()
            .chain(cdag_lnorm.iter())
            .flatten()
            .fold(0.0f64, |slack, &lnorm| slack.max(-lnorm));

        Ok(Self {
            dims,
            shifted,
            ground,
            c_lnorm,
            cdag_lnorm,
            op_slack,
        })
    }

    #[inline]
    pub(crate) fn n_blocks(&self) -> usize {
        self.dims.len()
    }

    #[inline]
    pub(crate) fn dim(&self, block: usize) -> usize {
        self.dims[block]
    }

    /// Ground energy of `block` above the global ground state
    #[inline]
    pub(crate) fn emin(&self, block: usize) -> f64 {
        self.shifted[block][0]
    }

    /// Eigenvalues of `block` above the global ground state
    #[inline]
    pub(crate) fn eigenvalues(&self, block: usize) -> &[f64] {
        &self.shifted[block]
    }

    /// Global ground energy `E0` removed from every eigenvalue
    #[inline]
    pub(crate) fn ground(&self) -> f64 {
        self.ground
    }

    /// Largest amount by which a single operator can lower a partial
    /// `-ln` bound
    #[inline]
    pub(crate) fn op_slack(&self) -> f64 {
        self.op_slack
    }

    /// `-ln` of the norm estimate of `op` acting on `block`
    #[inline]
    pub(crate) fn op_lnorm(&self, op: &OpDesc, block: usize) -> f64 {
        let table = if op.dagger { &self.cdag_lnorm } else { &self.c_lnorm };
        table[op.orbital][block]
    }
}
