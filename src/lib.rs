//! # Incremental impurity trace evaluation
//!
//! This library evaluates the trace of a time-ordered product of local
//! fermionic operators and imaginary-time evolution factors,
//!
//! ```text
//! Tr[ e^{-(β-τ_n)H} O_n e^{-(τ_n-τ_{n-1})H} ... O_1 e^{-τ_1 H} ]
//! ```
//!
//! for a Hamiltonian that is block diagonal in its symmetry sectors. It is the
//! hot path of a continuous-time Monte Carlo sampler, so everything is built
//! around cheap incremental updates.
//!
//! ## Core Algorithm
//!
//! 1. **Operator tree**: operators live in a left-leaning red-black tree keyed
//!    by time, stored in an index arena
//! 2. **Per-node cache**: every node keeps, for every block, the block reached
//!    by its subtree, a conservative bound and a lazily built matrix
//! 3. **Dirty bits**: edits flag the root-to-node path, refresh only walks
//!    flagged nodes
//! 4. **Transactions**: `try_*` edits are cheap and reversible, `confirm_*`
//!    rebalances and refreshes, `cancel_*` restores the tree exactly
//!
//! ## Usage Example
//!
//! ```ignore
//! use impurity_trace::{BlockDiag, ImpurityTrace, OpDesc, TimePoint, TraceConfig};
//!
//! let diag = BlockDiag::density_density(1, &[-0.5], 0.0)?;
//! let mut trace = ImpurityTrace::new(TraceConfig::new(10.0, 1), diag)?;
//! trace.try_insert(TimePoint::new(2.0), OpDesc::creation(0))?;
//! trace.try_insert(TimePoint::new(1.0), OpDesc::annihilation(0))?;
//! let (bound, value) = trace.compute(-1.0, 0.0)?;
//! trace.confirm_insert()?;
//! ```

#![warn(missing_docs, missing_debug_implementations)]
#![allow(clippy::new_without_default)]

// Core modules - each implements a key component of the algorithm
pub mod hamiltonian; // Block-diagonal Hamiltonian interface
pub mod operator; // Time points and operator descriptors
pub mod tree; // Arena-backed operator tree
pub mod cache; // Block tables, bounds, matrices
pub mod trace; // Bound/trace evaluation
pub mod transaction; // try/confirm/cancel moves
pub mod diagnostics; // Histogram sink

// Re-exports for convenience
pub use cache::{RefreshStats, Resolution};
pub use diagnostics::{DiagnosticsSink, Histogram, SegmentHistogram, TraceHistograms, TraceSample};
pub use hamiltonian::{AtomDiag, BlockDiag, BlockDiagBuilder, DenseMatrix, DiagError};
pub use operator::{OpDesc, TimePoint};
pub use trace::BlockMatrix;
pub use transaction::MoveKind;
pub use tree::{NodeId, OpTree};

use hamiltonian::BlockSpectrum;
use thiserror::Error;
use tree::{NodePool, TrialLink};

/// Configuration parameters for trace evaluation
#[derive(Debug, Clone)]
#[cfg_attr(feature = "visualize", derive(serde::Serialize, serde::Deserialize))]
pub struct TraceConfig {
    /// Inverse temperature β, length of the imaginary-time circle
    pub beta: f64,

    /// Number of orbital flavours the operators may carry
    pub n_orbitals: usize,

    /// Report a norm-based weight instead of the cheap bound
    pub use_norm_as_weight: bool,

    /// Accumulate per-block density matrices in `compute`
    pub measure_density_matrix: bool,

    /// Replace cached bound estimates by the norm of materialised matrices
    pub use_norm_of_matrices_in_cache: bool,

    /// Maximum number of simultaneous trial insertions
    pub trial_pool_capacity: usize,

    /// Relative magnitude below which blocks are pruned
    pub prune_epsilon: f64,

    /// Compare every cache against a linear recomputation after each move
    pub check_integrity: bool,
}

impl TraceConfig {
    /// Default configuration for a given β and orbital count
    pub fn new(beta: f64, n_orbitals: usize) -> Self {
        Self {
            beta,
            n_orbitals,
            use_norm_as_weight: false,
            measure_density_matrix: false,
            use_norm_of_matrices_in_cache: true,
            trial_pool_capacity: 4, // paired insertions, twice
            prune_epsilon: 1e-15,
            check_integrity: false,
        }
    }

    /// Reject configurations the evaluator cannot work with
    pub fn validate(&self) -> Result<(), TraceError> {
        if !(self.beta.is_finite() && self.beta > 0.0) {
            return Err(TraceError::InvalidConfig(format!(
                "beta must be positive and finite, got {}",
                self.beta
            )));
        }
        if self.n_orbitals == 0 {
            return Err(TraceError::InvalidConfig(
                "at least one orbital is required".to_string(),
            ));
        }
        if self.trial_pool_capacity == 0 {
            return Err(TraceError::InvalidConfig(
                "trial pool capacity must be greater than zero".to_string(),
            ));
        }
        if !(self.prune_epsilon > 0.0 && self.prune_epsilon < 1.0) {
            return Err(TraceError::InvalidConfig(format!(
                "prune epsilon must lie in (0, 1), got {}",
                self.prune_epsilon
            )));
        }
        Ok(())
    }
}

/// Errors that can occur while maintaining or evaluating the trace
#[derive(Error, Debug)]
pub enum TraceError {
    /// Invalid evaluator configuration
    #[error("invalid trace configuration: {0}")]
    InvalidConfig(String),

    /// Hamiltonian data rejected
    #[error("diagonalization error: {0}")]
    Diag(#[from] DiagError),

    /// Two operators at the same imaginary time
    #[error("an operator already exists at tau = {0}")]
    DuplicateKey(f64),

    /// Time point outside [0, β)
    #[error("tau = {tau} lies outside [0, {beta})")]
    TimeOutOfRange {
        /// Offending time
        tau: f64,
        /// Inverse temperature
        beta: f64,
    },

    /// Operator refers to an orbital the Hamiltonian does not have
    #[error("orbital {orbital} out of range (n_orbitals = {n_orbitals})")]
    UnknownOrbital {
        /// Requested orbital
        orbital: usize,
        /// Number of orbitals
        n_orbitals: usize,
    },

    /// More trial insertions than the pool holds
    #[error("more than {capacity} trial insertions in one move")]
    TrialPoolExhausted {
        /// Configured pool capacity
        capacity: usize,
    },

    /// A conflicting transaction has not been resolved yet
    #[error("improper use of {requested}: a {pending} move is still pending")]
    TransactionPending {
        /// Move that was attempted
        requested: MoveKind,
        /// Move that blocks it
        pending: MoveKind,
    },

    /// `try_delete` asked for a match that does not exist
    #[error("cannot delete operator #{n}: only {available} match")]
    DeleteIndexOutOfRange {
        /// Requested match index (0-based)
        n: usize,
        /// Number of matching operators
        available: usize,
    },

    /// The selected operator is already flagged for deletion
    #[error("operator at tau = {0} is already flagged for deletion")]
    AlreadyFlagged(f64),

    /// Cached data disagrees with a linear recomputation
    #[error("cache integrity failure at tau = {tau}, block {block}: {detail}")]
    IntegrityMismatch {
        /// Key of the inconsistent node
        tau: f64,
        /// Block index of the inconsistent entry
        block: usize,
        /// What differed
        detail: String,
    },
}

/// Trace of an impurity problem, maintained incrementally
///
/// Owns the operator tree, its node pools and the per-block evaluation
/// results. One instance per Monte Carlo chain.
#[derive(Debug)]
pub struct ImpurityTrace<D: AtomDiag> {
    config: TraceConfig,
    diag: D,
    spectrum: BlockSpectrum,

    tree: OpTree,
    /// Live size plus pending trial insertions minus pending deletions
    tree_size: usize,

    trial_nodes: NodePool,
    trial_links: Vec<TrialLink>,
    removed_nodes: Vec<(NodeId, TimePoint)>,
    backup_nodes: NodePool,
    replace_pending: bool,

    atomic: trace::AtomicData,
    density_matrix: Vec<BlockMatrix>,
    stats: RefreshStats,
    sink: Option<Box<dyn DiagnosticsSink>>,
}

impl<D: AtomDiag> ImpurityTrace<D> {
    /// Create an empty operator sequence for the given Hamiltonian
    pub fn new(config: TraceConfig, diag: D) -> Result<Self, TraceError> {
        config.validate()?;
        if diag.n_orbitals() != config.n_orbitals {
            return Err(TraceError::InvalidConfig(format!(
                "configuration has {} orbitals, Hamiltonian has {}",
                config.n_orbitals,
                diag.n_orbitals()
            )));
        }

        let spectrum = BlockSpectrum::new(&diag)?;
        let n_blocks = spectrum.n_blocks();
        let mut tree = OpTree::new(n_blocks);
        let trial_nodes = NodePool::with_capacity(tree.arena_mut(), config.trial_pool_capacity);
        let atomic = trace::AtomicData::new(&diag, &spectrum, config.beta);
        let density_matrix = atomic.rho.clone();

        Ok(Self {
            config,
            diag,
            spectrum,
            tree,
            tree_size: 0,
            trial_nodes,
            trial_links: Vec::new(),
            removed_nodes: Vec::new(),
            backup_nodes: NodePool::default(),
            replace_pending: false,
            atomic,
            density_matrix,
            stats: RefreshStats::default(),
            sink: None,
        })
    }

    /// Evaluation parameters
    pub fn config(&self) -> &TraceConfig {
        &self.config
    }

    /// The Hamiltonian data this trace was built on
    pub fn diag(&self) -> &D {
        &self.diag
    }

    /// Read access to the operator tree
    pub fn tree(&self) -> &OpTree {
        &self.tree
    }

    /// Number of operators, counting pending trial insertions and deletions
    pub fn tree_size(&self) -> usize {
        self.tree_size
    }

    /// Work counters of the cache refresh
    pub fn refresh_stats(&self) -> &RefreshStats {
        &self.stats
    }

    /// Install a sink receiving one sample per non-empty `compute`
    pub fn set_diagnostics_sink(&mut self, sink: Box<dyn DiagnosticsSink>) {
        self.sink = Some(sink);
    }

    /// Remove and return the installed diagnostics sink
    pub fn take_diagnostics_sink(&mut self) -> Option<Box<dyn DiagnosticsSink>> {
        self.sink.take()
    }

    /// Keys of the current sequence in time order, trial nodes included
    pub fn keys(&self) -> Vec<TimePoint> {
        self.tree.keys()
    }

    /// Number of confirmed operators with the given block index and dagger
    /// flag, i.e. the valid range of `n` in `try_delete`
    pub fn count_matching(&self, block_index: usize, dagger: bool) -> usize {
        self.tree
            .iter()
            .filter(|&id| {
                let op = self.tree.node(id).op();
                op.dagger == dagger && op.block_index == block_index && !self.is_trial(id)
            })
            .count()
    }
}

impl<D: AtomDiag> Drop for ImpurityTrace<D> {
    fn drop(&mut self) {
        // trial nodes must never stay linked into the tree being torn down
        self.detach_trial_nodes();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = TraceConfig::new(10.0, 2);
        assert!(config.validate().is_ok());
        assert_eq!(config.trial_pool_capacity, 4);
    }

    #[test]
    fn test_config_rejects_bad_beta() {
        let config = TraceConfig {
            beta: -1.0,
            ..TraceConfig::new(10.0, 2)
        };
        assert!(matches!(config.validate(), Err(TraceError::InvalidConfig(_))));
    }

    #[test]
    fn test_orbital_count_must_match_hamiltonian() {
        let diag = BlockDiag::density_density(2, &[0.0, 0.0], 1.0).unwrap();
        let result = ImpurityTrace::new(TraceConfig::new(5.0, 3), diag);
        assert!(matches!(result, Err(TraceError::InvalidConfig(_))));
    }
}
