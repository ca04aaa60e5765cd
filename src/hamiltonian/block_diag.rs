//! Concrete block-diagonal Hamiltonian
//!
//! `BlockDiag` stores eigenvalues and operator matrices as handed over by a
//! diagonalisation. It can be assembled block by block with
//! [`BlockDiagBuilder`], or generated for density-density interactions where
//! every Fock state is its own block.

use super::{AtomDiag, DenseMatrix, DiagError};

/// Target block and matrix of one operator acting on one block
#[derive(Debug, Clone)]
struct Connection {
    target: usize,
    matrix: DenseMatrix,
}

/// Eigen-decomposed local Hamiltonian with its operator matrices
#[derive(Debug, Clone)]
pub struct BlockDiag {
    n_orbitals: usize,
    eigenvalues: Vec<Vec<f64>>,
    /// `c[orbital][block]`
    c: Vec<Vec<Option<Connection>>>,
    /// `c†[orbital][block]`
    cdag: Vec<Vec<Option<Connection>>>,
}

impl BlockDiag {
    /// Start assembling a Hamiltonian with `n_orbitals` flavours
    pub fn builder(n_orbitals: usize) -> BlockDiagBuilder {
        BlockDiagBuilder {
            n_orbitals,
            eigenvalues: Vec::new(),
            connections: Vec::new(),
        }
    }

    /// Density-density Hamiltonian `Σ ε_i n_i + U Σ_{i<j} n_i n_j`
    ///
    /// Every Fock state `s` (bit `i` = occupation of orbital `i`) forms a
    /// one-dimensional block with index `s`. Operator signs follow the usual
    /// ordering convention `c†_i |s⟩ = (-1)^{Σ_{j<i} n_j} |s + e_i⟩`.
    pub fn density_density(
        n_orbitals: usize,
        epsilon: &[f64],
        u: f64,
    ) -> Result<BlockDiag, DiagError> {
        if n_orbitals > 16 {
            return Err(DiagError::TooManyOrbitals(n_orbitals));
        }
        if epsilon.len() != n_orbitals {
            return Err(DiagError::OrbitalOutOfRange {
                orbital: epsilon.len(),
                n_orbitals,
            });
        }

        let n_states = 1usize << n_orbitals;
        let mut builder = BlockDiag::builder(n_orbitals);
        for s in 0..n_states {
            let occupied: Vec<usize> = (0..n_orbitals).filter(|i| s & (1 << i) != 0).collect();
            let mut energy: f64 = occupied.iter().map(|&i| epsilon[i]).sum();
            let n = occupied.len() as f64;
            energy += u * n * (n - 1.0) / 2.0;
            builder = builder.block(vec![energy]);
        }

        for s in 0..n_states {
            for i in 0..n_orbitals {
                let sign = if (s & ((1 << i) - 1)).count_ones() % 2 == 0 {
                    1.0
                } else {
                    -1.0
                };
                let m = DenseMatrix::from_diagonal(&[sign]);
                if s & (1 << i) == 0 {
                    builder = builder.connect(i, true, s, s | (1 << i), m);
                } else {
                    builder = builder.connect(i, false, s, s & !(1 << i), m);
                }
            }
        }
        builder.build()
    }
}

impl AtomDiag for BlockDiag {
    fn n_blocks(&self) -> usize {
        self.eigenvalues.len()
    }

    fn n_orbitals(&self) -> usize {
        self.n_orbitals
    }

    fn block_dim(&self, block: usize) -> usize {
        self.eigenvalues[block].len()
    }

    fn eigenvalues(&self, block: usize) -> &[f64] {
        &self.eigenvalues[block]
    }

    fn c_connection(&self, orbital: usize, block: usize) -> Option<usize> {
        self.c[orbital][block].as_ref().map(|c| c.target)
    }

    fn cdag_connection(&self, orbital: usize, block: usize) -> Option<usize> {
        self.cdag[orbital][block].as_ref().map(|c| c.target)
    }

    fn c_matrix(&self, orbital: usize, block: usize) -> Option<&DenseMatrix> {
        self.c[orbital][block].as_ref().map(|c| &c.matrix)
    }

    fn cdag_matrix(&self, orbital: usize, block: usize) -> Option<&DenseMatrix> {
        self.cdag[orbital][block].as_ref().map(|c| &c.matrix)
    }
}

/// Incremental construction of a [`BlockDiag`]
#[derive(Debug, Clone)]
pub struct BlockDiagBuilder {
    n_orbitals: usize,
    eigenvalues: Vec<Vec<f64>>,
    connections: Vec<(usize, bool, usize, usize, DenseMatrix)>,
}

impl BlockDiagBuilder {
    /// Append a block with the given (ascending) eigenvalues
    pub fn block(mut self, eigenvalues: Vec<f64>) -> Self {
        self.eigenvalues.push(eigenvalues);
        self
    }

    /// Declare that `c[orbital]` (or `c†` if `dagger`) maps `from` to `to`
    /// with the given `dim(to) x dim(from)` matrix
    pub fn connect(
        mut self,
        orbital: usize,
        dagger: bool,
        from: usize,
        to: usize,
        matrix: DenseMatrix,
    ) -> Self {
        self.connections.push((orbital, dagger, from, to, matrix));
        self
    }

    /// Validate and freeze
    pub fn build(self) -> Result<BlockDiag, DiagError> {
        let n_blocks = self.eigenvalues.len();
        if n_blocks == 0 {
            return Err(DiagError::NoBlocks);
        }
        for (b, eigs) in self.eigenvalues.iter().enumerate() {
            if eigs.is_empty() {
                return Err(DiagError::EmptyBlock(b));
            }
            if eigs.windows(2).any(|w| w[0] > w[1]) {
                return Err(DiagError::UnsortedEigenvalues(b));
            }
        }

        let mut c = vec![vec![None; n_blocks]; self.n_orbitals];
        let mut cdag = vec![vec![None; n_blocks]; self.n_orbitals];
        for (orbital, dagger, from, to, matrix) in self.connections {
            if orbital >= self.n_orbitals {
                return Err(DiagError::OrbitalOutOfRange {
                    orbital,
                    n_orbitals: self.n_orbitals,
                });
            }
            for block in [from, to] {
                if block >= n_blocks {
                    return Err(DiagError::BlockOutOfRange { block, n_blocks });
                }
            }
            let (expected_rows, expected_cols) =
                (self.eigenvalues[to].len(), self.eigenvalues[from].len());
            if matrix.rows() != expected_rows || matrix.cols() != expected_cols {
                return Err(DiagError::DimensionMismatch {
                    rows: matrix.rows(),
                    cols: matrix.cols(),
                    expected_rows,
                    expected_cols,
                });
            }
            let table = if dagger { &mut cdag } else { &mut c };
            table[orbital][from] = Some(Connection { target: to, matrix });
        }

        Ok(BlockDiag {
            n_orbitals: self.n_orbitals,
            eigenvalues: self.eigenvalues,
            c,
            cdag,
        })
    }
}
