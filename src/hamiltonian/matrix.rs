//! Small dense matrices
//!
//! Row-major `f64` storage. Blocks of a local Hamiltonian are small, so the
//! products here are plain triple loops.

use std::fmt;

/// Dense row-major matrix
#[derive(Clone, PartialEq)]
pub struct DenseMatrix {
    rows: usize,
    cols: usize,
    data: Vec<f64>,
}

impl DenseMatrix {
    /// Matrix of zeros
    pub fn zeros(rows: usize, cols: usize) -> Self {
        Self {
            rows,
            cols,
            data: vec![0.0; rows * cols],
        }
    }

    /// Identity of dimension `n`
    pub fn identity(n: usize) -> Self {
        let mut m = Self::zeros(n, n);
        for i in 0..n {
            m.data[i * n + i] = 1.0;
        }
        m
    }

    /// Diagonal matrix with the given entries
    pub fn from_diagonal(diagonal: &[f64]) -> Self {
        let n = diagonal.len();
        let mut m = Self::zeros(n, n);
        for (i, &d) in diagonal.iter().enumerate() {
            m.data[i * n + i] = d;
        }
        m
    }

    /// Build from row-major data; `None` if the length does not match
    pub fn from_row_major(rows: usize, cols: usize, data: Vec<f64>) -> Option<Self> {
        if data.len() != rows * cols {
            return None;
        }
        Some(Self { rows, cols, data })
    }

    /// Build from a list of rows; `None` if the rows are ragged
    pub fn from_rows(rows: &[&[f64]]) -> Option<Self> {
        let cols = rows.first().map_or(0, |r| r.len());
        if rows.iter().any(|r| r.len() != cols) {
            return None;
        }
        let data = rows.iter().flat_map(|r| r.iter().copied()).collect();
        Some(Self {
            rows: rows.len(),
            cols,
            data,
        })
    }

    /// Number of rows
    #[inline]
    pub fn rows(&self) -> usize {
        self.rows
    }

    /// Number of columns
    #[inline]
    pub fn cols(&self) -> usize {
        self.cols
    }

    /// Entry (i, j)
    #[inline]
    pub fn get(&self, i: usize, j: usize) -> f64 {
        self.data[i * self.cols + j]
    }

    /// Set entry (i, j)
    #[inline]
    pub fn set(&mut self, i: usize, j: usize, value: f64) {
        self.data[i * self.cols + j] = value;
    }

    /// Matrix product `self * rhs`
    pub fn matmul(&self, rhs: &DenseMatrix) -> DenseMatrix {
        debug_assert_eq!(self.cols, rhs.rows, "inner dimensions must agree");
        let (m, k, n) = (self.rows, self.cols, rhs.cols);
        let mut out = DenseMatrix::zeros(m, n);
        for i in 0..m {
            for p in 0..k {
                let a = self.data[i * k + p];
                if a == 0.0 {
                    continue;
                }
                let row = &rhs.data[p * n..(p + 1) * n];
                let dst = &mut out.data[i * n..(i + 1) * n];
                for (d, &b) in dst.iter_mut().zip(row) {
                    *d += a * b;
                }
            }
        }
        out
    }

    /// Multiply row `i` by `factors[i]`, i.e. `diag(factors) * self`
    pub fn scale_rows(&mut self, factors: &[f64]) {
        debug_assert_eq!(factors.len(), self.rows);
        for (row, &f) in self.data.chunks_mut(self.cols.max(1)).zip(factors) {
            row.iter_mut().for_each(|x| *x *= f);
        }
    }

    /// Multiply column `j` by `factors[j]`, i.e. `self * diag(factors)`
    pub fn scale_cols(&mut self, factors: &[f64]) {
        debug_assert_eq!(factors.len(), self.cols);
        for row in self.data.chunks_mut(self.cols.max(1)) {
            for (x, &f) in row.iter_mut().zip(factors) {
                *x *= f;
            }
        }
    }

    /// Apply `e^{-dtau E}` from the left, `E` being the diagonal of eigenvalues
    pub fn evolve_rows(&mut self, dtau: f64, eigenvalues: &[f64]) {
        if dtau == 0.0 {
            return;
        }
        let factors: Vec<f64> = eigenvalues.iter().map(|e| (-dtau * e).exp()).collect();
        self.scale_rows(&factors);
    }

    /// Sum of the diagonal
    pub fn trace(&self) -> f64 {
        (0..self.rows.min(self.cols)).map(|i| self.get(i, i)).sum()
    }

    /// Frobenius norm, an upper bound of the spectral norm
    pub fn frobenius_norm(&self) -> f64 {
        self.data.iter().map(|x| x * x).sum::<f64>().sqrt()
    }

    /// Largest absolute entry-wise difference, `INFINITY` on shape mismatch
    pub fn max_abs_diff(&self, other: &DenseMatrix) -> f64 {
        if self.rows != other.rows || self.cols != other.cols {
            return f64::INFINITY;
        }
        self.data
            .iter()
            .zip(&other.data)
            .map(|(a, b)| (a - b).abs())
            .fold(0.0, f64::max)
    }

    /// Transpose
    pub fn transpose(&self) -> DenseMatrix {
        let mut out = DenseMatrix::zeros(self.cols, self.rows);
        for i in 0..self.rows {
            for j in 0..self.cols {
                out.set(j, i, self.get(i, j));
            }
        }
        out
    }
}

impl fmt::Debug for DenseMatrix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DenseMatrix({}x{})", self.rows, self.cols)?;
        f.debug_list()
            .entries(self.data.chunks(self.cols.max(1)))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_matmul_rectangular() {
        let a = DenseMatrix::from_rows(&[&[1.0, 2.0, 3.0]]).unwrap();
        let b = DenseMatrix::from_rows(&[&[1.0], &[0.0], &[-1.0]]).unwrap();
        let c = a.matmul(&b);
        assert_eq!((c.rows(), c.cols()), (1, 1));
        assert_eq!(c.get(0, 0), -2.0);
    }

    #[test]
    fn test_evolution_scales_rows() {
        let mut m = DenseMatrix::identity(2);
        m.evolve_rows(2.0, &[0.0, 1.0]);
        assert_eq!(m.get(0, 0), 1.0);
        assert!((m.get(1, 1) - (-2.0f64).exp()).abs() < 1e-15);
        assert_eq!(m.trace(), 1.0 + (-2.0f64).exp());
    }

    #[test]
    fn test_norm_and_diff() {
        let a = DenseMatrix::from_rows(&[&[3.0, 0.0], &[0.0, 4.0]]).unwrap();
        assert_eq!(a.frobenius_norm(), 5.0);
        assert_eq!(a.max_abs_diff(&a.transpose()), 0.0);
        assert_eq!(a.max_abs_diff(&DenseMatrix::zeros(1, 2)), f64::INFINITY);
    }
}
