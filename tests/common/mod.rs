#![allow(dead_code)]

use impurity_trace::{
    AtomDiag, BlockDiag, DenseMatrix, ImpurityTrace, OpDesc, TimePoint, TraceConfig,
};

const HALF: f64 = std::f64::consts::FRAC_1_SQRT_2;

/// One orbital, blocks {empty, occupied} with energies `e0`, `e1`
pub fn two_block(e0: f64, e1: f64) -> BlockDiag {
    let one = || DenseMatrix::identity(1);
    BlockDiag::builder(1)
        .block(vec![e0])
        .block(vec![e1])
        .connect(0, true, 0, 1, one())
        .connect(0, false, 1, 0, one())
        .build()
        .expect("two-block Hamiltonian is valid")
}

/// Two sites with hopping `t` and interaction `u`, blocks by particle number
/// with dimensions {1, 2, 1}
///
/// The one-particle block is written in the bonding/antibonding basis.
pub fn hopping_dimer(t: f64, u: f64) -> BlockDiag {
    let col = |a: f64, b: f64| DenseMatrix::from_rows(&[&[a], &[b]]).expect("column");
    let row = |a: f64, b: f64| DenseMatrix::from_rows(&[&[a, b]]).expect("row");
    BlockDiag::builder(2)
        .block(vec![0.0])
        .block(vec![-t, t])
        .block(vec![u])
        .connect(0, true, 0, 1, col(HALF, HALF))
        .connect(1, true, 0, 1, col(HALF, -HALF))
        .connect(0, true, 1, 2, row(HALF, -HALF))
        .connect(1, true, 1, 2, row(-HALF, -HALF))
        .connect(0, false, 1, 0, row(HALF, HALF))
        .connect(1, false, 1, 0, row(HALF, -HALF))
        .connect(0, false, 2, 1, col(HALF, -HALF))
        .connect(1, false, 2, 1, col(-HALF, -HALF))
        .build()
        .expect("dimer Hamiltonian is valid")
}

/// Density-density atom with `n` orbitals at `-mu` and interaction `u`
pub fn hubbard(n: usize, mu: f64, u: f64) -> BlockDiag {
    BlockDiag::density_density(n, &vec![-mu; n], u).expect("Hubbard atom is valid")
}

/// Density-density atom with arbitrary levels and interaction `u`
pub fn hubbard_levels(epsilon: &[f64], u: f64) -> BlockDiag {
    BlockDiag::density_density(epsilon.len(), epsilon, u).expect("atom is valid")
}

pub fn trace_with<D: AtomDiag>(diag: D, beta: f64, check_integrity: bool) -> ImpurityTrace<D> {
    let config = TraceConfig {
        check_integrity,
        ..TraceConfig::new(beta, diag.n_orbitals())
    };
    ImpurityTrace::new(config, diag).expect("trace initialises")
}

pub fn op(orbital: usize, dagger: bool) -> OpDesc {
    if dagger {
        OpDesc::creation(orbital)
    } else {
        OpDesc::annihilation(orbital)
    }
}

/// Insert and confirm one operator at a time
pub fn fill<D: AtomDiag>(trace: &mut ImpurityTrace<D>, ops: &[(f64, OpDesc)]) {
    for &(tau, op) in ops {
        trace
            .try_insert(TimePoint::new(tau), op)
            .expect("insertion accepted");
        trace.confirm_insert().expect("insertion confirmed");
    }
}

/// Reference trace by direct multiplication over the time-sorted operators
///
/// Returns `(trace, Σ_b |trace_b|)`.
pub fn linear_trace<D: AtomDiag>(diag: &D, beta: f64, ops: &[(f64, OpDesc)]) -> (f64, f64) {
    let mut sorted = ops.to_vec();
    sorted.sort_by(|a, b| a.0.total_cmp(&b.0));

    let mut total = 0.0;
    let mut abs_sum = 0.0;
    'blocks: for b in 0..diag.n_blocks() {
        let mut block = b;
        let mut m = DenseMatrix::identity(diag.block_dim(b));
        let mut previous = 0.0;
        for &(tau, op) in &sorted {
            m.evolve_rows(tau - previous, diag.eigenvalues(block));
            previous = tau;
            let Some(target) = diag.connection(&op, block) else {
                continue 'blocks;
            };
            let matrix = diag.op_matrix(&op, block).expect("connected operator has a matrix");
            m = matrix.matmul(&m);
            block = target;
        }
        if block != b {
            continue;
        }
        m.evolve_rows(beta - previous, diag.eigenvalues(block));
        let value = m.trace();
        total += value;
        abs_sum += value.abs();
    }
    (total, abs_sum)
}

pub fn assert_close(actual: f64, expected: f64, scale: f64) {
    let tolerance = 1e-9 * scale.max(1.0);
    assert!(
        (actual - expected).abs() <= tolerance,
        "expected {expected}, got {actual} (tolerance {tolerance})"
    );
}
