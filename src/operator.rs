//! Imaginary-time points and operator descriptors
//!
//! Time lives on the circle [0, β). Keys are compared exactly: two operators
//! at the same time are a usage error, never merged.

use std::cmp::Ordering;
use std::fmt;

/// Point on the imaginary-time axis
#[derive(Debug, Clone, Copy)]
#[cfg_attr(feature = "visualize", derive(serde::Serialize, serde::Deserialize))]
pub struct TimePoint(f64);

impl TimePoint {
    /// Wrap a raw time value
    pub fn new(tau: f64) -> Self {
        Self(tau)
    }

    /// Raw time value
    #[inline]
    pub fn value(self) -> f64 {
        self.0
    }

    /// Distance from `earlier` to `self` (non-negative when ordered)
    #[inline]
    pub fn since(self, earlier: TimePoint) -> f64 {
        self.0 - earlier.0
    }
}

impl PartialEq for TimePoint {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for TimePoint {}

impl PartialOrd for TimePoint {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TimePoint {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0)
    }
}

impl fmt::Display for TimePoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "τ={}", self.0)
    }
}

/// Description of one operator insertion
///
/// `block_index`/`inner_index` locate the operator in the hybridisation
/// (Green's function) structure of the sampler; `orbital` is the linear index
/// used to look up its matrices in the Hamiltonian eigenbasis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "visualize", derive(serde::Serialize, serde::Deserialize))]
pub struct OpDesc {
    /// Hybridisation block the operator belongs to
    pub block_index: usize,
    /// Index inside that block
    pub inner_index: usize,
    /// Creation (true) or annihilation (false)
    pub dagger: bool,
    /// Linear orbital index
    pub orbital: usize,
}

impl OpDesc {
    /// Creation operator on `orbital`, one hybridisation block per orbital
    pub fn creation(orbital: usize) -> Self {
        Self {
            block_index: orbital,
            inner_index: 0,
            dagger: true,
            orbital,
        }
    }

    /// Annihilation operator on `orbital`, one hybridisation block per orbital
    pub fn annihilation(orbital: usize) -> Self {
        Self {
            dagger: false,
            ..Self::creation(orbital)
        }
    }
}

impl fmt::Display for OpDesc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let dag = if self.dagger { "c†" } else { "c" };
        write!(f, "{}[{}]", dag, self.orbital)
    }
}
