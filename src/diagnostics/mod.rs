//! Observational statistics of trace evaluations
//!
//! `compute` hands one [`TraceSample`] per full evaluation to an installed
//! [`DiagnosticsSink`]. Nothing flows back into the algorithm.

mod histogram;

pub use histogram::{Histogram, SegmentHistogram};

use std::cell::RefCell;
use std::fmt::{self, Debug};
use std::rc::Rc;

/// Scalar summary of one trace evaluation
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "visualize", derive(serde::Serialize))]
pub struct TraceSample {
    /// Blocks mapped to themselves by the whole sequence (pruned included)
    pub n_blocks_at_root: usize,
    /// Blocks left after pruning
    pub n_blocks_kept: usize,
    /// Block with the largest bound
    pub dominant_block_bound: Option<usize>,
    /// Block with the largest `|trace|` contribution
    pub dominant_block_trace: Option<usize>,
    /// Ground energy of `dominant_block_bound` above the global ground state
    pub dominant_energy_bound: Option<f64>,
    /// Ground energy of `dominant_block_trace` above the global ground state
    pub dominant_energy_trace: Option<f64>,
    /// Signed trace
    pub trace: f64,
    /// Sum of `|trace|` over evaluated blocks
    pub trace_abs_sum: f64,
    /// Norm weight over evaluated blocks
    pub norm: f64,
    /// Cheap bound over kept blocks
    pub bound: f64,
    /// Contribution of the block evaluated first
    pub first_term: Option<f64>,
    /// Contribution of the block evaluated second
    pub second_term: Option<f64>,
}

/// Receiver of trace samples
pub trait DiagnosticsSink: Debug {
    /// Take one sample into account
    fn record(&mut self, sample: &TraceSample);
}

impl<T: DiagnosticsSink> DiagnosticsSink for Rc<RefCell<T>> {
    fn record(&mut self, sample: &TraceSample) {
        self.borrow_mut().record(sample);
    }
}

/// The standard set of histograms over trace samples
#[derive(Debug, Clone)]
#[cfg_attr(feature = "visualize", derive(serde::Serialize))]
pub struct TraceHistograms {
    /// Number of blocks surviving to the root
    pub n_blocks_at_root: Histogram,
    /// Number of blocks kept after pruning
    pub n_blocks_kept: Histogram,
    /// Dominant block by bound
    pub dominant_block_bound: Histogram,
    /// Dominant block by trace
    pub dominant_block_trace: Histogram,
    /// Energy of the dominant block by bound
    pub dominant_energy_bound: SegmentHistogram,
    /// Energy of the dominant block by trace
    pub dominant_energy_trace: SegmentHistogram,
    /// `trace / norm`
    pub trace_over_norm: SegmentHistogram,
    /// `|trace| / norm`
    pub trace_abs_over_norm: SegmentHistogram,
    /// `trace / Σ|trace_b|`
    pub trace_over_trace_abs: SegmentHistogram,
    /// `trace / bound`
    pub trace_over_bound: SegmentHistogram,
    /// `|second term| / |first term|` over the two blocks evaluated first,
    /// in \[0, 1\] because blocks are evaluated by decreasing bound
    pub abs_second_term_over_abs_first_term: SegmentHistogram,
    /// `first term / trace`
    pub first_term_over_trace: SegmentHistogram,
    samples: u64,
}

impl TraceHistograms {
    /// Histograms sized for `n_blocks` blocks
    pub fn new(n_blocks: usize) -> Self {
        let fraction = || SegmentHistogram::new(0.0, 1.5, 100);
        let unit = || SegmentHistogram::new(0.0, 1.0, 100);
        let energy = || SegmentHistogram::new(0.0, 100.0, 100);
        Self {
            n_blocks_at_root: Histogram::new(n_blocks + 1),
            n_blocks_kept: Histogram::new(n_blocks + 1),
            dominant_block_bound: Histogram::new(n_blocks),
            dominant_block_trace: Histogram::new(n_blocks),
            dominant_energy_bound: energy(),
            dominant_energy_trace: energy(),
            trace_over_norm: fraction(),
            trace_abs_over_norm: fraction(),
            trace_over_trace_abs: fraction(),
            trace_over_bound: fraction(),
            abs_second_term_over_abs_first_term: unit(),
            first_term_over_trace: unit(),
            samples: 0,
        }
    }

    /// Number of samples recorded
    pub fn samples(&self) -> u64 {
        self.samples
    }

    fn named_segments(&self) -> [(&'static str, &SegmentHistogram); 8] {
        [
            ("dominant_energy_bound", &self.dominant_energy_bound),
            ("dominant_energy_trace", &self.dominant_energy_trace),
            ("trace_over_norm", &self.trace_over_norm),
            ("trace_abs_over_norm", &self.trace_abs_over_norm),
            ("trace_over_trace_abs", &self.trace_over_trace_abs),
            ("trace_over_bound", &self.trace_over_bound),
            (
                "abs_second_term_over_abs_first_term",
                &self.abs_second_term_over_abs_first_term,
            ),
            ("first_term_over_trace", &self.first_term_over_trace),
        ]
    }
}

fn ratio(num: f64, den: f64) -> Option<f64> {
    (den != 0.0).then(|| num / den)
}

impl DiagnosticsSink for TraceHistograms {
    fn record(&mut self, sample: &TraceSample) {
        self.samples += 1;
        self.n_blocks_at_root.add(sample.n_blocks_at_root);
        self.n_blocks_kept.add(sample.n_blocks_kept);
        if let Some(b) = sample.dominant_block_bound {
            self.dominant_block_bound.add(b);
        }
        if let Some(b) = sample.dominant_block_trace {
            self.dominant_block_trace.add(b);
        }
        if let Some(e) = sample.dominant_energy_bound {
            self.dominant_energy_bound.add(e);
        }
        if let Some(e) = sample.dominant_energy_trace {
            self.dominant_energy_trace.add(e);
        }

        let trace = sample.trace;
        if let Some(r) = ratio(trace, sample.norm) {
            self.trace_over_norm.add(r);
        }
        if let Some(r) = ratio(trace.abs(), sample.norm) {
            self.trace_abs_over_norm.add(r);
        }
        if let Some(r) = ratio(trace, sample.trace_abs_sum) {
            self.trace_over_trace_abs.add(r);
        }
        if let Some(r) = ratio(trace, sample.bound) {
            self.trace_over_bound.add(r);
        }
        if let (Some(first), Some(second)) = (sample.first_term, sample.second_term) {
            if let Some(r) = ratio(second.abs(), first.abs()) {
                self.abs_second_term_over_abs_first_term.add(r);
            }
        }
        if let Some(first) = sample.first_term {
            if let Some(r) = ratio(first, trace) {
                self.first_term_over_trace.add(r);
            }
        }
    }
}

impl fmt::Display for TraceHistograms {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "samples: {}", self.samples)?;
        let counts = [
            ("n_blocks_at_root", &self.n_blocks_at_root),
            ("n_blocks_kept", &self.n_blocks_kept),
            ("dominant_block_bound", &self.dominant_block_bound),
            ("dominant_block_trace", &self.dominant_block_trace),
        ];
        for (name, h) in counts {
            match (h.mean(), h.mode()) {
                (Some(mean), Some(mode)) => {
                    writeln!(f, "{:<24} mean {:>8.3}  mode {}", name, mean, mode)?
                }
                _ => writeln!(f, "{:<24} (empty)", name)?,
            }
        }
        for (name, h) in self.named_segments() {
            match h.mean() {
                Some(mean) => writeln!(
                    f,
                    "{:<24} mean {:>8.3}  lost {}",
                    name,
                    mean,
                    h.n_lost()
                )?,
                None => writeln!(f, "{:<24} (empty)", name)?,
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> TraceSample {
        TraceSample {
            n_blocks_at_root: 2,
            n_blocks_kept: 1,
            dominant_block_bound: Some(1),
            dominant_block_trace: Some(1),
            dominant_energy_bound: Some(0.5),
            dominant_energy_trace: Some(0.5),
            trace: 0.8,
            trace_abs_sum: 1.0,
            norm: 1.0,
            bound: 1.0,
            first_term: Some(0.9),
            second_term: Some(-0.1),
        }
    }

    #[test]
    fn test_histograms_record_sample() {
        let mut h = TraceHistograms::new(4);
        h.record(&sample());
        assert_eq!(h.samples(), 1);
        assert_eq!(h.n_blocks_kept.bins()[1], 1);
        assert_eq!(h.trace_over_bound.n_data(), 1);
        assert!((h.trace_over_bound.mean().unwrap() - 0.8).abs() < 1e-12);
        // 0.9 / 0.8 lies outside [0, 1]
        assert_eq!(h.first_term_over_trace.n_lost(), 1);
        // smaller term on top, whatever the sign
        let ratio = h.abs_second_term_over_abs_first_term.mean().unwrap();
        assert!((ratio - 0.1 / 0.9).abs() < 1e-12, "{ratio}");
    }

    #[test]
    fn test_shared_sink_sees_samples() {
        let shared = Rc::new(RefCell::new(TraceHistograms::new(2)));
        let mut sink: Box<dyn DiagnosticsSink> = Box::new(Rc::clone(&shared));
        sink.record(&sample());
        assert_eq!(shared.borrow().samples(), 1);
        assert!(shared.borrow().to_string().contains("trace_over_bound"));
    }
}
