//! Counting histograms

/// Histogram over the integers `0..n_bins`
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "visualize", derive(serde::Serialize))]
pub struct Histogram {
    bins: Vec<u64>,
    n_data: u64,
    n_lost: u64,
}

impl Histogram {
    /// Empty histogram with `n_bins` bins
    pub fn new(n_bins: usize) -> Self {
        Self {
            bins: vec![0; n_bins],
            n_data: 0,
            n_lost: 0,
        }
    }

    /// Count `value`; values past the last bin are counted as lost
    pub fn add(&mut self, value: usize) {
        match self.bins.get_mut(value) {
            Some(bin) => {
                *bin += 1;
                self.n_data += 1;
            }
            None => self.n_lost += 1,
        }
    }

    /// Bin counts
    pub fn bins(&self) -> &[u64] {
        &self.bins
    }

    /// Number of values counted in a bin
    pub fn n_data(&self) -> u64 {
        self.n_data
    }

    /// Number of values outside the range
    pub fn n_lost(&self) -> u64 {
        self.n_lost
    }

    /// Mean of the counted values
    pub fn mean(&self) -> Option<f64> {
        if self.n_data == 0 {
            return None;
        }
        let sum: f64 = self
            .bins
            .iter()
            .enumerate()
            .map(|(i, &c)| i as f64 * c as f64)
            .sum();
        Some(sum / self.n_data as f64)
    }

    /// Most frequent value, lowest on ties
    pub fn mode(&self) -> Option<usize> {
        if self.n_data == 0 {
            return None;
        }
        let max = self.bins.iter().copied().max()?;
        self.bins.iter().position(|&c| c == max)
    }
}

/// Histogram of real values over `[min, max]` in equal-width bins
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "visualize", derive(serde::Serialize))]
pub struct SegmentHistogram {
    min: f64,
    max: f64,
    bins: Vec<u64>,
    sum: f64,
    n_data: u64,
    n_lost: u64,
}

impl SegmentHistogram {
    /// Empty histogram of `n_bins` bins covering `[min, max]`
    pub fn new(min: f64, max: f64, n_bins: usize) -> Self {
        debug_assert!(max > min && n_bins > 0);
        Self {
            min,
            max,
            bins: vec![0; n_bins],
            sum: 0.0,
            n_data: 0,
            n_lost: 0,
        }
    }

    /// Count `value`; NaN and values outside the segment are counted as lost
    pub fn add(&mut self, value: f64) {
        if !(value >= self.min && value <= self.max) {
            self.n_lost += 1;
            return;
        }
        let n = self.bins.len();
        let scaled = (value - self.min) / (self.max - self.min) * n as f64;
        let bin = (scaled as usize).min(n - 1);
        self.bins[bin] += 1;
        self.sum += value;
        self.n_data += 1;
    }

    /// Bin counts
    pub fn bins(&self) -> &[u64] {
        &self.bins
    }

    /// Centre of bin `i`
    pub fn bin_center(&self, i: usize) -> f64 {
        let width = (self.max - self.min) / self.bins.len() as f64;
        self.min + (i as f64 + 0.5) * width
    }

    /// Number of values counted in a bin
    pub fn n_data(&self) -> u64 {
        self.n_data
    }

    /// Number of values outside the segment
    pub fn n_lost(&self) -> u64 {
        self.n_lost
    }

    /// Mean of the counted values
    pub fn mean(&self) -> Option<f64> {
        (self.n_data > 0).then(|| self.sum / self.n_data as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test]
    fn test_integer_histogram() {
        let mut h = Histogram::new(3);
        for v in [0, 2, 2, 7] {
            h.add(v);
        }
        assert_eq!(h.bins(), &[1, 0, 2]);
        assert_eq!(h.n_lost(), 1);
        assert_eq!(h.mode(), Some(2));
        assert!((h.mean().unwrap() - 4.0 / 3.0).abs() < 1e-12);
    }

    #[test_case(0.0, Some(0) ; "lower edge")]
    #[test_case(0.74, Some(2) ; "inside")]
    #[test_case(1.0, Some(3) ; "upper edge falls in last bin")]
    #[test_case(1.5, None ; "above")]
    #[test_case(f64::NAN, None ; "nan")]
    fn test_segment_binning(value: f64, bin: Option<usize>) {
        let mut h = SegmentHistogram::new(0.0, 1.0, 4);
        h.add(value);
        let hit = h.bins().iter().position(|&c| c == 1);
        assert_eq!(hit, bin);
        assert_eq!(h.n_lost(), u64::from(bin.is_none()));
    }
}
