//! Work accounting for cache maintenance
//!
//! Tracks how many nodes each refresh touches, to verify that refresh cost
//! follows the edited paths rather than the tree size.

/// Counters of cache refresh and materialisation work
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "visualize", derive(serde::Serialize))]
pub struct RefreshStats {
    /// Nodes recomputed by the most recent refresh
    pub last_refresh_visits: usize,

    /// Nodes recomputed over the lifetime of the trace
    pub total_refresh_visits: usize,

    /// Largest single refresh seen
    pub max_refresh_visits: usize,

    /// Number of refreshes run
    pub refreshes: usize,

    /// Partial matrices built (cache misses of `materialize`)
    pub matrices_built: usize,
}

impl RefreshStats {
    /// Start counting a new refresh
    pub fn begin_refresh(&mut self) {
        self.last_refresh_visits = 0;
        self.refreshes += 1;
    }

    /// Count one recomputed node
    pub fn visit(&mut self) {
        self.last_refresh_visits += 1;
        self.total_refresh_visits += 1;
        self.max_refresh_visits = self.max_refresh_visits.max(self.last_refresh_visits);
    }

    /// Count one matrix built from scratch
    pub fn matrix_built(&mut self) {
        self.matrices_built += 1;
    }

    /// Average nodes per refresh
    pub fn mean_visits(&self) -> f64 {
        if self.refreshes == 0 {
            return 0.0;
        }
        self.total_refresh_visits as f64 / self.refreshes as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counts_per_refresh() {
        let mut stats = RefreshStats::default();
        stats.begin_refresh();
        stats.visit();
        stats.visit();
        stats.begin_refresh();
        stats.visit();

        assert_eq!(stats.last_refresh_visits, 1);
        assert_eq!(stats.total_refresh_visits, 3);
        assert_eq!(stats.max_refresh_visits, 2);
        assert_eq!(stats.mean_visits(), 1.5);
    }
}
