//! Collector statistics

/// Cumulative collection statistics, in words
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GcStats {
    /// Total number of collections
    pub collections: usize,

    /// Words copied by the most recent collection
    pub last_copied: usize,

    /// Words reclaimed across all collections
    pub total_reclaimed: usize,

    /// Words allocated since the arena was created
    pub total_allocated: usize,
}

impl GcStats {
    pub(super) fn record_collection(&mut self, before: usize, after: usize) {
        self.collections += 1;
        self.last_copied = after;
        self.total_reclaimed += before.saturating_sub(after);
    }
}
