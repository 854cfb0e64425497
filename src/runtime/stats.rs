//! Runtime counters.

use std::sync::atomic::{AtomicU64, Ordering};

/// Monotonic counters updated by the runtime. Reads are relaxed and may be slightly stale while
/// other threads are working.
#[derive(Debug, Default)]
pub struct RuntimeStats {
    pub(crate) initialized_classes: AtomicU64,
    pub(crate) failed_classes: AtomicU64,
    pub(crate) layouts: AtomicU64,
    pub(crate) generic_classes: AtomicU64,
    pub(crate) generic_methods: AtomicU64,
    pub(crate) resolver_hits: AtomicU64,
    pub(crate) resolver_misses: AtomicU64,
}

/// A point-in-time copy of [`RuntimeStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// Classes that reached the initialized state.
    pub initialized_classes: u64,
    /// Classes that failed initialization.
    pub failed_classes: u64,
    /// Instance layouts computed.
    pub layouts: u64,
    /// Generic class instances created.
    pub generic_classes: u64,
    /// Generic method instances created.
    pub generic_methods: u64,
    /// Homologous token resolutions served from the cache.
    pub resolver_hits: u64,
    /// Homologous token resolutions computed.
    pub resolver_misses: u64,
}

impl RuntimeStats {
    pub(crate) fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Copies the current values.
    #[must_use]
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            initialized_classes: self.initialized_classes.load(Ordering::Relaxed),
            failed_classes: self.failed_classes.load(Ordering::Relaxed),
            layouts: self.layouts.load(Ordering::Relaxed),
            generic_classes: self.generic_classes.load(Ordering::Relaxed),
            generic_methods: self.generic_methods.load(Ordering::Relaxed),
            resolver_hits: self.resolver_hits.load(Ordering::Relaxed),
            resolver_misses: self.resolver_misses.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_reflects_bumps() {
        let stats = RuntimeStats::default();
        RuntimeStats::bump(&stats.layouts);
        RuntimeStats::bump(&stats.layouts);
        RuntimeStats::bump(&stats.resolver_hits);
        let snapshot = stats.snapshot();
        assert_eq!(snapshot.layouts, 2);
        assert_eq!(snapshot.resolver_hits, 1);
        assert_eq!(snapshot.initialized_classes, 0);
    }
}
