//! Cache counters.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Point-in-time copy of the cache counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    /// Reads answered with a cached value (fresh plain or logical).
    pub hits: u64,
    /// Reads answered by the absence sentinel without calling the loader.
    pub absent_hits: u64,
    /// Reads that found nothing usable in the cache.
    pub misses: u64,
    /// Loader calls made on the read path.
    pub loads: u64,
    /// Logically expired values served.
    pub stale_reads: u64,
    pub rebuilds_scheduled: u64,
    /// Rebuilds not run because the queue was full or the pool shut down.
    pub rebuilds_dropped: u64,
    pub rebuilds_completed: u64,
    pub rebuilds_failed: u64,
    /// KV store errors seen on any cache path.
    pub store_faults: u64,
}

impl CacheStats {
    /// Fraction of reads answered without the durable store (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let served = self.hits + self.absent_hits + self.stale_reads;
        let total = served + self.misses;
        if total == 0 {
            0.0
        } else {
            served as f64 / total as f64
        }
    }
}

#[derive(Debug, Default)]
pub(crate) struct CacheCounters {
    pub hits: AtomicU64,
    pub absent_hits: AtomicU64,
    pub misses: AtomicU64,
    pub loads: AtomicU64,
    pub stale_reads: AtomicU64,
    pub rebuilds_scheduled: AtomicU64,
    pub rebuilds_dropped: AtomicU64,
    pub rebuilds_completed: AtomicU64,
    pub rebuilds_failed: AtomicU64,
    pub store_faults: AtomicU64,
}

impl CacheCounters {
    pub fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            absent_hits: self.absent_hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            loads: self.loads.load(Ordering::Relaxed),
            stale_reads: self.stale_reads.load(Ordering::Relaxed),
            rebuilds_scheduled: self.rebuilds_scheduled.load(Ordering::Relaxed),
            rebuilds_dropped: self.rebuilds_dropped.load(Ordering::Relaxed),
            rebuilds_completed: self.rebuilds_completed.load(Ordering::Relaxed),
            rebuilds_failed: self.rebuilds_failed.load(Ordering::Relaxed),
            store_faults: self.store_faults.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hit_rate_empty_is_zero() {
        assert_eq!(CacheStats::default().hit_rate(), 0.0);
    }

    #[test]
    fn test_hit_rate_counts_absent_and_stale_as_served() {
        let stats = CacheStats {
            hits: 2,
            absent_hits: 1,
            stale_reads: 1,
            misses: 4,
            ..Default::default()
        };
        assert!((stats.hit_rate() - 0.5).abs() < f64::EPSILON);
    }
}
