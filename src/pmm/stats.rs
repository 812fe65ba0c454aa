//! PMM statistics snapshot.

use crate::buddy::BuddyStats;
use crate::fallback::{Tier, TierStats};
use crate::slab::SlabStats;

/// Buddy counters as seen through the PMM
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BuddySummary {
    pub allocs: u64,
    pub frees: u64,
    pub splits: u64,
    pub merges: u64,
}

impl From<&BuddyStats> for BuddySummary {
    fn from(stats: &BuddyStats) -> Self {
        Self {
            allocs: stats.allocs,
            frees: stats.frees,
            splits: stats.splits,
            merges: stats.merges,
        }
    }
}

/// Counters owned by the PMM itself
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct PmmCounters {
    pub total_frames: usize,
    pub free_frames: usize,
    pub used_frames: usize,
    pub alloc_count: u64,
    pub free_count: u64,
    pub bytes_allocated: usize,
}

impl PmmCounters {
    /// Copy the buddy's page totals into the frame figures
    pub fn mirror_frames(&mut self, buddy: &BuddyStats) {
        self.total_frames = buddy.total_pages;
        self.free_frames = buddy.free_pages;
        self.used_frames = buddy.used_pages;
    }

    pub fn record_alloc(&mut self, bytes: usize) {
        self.alloc_count += 1;
        self.bytes_allocated = self.bytes_allocated.saturating_add(bytes);
    }

    pub fn record_free(&mut self, bytes: usize) {
        self.free_count += 1;
        self.bytes_allocated = self.bytes_allocated.saturating_sub(bytes);
    }

    /// Zero the counters, keeping the frame figures
    pub fn reset(&mut self) {
        *self = Self {
            total_frames: self.total_frames,
            free_frames: self.free_frames,
            used_frames: self.used_frames,
            ..Self::default()
        };
    }
}

/// Aggregate statistics returned by
/// [`PhysicalMemoryManager::get_stats`](super::PhysicalMemoryManager::get_stats)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PmmStats {
    pub total_frames: usize,
    pub free_frames: usize,
    pub used_frames: usize,
    pub alloc_count: u64,
    pub free_count: u64,
    pub bytes_allocated: usize,
    pub buddy: BuddySummary,
    pub slab: SlabStats,
    pub fallback: [TierStats; Tier::COUNT],
}

impl PmmStats {
    pub(crate) fn new(
        counters: &PmmCounters,
        buddy: &BuddyStats,
        slab: SlabStats,
        fallback: [TierStats; Tier::COUNT],
    ) -> Self {
        Self {
            total_frames: counters.total_frames,
            free_frames: counters.free_frames,
            used_frames: counters.used_frames,
            alloc_count: counters.alloc_count,
            free_count: counters.free_count,
            bytes_allocated: counters.bytes_allocated,
            buddy: buddy.into(),
            slab,
            fallback,
        }
    }

    /// Allocations not yet freed
    pub fn outstanding(&self) -> u64 {
        self.alloc_count.saturating_sub(self.free_count)
    }

    pub fn tier(&self, tier: Tier) -> TierStats {
        self.fallback[tier.index()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_saturate() {
        let mut counters = PmmCounters::default();
        counters.record_alloc(64);
        counters.record_free(128);
        assert_eq!(counters.bytes_allocated, 0);
        assert_eq!(counters.alloc_count, 1);
        assert_eq!(counters.free_count, 1);
    }

    #[test]
    fn test_reset_keeps_frames() {
        let mut counters = PmmCounters::default();
        let mut buddy = BuddyStats::new();
        buddy.total_pages = 16;
        buddy.free_pages = 12;
        buddy.used_pages = 4;
        counters.mirror_frames(&buddy);
        counters.record_alloc(4096);

        counters.reset();
        assert_eq!(counters.alloc_count, 0);
        assert_eq!(counters.bytes_allocated, 0);
        assert_eq!(
            (counters.total_frames, counters.free_frames, counters.used_frames),
            (16, 12, 4)
        );
    }
}
