//! Statistics and debugging for buddy allocator
//!
//! Provides statistics tracking and failure reporting.

use crate::MAX_ORDER;

/// Buddy system statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BuddyStats {
    pub total_pages: usize,
    pub free_pages: usize,
    pub used_pages: usize,
    /// Number of free blocks on each order's list
    pub free_blocks_by_order: [usize; MAX_ORDER + 1],
    pub allocs: u64,
    pub frees: u64,
    pub splits: u64,
    pub merges: u64,
}

impl Default for BuddyStats {
    fn default() -> Self {
        Self::new()
    }
}

impl BuddyStats {
    pub const fn new() -> Self {
        Self {
            total_pages: 0,
            free_pages: 0,
            used_pages: 0,
            free_blocks_by_order: [0; MAX_ORDER + 1],
            allocs: 0,
            frees: 0,
            splits: 0,
            merges: 0,
        }
    }

    /// Zero the event counters, keeping page figures
    pub fn reset_counters(&mut self) {
        self.allocs = 0;
        self.frees = 0;
        self.splits = 0;
        self.merges = 0;
    }
}

/// Detailed memory statistics reporter
#[cfg(feature = "tracking")]
pub struct MemoryStatsReporter;

#[cfg(feature = "tracking")]
impl MemoryStatsReporter {
    /// Print detailed allocation failure statistics
    #[allow(unused_variables)]
    pub fn print_alloc_failure_stats(page_size: usize, stats: &BuddyStats, request_pages: usize) {
        #[cfg(feature = "log")]
        use log::error;
        error!("========================================");
        error!(
            "Request: {} pages ({} KB)",
            request_pages,
            (request_pages * page_size) / 1024
        );
        error!(
            "  Total pages: {} ({} KB)",
            stats.total_pages,
            (stats.total_pages * page_size) / 1024
        );
        error!(
            "  Free pages: {} ({} KB)",
            stats.free_pages,
            (stats.free_pages * page_size) / 1024
        );
        error!(
            "  Used pages: {} ({} KB)",
            stats.used_pages,
            (stats.used_pages * page_size) / 1024
        );
        error!(
            "  Splits: {}, merges: {}",
            stats.splits, stats.merges
        );
        error!("  Free blocks by order:");

        for order in (0..=MAX_ORDER).rev() {
            let count = stats.free_blocks_by_order[order];
            if count > 0 {
                let block_size = (1 << order) * page_size;
                error!(
                    "    Order {}: {} blocks ({} KB each, {} KB total)",
                    order,
                    count,
                    block_size / 1024,
                    (count * block_size) / 1024
                );
            }
        }
        error!("========================================");
    }
}
