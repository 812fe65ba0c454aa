//! Human-readable usage report.

use core::fmt;

use super::stats::PmmStats;
use crate::fallback::Tier;

/// Snapshot of the PMM rendered through [`fmt::Display`]
#[derive(Debug, Clone, Copy)]
pub struct MemoryReport {
    pub page_size: usize,
    pub stats: PmmStats,
    pub buddy_initialized: bool,
    pub slab_initialized: bool,
    pub fallback_initialized: bool,
}

impl MemoryReport {
    fn kib(&self, frames: usize) -> usize {
        frames.saturating_mul(self.page_size) / 1024
    }

    /// Used frames in tenths of a percent
    fn utilization_permille(&self) -> usize {
        let stats = &self.stats;
        if stats.total_frames == 0 {
            0
        } else {
            stats.used_frames.saturating_mul(1000) / stats.total_frames
        }
    }
}

impl fmt::Display for MemoryReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let stats = &self.stats;
        writeln!(f, "Physical Memory Manager Report")?;
        writeln!(f, "==============================")?;
        writeln!(f)?;

        let permille = self.utilization_permille();
        writeln!(f, "Memory Overview:")?;
        writeln!(
            f,
            "  Total Memory: {} KB ({} frames)",
            self.kib(stats.total_frames),
            stats.total_frames
        )?;
        writeln!(
            f,
            "  Used Memory:  {} KB ({} frames)",
            self.kib(stats.used_frames),
            stats.used_frames
        )?;
        writeln!(
            f,
            "  Free Memory:  {} KB ({} frames)",
            self.kib(stats.free_frames),
            stats.free_frames
        )?;
        writeln!(f, "  Utilization:  {}.{}%", permille / 10, permille % 10)?;
        writeln!(f)?;

        writeln!(f, "Allocation Statistics:")?;
        writeln!(f, "  Total Allocations: {}", stats.alloc_count)?;
        writeln!(f, "  Total Deallocations: {}", stats.free_count)?;
        writeln!(f, "  Outstanding Allocations: {}", stats.outstanding())?;
        writeln!(f, "  Bytes Allocated: {}", stats.bytes_allocated)?;
        writeln!(f)?;

        if self.buddy_initialized {
            writeln!(f, "Buddy Allocator:")?;
            writeln!(f, "  Allocations: {}", stats.buddy.allocs)?;
            writeln!(f, "  Deallocations: {}", stats.buddy.frees)?;
            writeln!(f, "  Splits Performed: {}", stats.buddy.splits)?;
            writeln!(f, "  Merges Performed: {}", stats.buddy.merges)?;
            writeln!(f)?;
        }

        if self.slab_initialized {
            writeln!(f, "Slab Allocator:")?;
            writeln!(f, "  Active Caches: {}", stats.slab.active_caches)?;
            writeln!(f, "  Total Objects: {}", stats.slab.total_objects)?;
            writeln!(f, "  Free Objects: {}", stats.slab.free_objects)?;
            writeln!(f, "  Allocations: {}", stats.slab.allocs)?;
            writeln!(f, "  Deallocations: {}", stats.slab.frees)?;
            writeln!(f)?;
        }

        if self.fallback_initialized {
            writeln!(f, "Fallback Allocator:")?;
            for tier in Tier::ALL {
                let tier_stats = stats.tier(tier);
                writeln!(
                    f,
                    "  {}: {} allocs, {} frees, {} bytes in use",
                    tier.name(),
                    tier_stats.allocs,
                    tier_stats.frees,
                    tier_stats.bytes_in_use
                )?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

/// `fmt::Write` sink over a byte buffer that drops whatever does not fit
pub(crate) struct TruncatingWriter<'a> {
    buf: &'a mut [u8],
    len: usize,
}

impl<'a> TruncatingWriter<'a> {
    pub fn new(buf: &'a mut [u8]) -> Self {
        Self { buf, len: 0 }
    }

    pub fn written(&self) -> usize {
        self.len
    }
}

impl fmt::Write for TruncatingWriter<'_> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        let room = self.buf.len() - self.len;
        let n = s.len().min(room);
        self.buf[self.len..self.len + n].copy_from_slice(&s.as_bytes()[..n]);
        self.len += n;
        Ok(())
    }
}
