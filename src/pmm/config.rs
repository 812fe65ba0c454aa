//! Runtime configuration and the boot memory map handed to the PMM.

use alloc::vec::Vec;

/// Which allocation paths are available and the accepted request sizes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PmmConfig {
    pub enable_buddy: bool,
    pub enable_slab: bool,
    /// Serve sizes the slab and buddy paths do not take from the tiered
    /// bump fallback.
    pub enable_fallback: bool,
    /// Smaller requests are rounded up to this size.
    pub min_alloc_size: usize,
    /// Larger requests are rejected.
    pub max_alloc_size: usize,
}

impl PmmConfig {
    pub const DEFAULT_MIN_ALLOC_SIZE: usize = 16;
    pub const DEFAULT_MAX_ALLOC_SIZE: usize = 4 * 1024 * 1024;

    pub const fn new() -> Self {
        Self {
            enable_buddy: true,
            enable_slab: true,
            enable_fallback: true,
            min_alloc_size: Self::DEFAULT_MIN_ALLOC_SIZE,
            max_alloc_size: Self::DEFAULT_MAX_ALLOC_SIZE,
        }
    }

    pub const fn any_enabled(&self) -> bool {
        self.enable_buddy || self.enable_slab || self.enable_fallback
    }
}

impl Default for PmmConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Type of a physical memory region as reported by the firmware
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegionKind {
    Usable,
    Reserved,
    AcpiReclaimable,
    AcpiNvs,
    BadMemory,
}

/// Physical address range `[start, end)`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryRegion {
    pub start: u64,
    pub end: u64,
    pub kind: RegionKind,
}

impl MemoryRegion {
    pub const fn new(start: u64, end: u64, kind: RegionKind) -> Self {
        Self { start, end, kind }
    }

    pub const fn len(&self) -> u64 {
        self.end.saturating_sub(self.start)
    }

    pub const fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemoryMap {
    pub regions: Vec<MemoryRegion>,
    pub total_memory: u64,
    pub usable_memory: u64,
}

impl MemoryMap {
    /// Build a map and derive the totals from its regions
    pub fn from_regions(regions: Vec<MemoryRegion>) -> Self {
        let total_memory = regions.iter().map(MemoryRegion::len).sum();
        let usable_memory = regions
            .iter()
            .filter(|r| r.kind == RegionKind::Usable)
            .map(MemoryRegion::len)
            .sum();
        Self {
            regions,
            total_memory,
            usable_memory,
        }
    }

    /// A map with one usable region of `bytes` bytes starting at zero
    pub fn with_usable(bytes: u64) -> Self {
        Self::from_regions(alloc::vec![MemoryRegion::new(0, bytes, RegionKind::Usable)])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;

    #[test]
    fn test_default_config() {
        let config = PmmConfig::default();
        assert!(config.any_enabled());
        assert_eq!(config.min_alloc_size, 16);
        assert_eq!(config.max_alloc_size, 4 << 20);
    }

    #[test]
    fn test_memory_map_totals() {
        let map = MemoryMap::from_regions(vec![
            MemoryRegion::new(0, 0x9f000, RegionKind::Usable),
            MemoryRegion::new(0x9f000, 0x100000, RegionKind::Reserved),
            MemoryRegion::new(0x100000, 0x500000, RegionKind::Usable),
        ]);
        assert_eq!(map.total_memory, 0x500000);
        assert_eq!(map.usable_memory, 0x9f000 + 0x400000);
    }

    #[test]
    fn test_inverted_region_is_empty() {
        let region = MemoryRegion::new(0x2000, 0x1000, RegionKind::Usable);
        assert!(region.is_empty());
        assert_eq!(MemoryMap::from_regions(vec![region]).usable_memory, 0);
    }
}
