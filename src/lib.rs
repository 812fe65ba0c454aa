//! Physical memory manager for hobby kernels.
//!
//! This crate implements the frame-granular memory core of a kernel,
//! featuring:
//! - Buddy page allocator over a single reserved backing region
//! - Slab allocator for small fixed-size objects
//! - Bump fallback for requests no other path serves
//! - A routing facade that aggregates statistics and reports usage

#![no_std]

extern crate alloc;

use alloc::sync::Arc;

// Logging support - conditionally import log crate
#[cfg(feature = "log")]
extern crate log;

// Stub macros when log is disabled - these become no-ops
#[cfg(not(feature = "log"))]
#[allow(unused_macros)]
macro_rules! error {
    ($($arg:tt)*) => {};
}
#[cfg(not(feature = "log"))]
#[allow(unused_macros)]
macro_rules! warn {
    ($($arg:tt)*) => {};
}
#[cfg(not(feature = "log"))]
#[allow(unused_macros)]
macro_rules! info {
    ($($arg:tt)*) => {};
}
#[cfg(not(feature = "log"))]
#[allow(unused_macros)]
macro_rules! debug {
    ($($arg:tt)*) => {};
}
#[cfg(not(feature = "log"))]
#[allow(unused_macros)]
macro_rules! trace {
    ($($arg:tt)*) => {};
}

/// Default page size
pub const DEFAULT_PAGE_SIZE: usize = 0x1000;

/// Largest buddy order: a single block spans `2^MAX_ORDER` pages.
pub const MAX_ORDER: usize = 12;

/// Hard ceiling on the number of pages a buddy allocator may manage (16 MiB).
pub const MAX_PAGES: usize = 1 << MAX_ORDER;

/// Largest request served by the slab allocator.
pub const SLAB_MAX_SIZE: usize = 512;

/// The error type used for allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocError {
    /// Invalid size, pointer or alignment.
    InvalidParam,
    /// The allocator has not been initialized.
    NotInitialized,
    /// No enough memory to allocate.
    NoMemory,
    /// Routing selected an allocation path that is disabled.
    SubsystemDisabled,
    /// Deallocate memory that is not currently allocated.
    NotAllocated,
}

impl core::fmt::Display for AllocError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let msg = match self {
            AllocError::InvalidParam => "invalid allocation parameter",
            AllocError::NotInitialized => "allocator not initialized",
            AllocError::NoMemory => "out of memory",
            AllocError::SubsystemDisabled => "allocation path disabled",
            AllocError::NotAllocated => "memory is not allocated",
        };
        f.write_str(msg)
    }
}

impl core::error::Error for AllocError {}

/// A [`Result`] type with [`AllocError`] as the error type.
pub type AllocResult<T = ()> = Result<T, AllocError>;

/// Page-granularity allocator.
///
/// Implementors are internally synchronized, so every method takes `&self`.
/// Slab caches and the bump fallback draw their pages through this trait.
pub trait PageAllocator {
    /// The size of a memory page.
    const PAGE_SIZE: usize;

    /// Allocate `num_pages` contiguous pages, returning the base address.
    fn alloc_pages(&self, num_pages: usize) -> AllocResult<usize>;

    /// Deallocate contiguous memory pages with given position and count.
    fn dealloc_pages(&self, pos: usize, num_pages: usize) -> AllocResult;

    /// Returns the total number of memory pages.
    fn total_pages(&self) -> usize;

    /// Returns the number of allocated memory pages.
    fn used_pages(&self) -> usize;

    /// Returns the number of available memory pages.
    fn available_pages(&self) -> usize;
}

impl<T: PageAllocator + ?Sized> PageAllocator for &T {
    const PAGE_SIZE: usize = T::PAGE_SIZE;

    fn alloc_pages(&self, num_pages: usize) -> AllocResult<usize> {
        (**self).alloc_pages(num_pages)
    }

    fn dealloc_pages(&self, pos: usize, num_pages: usize) -> AllocResult {
        (**self).dealloc_pages(pos, num_pages)
    }

    fn total_pages(&self) -> usize {
        (**self).total_pages()
    }

    fn used_pages(&self) -> usize {
        (**self).used_pages()
    }

    fn available_pages(&self) -> usize {
        (**self).available_pages()
    }
}

impl<T: PageAllocator + ?Sized> PageAllocator for Arc<T> {
    const PAGE_SIZE: usize = T::PAGE_SIZE;

    fn alloc_pages(&self, num_pages: usize) -> AllocResult<usize> {
        (**self).alloc_pages(num_pages)
    }

    fn dealloc_pages(&self, pos: usize, num_pages: usize) -> AllocResult {
        (**self).dealloc_pages(pos, num_pages)
    }

    fn total_pages(&self) -> usize {
        (**self).total_pages()
    }

    fn used_pages(&self) -> usize {
        (**self).used_pages()
    }

    fn available_pages(&self) -> usize {
        (**self).available_pages()
    }
}

#[inline]
const fn align_down(pos: usize, align: usize) -> usize {
    pos & !(align - 1)
}

/// Rounds `pos` up to `align`, `None` on overflow.
#[inline]
const fn align_up(pos: usize, align: usize) -> Option<usize> {
    match pos.checked_add(align - 1) {
        Some(end) => Some(end & !(align - 1)),
        None => None,
    }
}

/// Checks whether the address has the demanded alignment.
///
/// Equivalent to `addr % align == 0`, but the alignment must be a power of two.
#[inline]
const fn is_aligned(base_addr: usize, align: usize) -> bool {
    base_addr & (align - 1) == 0
}

/// Smallest order whose block holds at least `num_pages` pages.
///
/// Counts above the largest power of two map to `usize::BITS`, which is past
/// any order the allocator hands out.
#[inline]
pub const fn order_for_pages(num_pages: usize) -> usize {
    if num_pages <= 1 {
        return 0;
    }
    match num_pages.checked_next_power_of_two() {
        Some(pages) => pages.trailing_zeros() as usize,
        None => usize::BITS as usize,
    }
}

pub mod buddy;
#[cfg(feature = "tracking")]
pub use buddy::MemoryStatsReporter;
pub use buddy::{BuddyAllocator, BuddyStats};

pub mod slab;
pub use slab::{CacheStats, SizeClass, SlabAllocator, SlabStats};

pub mod fallback;
pub use fallback::{BumpFallback, Tier, TierStats};

pub mod pmm;
pub use pmm::{
    AllocFlags, BuddySummary, MemoryMap, MemoryRegion, MemoryReport, PhysicalMemoryManager,
    PmmConfig, PmmStats, RegionKind,
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_order_for_pages() {
        assert_eq!(order_for_pages(0), 0);
        assert_eq!(order_for_pages(1), 0);
        assert_eq!(order_for_pages(2), 1);
        assert_eq!(order_for_pages(3), 2);
        assert_eq!(order_for_pages(4), 2);
        assert_eq!(order_for_pages(5), 3);
        assert_eq!(order_for_pages(MAX_PAGES), MAX_ORDER);
        assert_eq!(order_for_pages(usize::MAX), usize::BITS as usize);
        assert!(order_for_pages(usize::MAX / 2 + 2) > MAX_ORDER);
    }

    #[test]
    fn test_align_helpers() {
        assert_eq!(align_down(0x1234, 0x1000), 0x1000);
        assert_eq!(align_up(0x1234, 0x1000), Some(0x2000));
        assert_eq!(align_up(0x2000, 0x1000), Some(0x2000));
        assert_eq!(align_up(usize::MAX - 8, 0x1000), None);
        assert!(is_aligned(0x3000, 0x1000));
        assert!(!is_aligned(0x3008, 0x1000));
    }
}
