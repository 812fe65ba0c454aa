//! Thread-safe buddy page allocator
//!
//! Wraps a [`BuddySet`] in a single `SpinNoIrq` lock that is held for the
//! whole scan/split or merge sequence of every operation.

use alloc::vec::Vec;
use core::ptr::NonNull;

use kspin::SpinNoIrq;

#[cfg(feature = "log")]
use log::{debug, info, warn};

#[cfg(feature = "tracking")]
use super::stats::MemoryStatsReporter;
use super::{buddy_set::BuddySet, stats::BuddyStats};
use crate::{AllocError, AllocResult, PageAllocator, MAX_ORDER};

/// Buddy page allocator over a single reserved backing region
pub struct BuddyAllocator<const PAGE_SIZE: usize = { crate::DEFAULT_PAGE_SIZE }> {
    inner: SpinNoIrq<Option<BuddySet<PAGE_SIZE>>>,
}

impl<const PAGE_SIZE: usize> BuddyAllocator<PAGE_SIZE> {
    pub const fn new() -> Self {
        Self {
            inner: SpinNoIrq::new(None),
        }
    }

    /// Reserve `total_pages` pages and seed the free lists.
    ///
    /// Calling `init` on an initialized allocator is a no-op success.
    pub fn init(&self, total_pages: usize) -> AllocResult {
        let mut inner = self.inner.lock();
        if inner.is_some() {
            debug!("buddy allocator: already initialized");
            return Ok(());
        }
        *inner = Some(BuddySet::new(total_pages)?);
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.inner.lock().is_some()
    }

    /// Allocate a block of at least `num_pages` pages
    pub fn alloc(&self, num_pages: usize) -> AllocResult<NonNull<u8>> {
        let mut inner = self.inner.lock();
        let set = inner.as_mut().ok_or(AllocError::NotInitialized)?;

        match set.alloc_pages(num_pages) {
            Ok(addr) => NonNull::new(addr as *mut u8).ok_or(AllocError::NoMemory),
            Err(e) => {
                #[cfg(feature = "tracking")]
                if e == AllocError::NoMemory {
                    MemoryStatsReporter::print_alloc_failure_stats(
                        PAGE_SIZE,
                        &set.stats(),
                        num_pages,
                    );
                }
                Err(e)
            }
        }
    }

    /// Return a block previously obtained from [`alloc`](Self::alloc)
    pub fn free(&self, ptr: NonNull<u8>, num_pages: usize) -> AllocResult {
        let mut inner = self.inner.lock();
        let set = inner.as_mut().ok_or(AllocError::NotInitialized)?;
        set.dealloc_pages(ptr.as_ptr() as usize, num_pages)
    }

    /// Release the backing region. Outstanding pointers become dangling.
    pub fn destroy(&self) {
        let set = self.inner.lock().take();
        if let Some(set) = set {
            if set.free_pages() != set.total_pages() {
                warn!(
                    "buddy allocator: destroyed with {} pages still allocated",
                    set.total_pages() - set.free_pages()
                );
            }
            info!("buddy allocator: released {} pages", set.total_pages());
        }
    }

    /// Statistics snapshot; all zero before init
    pub fn stats(&self) -> BuddyStats {
        self.inner
            .lock()
            .as_ref()
            .map(BuddySet::stats)
            .unwrap_or_default()
    }

    pub fn reset_counters(&self) {
        if let Some(set) = self.inner.lock().as_mut() {
            set.reset_counters();
        }
    }

    /// Page indices of the free blocks on one order's list, list order
    pub fn free_blocks(&self, order: usize) -> Vec<usize> {
        if order > MAX_ORDER {
            return Vec::new();
        }
        self.inner
            .lock()
            .as_ref()
            .map(|set| set.free_blocks(order).collect())
            .unwrap_or_default()
    }

    pub fn free_block_count(&self, order: usize) -> usize {
        self.inner
            .lock()
            .as_ref()
            .map_or(0, |set| set.free_block_count(order))
    }

    /// Full audit of the free-list table; `false` if uninitialized
    pub fn check_partition(&self) -> bool {
        self.inner
            .lock()
            .as_ref()
            .is_some_and(BuddySet::check_partition)
    }

    /// Base address and length in bytes of the backing region
    pub fn region(&self) -> Option<(usize, usize)> {
        self.inner
            .lock()
            .as_ref()
            .map(|set| (set.base_addr(), set.end_addr() - set.base_addr()))
    }

    pub fn print_free_lists(&self) {
        if let Some(set) = self.inner.lock().as_ref() {
            set.print_free_lists();
        }
    }
}

impl<const PAGE_SIZE: usize> Default for BuddyAllocator<PAGE_SIZE> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const PAGE_SIZE: usize> PageAllocator for BuddyAllocator<PAGE_SIZE> {
    const PAGE_SIZE: usize = PAGE_SIZE;

    fn alloc_pages(&self, num_pages: usize) -> AllocResult<usize> {
        self.alloc(num_pages).map(|ptr| ptr.as_ptr() as usize)
    }

    fn dealloc_pages(&self, pos: usize, num_pages: usize) -> AllocResult {
        let ptr = NonNull::new(pos as *mut u8).ok_or(AllocError::InvalidParam)?;
        self.free(ptr, num_pages)
    }

    fn total_pages(&self) -> usize {
        self.inner.lock().as_ref().map_or(0, BuddySet::total_pages)
    }

    fn used_pages(&self) -> usize {
        self.inner
            .lock()
            .as_ref()
            .map_or(0, |set| set.total_pages() - set.free_pages())
    }

    fn available_pages(&self) -> usize {
        self.inner.lock().as_ref().map_or(0, BuddySet::free_pages)
    }
}
