//! Slab allocator for small objects.
//!
//! One [`SlabCache`] per [`SizeClass`], each behind its own lock. Caches pull
//! single pages from a [`PageAllocator`] while their lock is held, so the lock
//! order is always cache lock before page allocator lock.

use core::ptr::NonNull;
use core::sync::atomic::{AtomicBool, Ordering};

use kspin::SpinNoIrq;

#[cfg(feature = "log")]
use log::{info, warn};

use super::size_class::SizeClass;
use super::slab_cache::{CacheStats, SlabCache};
use crate::{AllocError, AllocResult, PageAllocator};

/// Aggregate slab statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SlabStats {
    /// Caches holding at least one slab
    pub active_caches: usize,
    pub total_objects: usize,
    pub free_objects: usize,
    pub allocs: u64,
    pub frees: u64,
}

/// Slab allocator drawing pages from `P`
pub struct SlabAllocator<P: PageAllocator> {
    pages: P,
    caches: [SpinNoIrq<SlabCache>; SizeClass::COUNT],
    initialized: AtomicBool,
}

impl<P: PageAllocator> SlabAllocator<P> {
    pub fn new(pages: P) -> Self {
        Self {
            pages,
            caches: SizeClass::ALL.map(|class| SpinNoIrq::new(SlabCache::new(class))),
            initialized: AtomicBool::new(false),
        }
    }

    /// The page allocator backing this slab allocator
    pub fn page_allocator(&self) -> &P {
        &self.pages
    }

    /// Eagerly give every cache one slab. Idempotent.
    pub fn init(&self) -> AllocResult {
        if self.initialized.load(Ordering::Acquire) {
            return Ok(());
        }
        for cache in &self.caches {
            let mut cache = cache.lock();
            if cache.slab_count() == 0 {
                cache.grow(&self.pages)?;
            }
        }
        self.initialized.store(true, Ordering::Release);
        info!(
            "slab allocator: {} caches ready, {} objects",
            SizeClass::COUNT,
            self.stats().total_objects
        );
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    fn cache_for(&self, size: usize) -> AllocResult<&SpinNoIrq<SlabCache>> {
        if !self.is_initialized() {
            return Err(AllocError::NotInitialized);
        }
        let class = SizeClass::for_size(size).ok_or_else(|| {
            warn!(
                "slab allocator: size {} outside 1..={}",
                size,
                SizeClass::MAX_OBJ_SIZE
            );
            AllocError::InvalidParam
        })?;
        Ok(&self.caches[class.to_index()])
    }

    /// Allocate an object of at least `size` bytes
    pub fn alloc(&self, size: usize) -> AllocResult<NonNull<u8>> {
        let cache = self.cache_for(size)?;
        let addr = cache.lock().alloc_object(&self.pages)?;
        NonNull::new(addr as *mut u8).ok_or(AllocError::NoMemory)
    }

    /// Free an object; `size` must be the size it was allocated with
    pub fn free(&self, ptr: NonNull<u8>, size: usize) -> AllocResult {
        let cache = self.cache_for(size)?;
        let mut cache = cache.lock();
        cache.dealloc_object(ptr.as_ptr() as usize, &self.pages)
    }

    /// Mark the allocator uninitialized, forget every slab and zero the
    /// counters.
    ///
    /// Pages are not handed back; they are reclaimed with the page
    /// allocator's own region.
    pub fn destroy(&self) {
        self.initialized.store(false, Ordering::Release);
        for cache in &self.caches {
            let mut cache = cache.lock();
            cache.forget_slabs();
            cache.reset_counters();
        }
    }

    pub fn cache_stats(&self, class: SizeClass) -> CacheStats {
        self.caches[class.to_index()].lock().stats()
    }

    pub fn stats(&self) -> SlabStats {
        let mut stats = SlabStats::default();
        for class in SizeClass::ALL {
            let cache = self.cache_stats(class);
            if cache.slabs > 0 {
                stats.active_caches += 1;
            }
            stats.total_objects += cache.total_objects;
            stats.free_objects += cache.free_objects;
            stats.allocs += cache.allocs;
            stats.frees += cache.frees;
        }
        stats
    }

    pub fn reset_counters(&self) {
        for cache in &self.caches {
            cache.lock().reset_counters();
        }
    }

    /// Check `free + in_use == capacity` for every slab of every cache
    pub fn check_slots(&self) -> bool {
        self.caches.iter().all(|cache| cache.lock().check_slots())
    }
}
