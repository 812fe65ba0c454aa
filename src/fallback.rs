//! Bump fallback for requests neither the slab nor the buddy path serves.
//!
//! Space is bump-carved from chunks of pages obtained from a
//! [`PageAllocator`]. Each chunk records where its live allocations start, so
//! only those addresses can be freed, and a chunk that drains completely is either rewound (if it is the current chunk) or handed
//! back to the page allocator. Every request is labelled with a [`Tier`]
//! derived from its size, and usage is tracked per tier.

use alloc::vec::Vec;
use core::ptr::NonNull;
use core::sync::atomic::{AtomicBool, Ordering};

use kspin::SpinNoIrq;

#[cfg(feature = "log")]
use log::{debug, error, info, trace, warn};

use crate::{align_up, AllocError, AllocResult, PageAllocator};

/// Minimum number of pages obtained per chunk
pub const FALLBACK_CHUNK_PAGES: usize = 4;

/// Alignment of every fallback allocation
pub const FALLBACK_ALIGN: usize = 16;

/// Size-derived lifetime label of a fallback allocation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    ShortTerm,
    Working,
    LongTerm,
}

impl Tier {
    pub const COUNT: usize = 3;
    pub const ALL: [Tier; Self::COUNT] = [Tier::ShortTerm, Tier::Working, Tier::LongTerm];

    pub fn for_size(size: usize) -> Self {
        match size {
            0..=64 => Tier::ShortTerm,
            65..=4096 => Tier::Working,
            _ => Tier::LongTerm,
        }
    }

    pub fn index(&self) -> usize {
        *self as usize
    }

    pub fn name(&self) -> &'static str {
        match self {
            Tier::ShortTerm => "Short-term",
            Tier::Working => "Working",
            Tier::LongTerm => "Long-term",
        }
    }
}

/// Usage of one tier
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TierStats {
    pub allocs: u64,
    pub frees: u64,
    pub bytes_in_use: usize,
}

struct Chunk {
    base: usize,
    pages: usize,
    offset: usize,
    /// `(offset, len)` of every live allocation, sorted by offset.
    live: Vec<(usize, usize)>,
}

impl Chunk {
    fn new(base: usize, pages: usize) -> Self {
        Self {
            base,
            pages,
            offset: 0,
            live: Vec::new(),
        }
    }

    fn fits(&self, needed: usize, page_size: usize) -> bool {
        self.offset
            .checked_add(needed)
            .is_some_and(|end| end <= self.pages * page_size)
    }

    /// Position in `live` of the allocation starting at `addr`
    fn live_index(&self, addr: usize) -> Option<usize> {
        let offset = addr.checked_sub(self.base)?;
        if offset >= self.offset {
            return None;
        }
        self.live.binary_search_by_key(&offset, |&(o, _)| o).ok()
    }
}

struct FallbackInner {
    /// The current chunk is the last element.
    chunks: Vec<Chunk>,
    tiers: [TierStats; Tier::COUNT],
}

/// Bump allocator over page chunks drawn from `P`
pub struct BumpFallback<P: PageAllocator> {
    pages: P,
    inner: SpinNoIrq<FallbackInner>,
    initialized: AtomicBool,
}

impl<P: PageAllocator> BumpFallback<P> {
    pub fn new(pages: P) -> Self {
        Self {
            pages,
            inner: SpinNoIrq::new(FallbackInner {
                chunks: Vec::new(),
                tiers: [TierStats::default(); Tier::COUNT],
            }),
            initialized: AtomicBool::new(false),
        }
    }

    /// Chunks are obtained lazily, so init only opens the allocator.
    pub fn init(&self) -> AllocResult {
        if !self.initialized.swap(true, Ordering::AcqRel) {
            info!(
                "bump fallback: ready, {} page chunks",
                FALLBACK_CHUNK_PAGES
            );
        }
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    pub fn page_allocator(&self) -> &P {
        &self.pages
    }

    /// Bump-allocate `size` bytes, accounted to `tier`
    pub fn alloc(&self, size: usize, tier: Tier) -> AllocResult<NonNull<u8>> {
        if !self.is_initialized() {
            return Err(AllocError::NotInitialized);
        }
        if size == 0 {
            return Err(AllocError::InvalidParam);
        }
        let needed = align_up(size, FALLBACK_ALIGN).ok_or(AllocError::InvalidParam)?;

        let mut inner = self.inner.lock();
        let fits = inner
            .chunks
            .last()
            .is_some_and(|chunk| chunk.fits(needed, P::PAGE_SIZE));
        if !fits {
            self.new_chunk(&mut inner, needed)?;
        }

        let Some(chunk) = inner.chunks.last_mut() else {
            return Err(AllocError::NoMemory);
        };
        chunk
            .live
            .try_reserve(1)
            .map_err(|_| AllocError::NoMemory)?;
        let addr = chunk.base + chunk.offset;
        chunk.live.push((chunk.offset, needed));
        chunk.offset += needed;

        let stats = &mut inner.tiers[tier.index()];
        stats.allocs += 1;
        stats.bytes_in_use += needed;
        trace!("bump fallback: {} bytes at {:#x} ({})", size, addr, tier.name());

        NonNull::new(addr as *mut u8).ok_or(AllocError::NoMemory)
    }

    fn new_chunk(&self, inner: &mut FallbackInner, needed: usize) -> AllocResult {
        inner
            .chunks
            .try_reserve(1)
            .map_err(|_| AllocError::NoMemory)?;
        let pages = align_up(needed, P::PAGE_SIZE)
            .map(|bytes| FALLBACK_CHUNK_PAGES.max(bytes / P::PAGE_SIZE))
            .ok_or(AllocError::InvalidParam)?;
        let base = self.pages.alloc_pages(pages).map_err(|e| {
            debug!("bump fallback: no chunk of {} pages: {:?}", pages, e);
            e
        })?;

        // A drained current chunk is replaced, not kept around.
        if inner.chunks.last().is_some_and(|chunk| chunk.live.is_empty()) {
            if let Some(old) = inner.chunks.pop() {
                self.release_chunk(&old);
            }
        }

        debug!("bump fallback: new chunk of {} pages at {:#x}", pages, base);
        inner.chunks.push(Chunk::new(base, pages));
        Ok(())
    }

    fn release_chunk(&self, chunk: &Chunk) {
        if let Err(_e) = self.pages.dealloc_pages(chunk.base, chunk.pages) {
            error!(
                "bump fallback: failed to return chunk at {:#x}: {:?}",
                chunk.base, _e
            );
        }
    }

    /// Release an allocation; `tier` must match the allocation.
    ///
    /// `ptr` must be the start of a live allocation, anything else (a double
    /// free, an interior or foreign pointer) is `NotAllocated`. The bytes
    /// released are the recorded length, `size` is only logged.
    pub fn free(&self, ptr: NonNull<u8>, size: usize, tier: Tier) -> AllocResult {
        if !self.is_initialized() {
            return Err(AllocError::NotInitialized);
        }
        let addr = ptr.as_ptr() as usize;
        let mut inner = self.inner.lock();
        let Some((idx, slot)) = inner
            .chunks
            .iter()
            .enumerate()
            .find_map(|(idx, chunk)| chunk.live_index(addr).map(|slot| (idx, slot)))
        else {
            warn!(
                "bump fallback: {:#x} ({} bytes) is not a live allocation",
                addr, size
            );
            return Err(AllocError::NotAllocated);
        };

        let is_current = idx + 1 == inner.chunks.len();
        let chunk = &mut inner.chunks[idx];
        let (_, len) = chunk.live.remove(slot);
        if chunk.live.is_empty() {
            if is_current {
                chunk.offset = 0;
            } else {
                let old = inner.chunks.remove(idx);
                self.release_chunk(&old);
            }
        }

        let stats = &mut inner.tiers[tier.index()];
        stats.frees += 1;
        stats.bytes_in_use = stats.bytes_in_use.saturating_sub(len);
        Ok(())
    }

    /// Return every chunk to the page allocator and close the fallback
    pub fn destroy(&self) {
        self.initialized.store(false, Ordering::Release);
        let mut inner = self.inner.lock();
        for chunk in inner.chunks.drain(..) {
            if !chunk.live.is_empty() {
                warn!(
                    "bump fallback: chunk at {:#x} destroyed with {} live allocations",
                    chunk.base,
                    chunk.live.len()
                );
            }
            self.release_chunk(&chunk);
        }
        inner.tiers = [TierStats::default(); Tier::COUNT];
    }

    pub fn tier_stats(&self, tier: Tier) -> TierStats {
        self.inner.lock().tiers[tier.index()]
    }

    pub fn stats(&self) -> [TierStats; Tier::COUNT] {
        self.inner.lock().tiers
    }

    /// Zero the alloc/free counters; bytes in use are kept
    pub fn reset_counters(&self) {
        for stats in self.inner.lock().tiers.iter_mut() {
            stats.allocs = 0;
            stats.frees = 0;
        }
    }

    pub fn chunk_count(&self) -> usize {
        self.inner.lock().chunks.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::BuddyAllocator;

    fn fallback_over(pages: usize) -> BumpFallback<BuddyAllocator> {
        let buddy = BuddyAllocator::new();
        buddy.init(pages).unwrap();
        let fallback = BumpFallback::new(buddy);
        fallback.init().unwrap();
        fallback
    }

    #[test]
    fn test_tier_for_size() {
        assert_eq!(Tier::for_size(1), Tier::ShortTerm);
        assert_eq!(Tier::for_size(64), Tier::ShortTerm);
        assert_eq!(Tier::for_size(65), Tier::Working);
        assert_eq!(Tier::for_size(4096), Tier::Working);
        assert_eq!(Tier::for_size(4097), Tier::LongTerm);
    }

    #[test]
    fn test_not_initialized() {
        let fallback = BumpFallback::new(BuddyAllocator::<0x1000>::new());
        assert_eq!(
            fallback.alloc(32, Tier::ShortTerm),
            Err(AllocError::NotInitialized)
        );
    }

    #[test]
    fn test_bump_and_rewind() {
        let fallback = fallback_over(32);

        let a = fallback.alloc(24, Tier::ShortTerm).unwrap();
        let b = fallback.alloc(100, Tier::Working).unwrap();
        assert_eq!(a.as_ptr() as usize % FALLBACK_ALIGN, 0);
        assert_eq!(b.as_ptr() as usize, a.as_ptr() as usize + 32);
        assert_eq!(fallback.chunk_count(), 1);
        assert_eq!(fallback.page_allocator().used_pages(), FALLBACK_CHUNK_PAGES);

        let working = fallback.tier_stats(Tier::Working);
        assert_eq!(working.allocs, 1);
        assert_eq!(working.bytes_in_use, 112);

        fallback.free(a, 24, Tier::ShortTerm).unwrap();
        fallback.free(b, 100, Tier::Working).unwrap();
        assert_eq!(fallback.tier_stats(Tier::Working).bytes_in_use, 0);

        // The drained current chunk rewinds to its start.
        assert_eq!(fallback.alloc(8, Tier::ShortTerm).unwrap(), a);
    }

    #[test]
    fn test_drained_old_chunk_is_returned() {
        let fallback = fallback_over(32);
        let chunk_bytes = FALLBACK_CHUNK_PAGES * 0x1000;

        let big = fallback.alloc(chunk_bytes, Tier::LongTerm).unwrap();
        let small = fallback.alloc(32, Tier::ShortTerm).unwrap();
        assert_eq!(fallback.chunk_count(), 2);
        assert_eq!(
            fallback.page_allocator().used_pages(),
            2 * FALLBACK_CHUNK_PAGES
        );

        fallback.free(big, chunk_bytes, Tier::LongTerm).unwrap();
        assert_eq!(fallback.chunk_count(), 1);
        assert_eq!(fallback.page_allocator().used_pages(), FALLBACK_CHUNK_PAGES);

        fallback.free(small, 32, Tier::ShortTerm).unwrap();
        assert_eq!(
            fallback.free(small, 32, Tier::ShortTerm),
            Err(AllocError::NotAllocated)
        );
    }

    #[test]
    fn test_large_request_gets_own_chunk() {
        let fallback = fallback_over(32);
        let ptr = fallback.alloc(6 * 0x1000 + 1, Tier::LongTerm).unwrap();
        assert_eq!(fallback.page_allocator().used_pages(), 8);
        fallback.free(ptr, 6 * 0x1000 + 1, Tier::LongTerm).unwrap();
    }

    #[test]
    fn test_exhaustion_and_destroy() {
        let fallback = fallback_over(4);
        fallback.alloc(4 * 0x1000, Tier::LongTerm).unwrap();
        assert_eq!(
            fallback.alloc(16, Tier::ShortTerm),
            Err(AllocError::NoMemory)
        );

        fallback.destroy();
        assert!(!fallback.is_initialized());
        assert_eq!(fallback.chunk_count(), 0);
        assert_eq!(fallback.page_allocator().used_pages(), 0);
        assert_eq!(fallback.stats(), [TierStats::default(); Tier::COUNT]);
    }

    #[test]
    fn test_double_free_does_not_rewind_live_chunk() {
        let fallback = fallback_over(32);
        let a = fallback.alloc(32, Tier::ShortTerm).unwrap();
        let b = fallback.alloc(32, Tier::ShortTerm).unwrap();

        fallback.free(a, 32, Tier::ShortTerm).unwrap();
        assert_eq!(
            fallback.free(a, 32, Tier::ShortTerm),
            Err(AllocError::NotAllocated)
        );
        assert_eq!(fallback.tier_stats(Tier::ShortTerm).frees, 1);
        assert_eq!(fallback.tier_stats(Tier::ShortTerm).bytes_in_use, 32);

        // `b` is still live, so new allocations land after it.
        let c = fallback.alloc(32, Tier::ShortTerm).unwrap();
        let d = fallback.alloc(32, Tier::ShortTerm).unwrap();
        assert_ne!(c, b);
        assert_ne!(d, b);
        assert!(c.as_ptr() as usize > b.as_ptr() as usize);

        fallback.free(b, 32, Tier::ShortTerm).unwrap();
        fallback.free(c, 32, Tier::ShortTerm).unwrap();
        fallback.free(d, 32, Tier::ShortTerm).unwrap();
        assert_eq!(fallback.tier_stats(Tier::ShortTerm).bytes_in_use, 0);
    }

    #[test]
    fn test_only_allocation_starts_can_be_freed() {
        let fallback = fallback_over(32);
        let a = fallback.alloc(64, Tier::ShortTerm).unwrap();
        let addr = a.as_ptr() as usize;

        let interior = NonNull::new((addr + 8) as *mut u8).unwrap();
        assert_eq!(
            fallback.free(interior, 56, Tier::ShortTerm),
            Err(AllocError::NotAllocated)
        );
        let past_end = NonNull::new((addr + 64) as *mut u8).unwrap();
        assert_eq!(
            fallback.free(past_end, 16, Tier::ShortTerm),
            Err(AllocError::NotAllocated)
        );
        let foreign = NonNull::new((addr - 0x1000) as *mut u8).unwrap();
        assert_eq!(
            fallback.free(foreign, 16, Tier::ShortTerm),
            Err(AllocError::NotAllocated)
        );
        assert_eq!(fallback.tier_stats(Tier::ShortTerm).bytes_in_use, 64);

        fallback.free(a, 64, Tier::ShortTerm).unwrap();
        assert_eq!(fallback.tier_stats(Tier::ShortTerm).frees, 1);
    }

    #[test]
    fn test_huge_request_is_rejected() {
        let fallback = fallback_over(8);
        assert!(fallback.alloc(usize::MAX - 100, Tier::LongTerm).is_err());
        assert!(fallback.alloc(usize::MAX, Tier::LongTerm).is_err());

        fallback.alloc(16, Tier::ShortTerm).unwrap();
        assert!(fallback
            .alloc(usize::MAX - 0x2000, Tier::LongTerm)
            .is_err());
        assert_eq!(fallback.chunk_count(), 1);
        assert_eq!(fallback.tier_stats(Tier::LongTerm).allocs, 0);
    }

    #[test]
    fn test_reset_counters_keeps_usage() {
        let fallback = fallback_over(8);
        fallback.alloc(40, Tier::ShortTerm).unwrap();
        fallback.reset_counters();
        let stats = fallback.tier_stats(Tier::ShortTerm);
        assert_eq!(stats.allocs, 0);
        assert_eq!(stats.bytes_in_use, 48);
    }
}
