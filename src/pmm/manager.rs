//! The physical memory manager facade.
//!
//! Requests are routed by size alone: the same size must be passed to
//! [`free`](PhysicalMemoryManager::free) as was passed to
//! [`alloc`](PhysicalMemoryManager::alloc), since no per-allocation header is
//! kept. Mismatches are caught where the sub-allocator has metadata to notice
//! them.

use alloc::sync::Arc;
use core::fmt::Write;
use core::ptr::NonNull;
use core::sync::atomic::{AtomicBool, Ordering};

use kspin::SpinNoIrq;

#[cfg(feature = "log")]
use log::{debug, info, trace, warn};

use super::config::{MemoryMap, PmmConfig};
use super::flags::AllocFlags;
use super::report::{MemoryReport, TruncatingWriter};
use super::stats::{PmmCounters, PmmStats};
use crate::buddy::BuddyAllocator;
use crate::fallback::{BumpFallback, Tier};
use crate::slab::SlabAllocator;
use crate::{AllocError, AllocResult, MAX_PAGES, SLAB_MAX_SIZE};

type SharedBuddy<const PAGE_SIZE: usize> = Arc<BuddyAllocator<PAGE_SIZE>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Route {
    Slab(usize),
    Buddy(usize),
    Fallback(usize, Tier),
}

#[derive(Default)]
struct PmmState {
    config: PmmConfig,
    memory_map: MemoryMap,
    counters: PmmCounters,
}

/// Physical memory manager routing between buddy, slab and fallback
pub struct PhysicalMemoryManager<const PAGE_SIZE: usize = { crate::DEFAULT_PAGE_SIZE }> {
    buddy: SharedBuddy<PAGE_SIZE>,
    slab: SlabAllocator<SharedBuddy<PAGE_SIZE>>,
    fallback: BumpFallback<SharedBuddy<PAGE_SIZE>>,
    /// Never held while a sub-allocator is called.
    state: SpinNoIrq<PmmState>,
    initialized: AtomicBool,
}

impl<const PAGE_SIZE: usize> PhysicalMemoryManager<PAGE_SIZE> {
    pub fn new() -> Self {
        let buddy = Arc::new(BuddyAllocator::new());
        Self {
            slab: SlabAllocator::new(buddy.clone()),
            fallback: BumpFallback::new(buddy.clone()),
            buddy,
            state: SpinNoIrq::new(PmmState::default()),
            initialized: AtomicBool::new(false),
        }
    }

    /// Bring up the sub-allocators described by `config`.
    ///
    /// The buddy allocator is initialized whenever any path is enabled since
    /// slab and fallback draw their pages from it. A failing sub-allocator
    /// aborts init and everything brought up so far is torn down again.
    /// Calling `init` on an initialized manager is a no-op success.
    pub fn init(&self, memory_map: &MemoryMap, config: PmmConfig) -> AllocResult {
        if self.is_initialized() {
            debug!("pmm: already initialized");
            return Ok(());
        }
        if config.min_alloc_size == 0 || config.min_alloc_size > config.max_alloc_size {
            warn!(
                "pmm: bad size limits {}..={}",
                config.min_alloc_size, config.max_alloc_size
            );
            return Err(AllocError::InvalidParam);
        }

        let mut frames = usize::try_from(memory_map.usable_memory / PAGE_SIZE as u64)
            .unwrap_or(usize::MAX);
        if frames == 0 {
            warn!("pmm: no usable memory in map");
            return Err(AllocError::InvalidParam);
        }
        if frames > MAX_PAGES {
            warn!(
                "pmm: {} usable frames, managing only the first {}",
                frames, MAX_PAGES
            );
            frames = MAX_PAGES;
        }

        if let Err(e) = self.init_paths(frames, &config) {
            warn!("pmm: initialization failed: {:?}", e);
            self.teardown();
            return Err(e);
        }

        let buddy = self.buddy.stats();
        {
            let mut state = self.state.lock();
            state.config = config;
            state.memory_map = memory_map.clone();
            state.counters = PmmCounters::default();
            state.counters.mirror_frames(&buddy);
        }
        self.initialized.store(true, Ordering::Release);
        info!(
            "pmm: {} KB usable, {} frames managed (buddy: {}, slab: {}, fallback: {})",
            memory_map.usable_memory / 1024,
            frames,
            config.enable_buddy,
            config.enable_slab,
            config.enable_fallback
        );
        Ok(())
    }

    fn init_paths(&self, frames: usize, config: &PmmConfig) -> AllocResult {
        if config.any_enabled() {
            self.buddy.init(frames)?;
        }
        if config.enable_slab {
            self.slab.init()?;
        }
        if config.enable_fallback {
            self.fallback.init()?;
        }
        Ok(())
    }

    fn teardown(&self) {
        self.fallback.destroy();
        self.slab.destroy();
        self.buddy.destroy();
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    /// Active configuration; `NotInitialized` before init
    pub fn config(&self) -> AllocResult<PmmConfig> {
        if !self.is_initialized() {
            return Err(AllocError::NotInitialized);
        }
        Ok(self.state.lock().config)
    }

    pub fn memory_map(&self) -> MemoryMap {
        self.state.lock().memory_map.clone()
    }

    fn route(&self, size: usize) -> AllocResult<Route> {
        let config = self.config()?;
        if size == 0 || size > config.max_alloc_size {
            return Err(AllocError::InvalidParam);
        }
        let size = size.max(config.min_alloc_size);

        if size <= SLAB_MAX_SIZE && config.enable_slab {
            Ok(Route::Slab(size))
        } else if size >= PAGE_SIZE && config.enable_buddy {
            Ok(Route::Buddy(size.div_ceil(PAGE_SIZE)))
        } else if config.enable_fallback {
            Ok(Route::Fallback(size, Tier::for_size(size)))
        } else {
            debug!("pmm: no enabled path serves {} bytes", size);
            Err(AllocError::SubsystemDisabled)
        }
    }

    /// Bytes charged to `bytes_allocated` for a request
    fn charged_bytes(route: Route, size: usize) -> usize {
        match route {
            Route::Buddy(pages) => pages * PAGE_SIZE,
            Route::Slab(_) | Route::Fallback(..) => size,
        }
    }

    fn record(&self, bytes: usize, is_alloc: bool) {
        let buddy = self.buddy.stats();
        let mut state = self.state.lock();
        if is_alloc {
            state.counters.record_alloc(bytes);
        } else {
            state.counters.record_free(bytes);
        }
        state.counters.mirror_frames(&buddy);
    }

    /// Allocate `size` bytes from the path chosen by size
    pub fn alloc(&self, size: usize, flags: AllocFlags) -> AllocResult<NonNull<u8>> {
        let route = self.route(size)?;
        trace!("pmm: alloc {} bytes via {:?}, flags {:?}", size, route, flags);

        let ptr = match route {
            Route::Slab(size) => self.slab.alloc(size),
            Route::Buddy(pages) => self.buddy.alloc(pages),
            Route::Fallback(size, tier) => self.fallback.alloc(size, tier),
        }?;

        if flags.contains(AllocFlags::ZERO) {
            // SAFETY: every path hands out at least `size` writable bytes.
            unsafe { ptr.as_ptr().write_bytes(0, size) };
        }
        self.record(Self::charged_bytes(route, size), true);
        Ok(ptr)
    }

    /// Free memory from [`alloc`](Self::alloc); `size` must match the request
    pub fn free(&self, ptr: NonNull<u8>, size: usize) -> AllocResult {
        let route = self.route(size)?;
        trace!("pmm: free {:#x} ({} bytes) via {:?}", ptr.as_ptr() as usize, size, route);

        match route {
            Route::Slab(size) => self.slab.free(ptr, size),
            Route::Buddy(pages) => self.buddy.free(ptr, pages),
            Route::Fallback(size, tier) => self.fallback.free(ptr, size, tier),
        }?;
        self.record(Self::charged_bytes(route, size), false);
        Ok(())
    }

    fn page_path(&self) -> AllocResult {
        if !self.config()?.enable_buddy {
            return Err(AllocError::SubsystemDisabled);
        }
        Ok(())
    }

    /// Allocate `count` contiguous frames straight from the buddy allocator
    pub fn alloc_pages(&self, count: usize) -> AllocResult<NonNull<u8>> {
        self.page_path()?;
        if count == 0 {
            return Err(AllocError::InvalidParam);
        }
        let ptr = self.buddy.alloc(count)?;
        self.record(count * PAGE_SIZE, true);
        Ok(ptr)
    }

    pub fn free_pages(&self, ptr: NonNull<u8>, count: usize) -> AllocResult {
        self.page_path()?;
        if count == 0 {
            return Err(AllocError::InvalidParam);
        }
        self.buddy.free(ptr, count)?;
        self.record(count * PAGE_SIZE, false);
        Ok(())
    }

    pub fn alloc_page(&self) -> AllocResult<NonNull<u8>> {
        self.alloc_pages(1)
    }

    pub fn free_page(&self, ptr: NonNull<u8>) -> AllocResult {
        self.free_pages(ptr, 1)
    }

    pub fn get_stats(&self) -> PmmStats {
        let buddy = self.buddy.stats();
        let slab = self.slab.stats();
        let fallback = self.fallback.stats();
        let counters = self.state.lock().counters;
        PmmStats::new(&counters, &buddy, slab, fallback)
    }

    /// Zero every counter in the PMM and its sub-allocators.
    ///
    /// Frame totals are kept.
    pub fn reset_stats(&self) {
        self.buddy.reset_counters();
        self.slab.reset_counters();
        self.fallback.reset_counters();
        self.state.lock().counters.reset();
        debug!("pmm: statistics reset");
    }

    /// Cheap sanity probe of the frame figures, not a full audit
    pub fn check_consistency(&self) -> bool {
        let counters = self.state.lock().counters;
        if counters.used_frames + counters.free_frames > counters.total_frames {
            warn!(
                "pmm: frame count mismatch: {} used + {} free > {} total",
                counters.used_frames, counters.free_frames, counters.total_frames
            );
            return false;
        }
        if !(self.buddy.is_initialized()
            || self.slab.is_initialized()
            || self.fallback.is_initialized())
        {
            warn!("pmm: no allocator initialized");
            return false;
        }
        true
    }

    pub fn report(&self) -> MemoryReport {
        MemoryReport {
            page_size: PAGE_SIZE,
            stats: self.get_stats(),
            buddy_initialized: self.buddy.is_initialized(),
            slab_initialized: self.slab.is_initialized(),
            fallback_initialized: self.fallback.is_initialized(),
        }
    }

    /// Render [`report`](Self::report) into `buf`, truncating if it is too
    /// small. Returns the number of bytes written.
    pub fn format_report(&self, buf: &mut [u8]) -> usize {
        let mut writer = TruncatingWriter::new(buf);
        // The writer never fails, it only drops what does not fit.
        let _ = write!(writer, "{}", self.report());
        writer.written()
    }

    /// Log a short usage summary at info level
    #[allow(unused_variables)]
    pub fn print_summary(&self) {
        let stats = self.get_stats();
        info!(
            "pmm: {} KB total, {} KB used, {} KB free, {} allocs, {} frees",
            stats.total_frames * PAGE_SIZE / 1024,
            stats.used_frames * PAGE_SIZE / 1024,
            stats.free_frames * PAGE_SIZE / 1024,
            stats.alloc_count,
            stats.free_count
        );
    }

    /// Tear down fallback, slab and buddy in that order and clear all
    /// counters. Outstanding pointers become dangling.
    pub fn destroy(&self) {
        self.initialized.store(false, Ordering::Release);
        self.teardown();
        *self.state.lock() = PmmState::default();
        info!("pmm: destroyed");
    }

    pub fn buddy(&self) -> &BuddyAllocator<PAGE_SIZE> {
        &self.buddy
    }

    pub fn slab(&self) -> &SlabAllocator<SharedBuddy<PAGE_SIZE>> {
        &self.slab
    }

    pub fn fallback(&self) -> &BumpFallback<SharedBuddy<PAGE_SIZE>> {
        &self.fallback
    }
}

impl<const PAGE_SIZE: usize> Default for PhysicalMemoryManager<PAGE_SIZE> {
    fn default() -> Self {
        Self::new()
    }
}
