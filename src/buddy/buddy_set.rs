//! Single-region buddy system
//!
//! Implements the core buddy algorithm over one backing region: order-indexed
//! free lists threaded through a page frame arena, splitting on allocation
//! and eager coalescing on free. This type is not synchronized; the
//! `BuddyAllocator` wrapper serializes access to it.

use alloc::vec::Vec;

#[cfg(feature = "log")]
use log::{debug, error, info, warn};

use super::{
    buddy_block::{BuddyBlock, PageFrame, PageState},
    free_list::{FreeList, FreeListIter},
    region::BackingRegion,
    stats::BuddyStats,
};
use crate::{is_aligned, order_for_pages, AllocError, AllocResult, MAX_ORDER, MAX_PAGES};

/// A buddy set - owns the backing region and all of its metadata
pub struct BuddySet<const PAGE_SIZE: usize = { crate::DEFAULT_PAGE_SIZE }> {
    region: BackingRegion,
    total_pages: usize,
    free_pages: usize,
    /// One record per page of the region
    frames: Vec<PageFrame>,
    /// Free lists for each order
    free_lists: [FreeList; MAX_ORDER + 1],
    allocs: u64,
    frees: u64,
    splits: u64,
    merges: u64,
}

impl<const PAGE_SIZE: usize> BuddySet<PAGE_SIZE> {
    /// Reserve a region of `total_pages` pages and seed the free lists
    pub fn new(total_pages: usize) -> AllocResult<Self> {
        if total_pages == 0 || total_pages > MAX_PAGES {
            error!(
                "buddy: invalid page count {} (must be in 1..={})",
                total_pages, MAX_PAGES
            );
            return Err(AllocError::InvalidParam);
        }

        let region = BackingRegion::reserve(total_pages, PAGE_SIZE)?;

        let mut frames = Vec::new();
        frames
            .try_reserve_exact(total_pages)
            .map_err(|_| AllocError::NoMemory)?;
        frames.resize(total_pages, PageFrame::interior());

        let mut set = Self {
            region,
            total_pages,
            free_pages: 0,
            frames,
            free_lists: [const { FreeList::new() }; MAX_ORDER + 1],
            allocs: 0,
            frees: 0,
            splits: 0,
            merges: 0,
        };

        for block in Self::initial_layout(total_pages) {
            set.free_lists[block.order].push_front(&mut set.frames, block.index, block.order);
            set.free_pages += block.pages();
        }

        info!(
            "buddy: region [{:#x}, {:#x}) with {} pages",
            set.region.base(),
            set.region.end(),
            total_pages
        );
        Ok(set)
    }

    /// Greedy decomposition of `[0, total_pages)` into the largest aligned
    /// power-of-two blocks that fit.
    pub fn initial_layout(total_pages: usize) -> Vec<BuddyBlock> {
        let mut blocks = Vec::new();
        let mut index = 0;
        while index < total_pages {
            let remaining = total_pages - index;
            let mut order = MAX_ORDER.min(remaining.ilog2() as usize);
            while index & ((1 << order) - 1) != 0 {
                order -= 1;
            }
            blocks.push(BuddyBlock::new(order, index));
            index += 1 << order;
        }
        blocks
    }

    pub fn base_addr(&self) -> usize {
        self.region.base()
    }

    pub fn end_addr(&self) -> usize {
        self.region.end()
    }

    pub fn total_pages(&self) -> usize {
        self.total_pages
    }

    pub fn free_pages(&self) -> usize {
        self.free_pages
    }

    fn addr_of(&self, index: usize) -> usize {
        self.region.base() + index * PAGE_SIZE
    }

    fn index_of(&self, addr: usize) -> AllocResult<usize> {
        if !self.region.contains(addr) {
            warn!(
                "buddy: address {:#x} not in region [{:#x}, {:#x})",
                addr,
                self.region.base(),
                self.region.end()
            );
            return Err(AllocError::InvalidParam);
        }
        let offset = addr - self.region.base();
        if !is_aligned(offset, PAGE_SIZE) {
            warn!("buddy: address {:#x} is not page aligned", addr);
            return Err(AllocError::InvalidParam);
        }
        Ok(offset / PAGE_SIZE)
    }

    /// Allocate a block of at least `num_pages` pages, returning its address
    pub fn alloc_pages(&mut self, num_pages: usize) -> AllocResult<usize> {
        if num_pages == 0 || num_pages > self.total_pages {
            return Err(AllocError::InvalidParam);
        }

        let required_order = order_for_pages(num_pages);
        if required_order > MAX_ORDER {
            return Err(AllocError::InvalidParam);
        }

        let Some(found_order) =
            (required_order..=MAX_ORDER).find(|&order| !self.free_lists[order].is_empty())
        else {
            debug!(
                "buddy: no free block for {} pages (order {}), {} pages free",
                num_pages, required_order, self.free_pages
            );
            return Err(AllocError::NoMemory);
        };

        let index = self.free_lists[found_order]
            .pop_front(&mut self.frames)
            .ok_or(AllocError::NoMemory)?;

        // Split down to the required order, returning upper halves
        let mut order = found_order;
        while order > required_order {
            order -= 1;
            let upper = index + (1 << order);
            self.free_lists[order].push_front(&mut self.frames, upper, order);
            self.splits += 1;
        }

        self.frames[index] = PageFrame {
            state: PageState::Allocated,
            order: required_order as u8,
            prev: None,
            next: None,
        };
        self.free_pages -= 1 << required_order;
        self.allocs += 1;

        Ok(self.addr_of(index))
    }

    /// Deallocate a block back to the buddy system with automatic merging
    pub fn dealloc_pages(&mut self, addr: usize, num_pages: usize) -> AllocResult {
        if num_pages == 0 {
            warn!("buddy: trying to deallocate 0 pages");
            return Err(AllocError::InvalidParam);
        }
        if num_pages > self.total_pages {
            warn!(
                "buddy: free of {} pages exceeds the {} managed",
                num_pages, self.total_pages
            );
            return Err(AllocError::InvalidParam);
        }

        let index = self.index_of(addr)?;
        let frame = self.frames[index];
        if frame.state != PageState::Allocated {
            warn!(
                "buddy: double free or foreign pointer at {:#x} (page {})",
                addr, index
            );
            return Err(AllocError::NotAllocated);
        }

        let recorded_order = frame.order as usize;
        if order_for_pages(num_pages) != recorded_order {
            error!(
                "buddy: free of {} pages at {:#x} does not match recorded order {}",
                num_pages, addr, recorded_order
            );
            return Err(AllocError::InvalidParam);
        }

        self.frames[index] = PageFrame::interior();
        self.free_pages += 1 << recorded_order;
        self.frees += 1;

        let mut block = BuddyBlock::new(recorded_order, index);
        while block.order < MAX_ORDER {
            let buddy = block.buddy_index();
            if buddy >= self.total_pages || !self.frames[buddy].is_free_head(block.order) {
                break;
            }
            self.free_lists[block.order].remove(&mut self.frames, buddy);
            self.merges += 1;
            block = block.parent();
        }

        self.free_lists[block.order].push_front(&mut self.frames, block.index, block.order);
        Ok(())
    }

    /// Get statistics for this set
    pub fn stats(&self) -> BuddyStats {
        let mut stats = BuddyStats::new();
        stats.total_pages = self.total_pages;
        stats.free_pages = self.free_pages;
        stats.used_pages = self.total_pages - self.free_pages;
        for (order, list) in self.free_lists.iter().enumerate() {
            stats.free_blocks_by_order[order] = list.len();
        }
        stats.allocs = self.allocs;
        stats.frees = self.frees;
        stats.splits = self.splits;
        stats.merges = self.merges;
        stats
    }

    pub fn reset_counters(&mut self) {
        self.allocs = 0;
        self.frees = 0;
        self.splits = 0;
        self.merges = 0;
    }

    /// Get free blocks of a specific order as an iterator of page indices
    pub fn free_blocks(&self, order: usize) -> FreeListIter<'_> {
        self.free_lists[order.min(MAX_ORDER)].iter(&self.frames)
    }

    /// Get the number of blocks in a specific order
    pub fn free_block_count(&self, order: usize) -> usize {
        if order <= MAX_ORDER {
            self.free_lists[order].len()
        } else {
            0
        }
    }

    /// Audit the whole table.
    ///
    /// Checks that free and allocated blocks tile the region exactly, that
    /// every block is aligned to its order, and that the free lists agree
    /// with the per-page states.
    pub fn check_partition(&self) -> bool {
        let mut free_heads = [0usize; MAX_ORDER + 1];
        let mut free_pages = 0;
        let mut index = 0;

        while index < self.total_pages {
            let frame = &self.frames[index];
            let order = frame.order as usize;
            match frame.state {
                PageState::Interior => {
                    error!("buddy audit: page {} is not covered by any block", index);
                    return false;
                }
                PageState::Free | PageState::Allocated => {
                    let block = BuddyBlock::new(order, index);
                    if order > MAX_ORDER || !block.is_aligned() {
                        error!("buddy audit: block {:?} is misaligned", block);
                        return false;
                    }
                    if index + block.pages() > self.total_pages {
                        error!("buddy audit: block {:?} overruns the region", block);
                        return false;
                    }
                    if let Some(inner) = (index + 1..index + block.pages())
                        .find(|&i| self.frames[i].state != PageState::Interior)
                    {
                        error!(
                            "buddy audit: page {} overlaps block {:?}",
                            inner, block
                        );
                        return false;
                    }
                    if frame.state == PageState::Free {
                        free_heads[order] += 1;
                        free_pages += block.pages();
                    }
                    index += block.pages();
                }
            }
        }

        if free_pages != self.free_pages {
            error!(
                "buddy audit: {} free pages on lists, counter says {}",
                free_pages, self.free_pages
            );
            return false;
        }

        for (order, list) in self.free_lists.iter().enumerate() {
            if list.len() != free_heads[order] {
                error!(
                    "buddy audit: order {} list has {} entries, {} free heads",
                    order,
                    list.len(),
                    free_heads[order]
                );
                return false;
            }
            if list
                .iter(&self.frames)
                .any(|i| !self.frames[i].is_free_head(order))
            {
                error!("buddy audit: order {} list links a non-free block", order);
                return false;
            }
        }
        true
    }

    /// Print the free block distribution
    pub fn print_free_lists(&self) {
        info!("========== Buddy Allocator Info ==========");
        info!(
            "Region: [{:#x}, {:#x}), page size {:#x}",
            self.region.base(),
            self.region.end(),
            PAGE_SIZE
        );
        info!(
            "Pages: {} total, {} free",
            self.total_pages, self.free_pages
        );
        for order in 0..=MAX_ORDER {
            let count = self.free_lists[order].len();
            if count > 0 {
                info!(
                    "  Order {}: {} blocks ({} bytes each)",
                    order,
                    count,
                    (1usize << order) * PAGE_SIZE
                );
            }
        }
        info!("==========================================");
    }
}
