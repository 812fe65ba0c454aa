//! Slab cache implementation for a single size class.
//!
//! A cache owns the slabs of one object size. New slabs are pushed at the
//! head of the list and slabs are scanned newest first, so freshly grown
//! pages and recently freed slots are reused before older ones.

use alloc::vec::Vec;

#[cfg(feature = "log")]
use log::{debug, error, warn};

use super::size_class::SizeClass;
use super::slab_node::SlabNode;
use crate::{align_down, AllocError, AllocResult, PageAllocator};

/// Per-cache statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub object_size: usize,
    pub objects_per_slab: usize,
    pub slabs: usize,
    pub total_objects: usize,
    pub free_objects: usize,
    pub in_use: usize,
    pub allocs: u64,
    pub frees: u64,
}

/// Slab cache for a specific size class
pub struct SlabCache {
    size_class: SizeClass,
    /// Head of the list is the last element.
    slabs: Vec<SlabNode>,
    allocs: u64,
    frees: u64,
}

impl SlabCache {
    pub const fn new(size_class: SizeClass) -> Self {
        Self {
            size_class,
            slabs: Vec::new(),
            allocs: 0,
            frees: 0,
        }
    }

    pub fn size_class(&self) -> SizeClass {
        self.size_class
    }

    pub fn slab_count(&self) -> usize {
        self.slabs.len()
    }

    /// Grow the cache by exactly one page and insert the slab at the head
    pub fn grow<P: PageAllocator>(&mut self, pages: &P) -> AllocResult {
        self.slabs
            .try_reserve(1)
            .map_err(|_| AllocError::NoMemory)?;
        let page = pages.alloc_pages(1)?;
        // SAFETY: the page allocator handed this page to us exclusively.
        let node = unsafe { SlabNode::new(page, self.size_class.size(), P::PAGE_SIZE) };
        debug!(
            "slab cache {}: new slab at {:#x} with {} objects",
            self.size_class.size(),
            page,
            node.capacity()
        );
        self.slabs.push(node);
        Ok(())
    }

    /// Allocate an object from this cache, growing it if every slab is full
    pub fn alloc_object<P: PageAllocator>(&mut self, pages: &P) -> AllocResult<usize> {
        let idx = match self.slabs.iter().rposition(|slab| !slab.is_full()) {
            Some(idx) => idx,
            None => {
                self.grow(pages)?;
                self.slabs.len() - 1
            }
        };

        let obj_addr = self.slabs[idx].alloc_object().ok_or_else(|| {
            error!(
                "slab cache {}: slab at {:#x} reported free slots but had none",
                self.size_class.size(),
                self.slabs[idx].page()
            );
            AllocError::NoMemory
        })?;
        self.allocs += 1;
        Ok(obj_addr)
    }

    /// Deallocate an object.
    ///
    /// A slab that becomes fully free is returned to the page allocator
    /// unless it is the last slab of the cache.
    pub fn dealloc_object<P: PageAllocator>(&mut self, obj_addr: usize, pages: &P) -> AllocResult {
        let page = align_down(obj_addr, P::PAGE_SIZE);
        let Some(idx) = self.slabs.iter().position(|slab| slab.page() == page) else {
            warn!(
                "slab cache {}: no slab owns {:#x}",
                self.size_class.size(),
                obj_addr
            );
            return Err(AllocError::NotAllocated);
        };

        self.slabs[idx].dealloc_object(obj_addr)?;
        self.frees += 1;

        if self.slabs[idx].is_empty() && self.slabs.len() > 1 {
            match pages.dealloc_pages(page, 1) {
                Ok(()) => {
                    self.slabs.remove(idx);
                    debug!(
                        "slab cache {}: returned empty slab at {:#x}",
                        self.size_class.size(),
                        page
                    );
                }
                Err(_e) => {
                    error!(
                        "slab cache {}: failed to return slab at {:#x}: {:?}",
                        self.size_class.size(),
                        page,
                        _e
                    );
                }
            }
        }
        Ok(())
    }

    /// Forget every slab without returning pages
    pub fn forget_slabs(&mut self) {
        self.slabs.clear();
    }

    pub fn reset_counters(&mut self) {
        self.allocs = 0;
        self.frees = 0;
    }

    pub fn stats(&self) -> CacheStats {
        let total_objects = self.slabs.iter().map(SlabNode::capacity).sum();
        let free_objects = self.slabs.iter().map(SlabNode::free_count).sum();
        CacheStats {
            object_size: self.size_class.size(),
            objects_per_slab: self.slabs.first().map_or(0, SlabNode::capacity),
            slabs: self.slabs.len(),
            total_objects,
            free_objects,
            in_use: self.slabs.iter().map(SlabNode::in_use).sum(),
            allocs: self.allocs,
            frees: self.frees,
        }
    }

    pub fn check_slots(&self) -> bool {
        self.slabs.iter().all(SlabNode::check_slots)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::alloc::{alloc, dealloc};
    use core::alloc::Layout;
    use core::cell::RefCell;

    struct MockPageAllocator {
        allocated: RefCell<Vec<(usize, Layout)>>,
        limit: usize,
    }

    impl MockPageAllocator {
        fn new(limit: usize) -> Self {
            Self {
                allocated: RefCell::new(Vec::new()),
                limit,
            }
        }
    }

    impl Drop for MockPageAllocator {
        fn drop(&mut self) {
            for (addr, layout) in self.allocated.borrow_mut().drain(..) {
                unsafe { dealloc(addr as *mut u8, layout) };
            }
        }
    }

    impl PageAllocator for MockPageAllocator {
        const PAGE_SIZE: usize = 4096;

        fn alloc_pages(&self, num_pages: usize) -> AllocResult<usize> {
            if self.allocated.borrow().len() >= self.limit {
                return Err(AllocError::NoMemory);
            }
            let layout = Layout::from_size_align(num_pages * 4096, 4096)
                .map_err(|_| AllocError::InvalidParam)?;
            let addr = unsafe { alloc(layout) } as usize;
            if addr == 0 {
                return Err(AllocError::NoMemory);
            }
            self.allocated.borrow_mut().push((addr, layout));
            Ok(addr)
        }

        fn dealloc_pages(&self, pos: usize, _num_pages: usize) -> AllocResult {
            let mut allocated = self.allocated.borrow_mut();
            let idx = allocated
                .iter()
                .position(|&(addr, _)| addr == pos)
                .ok_or(AllocError::NotAllocated)?;
            let (_, layout) = allocated.swap_remove(idx);
            unsafe { dealloc(pos as *mut u8, layout) };
            Ok(())
        }

        fn total_pages(&self) -> usize {
            self.limit
        }

        fn used_pages(&self) -> usize {
            self.allocated.borrow().len()
        }

        fn available_pages(&self) -> usize {
            self.limit - self.used_pages()
        }
    }

    #[test]
    fn test_alloc_dealloc() {
        let mut cache = SlabCache::new(SizeClass::Bytes64);
        let pages = MockPageAllocator::new(4);

        let obj_addr = cache.alloc_object(&pages).unwrap();
        assert_ne!(obj_addr, 0);
        assert_eq!(cache.slab_count(), 1);

        cache.dealloc_object(obj_addr, &pages).unwrap();
        // The last slab stays even when empty.
        assert_eq!(cache.slab_count(), 1);
        assert_eq!(pages.used_pages(), 1);
    }

    #[test]
    fn test_grows_one_page_at_a_time() {
        let mut cache = SlabCache::new(SizeClass::Bytes512);
        let pages = MockPageAllocator::new(4);

        let addrs: Vec<usize> = (0..9).map(|_| cache.alloc_object(&pages).unwrap()).collect();
        assert_eq!(cache.slab_count(), 2);
        assert_eq!(pages.used_pages(), 2);

        let stats = cache.stats();
        assert_eq!(stats.objects_per_slab, 8);
        assert_eq!(stats.total_objects, 16);
        assert_eq!(stats.in_use, 9);
        assert_eq!(stats.free_objects, 7);
        assert!(cache.check_slots());

        // Emptying the older slab hands its page back.
        for &addr in &addrs[..8] {
            cache.dealloc_object(addr, &pages).unwrap();
        }
        assert_eq!(cache.slab_count(), 1);
        assert_eq!(pages.used_pages(), 1);
        assert!(cache.check_slots());
    }

    #[test]
    fn test_growth_failure() {
        let mut cache = SlabCache::new(SizeClass::Bytes512);
        let pages = MockPageAllocator::new(1);
        for _ in 0..8 {
            cache.alloc_object(&pages).unwrap();
        }
        assert_eq!(cache.alloc_object(&pages), Err(AllocError::NoMemory));
        assert_eq!(cache.stats().allocs, 8);
    }

    #[test]
    fn test_foreign_pointer_rejected() {
        let mut cache = SlabCache::new(SizeClass::Bytes64);
        let pages = MockPageAllocator::new(2);
        cache.grow(&pages).unwrap();
        assert_eq!(
            cache.dealloc_object(0x1000, &pages),
            Err(AllocError::NotAllocated)
        );
        assert_eq!(cache.stats().frees, 0);
    }
}
