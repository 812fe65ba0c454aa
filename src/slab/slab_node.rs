//! Slab node implementation.
//!
//! A slab node manages exactly one page carved into equal-size object slots.
//! Free slots are threaded into an intrusive LIFO list (the next pointer is
//! stored in the first word of each free slot). An occupancy bitmap beside
//! the list catches double frees.

#[cfg(feature = "log")]
use log::warn;

use crate::{AllocError, AllocResult};

const OCCUPANCY_WORDS: usize = 8;

#[derive(Debug)]
pub struct SlabNode {
    page: usize,
    object_size: usize,
    capacity: usize,
    in_use: usize,
    free_len: usize,
    free_head: Option<usize>,
    occupied: [u64; OCCUPANCY_WORDS],
}

impl SlabNode {
    pub const MAX_OBJECTS: usize = OCCUPANCY_WORDS * 64;

    /// Carve the page at `page` into `page_size / object_size` slots.
    ///
    /// # Safety
    ///
    /// `page` must point to `page_size` writable bytes exclusively owned by
    /// this slab for as long as the node lives.
    pub unsafe fn new(page: usize, object_size: usize, page_size: usize) -> Self {
        let capacity = (page_size / object_size).min(Self::MAX_OBJECTS);

        // Thread from the last slot down so slot 0 ends up at the head.
        let mut free_head = None;
        for idx in (0..capacity).rev() {
            let slot = page + idx * object_size;
            // SAFETY: slot lies inside the page and is word aligned because
            // object sizes are multiples of the word size.
            unsafe { (slot as *mut usize).write(free_head.unwrap_or(0)) };
            free_head = Some(slot);
        }

        Self {
            page,
            object_size,
            capacity,
            in_use: 0,
            free_len: capacity,
            free_head,
            occupied: [0; OCCUPANCY_WORDS],
        }
    }

    pub fn page(&self) -> usize {
        self.page
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn in_use(&self) -> usize {
        self.in_use
    }

    pub fn free_count(&self) -> usize {
        self.free_len
    }

    pub fn is_full(&self) -> bool {
        self.free_head.is_none()
    }

    pub fn is_empty(&self) -> bool {
        self.in_use == 0
    }

    fn slot_index(&self, addr: usize) -> Option<usize> {
        let offset = addr.checked_sub(self.page)?;
        if offset % self.object_size != 0 {
            return None;
        }
        let idx = offset / self.object_size;
        (idx < self.capacity).then_some(idx)
    }

    fn is_occupied(&self, idx: usize) -> bool {
        self.occupied[idx / 64] & (1u64 << (idx % 64)) != 0
    }

    fn set_occupied(&mut self, idx: usize, occupied: bool) {
        let mask = 1u64 << (idx % 64);
        if occupied {
            self.occupied[idx / 64] |= mask;
        } else {
            self.occupied[idx / 64] &= !mask;
        }
    }

    /// Pop the most recently freed slot
    pub fn alloc_object(&mut self) -> Option<usize> {
        let slot = self.free_head?;
        // SAFETY: every address on the free list is a slot of this page.
        let next = unsafe { (slot as *const usize).read() };
        self.free_head = (next != 0).then_some(next);
        self.free_len -= 1;
        self.in_use += 1;

        let idx = (slot - self.page) / self.object_size;
        self.set_occupied(idx, true);
        Some(slot)
    }

    /// Push `addr` back onto the free list
    pub fn dealloc_object(&mut self, addr: usize) -> AllocResult {
        let Some(idx) = self.slot_index(addr) else {
            warn!(
                "slab: {:#x} is not a slot of the slab at {:#x} ({} byte objects)",
                addr, self.page, self.object_size
            );
            return Err(AllocError::NotAllocated);
        };
        if !self.is_occupied(idx) {
            warn!("slab: double free of {:#x}", addr);
            return Err(AllocError::NotAllocated);
        }

        // SAFETY: addr is an occupied slot of this page.
        unsafe { (addr as *mut usize).write(self.free_head.unwrap_or(0)) };
        self.free_head = Some(addr);
        self.free_len += 1;
        self.in_use -= 1;
        self.set_occupied(idx, false);
        Ok(())
    }

    /// Walk the free list and check slot conservation
    pub fn check_slots(&self) -> bool {
        let mut walked = 0;
        let mut current = self.free_head;
        while let Some(slot) = current {
            if walked > self.capacity {
                return false;
            }
            match self.slot_index(slot) {
                Some(idx) if !self.is_occupied(idx) => {}
                _ => return false,
            }
            walked += 1;
            // SAFETY: slot was validated as a slot of this page above.
            let next = unsafe { (slot as *const usize).read() };
            current = (next != 0).then_some(next);
        }
        let occupied: usize = self.occupied.iter().map(|w| w.count_ones() as usize).sum();
        walked == self.free_len
            && occupied == self.in_use
            && self.free_len + self.in_use == self.capacity
    }
}
