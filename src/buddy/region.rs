//! Backing region reservation
//!
//! The buddy allocator owns exactly one contiguous, page-aligned region for
//! its whole lifetime. It is reserved through the `alloc` crate's global
//! allocator and released when the region is dropped.

use alloc::alloc::{alloc_zeroed, dealloc};
use core::alloc::Layout;
use core::ptr::NonNull;

#[cfg(feature = "log")]
use log::error;

use crate::{AllocError, AllocResult};

/// Page-aligned backing storage for a buddy allocator
pub struct BackingRegion {
    base: NonNull<u8>,
    layout: Layout,
}

// SAFETY: the region is plain memory exclusively owned by this value;
// access to its contents is serialized by the buddy allocator's lock.
unsafe impl Send for BackingRegion {}
unsafe impl Sync for BackingRegion {}

impl BackingRegion {
    /// Reserve `num_pages * page_size` bytes aligned to `page_size`
    pub fn reserve(num_pages: usize, page_size: usize) -> AllocResult<Self> {
        let size = num_pages
            .checked_mul(page_size)
            .ok_or(AllocError::InvalidParam)?;
        let layout =
            Layout::from_size_align(size, page_size).map_err(|_| AllocError::InvalidParam)?;
        if layout.size() == 0 {
            return Err(AllocError::InvalidParam);
        }

        // SAFETY: layout has non-zero size.
        let ptr = unsafe { alloc_zeroed(layout) };
        let Some(base) = NonNull::new(ptr) else {
            error!("backing region: failed to reserve {:#x} bytes", size);
            return Err(AllocError::NoMemory);
        };

        Ok(Self { base, layout })
    }

    /// First address of the region
    pub fn base(&self) -> usize {
        self.base.as_ptr() as usize
    }

    /// Length of the region in bytes
    pub fn len(&self) -> usize {
        self.layout.size()
    }

    /// One past the last address of the region
    pub fn end(&self) -> usize {
        self.base() + self.len()
    }

    pub fn contains(&self, addr: usize) -> bool {
        addr >= self.base() && addr < self.end()
    }
}

impl Drop for BackingRegion {
    fn drop(&mut self) {
        // SAFETY: `base` was returned by `alloc_zeroed` with this exact layout.
        unsafe { dealloc(self.base.as_ptr(), self.layout) };
    }
}
