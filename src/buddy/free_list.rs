//! Intrusive free list threaded through the page frame arena
//!
//! Each order owns one list. Nodes are page indices; the links live in the
//! `PageFrame` records of the head pages, so pushing, popping and unlinking a
//! known buddy are all O(1) and need no separate node storage.

#[cfg(feature = "log")]
use log::error;

use super::buddy_block::{PageFrame, PageState};

/// Free list for one order - stores only head/len, links live in the arena
pub struct FreeList {
    head: Option<u32>,
    len: usize,
}

impl FreeList {
    /// Create a new empty list
    pub const fn new() -> Self {
        Self { head: None, len: 0 }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.head.is_none()
    }

    /// Forget all entries. The arena is reset separately by the owner.
    pub fn clear(&mut self) {
        self.head = None;
        self.len = 0;
    }

    /// Push the block headed at `index` to the front and mark it free
    pub fn push_front(&mut self, frames: &mut [PageFrame], index: usize, order: usize) {
        let old_head = self.head;
        if let Some(h) = old_head {
            frames[h as usize].prev = Some(index as u32);
        }

        let frame = &mut frames[index];
        frame.state = PageState::Free;
        frame.order = order as u8;
        frame.prev = None;
        frame.next = old_head;

        self.head = Some(index as u32);
        self.len += 1;
    }

    /// Pop the front block; its frame is left in `Interior` state for the
    /// caller to re-label.
    pub fn pop_front(&mut self, frames: &mut [PageFrame]) -> Option<usize> {
        let index = self.head? as usize;
        self.remove(frames, index);
        Some(index)
    }

    /// Unlink the block headed at `index`.
    ///
    /// The caller must have checked that `index` heads a free block of this
    /// list's order.
    pub fn remove(&mut self, frames: &mut [PageFrame], index: usize) {
        let (prev, next) = {
            let frame = &frames[index];
            if frame.state != PageState::Free {
                error!("free list: page {} is not a free block head", index);
                return;
            }
            (frame.prev, frame.next)
        };

        match prev {
            Some(p) => frames[p as usize].next = next,
            None => self.head = next,
        }
        if let Some(n) = next {
            frames[n as usize].prev = prev;
        }

        frames[index] = PageFrame::interior();
        self.len = self.len.saturating_sub(1);
    }

    /// Iterate over the head indices of this list, front to back
    pub fn iter<'a>(&self, frames: &'a [PageFrame]) -> FreeListIter<'a> {
        FreeListIter {
            frames,
            current: self.head,
            remaining: self.len,
        }
    }
}

impl Default for FreeList {
    fn default() -> Self {
        Self::new()
    }
}

/// Iterator over the page indices of one free list
pub struct FreeListIter<'a> {
    frames: &'a [PageFrame],
    current: Option<u32>,
    remaining: usize,
}

impl Iterator for FreeListIter<'_> {
    type Item = usize;

    fn next(&mut self) -> Option<Self::Item> {
        // Bounded by len so a corrupted link cannot loop forever.
        if self.remaining == 0 {
            return None;
        }
        let index = self.current? as usize;
        self.current = self.frames.get(index).and_then(|f| f.next);
        self.remaining -= 1;
        Some(index)
    }
}
