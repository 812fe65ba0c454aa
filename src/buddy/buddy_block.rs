//! Buddy block and per-page frame metadata
//!
//! A block is identified by the index of its first page and its order.
//! Every page of the backing region has one `PageFrame` record; only the
//! head page of a block carries meaningful state.

use crate::MAX_ORDER;

/// Buddy block metadata
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BuddyBlock {
    pub order: usize,
    pub index: usize,
}

impl BuddyBlock {
    /// Create a new buddy block
    pub const fn new(order: usize, index: usize) -> Self {
        Self { order, index }
    }

    /// Number of pages spanned by this block
    pub const fn pages(&self) -> usize {
        1 << self.order
    }

    /// Page index of the buddy block.
    ///
    /// For a block at order k with index i, its buddy is at i ^ 2^k.
    pub const fn buddy_index(&self) -> usize {
        self.index ^ (1 << self.order)
    }

    /// Whether the first page index is aligned to the block size
    pub const fn is_aligned(&self) -> bool {
        self.index & (self.pages() - 1) == 0
    }

    /// The block both buddies merge into
    pub const fn parent(&self) -> Self {
        Self {
            order: self.order + 1,
            index: self.index & !(1 << self.order),
        }
    }
}

/// Role of a page within the backing region
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageState {
    /// Not the head of any block (covered by a block starting lower).
    Interior,
    /// Head page of a free block, linked into its order's free list.
    Free,
    /// Head page of a block handed out to a caller.
    Allocated,
}

/// Metadata for a single page frame.
///
/// `prev`/`next` are free-list links; they are only valid while
/// `state == PageState::Free`.
#[derive(Debug, Clone, Copy)]
pub struct PageFrame {
    pub state: PageState,
    pub order: u8,
    pub prev: Option<u32>,
    pub next: Option<u32>,
}

impl PageFrame {
    pub const fn interior() -> Self {
        Self {
            state: PageState::Interior,
            order: 0,
            prev: None,
            next: None,
        }
    }

    /// Whether this page heads a free block of exactly `order`
    pub fn is_free_head(&self, order: usize) -> bool {
        self.state == PageState::Free && self.order as usize == order
    }
}

const _: () = assert!(MAX_ORDER < u8::MAX as usize);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buddy_index() {
        assert_eq!(BuddyBlock::new(0, 0).buddy_index(), 1);
        assert_eq!(BuddyBlock::new(0, 1).buddy_index(), 0);
        assert_eq!(BuddyBlock::new(2, 4).buddy_index(), 0);
        assert_eq!(BuddyBlock::new(2, 8).buddy_index(), 12);
        assert_eq!(BuddyBlock::new(3, 8).buddy_index(), 0);
    }

    #[test]
    fn test_parent_and_alignment() {
        let block = BuddyBlock::new(1, 6);
        assert!(block.is_aligned());
        assert_eq!(block.parent(), BuddyBlock::new(2, 4));
        assert!(!BuddyBlock::new(2, 6).is_aligned());
    }
}
