//! Buddy page allocator module
//!
//! This module provides the buddy system implementation with:
//! - A page frame arena holding per-page order and state
//! - Intrusive per-order free lists threaded through that arena
//! - Splitting on allocation and eager coalescing on free
//! - Statistics and a full partition audit

pub mod buddy_allocator;
pub mod buddy_block;
pub mod buddy_set;
pub mod free_list;
pub mod region;
pub mod stats;

pub use buddy_allocator::BuddyAllocator;
pub use buddy_block::{BuddyBlock, PageFrame, PageState};
pub use buddy_set::BuddySet;
pub use free_list::{FreeList, FreeListIter};
pub use region::BackingRegion;
#[cfg(feature = "tracking")]
pub use stats::MemoryStatsReporter;
pub use stats::BuddyStats;
