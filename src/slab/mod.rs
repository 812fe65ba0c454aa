//! Slab allocator implementation.
//!
//! Small objects (up to [`SLAB_MAX_SIZE`](crate::SLAB_MAX_SIZE) bytes) are
//! served from per-size-class caches. Each slab is exactly one page obtained
//! from a [`PageAllocator`](crate::PageAllocator); slab metadata lives outside
//! the page so every byte of it holds objects.

pub mod size_class;
pub mod slab_allocator;
pub mod slab_cache;
pub mod slab_node;

// Re-export public types
pub use size_class::SizeClass;
pub use slab_allocator::{SlabAllocator, SlabStats};
pub use slab_cache::{CacheStats, SlabCache};
pub use slab_node::SlabNode;
