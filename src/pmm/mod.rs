//! Physical memory manager facade
//!
//! Routes each request by size to the slab allocator, the buddy allocator or
//! the bump fallback, and keeps aggregate statistics on top of theirs:
//! - Requests up to 512 bytes go to the slab caches
//! - Page-sized and larger requests go to the buddy allocator
//! - Everything else goes to the bump fallback

pub mod config;
pub mod flags;
pub mod manager;
pub mod report;
pub mod stats;

pub use config::{MemoryMap, MemoryRegion, PmmConfig, RegionKind};
pub use flags::AllocFlags;
pub use manager::PhysicalMemoryManager;
pub use report::MemoryReport;
pub use stats::{BuddySummary, PmmStats};
