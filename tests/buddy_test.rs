//! Integration tests for the buddy page allocator
//!
//! Exercises the partition invariant and free-list coalescing over longer
//! allocation sequences than the unit tests.

#![no_std]

extern crate alloc;
extern crate frame_pmm;

use alloc::vec::Vec;
use core::ptr::NonNull;
use frame_pmm::{AllocError, BuddyAllocator, PageAllocator, MAX_ORDER};

const PAGE_SIZE: usize = 0x1000;

type Buddy = BuddyAllocator<PAGE_SIZE>;

/// Small xorshift generator so sequences are reproducible
struct XorShift(u64);

impl XorShift {
    fn next(&mut self) -> u64 {
        let mut x = self.0;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.0 = x;
        x
    }

    fn below(&mut self, bound: usize) -> usize {
        (self.next() % bound as u64) as usize
    }
}

fn free_block_table(buddy: &Buddy) -> Vec<Vec<usize>> {
    (0..=MAX_ORDER)
        .map(|order| {
            let mut blocks = buddy.free_blocks(order);
            blocks.sort_unstable();
            blocks
        })
        .collect()
}

#[test]
fn test_single_page_is_page_aligned() {
    let buddy = Buddy::new();
    buddy.init(1024).unwrap();

    let ptr = buddy.alloc(1).unwrap();
    assert_eq!(ptr.as_ptr() as usize % PAGE_SIZE, 0);
    assert_eq!(buddy.stats().used_pages, 1);
    assert!(buddy.check_partition());
}

#[test]
fn test_exhaustion_until_freed() {
    let buddy = Buddy::new();
    buddy.init(16).unwrap();
    assert_eq!(buddy.free_blocks(4), [0]);

    let whole = buddy.alloc(16).unwrap();
    let (base, _) = buddy.region().unwrap();
    assert_eq!(whole.as_ptr() as usize, base);
    assert_eq!(buddy.alloc(1), Err(AllocError::NoMemory));

    buddy.free(whole, 16).unwrap();
    assert!(buddy.alloc(1).is_ok());
}

#[test]
fn test_round_up_splits_once() {
    let buddy = Buddy::new();
    buddy.init(8).unwrap();
    let splits = buddy.stats().splits;

    let ptr = buddy.alloc(3).unwrap();
    let stats = buddy.stats();
    assert_eq!(stats.splits, splits + 1);
    assert_eq!(stats.used_pages, 4);
    assert_eq!(buddy.free_blocks(2), [4]);

    buddy.free(ptr, 3).unwrap();
    assert_eq!(buddy.free_blocks(3), [0]);
}

#[test]
fn test_buddies_merge_in_either_order() {
    for reverse in [false, true] {
        let buddy = Buddy::new();
        buddy.init(2).unwrap();

        let a = buddy.alloc(1).unwrap();
        let b = buddy.alloc(1).unwrap();
        assert_eq!(b.as_ptr() as usize - a.as_ptr() as usize, PAGE_SIZE);
        assert_eq!(buddy.free_block_count(0), 0);

        let (first, second) = if reverse { (b, a) } else { (a, b) };
        buddy.free(first, 1).unwrap();
        assert_eq!(buddy.free_block_count(0), 1);
        buddy.free(second, 1).unwrap();

        assert_eq!(buddy.free_blocks(1), [0]);
        assert_eq!(buddy.free_block_count(0), 0);
        assert_eq!(buddy.stats().merges, 1);
    }
}

#[test]
fn test_random_sequences_keep_partition_and_coalesce() {
    for (seed, total) in [(0x9e37_79b9_u64, 1000usize), (7, 4096), (12345, 37)] {
        let buddy = Buddy::new();
        buddy.init(total).unwrap();
        let initial = free_block_table(&buddy);
        let mut rng = XorShift(seed);
        let mut live: Vec<(NonNull<u8>, usize)> = Vec::new();

        for _ in 0..400 {
            if live.is_empty() || rng.below(3) != 0 {
                let pages = 1 + rng.below(20);
                match buddy.alloc(pages) {
                    Ok(ptr) => live.push((ptr, pages)),
                    Err(e) => assert_eq!(e, AllocError::NoMemory),
                }
            } else {
                let (ptr, pages) = live.swap_remove(rng.below(live.len()));
                buddy.free(ptr, pages).unwrap();
            }
            assert!(buddy.check_partition());
        }

        while !live.is_empty() {
            let (ptr, pages) = live.swap_remove(rng.below(live.len()));
            buddy.free(ptr, pages).unwrap();
        }
        assert!(buddy.check_partition());
        assert_eq!(buddy.available_pages(), total);
        assert_eq!(free_block_table(&buddy), initial);
    }
}

#[test]
fn test_invalid_frees_leave_table_intact() {
    let buddy = Buddy::new();
    buddy.init(64).unwrap();
    let ptr = buddy.alloc(4).unwrap();
    let addr = ptr.as_ptr() as usize;

    assert_eq!(buddy.free(ptr, 1), Err(AllocError::InvalidParam));
    assert_eq!(
        buddy.dealloc_pages(addr + 8, 4),
        Err(AllocError::InvalidParam)
    );
    assert_eq!(
        buddy.dealloc_pages(addr + 64 * PAGE_SIZE, 4),
        Err(AllocError::InvalidParam)
    );
    assert_eq!(buddy.free(ptr, 65), Err(AllocError::InvalidParam));
    assert_eq!(buddy.free(ptr, usize::MAX), Err(AllocError::InvalidParam));
    assert!(buddy.check_partition());

    buddy.free(ptr, 4).unwrap();
    assert_eq!(buddy.free(ptr, 4), Err(AllocError::NotAllocated));
    assert!(buddy.check_partition());
}
