// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Tiered small-block cache over the allocator facade.
//!
//! Message envelopes are small, short-lived, and allocated on the send
//! hot path; a per-worker cache of recently freed blocks removes the
//! facade (and any lock inside it) from that path. Blocks are keyed by
//! size class (`size / 4 - 1`, sizes rounded up to multiples of 4) and
//! reused only on an exact alignment match so the original layout
//! survives until the block finally returns to the facade.
//!
//! One instance lives in each worker's thread-local state; a shared,
//! mutex-guarded instance serves senders that are not workers. Blocks
//! allocated by one thread and freed by another simply migrate between
//! caches; correctness never depends on which cache a block visits.

use super::facade::RawAllocator;
use crate::config::{MAX_CACHED_BLOCKS, POOL_COUNT};
use std::ptr::NonNull;
use std::sync::Arc;

struct CachedBlock {
    ptr: NonNull<u8>,
    align: usize,
}

/// Per-thread caching allocator.
pub struct CachingAllocator {
    facade: Arc<dyn RawAllocator>,
    pools: Vec<Vec<CachedBlock>>,
}

// SAFETY: cached blocks are exclusively owned by this cache; moving the
// cache to another thread moves ownership of every block with it.
unsafe impl Send for CachingAllocator {}

/// Size class for a block size, or `None` when the size is served by the
/// facade directly.
fn class_of(size: usize) -> Option<usize> {
    debug_assert!(size >= 4 && size % 4 == 0, "block sizes are multiples of 4");
    let class = size / 4 - 1;
    (class < POOL_COUNT).then_some(class)
}

fn class_size(class: usize) -> usize {
    (class + 1) * 4
}

impl CachingAllocator {
    pub fn new(facade: Arc<dyn RawAllocator>) -> Self {
        Self {
            facade,
            pools: (0..POOL_COUNT).map(|_| Vec::new()).collect(),
        }
    }

    /// Allocate a block of `size` bytes (a multiple of 4, at least 4) at
    /// the given alignment, preferring a cached block of the same class.
    pub fn allocate_aligned(&mut self, size: usize, align: usize) -> Option<NonNull<u8>> {
        if let Some(class) = class_of(size) {
            let pool = &mut self.pools[class];
            if let Some(at) = pool.iter().position(|block| block.align == align) {
                return Some(pool.swap_remove(at).ptr);
            }
        }
        self.facade.allocate_aligned(size, align)
    }

    /// Return a block to the cache, or to the facade when the class pool
    /// is full or the size is out of cache range.
    ///
    /// # Safety
    /// `ptr` must come from [`allocate_aligned`](Self::allocate_aligned)
    /// (on any thread's cache over the same facade) with exactly this
    /// `size` and `align`.
    pub unsafe fn free(&mut self, ptr: NonNull<u8>, size: usize, align: usize) {
        if let Some(class) = class_of(size) {
            let pool = &mut self.pools[class];
            if pool.len() < MAX_CACHED_BLOCKS {
                pool.push(CachedBlock { ptr, align });
                return;
            }
        }
        self.facade.free(ptr, size, align);
    }

    /// Drain every pool back to the facade.
    pub fn clear(&mut self) {
        for class in 0..POOL_COUNT {
            let size = class_size(class);
            for block in self.pools[class].drain(..) {
                // SAFETY: every cached block was allocated with its class
                // size and the recorded alignment.
                unsafe { self.facade.free(block.ptr, size, block.align) };
            }
        }
    }

    #[cfg(test)]
    fn cached_blocks(&self) -> usize {
        self.pools.iter().map(Vec::len).sum()
    }
}

impl Drop for CachingAllocator {
    fn drop(&mut self) {
        self.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::alloc::facade::DefaultAllocator;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingAllocator {
        allocs: AtomicUsize,
        frees: AtomicUsize,
    }

    impl CountingAllocator {
        fn new() -> Self {
            Self {
                allocs: AtomicUsize::new(0),
                frees: AtomicUsize::new(0),
            }
        }
    }

    impl RawAllocator for CountingAllocator {
        fn allocate_aligned(&self, size: usize, align: usize) -> Option<NonNull<u8>> {
            self.allocs.fetch_add(1, Ordering::Relaxed);
            DefaultAllocator.allocate_aligned(size, align)
        }

        unsafe fn free(&self, ptr: NonNull<u8>, size: usize, align: usize) {
            self.frees.fetch_add(1, Ordering::Relaxed);
            DefaultAllocator.free(ptr, size, align);
        }
    }

    #[test]
    fn reuse_hits_cache_not_facade() {
        let counting = Arc::new(CountingAllocator::new());
        let mut cache = CachingAllocator::new(counting.clone());

        let block = cache.allocate_aligned(32, 8).expect("alloc failed");
        unsafe { cache.free(block, 32, 8) };
        let again = cache.allocate_aligned(32, 8).expect("alloc failed");
        assert_eq!(block, again);
        assert_eq!(counting.allocs.load(Ordering::Relaxed), 1);
        assert_eq!(counting.frees.load(Ordering::Relaxed), 0);
        unsafe { cache.free(again, 32, 8) };
    }

    #[test]
    fn alignment_mismatch_misses_cache() {
        let counting = Arc::new(CountingAllocator::new());
        let mut cache = CachingAllocator::new(counting.clone());

        let block = cache.allocate_aligned(32, 8).expect("alloc failed");
        unsafe { cache.free(block, 32, 8) };
        let other = cache.allocate_aligned(32, 64).expect("alloc failed");
        assert_eq!(counting.allocs.load(Ordering::Relaxed), 2);
        unsafe { cache.free(other, 32, 64) };
    }

    #[test]
    fn pool_overflow_defers_to_facade() {
        let counting = Arc::new(CountingAllocator::new());
        let mut cache = CachingAllocator::new(counting.clone());

        let blocks: Vec<_> = (0..MAX_CACHED_BLOCKS + 1)
            .map(|_| cache.allocate_aligned(16, 8).expect("alloc failed"))
            .collect();
        for block in blocks {
            unsafe { cache.free(block, 16, 8) };
        }
        assert_eq!(cache.pools[3].len(), MAX_CACHED_BLOCKS);
        assert_eq!(counting.frees.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn oversized_blocks_bypass_pools() {
        let counting = Arc::new(CountingAllocator::new());
        let mut cache = CachingAllocator::new(counting.clone());

        let size = (POOL_COUNT + 1) * 4;
        let block = cache.allocate_aligned(size, 8).expect("alloc failed");
        unsafe { cache.free(block, size, 8) };
        assert_eq!(cache.cached_blocks(), 0);
        assert_eq!(counting.frees.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn clear_returns_everything() {
        let counting = Arc::new(CountingAllocator::new());
        let mut cache = CachingAllocator::new(counting.clone());

        for _ in 0..4 {
            let block = cache.allocate_aligned(24, 8).expect("alloc failed");
            unsafe { cache.free(block, 24, 8) };
            // freed straight back, so each iteration reuses one block
        }
        let a = cache.allocate_aligned(24, 8).expect("alloc failed");
        let b = cache.allocate_aligned(24, 8).expect("alloc failed");
        unsafe {
            cache.free(a, 24, 8);
            cache.free(b, 24, 8);
        }
        cache.clear();
        assert_eq!(cache.cached_blocks(), 0);
        assert_eq!(
            counting.allocs.load(Ordering::Relaxed),
            counting.frees.load(Ordering::Relaxed)
        );
    }
}
