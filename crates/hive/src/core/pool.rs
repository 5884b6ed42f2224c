// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Paged generational slot pool.
//!
//! Backs the entity directories: a fixed table of page cells, each page
//! holding [`ENTRIES_PER_PAGE`] slots of `T`, materialized on first use.
//! Allocation hands out dense integer indices with bounded worst-case
//! latency (one scan over at most [`MAX_PAGES`] pages) and always
//! prefers the lowest page with capacity, keeping the live set dense at
//! low indices.
//!
//! # Generations
//!
//! Every slot carries a monotone 32-bit sequence starting at 1. Freeing
//! a slot does not advance the sequence; reallocating a freed slot does.
//! [`resolve`](PagedPool::resolve) returns the slot only when the stored
//! sequence equals the caller's, so handles held across a free/reuse
//! cycle stop resolving instead of aliasing the new occupant. Sequences
//! wrap at 32 bits; the value 0 is skipped so a zeroed handle never
//! resolves.
//!
//! # Concurrency
//!
//! Allocation bookkeeping sits behind one mutex; allocate and free are
//! rare and never on the message hot path. Slot *containers* are
//! permanent once their page exists: [`get`](PagedPool::get) is
//! lock-free and may return a currently-free slot, whose interior state
//! (e.g. a nulled mailbox address) is what gates actual use.

use crate::config::{ENTRIES_PER_PAGE, MAX_PAGES};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::OnceLock;

/// Pool allocation failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolExhausted;

impl std::fmt::Display for PoolExhausted {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "slot pool exhausted")
    }
}

impl std::error::Error for PoolExhausted {}

struct PoolSlot<T> {
    sequence: AtomicU32,
    value: T,
}

struct Page<T> {
    slots: Vec<PoolSlot<T>>,
}

impl<T: Default> Page<T> {
    fn new() -> Self {
        Self {
            slots: (0..ENTRIES_PER_PAGE)
                .map(|_| PoolSlot {
                    sequence: AtomicU32::new(1),
                    value: T::default(),
                })
                .collect(),
        }
    }
}

struct PageState {
    /// Freed slot offsets, reused LIFO.
    free: Vec<u16>,
    /// Next never-used slot offset in this page.
    fresh: u16,
}

impl PageState {
    fn new() -> Self {
        Self {
            free: Vec::new(),
            fresh: 0,
        }
    }

    fn has_capacity(&self) -> bool {
        !self.free.is_empty() || (self.fresh as usize) < ENTRIES_PER_PAGE
    }
}

struct PoolState {
    pages: Vec<PageState>,
    live: u32,
    top_page: usize,
}

/// Paged pool of `T` slots with generational sequences.
pub struct PagedPool<T> {
    cells: Box<[OnceLock<Box<Page<T>>>]>,
    state: Mutex<PoolState>,
    capacity: u32,
}

impl<T: Default> PagedPool<T> {
    /// Pool with the given slot capacity (rounded down to the global
    /// page-table ceiling).
    pub fn new(capacity: u32) -> Self {
        let capacity = capacity.min((MAX_PAGES * ENTRIES_PER_PAGE) as u32);
        let cells = (0..MAX_PAGES).map(|_| OnceLock::new()).collect::<Vec<_>>();
        Self {
            cells: cells.into_boxed_slice(),
            state: Mutex::new(PoolState {
                pages: Vec::new(),
                live: 0,
                top_page: 0,
            }),
            capacity,
        }
    }

    /// Reserve a slot, returning its index and current sequence.
    pub fn allocate(&self) -> Result<(u32, u32), PoolExhausted> {
        let mut state = self.state.lock();
        if state.live >= self.capacity {
            return Err(PoolExhausted);
        }
        let page_limit = (self.capacity as usize).div_ceil(ENTRIES_PER_PAGE);
        for page_index in 0..page_limit.min(MAX_PAGES) {
            if page_index == state.pages.len() {
                state.pages.push(PageState::new());
            }
            if !state.pages[page_index].has_capacity() {
                continue;
            }
            let page = self.cells[page_index].get_or_init(|| Box::new(Page::new()));
            state.top_page = state.top_page.max(page_index);

            let page_state = &mut state.pages[page_index];
            let (offset, recycled) = match page_state.free.pop() {
                Some(offset) => (offset, true),
                None => {
                    let offset = page_state.fresh;
                    page_state.fresh += 1;
                    (offset, false)
                }
            };
            let slot = &page.slots[offset as usize];
            let sequence = if recycled {
                let mut next = slot.sequence.load(Ordering::Relaxed).wrapping_add(1);
                if next == 0 {
                    next = 1;
                }
                slot.sequence.store(next, Ordering::Release);
                next
            } else {
                slot.sequence.load(Ordering::Relaxed)
            };
            state.live += 1;
            let index = (page_index * ENTRIES_PER_PAGE) as u32 + u32::from(offset);
            return Ok((index, sequence));
        }
        Err(PoolExhausted)
    }

    /// Release a slot for reuse. Returns `false` for indices that were
    /// never allocated.
    pub fn free(&self, index: u32) -> bool {
        let page_index = index as usize / ENTRIES_PER_PAGE;
        let offset = (index as usize % ENTRIES_PER_PAGE) as u16;
        let mut state = self.state.lock();
        let Some(page_state) = state.pages.get_mut(page_index) else {
            return false;
        };
        if offset >= page_state.fresh {
            return false;
        }
        debug_assert!(
            !page_state.free.contains(&offset),
            "double free of pool slot {}",
            index
        );
        page_state.free.push(offset);
        state.live -= 1;
        true
    }

    /// Slot container at `index`, regardless of generation. Lock-free.
    pub fn get(&self, index: u32) -> Option<&T> {
        let page_index = index as usize / ENTRIES_PER_PAGE;
        let offset = index as usize % ENTRIES_PER_PAGE;
        let page = self.cells.get(page_index)?.get()?;
        Some(&page.slots[offset].value)
    }

    /// Slot container at `index`, only if its generation still matches.
    pub fn resolve(&self, index: u32, sequence: u32) -> Option<&T> {
        let page_index = index as usize / ENTRIES_PER_PAGE;
        let offset = index as usize % ENTRIES_PER_PAGE;
        let page = self.cells.get(page_index)?.get()?;
        let slot = &page.slots[offset];
        (slot.sequence.load(Ordering::Acquire) == sequence).then(|| &slot.value)
    }

    /// Number of live slots.
    pub fn live(&self) -> u32 {
        self.state.lock().live
    }

    /// Exclusive upper bound on indices that may ever have been handed
    /// out; caps directory sweeps.
    pub fn index_bound(&self) -> u32 {
        let state = self.state.lock();
        if state.pages.is_empty() {
            0
        } else {
            ((state.top_page + 1) * ENTRIES_PER_PAGE) as u32
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dense_low_indices() -> Result<(), String> {
        let pool: PagedPool<u8> = PagedPool::new(256);
        let (a, _) = pool.allocate().map_err(|e| e.to_string())?;
        let (b, _) = pool.allocate().map_err(|e| e.to_string())?;
        let (c, _) = pool.allocate().map_err(|e| e.to_string())?;
        if (a, b, c) != (0, 1, 2) {
            return Err(format!("expected dense indices, got {:?}", (a, b, c)));
        }
        pool.free(b);
        let (again, _) = pool.allocate().map_err(|e| e.to_string())?;
        if again != b {
            return Err(format!("expected lowest free slot {}, got {}", b, again));
        }
        Ok(())
    }

    #[test]
    fn sequence_advances_only_on_reuse() {
        let pool: PagedPool<u8> = PagedPool::new(64);
        let (index, first) = pool.allocate().expect("allocate failed");
        assert_eq!(first, 1);
        assert!(pool.resolve(index, first).is_some());

        pool.free(index);
        // free does not advance; the stale handle is rejected only after reuse
        let (same, second) = pool.allocate().expect("allocate failed");
        assert_eq!(same, index);
        assert_eq!(second, first + 1);
        assert!(pool.resolve(index, first).is_none());
        assert!(pool.resolve(index, second).is_some());
    }

    #[test]
    fn capacity_is_enforced() {
        let pool: PagedPool<u8> = PagedPool::new(8);
        let mut held = Vec::new();
        for _ in 0..8 {
            held.push(pool.allocate().expect("allocate failed"));
        }
        assert_eq!(pool.allocate(), Err(PoolExhausted));
        pool.free(held[3].0);
        assert!(pool.allocate().is_ok());
    }

    #[test]
    fn spills_to_next_page() {
        let pool: PagedPool<u8> = PagedPool::new(256);
        let mut last = 0;
        for _ in 0..ENTRIES_PER_PAGE + 1 {
            last = pool.allocate().expect("allocate failed").0;
        }
        assert_eq!(last as usize, ENTRIES_PER_PAGE);
        assert_eq!(pool.index_bound() as usize, 2 * ENTRIES_PER_PAGE);
    }

    #[test]
    fn get_ignores_generation() {
        let pool: PagedPool<u8> = PagedPool::new(64);
        let (index, sequence) = pool.allocate().expect("allocate failed");
        pool.free(index);
        assert!(pool.get(index).is_some());
        assert!(pool.resolve(index, sequence).is_some(), "free alone keeps the sequence");
    }

    #[test]
    fn unknown_indices_do_not_resolve() {
        let pool: PagedPool<u8> = PagedPool::new(64);
        assert!(pool.get(500_000).is_none());
        assert!(pool.resolve(3, 1).is_none());
        assert!(!pool.free(3));
    }
}
