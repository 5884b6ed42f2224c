// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Process-wide allocator facade.
//!
//! Every component acquires raw memory through one injection point so
//! applications can route the runtime onto a custom allocator. The
//! facade is installed at most once, before any framework exists;
//! installation after first use is rejected rather than silently
//! swapping allocators underneath live blocks.

use std::alloc::{self, Layout};
use std::ptr::NonNull;
use std::sync::{Arc, OnceLock};

/// Default alignment for size-only allocations.
pub const DEFAULT_ALIGN: usize = 16;

/// Raw memory source consumed by the runtime.
///
/// Rust's allocator contract requires the full layout on deallocation,
/// so `free` takes the original size and alignment; every call site in
/// the runtime records both (the envelope header carries them through
/// the message's life).
pub trait RawAllocator: Send + Sync {
    /// Allocate `size` bytes at [`DEFAULT_ALIGN`].
    fn allocate(&self, size: usize) -> Option<NonNull<u8>> {
        self.allocate_aligned(size, DEFAULT_ALIGN)
    }

    /// Allocate `size` bytes at the given alignment. Returns `None` on
    /// exhaustion; callers surface `AllocationFailure`.
    fn allocate_aligned(&self, size: usize, align: usize) -> Option<NonNull<u8>>;

    /// Release a block previously returned by this allocator.
    ///
    /// # Safety
    /// `ptr` must come from this allocator with exactly this `size` and
    /// `align`, and must not be freed twice.
    unsafe fn free(&self, ptr: NonNull<u8>, size: usize, align: usize);
}

/// Facade over `std::alloc`.
#[derive(Debug, Default)]
pub struct DefaultAllocator;

impl RawAllocator for DefaultAllocator {
    fn allocate_aligned(&self, size: usize, align: usize) -> Option<NonNull<u8>> {
        let layout = Layout::from_size_align(size, align).ok()?;
        if layout.size() == 0 {
            return None;
        }
        // SAFETY: layout is valid and non-zero-sized.
        NonNull::new(unsafe { alloc::alloc(layout) })
    }

    unsafe fn free(&self, ptr: NonNull<u8>, size: usize, align: usize) {
        // SAFETY: caller guarantees the block came from `allocate_aligned`
        // with this exact layout.
        alloc::dealloc(ptr.as_ptr(), Layout::from_size_align_unchecked(size, align));
    }
}

static GLOBAL_ALLOCATOR: OnceLock<Arc<dyn RawAllocator>> = OnceLock::new();

/// Install the process-wide allocator.
///
/// Returns `false` if an allocator is already in place (including the
/// default one materialized by a prior [`get_allocator`] call); the
/// installed facade is never replaced.
pub fn init_allocator(allocator: Arc<dyn RawAllocator>) -> bool {
    GLOBAL_ALLOCATOR.set(allocator).is_ok()
}

/// Get the process-wide allocator (installs the default on first use).
pub fn get_allocator() -> Arc<dyn RawAllocator> {
    GLOBAL_ALLOCATOR
        .get_or_init(|| Arc::new(DefaultAllocator))
        .clone()
}
