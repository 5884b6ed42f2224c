// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Message envelopes.
//!
//! An envelope is one heap block: a fixed header immediately followed by
//! the payload at its natural alignment. The header records everything
//! needed to route, dispatch, and finally reclaim the block on a thread
//! other than the one that built it: the sender address, the payload
//! type tag, the block size and alignment handed to the allocator, and
//! a type-erased drop function for the payload.
//!
//! The header also carries the intrusive `next` link that threads
//! envelopes through mailbox and receiver FIFOs without further
//! allocation.
//!
//! Ownership is linear: a sender owns the envelope until the push into
//! the destination queue succeeds; after that exactly one consumer
//! (dispatcher, receiver, or fallback path) frees it.

use crate::core::alloc::{CachingAllocator, RawAllocator};
use crate::core::types::{Address, TypeTag};
use std::alloc::Layout;
use std::any::TypeId;
use std::ptr::{self, NonNull};

/// Envelope header; the payload lives in the same block at
/// `payload_offset`.
#[repr(C)]
pub struct Envelope {
    next: *mut Envelope,
    from: Address,
    tag: TypeTag,
    block_size: u32,
    block_align: u32,
    payload_offset: u32,
    drop_payload: unsafe fn(*mut u8),
}

impl Envelope {
    /// Construct an envelope for `value` in memory from `cache`.
    ///
    /// Returns `None` on allocation failure; no partial state remains.
    pub fn build<T: Send + 'static>(
        cache: &mut CachingAllocator,
        from: Address,
        value: T,
    ) -> Option<NonNull<Envelope>> {
        let header = Layout::new::<Envelope>();
        let (layout, payload_offset) = header.extend(Layout::new::<T>()).ok()?;
        let layout = layout.pad_to_align();
        // Block sizes are multiples of 4 so the cache can key them.
        let size = (layout.size().max(4) + 3) & !3;
        let align = layout.align();

        let block = cache.allocate_aligned(size, align)?;
        let env = block.cast::<Envelope>();

        unsafe fn drop_in_place<T>(payload: *mut u8) {
            // SAFETY: caller passes the payload pointer of an envelope
            // whose tag matched `T` at construction.
            ptr::drop_in_place(payload.cast::<T>());
        }

        // SAFETY: `block` is a fresh allocation of `size >= layout.size()`
        // bytes at `align`; the header and payload regions are disjoint by
        // construction of `payload_offset`.
        unsafe {
            ptr::write(
                env.as_ptr(),
                Envelope {
                    next: ptr::null_mut(),
                    from,
                    tag: TypeTag::of::<T>(),
                    block_size: size as u32,
                    block_align: align as u32,
                    payload_offset: payload_offset as u32,
                    drop_payload: drop_in_place::<T>,
                },
            );
            ptr::write(block.as_ptr().add(payload_offset).cast::<T>(), value);
        }
        Some(env)
    }

    /// Sender recorded at construction.
    pub fn sender(&self) -> Address {
        self.from
    }

    /// Payload type tag.
    pub fn tag(&self) -> TypeTag {
        self.tag
    }

    /// Payload type name (registered name or compiler path).
    pub fn type_name(&self) -> &'static str {
        self.tag.name()
    }

    /// Borrow the payload as `T`; `None` when the tag does not match.
    pub fn payload_ref<T: 'static>(&self) -> Option<&T> {
        if self.tag.id() != TypeId::of::<T>() {
            return None;
        }
        // SAFETY: the tag match proves the payload was written as a `T`
        // at `payload_offset`, and it stays valid until the block is
        // freed.
        Some(unsafe { &*self.payload_ptr().cast::<T>() })
    }

    fn payload_ptr(&self) -> *mut u8 {
        // SAFETY: `payload_offset` is in bounds of the block this header
        // heads.
        unsafe { (self as *const Envelope as *mut u8).add(self.payload_offset as usize) }
    }

    pub(crate) fn set_next(&mut self, next: *mut Envelope) {
        self.next = next;
    }

    pub(crate) fn next(&self) -> *mut Envelope {
        self.next
    }
}

/// Drop the payload in place and return the block to a worker cache.
///
/// # Safety
/// `env` must be a live envelope owned by the caller; it is consumed.
pub(crate) unsafe fn free_with_cache(env: NonNull<Envelope>, cache: &mut CachingAllocator) {
    let header = env.as_ptr();
    let size = (*header).block_size as usize;
    let align = (*header).block_align as usize;
    ((*header).drop_payload)((*header).payload_ptr());
    cache.free(env.cast::<u8>(), size, align);
}

/// Drop the payload in place and return the block straight to the
/// facade (non-worker consumers: receivers, failed sends).
///
/// # Safety
/// As [`free_with_cache`].
pub(crate) unsafe fn free_with(env: NonNull<Envelope>, allocator: &dyn RawAllocator) {
    let header = env.as_ptr();
    let size = (*header).block_size as usize;
    let align = (*header).block_align as usize;
    ((*header).drop_payload)((*header).payload_ptr());
    allocator.free(env.cast::<u8>(), size, align);
}

/// Move the payload out and free the block without dropping it.
///
/// # Safety
/// `env` must be a live envelope owned by the caller whose tag matches
/// `T`; it is consumed.
pub(crate) unsafe fn take_with<T: 'static>(
    env: NonNull<Envelope>,
    allocator: &dyn RawAllocator,
) -> T {
    let header = env.as_ptr();
    debug_assert_eq!((*header).tag.id(), TypeId::of::<T>());
    let size = (*header).block_size as usize;
    let align = (*header).block_align as usize;
    let value = ptr::read((*header).payload_ptr().cast::<T>());
    allocator.free(env.cast::<u8>(), size, align);
    value
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::alloc::{get_allocator, DefaultAllocator};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn test_cache() -> CachingAllocator {
        CachingAllocator::new(Arc::new(DefaultAllocator))
    }

    #[test]
    fn build_and_read_back() {
        let mut cache = test_cache();
        let from = Address::actor(1, 1);
        let env = Envelope::build(&mut cache, from, 42u32).expect("build failed");
        // SAFETY: env is live until freed below.
        let header = unsafe { env.as_ref() };
        assert_eq!(header.sender(), from);
        assert_eq!(header.payload_ref::<u32>(), Some(&42));
        assert_eq!(header.payload_ref::<u64>(), None);
        unsafe { free_with_cache(env, &mut cache) };
    }

    #[test]
    fn payload_drop_runs_once() {
        static DROPS: AtomicUsize = AtomicUsize::new(0);
        struct Tracked;
        impl Drop for Tracked {
            fn drop(&mut self) {
                DROPS.fetch_add(1, Ordering::Relaxed);
            }
        }

        let mut cache = test_cache();
        let env = Envelope::build(&mut cache, Address::NULL, Tracked).expect("build failed");
        unsafe { free_with_cache(env, &mut cache) };
        assert_eq!(DROPS.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn take_skips_payload_drop() {
        static DROPS: AtomicUsize = AtomicUsize::new(0);
        struct Counted(u64);
        impl Drop for Counted {
            fn drop(&mut self) {
                DROPS.fetch_add(1, Ordering::Relaxed);
            }
        }

        let mut cache = test_cache();
        let env = Envelope::build(&mut cache, Address::NULL, Counted(9)).expect("build failed");
        let value = unsafe { take_with::<Counted>(env, &*get_allocator()) };
        assert_eq!(DROPS.load(Ordering::Relaxed), 0);
        assert_eq!(value.0, 9);
        drop(value);
        assert_eq!(DROPS.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn high_alignment_payload() {
        #[repr(align(64))]
        struct Aligned(u8);

        let mut cache = test_cache();
        let env = Envelope::build(&mut cache, Address::NULL, Aligned(7)).expect("build failed");
        let header = unsafe { env.as_ref() };
        let payload = header.payload_ref::<Aligned>().expect("payload missing");
        assert_eq!(payload as *const Aligned as usize % 64, 0);
        assert_eq!(payload.0, 7);
        unsafe { free_with_cache(env, &mut cache) };
    }

    #[test]
    fn zero_sized_payload() {
        let mut cache = test_cache();
        let env = Envelope::build(&mut cache, Address::NULL, ()).expect("build failed");
        let header = unsafe { env.as_ref() };
        assert!(header.payload_ref::<()>().is_some());
        unsafe { free_with_cache(env, &mut cache) };
    }
}
