// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Per-actor inbound FIFO.
//!
//! A mailbox is a spinlock-guarded intrusive queue of envelopes plus the
//! generational identity of its current occupant. The whole structure is
//! padded to a cache line so neighbouring mailboxes in a directory page
//! never share one.
//!
//! # Identity
//!
//! The `address` stored inside the mailbox is the truth senders check:
//! it is written when an actor is bound to the slot, nulled when the
//! actor is destroyed, and always read under the spinlock. Resolving an
//! index through the directory and then re-verifying the address under
//! the lock closes the window in which a slot could be freed and reused
//! between the two steps.
//!
//! # Ordering
//!
//! Strict FIFO among pushes observed under the lock; there is no
//! ordering relationship between different mailboxes.

use crate::core::sync::{SpinGuard, SpinLock};
use crate::core::types::Address;
use crate::engine::envelope::Envelope;
use crate::engine::scheduler::Scheduler;
use crossbeam::utils::CachePadded;
use std::ptr::{self, NonNull};
use std::sync::Arc;

/// Scheduler a bound mailbox is dispatched on.
pub(crate) struct SchedulerBinding {
    pub id: usize,
    pub scheduler: Arc<dyn Scheduler>,
}

/// Spinlock-protected mailbox interior.
pub(crate) struct MailboxState {
    address: Address,
    binding: Option<SchedulerBinding>,
    head: *mut Envelope,
    tail: *mut Envelope,
    count: u32,
}

// SAFETY: the queued envelopes are exclusively owned by the mailbox;
// the raw pointers never alias blocks owned elsewhere.
unsafe impl Send for MailboxState {}

impl Default for MailboxState {
    fn default() -> Self {
        Self {
            address: Address::NULL,
            binding: None,
            head: ptr::null_mut(),
            tail: ptr::null_mut(),
            count: 0,
        }
    }
}

impl MailboxState {
    /// Current occupant's address; null while the slot is unbound.
    pub fn address(&self) -> Address {
        self.address
    }

    pub fn binding(&self) -> Option<&SchedulerBinding> {
        self.binding.as_ref()
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        debug_assert_eq!(self.count == 0, self.head.is_null());
        self.count == 0
    }

    /// Bind a freshly created actor to this mailbox.
    pub fn bind(&mut self, address: Address, binding: SchedulerBinding) {
        debug_assert!(self.address.is_null(), "rebinding a live mailbox");
        debug_assert!(self.is_empty(), "binding a non-drained mailbox");
        self.address = address;
        self.binding = Some(binding);
    }

    /// Detach the occupant; the mailbox stops accepting envelopes.
    pub fn unbind(&mut self) {
        self.address = Address::NULL;
        self.binding = None;
    }

    /// Append one envelope, taking ownership.
    pub fn push(&mut self, env: NonNull<Envelope>) {
        let raw = env.as_ptr();
        // SAFETY: we own `env` from here until `pop`; its link field is
        // ours to write.
        unsafe { (*raw).set_next(ptr::null_mut()) };
        if self.tail.is_null() {
            self.head = raw;
        } else {
            // SAFETY: `tail` is the last queued envelope, owned by us.
            unsafe { (*self.tail).set_next(raw) };
        }
        self.tail = raw;
        self.count += 1;
    }

    /// Peek at the oldest envelope without removing it.
    #[allow(dead_code)] // diagnostic peek; dispatch always pops
    pub fn front(&self) -> Option<&Envelope> {
        // SAFETY: `head` is queued and owned by the mailbox; the borrow
        // is tied to the guard holding the lock.
        unsafe { self.head.as_ref() }
    }

    /// Remove and return the oldest envelope.
    pub fn pop(&mut self) -> Option<NonNull<Envelope>> {
        let head = NonNull::new(self.head)?;
        // SAFETY: `head` is queued and owned by the mailbox.
        let next = unsafe { (*head.as_ptr()).next() };
        self.head = next;
        if next.is_null() {
            self.tail = ptr::null_mut();
        }
        self.count -= 1;
        Some(head)
    }
}

/// Cache-line-aligned per-actor mailbox.
#[derive(Default)]
pub(crate) struct Mailbox {
    state: CachePadded<SpinLock<MailboxState>>,
}

impl Mailbox {
    pub fn lock(&self) -> SpinGuard<'_, MailboxState> {
        self.state.lock()
    }
}
