// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! External receivers.
//!
//! A [`Receiver`] is an addressable mailbox drained by application
//! threads instead of workers: actors reply to its address, the owning
//! thread blocks on [`wait`](Receiver::wait) (or polls with
//! [`try_take`](Receiver::try_take)) and gets each message back as a
//! [`Delivery`] it can downcast or move the payload out of.
//!
//! Dropping a receiver deregisters its address - later sends fail with
//! `AddressStale` - and reclaims any undrained messages.

use crate::core::alloc::get_allocator;
use crate::core::types::Address;
use crate::directory;
use crate::directory::receivers::ReceiverSlot;
use crate::engine::envelope::{self, Envelope};
use crate::framework::FrameworkShared;
use std::ptr::NonNull;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

/// One message taken off a receiver's queue.
///
/// Owns the underlying envelope; dropping the delivery reclaims it,
/// payload included.
pub struct Delivery {
    env: NonNull<Envelope>,
}

// SAFETY: the delivery exclusively owns its envelope.
unsafe impl Send for Delivery {}

impl std::fmt::Debug for Delivery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Delivery")
            .field("type_name", &self.type_name())
            .finish()
    }
}

impl Delivery {
    fn new(env: NonNull<Envelope>) -> Self {
        Self { env }
    }

    fn envelope(&self) -> &Envelope {
        // SAFETY: the envelope stays live until this delivery drops.
        unsafe { self.env.as_ref() }
    }

    /// Address the message was sent from.
    pub fn sender(&self) -> Address {
        self.envelope().sender()
    }

    /// Payload type name.
    pub fn type_name(&self) -> &'static str {
        self.envelope().type_name()
    }

    /// Borrow the payload as `T`; `None` on type mismatch.
    pub fn payload_ref<T: 'static>(&self) -> Option<&T> {
        self.envelope().payload_ref::<T>()
    }

    /// Move the payload out, consuming the delivery. On type mismatch
    /// the delivery is handed back untouched.
    pub fn take<T: Send + 'static>(self) -> std::result::Result<T, Delivery> {
        if self.envelope().payload_ref::<T>().is_none() {
            return Err(self);
        }
        let env = self.env;
        std::mem::forget(self);
        // SAFETY: tag verified above; the envelope is ours and `forget`
        // disarmed the drop-path free.
        Ok(unsafe { envelope::take_with::<T>(env, &*get_allocator()) })
    }
}

impl Drop for Delivery {
    fn drop(&mut self) {
        // SAFETY: the delivery owns the envelope; this is its only free.
        unsafe { envelope::free_with(self.env, &*get_allocator()) };
    }
}

/// Addressable mailbox for non-actor threads.
pub struct Receiver {
    shared: Arc<FrameworkShared>,
    slot: &'static ReceiverSlot,
    address: Address,
}

impl Receiver {
    pub(crate) fn attach(
        shared: Arc<FrameworkShared>,
        slot: &'static ReceiverSlot,
        address: Address,
    ) -> Self {
        Self {
            shared,
            slot,
            address,
        }
    }

    /// Address actors send replies to.
    pub fn address(&self) -> Address {
        self.address
    }

    /// Block until a message arrives.
    pub fn wait(&self) -> Delivery {
        loop {
            if let Some(env) = self.slot.wait_pop(None) {
                return Delivery::new(env);
            }
        }
    }

    /// Block up to `timeout` for a message.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<Delivery> {
        self.slot.wait_pop(Some(timeout)).map(Delivery::new)
    }

    /// Take a message without waiting.
    pub fn try_take(&self) -> Option<Delivery> {
        self.slot.try_pop().map(Delivery::new)
    }

    /// Messages currently queued.
    pub fn len(&self) -> usize {
        self.slot.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Drop for Receiver {
    fn drop(&mut self) {
        let backlog = self.slot.unbind();
        for env in backlog {
            // SAFETY: unbinding transferred ownership of the backlog to
            // us; each envelope is freed exactly once.
            unsafe { envelope::free_with(env, &*self.shared.allocator) };
        }
        directory::receivers().free(self.address.index());
        self.shared.live_receivers.fetch_sub(1, Ordering::AcqRel);
    }
}
