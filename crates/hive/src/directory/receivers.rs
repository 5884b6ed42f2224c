// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Receiver directory slots.
//!
//! A receiver is an externally drained mailbox: delivery pushes the
//! envelope straight onto the slot's queue and pulses the condition, an
//! application thread pops it with an optional timeout. No scheduler is
//! involved; receivers exist so non-actor threads can get replies out of
//! the system.

use crate::core::types::Address;
use crate::engine::envelope::Envelope;
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::ptr::NonNull;
use std::time::Duration;

struct ReceiverState {
    address: Address,
    queue: VecDeque<NonNull<Envelope>>,
}

// SAFETY: queued envelopes are exclusively owned by the slot until
// popped.
unsafe impl Send for ReceiverState {}

impl Default for ReceiverState {
    fn default() -> Self {
        Self {
            address: Address::NULL,
            queue: VecDeque::new(),
        }
    }
}

/// Directory slot for one external receiver.
#[derive(Default)]
pub(crate) struct ReceiverSlot {
    state: Mutex<ReceiverState>,
    ready: Condvar,
}

impl ReceiverSlot {
    /// Bind a freshly allocated receiver.
    pub fn bind(&self, address: Address) {
        let mut state = self.state.lock();
        debug_assert!(state.address.is_null(), "rebinding a live receiver slot");
        debug_assert!(state.queue.is_empty());
        state.address = address;
    }

    /// Detach the receiver, returning any undrained envelopes.
    pub fn unbind(&self) -> Vec<NonNull<Envelope>> {
        let mut state = self.state.lock();
        state.address = Address::NULL;
        state.queue.drain(..).collect()
    }

    /// Deliver an envelope if the slot still answers to `address`.
    ///
    /// On identity mismatch the envelope is returned to the caller,
    /// which keeps ownership and must reclaim it.
    pub fn push_if(&self, address: Address, env: NonNull<Envelope>) -> Result<(), NonNull<Envelope>> {
        let mut state = self.state.lock();
        if state.address != address {
            return Err(env);
        }
        state.queue.push_back(env);
        drop(state);
        self.ready.notify_one();
        Ok(())
    }

    /// Pop the oldest envelope, waiting up to `timeout` (or forever when
    /// `None`) for one to arrive.
    pub fn wait_pop(&self, timeout: Option<Duration>) -> Option<NonNull<Envelope>> {
        let mut state = self.state.lock();
        loop {
            if let Some(env) = state.queue.pop_front() {
                return Some(env);
            }
            match timeout {
                Some(duration) => {
                    if self.ready.wait_for(&mut state, duration).timed_out() {
                        return state.queue.pop_front();
                    }
                }
                None => self.ready.wait(&mut state),
            }
        }
    }

    /// Pop the oldest envelope without waiting.
    pub fn try_pop(&self) -> Option<NonNull<Envelope>> {
        self.state.lock().queue.pop_front()
    }

    pub fn len(&self) -> usize {
        self.state.lock().queue.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::alloc::{get_allocator, CachingAllocator};
    use crate::engine::envelope;
    use std::sync::Arc;
    use std::thread;

    fn make_envelope(value: u32) -> NonNull<Envelope> {
        let mut cache = CachingAllocator::new(get_allocator());
        Envelope::build(&mut cache, Address::NULL, value).expect("build failed")
    }

    fn reclaim(env: NonNull<Envelope>) {
        // SAFETY: test owns the envelope.
        unsafe { envelope::free_with(env, &*get_allocator()) };
    }

    #[test]
    fn push_wakes_waiter() {
        let slot = Arc::new(ReceiverSlot::default());
        let address = Address::receiver(1, 1);
        slot.bind(address);

        let waiter = {
            let slot = Arc::clone(&slot);
            thread::spawn(move || {
                let env = slot.wait_pop(Some(Duration::from_secs(5)))?;
                // SAFETY: the envelope is exclusively ours once popped.
                let value = unsafe { env.as_ref() }.payload_ref::<u32>().copied();
                // SAFETY: freeing the envelope we own, exactly once.
                unsafe { envelope::free_with(env, &*get_allocator()) };
                value
            })
        };
        slot.push_if(address, make_envelope(7)).expect("push failed");
        assert_eq!(waiter.join().expect("waiter panicked"), Some(7));
    }

    #[test]
    fn identity_mismatch_returns_envelope() {
        let slot = ReceiverSlot::default();
        slot.bind(Address::receiver(1, 1));
        let env = make_envelope(1);
        let stale = Address::receiver(1, 9);
        let returned = slot.push_if(stale, env).expect_err("should not deliver");
        assert_eq!(slot.len(), 0);
        reclaim(returned);
    }

    #[test]
    fn timeout_expires_empty() {
        let slot = ReceiverSlot::default();
        slot.bind(Address::receiver(2, 1));
        assert!(slot.wait_pop(Some(Duration::from_millis(10))).is_none());
    }

    #[test]
    fn unbind_returns_backlog() {
        let slot = ReceiverSlot::default();
        let address = Address::receiver(3, 1);
        slot.bind(address);
        slot.push_if(address, make_envelope(1)).expect("push failed");
        slot.push_if(address, make_envelope(2)).expect("push failed");

        let backlog = slot.unbind();
        assert_eq!(backlog.len(), 2);
        let rejected = slot
            .push_if(address, make_envelope(3))
            .expect_err("unbound slot must refuse delivery");
        reclaim(rejected);
        for env in backlog {
            reclaim(env);
        }
    }
}
