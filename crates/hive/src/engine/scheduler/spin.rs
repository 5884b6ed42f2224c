// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Non-blocking scheduler: spinlocked FIFO plus progressive backoff.
//!
//! Workers never sleep on a primitive; when both queues are empty they
//! back off according to the configured yield strategy (pause hints,
//! `yield_now`, or a bounded sleep for POLITE). `wake_all` is a no-op
//! because nothing ever waits.

use super::{
    bump_yield, install_tls, local_push, note_shared_push, reset_yield, take_local, take_tls,
    Scheduler, SchedulerCore, WorkerContext,
};
use crate::core::alloc::CachingAllocator;
use crate::core::sync::SpinLock;
use crate::engine::policy::{self, YieldStrategy};
use std::collections::VecDeque;
use std::sync::Arc;

pub(crate) struct SpinScheduler {
    core: SchedulerCore,
    queue: SpinLock<VecDeque<u32>>,
    strategy: YieldStrategy,
}

impl SpinScheduler {
    pub fn new(strategy: YieldStrategy) -> Self {
        debug_assert!(strategy.is_spinning());
        Self {
            core: SchedulerCore::new(),
            queue: SpinLock::new(VecDeque::new()),
            strategy,
        }
    }

    fn shared_push(&self, index: u32) {
        self.queue.lock().push_back(index);
        note_shared_push(self.core.id());
    }
}

impl Scheduler for SpinScheduler {
    fn id(&self) -> usize {
        self.core.id()
    }

    fn push(&self, index: u32, local_hint: bool) {
        if local_hint {
            match local_push(self.core.id(), index) {
                // parked in the local slot, nothing displaced
                Some(None) => return,
                // parked; promote the previous occupant
                Some(Some(displaced)) => {
                    self.shared_push(displaced);
                    return;
                }
                // not one of our workers after all
                None => {}
            }
        }
        self.shared_push(index);
    }

    fn pop(&self) -> Option<u32> {
        if let Some(index) = take_local(self.core.id()) {
            return Some(index);
        }
        if let Some(index) = self.queue.lock().pop_front() {
            reset_yield(self.core.id());
            return Some(index);
        }
        let visits = bump_yield(self.core.id());
        policy::back_off(self.strategy, visits);
        None
    }

    fn initialize(&self, ctx: Arc<WorkerContext>, cache: CachingAllocator) {
        install_tls(self.core.id(), ctx, cache);
    }

    fn teardown(&self) {
        if let Some(leftover) = take_tls() {
            self.shared_push(leftover);
        }
    }

    fn wake_all(&self) {
        // nothing ever sleeps on this scheduler
    }

    fn register_context(&self) -> Arc<WorkerContext> {
        self.core.register_context()
    }

    fn contexts(&self) -> Vec<Arc<WorkerContext>> {
        self.core.contexts()
    }

    fn note_message_queued(&self) {
        self.core.note_message_queued();
    }

    fn note_message_done(&self) {
        self.core.note_message_done();
    }

    fn is_drained(&self) -> bool {
        self.core.is_drained()
    }
}
