// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Blocking scheduler: mutex-guarded FIFO plus condition variable.
//!
//! Idle workers sleep on the condition until a push pulses one of them;
//! `wake_all` broadcasts so shutdown and retargeting are prompt. The
//! local single-slot queue works exactly as in the non-blocking variant
//! and is drained without touching the mutex.

use super::{
    install_tls, local_push, note_shared_push, reset_yield, take_local, take_tls, Scheduler,
    SchedulerCore, WorkerContext,
};
use crate::core::alloc::CachingAllocator;
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::atomic::Ordering;
use std::sync::Arc;

pub(crate) struct CondvarScheduler {
    core: SchedulerCore,
    queue: Mutex<VecDeque<u32>>,
    available: Condvar,
}

impl CondvarScheduler {
    pub fn new() -> Self {
        Self {
            core: SchedulerCore::new(),
            queue: Mutex::new(VecDeque::new()),
            available: Condvar::new(),
        }
    }

    fn shared_push(&self, index: u32) {
        self.queue.lock().push_back(index);
        self.available.notify_one();
        note_shared_push(self.core.id());
    }
}

impl Scheduler for CondvarScheduler {
    fn id(&self) -> usize {
        self.core.id()
    }

    fn push(&self, index: u32, local_hint: bool) {
        if local_hint {
            match local_push(self.core.id(), index) {
                Some(None) => return,
                Some(Some(displaced)) => {
                    self.shared_push(displaced);
                    return;
                }
                None => {}
            }
        }
        self.shared_push(index);
    }

    fn pop(&self) -> Option<u32> {
        if let Some(index) = take_local(self.core.id()) {
            return Some(index);
        }

        let Some(ctx) = super::current_context_for(self.core.id()) else {
            // not a worker thread: single non-blocking attempt
            return self.queue.lock().pop_front();
        };

        let mut queue = self.queue.lock();
        loop {
            if let Some(index) = queue.pop_front() {
                drop(queue);
                reset_yield(self.core.id());
                return Some(index);
            }
            if !ctx.running.load(Ordering::Acquire) {
                return None;
            }
            ctx.counters.yields.fetch_add(1, Ordering::Relaxed);
            self.available.wait(&mut queue);
        }
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
        // The running flag changes outside the queue mutex; holding the
        // mutex here means a worker between its flag check and `wait`
        // cannot miss the pulse.
        let _queue = self.queue.lock();
        self.available.notify_all();
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
