// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Worker thread pool and its manager.
//!
//! A dedicated manager thread owns the worker lifecycle: it reads the
//! atomic worker target, starts workers (preferring to restart stopped
//! contexts over allocating new ones), stops surplus workers, applies
//! affinity, and tracks the peak live count. Passes run every 100 ms,
//! tightened to 1 ms while draining; target changes and shutdown pulse
//! the manager's condition so it reacts promptly instead of sleeping
//! out the interval.
//!
//! # Shutdown
//!
//! Shutdown is cooperative and loss-free: the manager first waits for
//! the scheduler to drain (every queued envelope dispatched), keeping -
//! or if necessary reviving - workers to do that work, and only then
//! clears their `running` flags, pulses `wake_all`, and joins them.

use crate::config::{DRAIN_PASS_INTERVAL, MANAGER_PASS_INTERVAL};
use crate::core::alloc::CachingAllocator;
use crate::engine::scheduler::WorkerContext;
use crate::engine::{affinity, dispatch};
use crate::framework::FrameworkShared;
use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Shared knobs between the framework facade and the manager thread.
pub(crate) struct PoolControl {
    target: AtomicU32,
    live: AtomicU32,
    peak: AtomicU32,
    shutdown: AtomicBool,
    tick_lock: Mutex<()>,
    tick: Condvar,
}

impl PoolControl {
    pub fn new(initial_target: u32) -> Self {
        Self {
            target: AtomicU32::new(initial_target),
            live: AtomicU32::new(0),
            peak: AtomicU32::new(0),
            shutdown: AtomicBool::new(false),
            tick_lock: Mutex::new(()),
            tick: Condvar::new(),
        }
    }

    /// Retarget the pool; 0 requests a drain-then-park of all workers.
    pub fn set_target(&self, target: u32) {
        self.target.store(target, Ordering::Release);
        self.nudge();
    }

    pub fn target(&self) -> u32 {
        self.target.load(Ordering::Acquire)
    }

    pub fn request_shutdown(&self) {
        self.shutdown.store(true, Ordering::Release);
        self.nudge();
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    pub fn live(&self) -> u32 {
        self.live.load(Ordering::Acquire)
    }

    pub fn peak(&self) -> u32 {
        self.peak.load(Ordering::Acquire)
    }

    fn set_live(&self, live: u32) {
        self.live.store(live, Ordering::Release);
        self.peak.fetch_max(live, Ordering::AcqRel);
    }

    fn nudge(&self) {
        let _guard = self.tick_lock.lock();
        self.tick.notify_all();
    }

    fn wait_pass(&self, timeout: Duration) {
        let mut guard = self.tick_lock.lock();
        let _ = self.tick.wait_for(&mut guard, timeout);
    }
}

/// Handle to the manager thread.
pub(crate) struct WorkerManager {
    thread: JoinHandle<()>,
}

impl WorkerManager {
    pub fn spawn(shared: Arc<FrameworkShared>) -> std::io::Result<Self> {
        let thread = thread::Builder::new()
            .name("hive-manager".into())
            .spawn(move || manager_main(shared))?;
        Ok(Self { thread })
    }

    /// Block until the manager (and with it every worker) has exited.
    pub fn join(self) {
        if self.thread.join().is_err() {
            log::warn!("[manager] manager thread panicked");
        }
    }
}

struct WorkerHandle {
    ctx: Arc<WorkerContext>,
    thread: Option<JoinHandle<()>>,
}

fn live_count(workers: &[WorkerHandle]) -> usize {
    workers.iter().filter(|w| w.thread.is_some()).count()
}

fn manager_main(shared: Arc<FrameworkShared>) {
    let mut workers: Vec<WorkerHandle> = Vec::new();
    let min = shared.config.thread_count_min.max(1);
    let max = shared.config.thread_count_max;

    loop {
        let shutting_down = shared.control.is_shutdown();
        let drained = shared.scheduler.is_drained();
        let raw_target = shared.control.target();

        let live = live_count(&workers);
        let desired = if shutting_down || raw_target == 0 {
            if drained {
                0
            } else {
                // keep (or revive) workers until the backlog is gone
                live.max(1)
            }
        } else {
            raw_target.clamp(min, max) as usize
        };

        // bounded per pass: a failed spawn leaves the deficit for the
        // next pass instead of spinning here
        for _ in live..desired {
            start_worker(&shared, &mut workers);
        }
        while live_count(&workers) > desired {
            stop_worker(&shared, &mut workers);
        }
        shared.control.set_live(live_count(&workers) as u32);

        if shutting_down && shared.scheduler.is_drained() && live_count(&workers) == 0 {
            break;
        }

        let draining = (shutting_down || raw_target == 0) && !drained;
        shared.control.wait_pass(if draining {
            DRAIN_PASS_INTERVAL
        } else {
            MANAGER_PASS_INTERVAL
        });
    }
    shared.control.set_live(0);
}

/// Start one worker, reusing a stopped context when one exists.
fn start_worker(shared: &Arc<FrameworkShared>, workers: &mut Vec<WorkerHandle>) {
    let slot = match workers.iter().position(|w| w.thread.is_none()) {
        Some(slot) => slot,
        None => {
            workers.push(WorkerHandle {
                ctx: shared.scheduler.register_context(),
                thread: None,
            });
            workers.len() - 1
        }
    };

    let ctx = Arc::clone(&workers[slot].ctx);
    ctx.running.store(true, Ordering::Release);
    let spawn = thread::Builder::new()
        .name(format!("hive-worker-{}", slot))
        .spawn({
            let shared = Arc::clone(shared);
            let ctx = Arc::clone(&ctx);
            move || worker_main(shared, ctx)
        });
    match spawn {
        Ok(handle) => workers[slot].thread = Some(handle),
        Err(err) => {
            ctx.running.store(false, Ordering::Release);
            log::warn!("[manager] worker spawn failed: {}", err);
        }
    }
}

/// Stop the most recently started running worker and join it.
fn stop_worker(shared: &Arc<FrameworkShared>, workers: &mut [WorkerHandle]) {
    let Some(worker) = workers.iter_mut().rev().find(|w| w.thread.is_some()) else {
        return;
    };
    worker.ctx.running.store(false, Ordering::Release);
    shared.scheduler.wake_all();
    if let Some(handle) = worker.thread.take() {
        if handle.join().is_err() {
            log::warn!("[manager] worker thread panicked");
        }
    }
}

fn worker_main(shared: Arc<FrameworkShared>, ctx: Arc<WorkerContext>) {
    affinity::apply(shared.config.node_mask, shared.config.processor_mask);
    let cache = CachingAllocator::new(Arc::clone(&shared.allocator));
    shared.scheduler.initialize(Arc::clone(&ctx), cache);

    while ctx.running.load(Ordering::Acquire) {
        if let Some(index) = shared.scheduler.pop() {
            dispatch::dispatch_mailbox(&shared, index);
        }
    }

    shared.scheduler.teardown();
}
