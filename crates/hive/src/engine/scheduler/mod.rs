// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Two-tier mailbox scheduling.
//!
//! Each worker owns a **local single-slot queue** holding at most one
//! mailbox; all workers share one unbounded **shared queue**. A handler
//! that schedules work on its own worker ("tail" push) swaps the new
//! mailbox into the local slot and promotes any previous occupant to the
//! shared queue, so only the *last* mailbox messaged by a handler
//! fast-paths past the shared queue - everything earlier competes
//! fairly. `pop` drains the local slot first, then the shared queue,
//! then applies the yield policy.
//!
//! Two interchangeable implementations share the [`Scheduler`] contract:
//!
//! - [`spin::SpinScheduler`] - spinlocked FIFO, progressive backoff,
//!   never blocks.
//! - [`condvar::CondvarScheduler`] - mutex + condition variable; idle
//!   workers sleep until pulsed.
//!
//! They are deliberately separate types rather than one code path
//! parameterized by strategy: their wait primitives differ fundamentally.

pub mod condvar;
pub mod spin;

use crate::core::alloc::CachingAllocator;
use crate::engine::metrics::WorkerCounters;
use parking_lot::Mutex;
use std::cell::RefCell;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

/// Sentinel for an empty local slot (never a valid directory index).
pub(crate) const EMPTY_SLOT: u32 = u32::MAX;

/// Per-worker scheduler context, shared between the worker thread, the
/// manager, and counter readers.
pub(crate) struct WorkerContext {
    /// Cleared by the manager to stop this worker.
    pub running: AtomicBool,
    /// Local single-slot queue; [`EMPTY_SLOT`] when vacant.
    pub local_slot: AtomicU32,
    /// Event counters exposed through the framework.
    pub counters: WorkerCounters,
}

impl WorkerContext {
    fn new() -> Self {
        Self {
            running: AtomicBool::new(true),
            local_slot: AtomicU32::new(EMPTY_SLOT),
            counters: WorkerCounters::new(),
        }
    }
}

/// Operation contract shared by both scheduler variants.
pub(crate) trait Scheduler: Send + Sync {
    /// Identity used to decide whether a calling thread is one of this
    /// scheduler's workers.
    fn id(&self) -> usize;

    /// Enqueue a mailbox known to be non-empty and not already queued.
    ///
    /// With `local_hint` the caller asserts it is scheduling from a
    /// handler on one of this scheduler's workers; the mailbox then goes
    /// through that worker's local slot.
    fn push(&self, index: u32, local_hint: bool);

    /// Dequeue the next mailbox for the calling worker, or apply one
    /// backoff step and return `None`.
    fn pop(&self) -> Option<u32>;

    /// Per-worker setup: installs the thread-local context and message
    /// cache. Called once at the top of the worker loop.
    fn initialize(&self, ctx: Arc<WorkerContext>, cache: CachingAllocator);

    /// Per-worker cleanup: flushes a leftover local-slot mailbox to the
    /// shared queue and drains the message cache.
    fn teardown(&self);

    /// Pulse every sleeping worker. No-op for the non-blocking variant.
    fn wake_all(&self);

    /// Allocate and register a fresh worker context.
    fn register_context(&self) -> Arc<WorkerContext>;

    /// All contexts ever registered (running or stopped).
    fn contexts(&self) -> Vec<Arc<WorkerContext>>;

    /// Count one envelope entering a mailbox dispatched on this
    /// scheduler. Called under the destination mailbox's lock.
    fn note_message_queued(&self);

    /// Count one envelope leaving the system (dispatched or drained to
    /// the fallback).
    fn note_message_done(&self);

    /// True when no envelope is queued or in flight anywhere on this
    /// scheduler. Queued mailboxes imply queued envelopes, so a drained
    /// scheduler also has an empty shared queue and empty local slots.
    fn is_drained(&self) -> bool;
}

static NEXT_SCHEDULER_ID: AtomicUsize = AtomicUsize::new(1);

/// State common to both scheduler variants.
pub(crate) struct SchedulerCore {
    id: usize,
    contexts: Mutex<Vec<Arc<WorkerContext>>>,
    /// Envelopes queued on this scheduler's mailboxes or being
    /// dispatched; the shutdown drain waits for zero.
    pending_messages: AtomicU64,
}

impl SchedulerCore {
    pub fn new() -> Self {
        Self {
            id: NEXT_SCHEDULER_ID.fetch_add(1, Ordering::Relaxed),
            contexts: Mutex::new(Vec::new()),
            pending_messages: AtomicU64::new(0),
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn register_context(&self) -> Arc<WorkerContext> {
        let ctx = Arc::new(WorkerContext::new());
        self.contexts.lock().push(Arc::clone(&ctx));
        ctx
    }

    pub fn contexts(&self) -> Vec<Arc<WorkerContext>> {
        self.contexts.lock().clone()
    }

    pub fn note_message_queued(&self) {
        self.pending_messages.fetch_add(1, Ordering::SeqCst);
    }

    pub fn note_message_done(&self) {
        let previous = self.pending_messages.fetch_sub(1, Ordering::SeqCst);
        debug_assert_ne!(previous, 0, "message accounting underflow");
    }

    pub fn is_drained(&self) -> bool {
        self.pending_messages.load(Ordering::SeqCst) == 0
    }
}

// ============================================================================
// Worker thread-local state
// ============================================================================

struct WorkerTls {
    scheduler_id: usize,
    ctx: Arc<WorkerContext>,
    yield_visits: u32,
    cache: CachingAllocator,
}

thread_local! {
    static WORKER_TLS: RefCell<Option<WorkerTls>> = const { RefCell::new(None) };
}

/// Install the calling thread as a worker of `scheduler_id`.
pub(crate) fn install_tls(scheduler_id: usize, ctx: Arc<WorkerContext>, cache: CachingAllocator) {
    WORKER_TLS.with(|slot| {
        let previous = slot.borrow_mut().replace(WorkerTls {
            scheduler_id,
            ctx,
            yield_visits: 0,
            cache,
        });
        debug_assert!(previous.is_none(), "worker TLS installed twice");
    });
}

/// Remove the calling thread's worker state, returning any mailbox left
/// in the local slot. The thread's message cache drains on drop.
pub(crate) fn take_tls() -> Option<u32> {
    WORKER_TLS.with(|slot| {
        let tls = slot.borrow_mut().take()?;
        let leftover = tls.ctx.local_slot.swap(EMPTY_SLOT, Ordering::AcqRel);
        (leftover != EMPTY_SLOT).then_some(leftover)
    })
}

/// Scheduler the calling thread works for, if any.
pub(crate) fn current_scheduler_id() -> Option<usize> {
    WORKER_TLS.with(|slot| slot.borrow().as_ref().map(|tls| tls.scheduler_id))
}

/// Context of the calling thread when it works for `scheduler_id`.
pub(crate) fn current_context_for(scheduler_id: usize) -> Option<Arc<WorkerContext>> {
    WORKER_TLS.with(|slot| {
        slot.borrow()
            .as_ref()
            .filter(|tls| tls.scheduler_id == scheduler_id)
            .map(|tls| Arc::clone(&tls.ctx))
    })
}

/// Run `f` with the calling thread's message cache, if it is a worker.
pub(crate) fn with_worker_cache<R>(f: impl FnOnce(Option<&mut CachingAllocator>) -> R) -> R {
    WORKER_TLS.with(|slot| f(slot.borrow_mut().as_mut().map(|tls| &mut tls.cache)))
}

/// Tail-push `index` into the calling worker's local slot.
///
/// `Some(displaced)` means the slot was taken over and the previous
/// occupant (if any) must be promoted to the shared queue. `None` means
/// the calling thread is not a worker of `scheduler_id` and the push
/// must go to the shared queue instead.
pub(crate) fn local_push(scheduler_id: usize, index: u32) -> Option<Option<u32>> {
    WORKER_TLS.with(|slot| {
        let mut borrow = slot.borrow_mut();
        let tls = borrow.as_mut()?;
        if tls.scheduler_id != scheduler_id {
            return None;
        }
        tls.ctx
            .counters
            .local_pushes
            .fetch_add(1, Ordering::Relaxed);
        let previous = tls.ctx.local_slot.swap(index, Ordering::AcqRel);
        Some((previous != EMPTY_SLOT).then_some(previous))
    })
}

/// Take the calling worker's local-slot mailbox, resetting the yield
/// counter on success.
pub(crate) fn take_local(scheduler_id: usize) -> Option<u32> {
    WORKER_TLS.with(|slot| {
        let mut borrow = slot.borrow_mut();
        let tls = borrow.as_mut()?;
        if tls.scheduler_id != scheduler_id {
            return None;
        }
        let index = tls.ctx.local_slot.swap(EMPTY_SLOT, Ordering::AcqRel);
        if index == EMPTY_SLOT {
            None
        } else {
            tls.yield_visits = 0;
            Some(index)
        }
    })
}

/// Reset the calling worker's yield counter after a successful shared
/// pop.
pub(crate) fn reset_yield(scheduler_id: usize) {
    WORKER_TLS.with(|slot| {
        if let Some(tls) = slot.borrow_mut().as_mut() {
            if tls.scheduler_id == scheduler_id {
                tls.yield_visits = 0;
            }
        }
    });
}

/// Count one empty-queue visit; returns the consecutive visit count.
pub(crate) fn bump_yield(scheduler_id: usize) -> u32 {
    WORKER_TLS.with(|slot| {
        let mut borrow = slot.borrow_mut();
        match borrow.as_mut() {
            Some(tls) if tls.scheduler_id == scheduler_id => {
                tls.yield_visits = tls.yield_visits.saturating_add(1);
                tls.ctx.counters.yields.fetch_add(1, Ordering::Relaxed);
                tls.yield_visits
            }
            _ => 1,
        }
    })
}

/// Attribute a shared-queue push to the calling worker's counters.
pub(crate) fn note_shared_push(scheduler_id: usize) {
    WORKER_TLS.with(|slot| {
        if let Some(tls) = slot.borrow().as_ref() {
            if tls.scheduler_id == scheduler_id {
                tls.ctx
                    .counters
                    .shared_pushes
                    .fetch_add(1, Ordering::Relaxed);
            }
        }
    });
}
