// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Actor directory entries.
//!
//! An entry couples the dispatch state machine with the actor's opaque
//! state and handler table. The dispatch phase is an explicit tagged
//! value driven by atomic transitions:
//!
//! ```text
//!            send (mailbox was empty)
//!   Idle ------------------------------> Scheduled
//!     ^                                      |
//!     | finish (mailbox empty)               | worker claims mailbox
//!     |                                      v
//!   Dispatching <---------------------------+
//!     |        \
//!     |         \ send during dispatch (mailbox was empty)
//!     |          v
//!     |   DispatchingDirty
//!     |          |
//!     +----------+--> Scheduled   finish (mailbox non-empty)
//! ```
//!
//! Two independent flags ride alongside the phase: `HANDLERS_DIRTY`
//! (the handler table has pending edits to reconcile before the next
//! dispatch) and `REFERENCED` (destruction is inhibited).
//!
//! # Exclusivity
//!
//! The `body` cell is touched only by the thread that (a) created the
//! entry before its address was published, (b) holds the `Dispatching`
//! phase, or (c) destroys a quiescent entry under the mailbox lock.
//! Phase transitions themselves happen under the owning mailbox's
//! spinlock, which makes them mutually exclusive without a CAS loop.

use crate::core::types::TypeTag;
use crate::engine::envelope::Envelope;
use crate::framework::{HandlerContext, MessageInfo};
use parking_lot::Mutex;
use std::any::Any;
use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicUsize, Ordering};

/// Handle returned by handler registration, used to deregister.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(pub(crate) u64);

/// Type-erased message handler: returns `true` when it consumed the
/// envelope.
pub(crate) type HandlerFn =
    Box<dyn FnMut(&mut dyn Any, &Envelope, &HandlerContext<'_>) -> bool + Send>;

/// Actor-level default handler for unmatched messages.
pub(crate) type DefaultHandlerFn =
    Box<dyn FnMut(&mut dyn Any, &MessageInfo, &HandlerContext<'_>) + Send>;

/// One registered handler.
pub(crate) struct HandlerRecord {
    pub id: HandlerId,
    pub tag: TypeTag,
    pub func: HandlerFn,
}

/// Dispatcher-exclusive part of an entry.
pub(crate) struct EntryBody {
    pub actor: Box<dyn Any + Send>,
    pub handlers: Vec<HandlerRecord>,
    pub default_handler: Option<DefaultHandlerFn>,
}

/// Handler-table edits deferred until the next dispatch.
#[derive(Default)]
pub(crate) struct PendingOps {
    pub adds: Vec<HandlerRecord>,
    pub removals: Vec<HandlerId>,
    /// `Some(new)` replaces the default handler (possibly with none).
    pub set_default: Option<Option<DefaultHandlerFn>>,
}

impl PendingOps {
    fn is_empty(&self) -> bool {
        self.adds.is_empty() && self.removals.is_empty() && self.set_default.is_none()
    }
}

// Phase occupies the low two bits; flags sit above it.
const PHASE_MASK: u32 = 0b11;
const FLAG_HANDLERS_DIRTY: u32 = 1 << 2;
const FLAG_REFERENCED: u32 = 1 << 3;

/// Where an actor stands in the scheduling cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DispatchPhase {
    Idle,
    Scheduled,
    Dispatching,
    DispatchingDirty,
}

impl DispatchPhase {
    fn from_bits(bits: u32) -> Self {
        match bits & PHASE_MASK {
            0 => DispatchPhase::Idle,
            1 => DispatchPhase::Scheduled,
            2 => DispatchPhase::Dispatching,
            _ => DispatchPhase::DispatchingDirty,
        }
    }

    fn bits(self) -> u32 {
        match self {
            DispatchPhase::Idle => 0,
            DispatchPhase::Scheduled => 1,
            DispatchPhase::Dispatching => 2,
            DispatchPhase::DispatchingDirty => 3,
        }
    }
}

/// Directory entry for one actor slot.
pub(crate) struct ActorEntry {
    state: AtomicU32,
    /// Owning framework id; 0 while the slot is vacant.
    owner: AtomicUsize,
    next_handler_id: AtomicU64,
    body: UnsafeCell<Option<EntryBody>>,
    pending: Mutex<PendingOps>,
}

// SAFETY: `body` is the only non-Sync field; access to it follows the
// exclusivity protocol documented on the module (creation before
// publication, the single Dispatching holder, or quiescent destruction
// under the mailbox lock).
unsafe impl Sync for ActorEntry {}

impl Default for ActorEntry {
    fn default() -> Self {
        Self {
            state: AtomicU32::new(0),
            owner: AtomicUsize::new(0),
            next_handler_id: AtomicU64::new(1),
            body: UnsafeCell::new(None),
            pending: Mutex::new(PendingOps::default()),
        }
    }
}

impl ActorEntry {
    /// Install a freshly created actor.
    ///
    /// # Safety
    /// The slot must be newly allocated and its address unpublished: no
    /// other thread can reach `body` yet.
    pub unsafe fn init(&self, body: EntryBody, owner: usize) {
        debug_assert_ne!(owner, 0);
        *self.body.get() = Some(body);
        self.state.store(DispatchPhase::Idle.bits(), Ordering::Release);
        self.owner.store(owner, Ordering::Release);
    }

    /// Tear the entry down, returning the body for deferred drop.
    ///
    /// # Safety
    /// Caller must hold the mailbox lock and have verified quiescence
    /// (`Idle`, unreferenced, empty mailbox), so no dispatcher or other
    /// destroyer can be touching `body`.
    pub unsafe fn clear(&self) -> (Option<EntryBody>, PendingOps) {
        let body = (*self.body.get()).take();
        let pending = std::mem::take(&mut *self.pending.lock());
        self.owner.store(0, Ordering::Release);
        self.state.store(0, Ordering::Release);
        (body, pending)
    }

    /// Dispatcher-exclusive access to the body.
    ///
    /// # Safety
    /// Caller must hold the `Dispatching` phase for this entry.
    #[allow(clippy::mut_from_ref)]
    pub unsafe fn body_mut(&self) -> &mut Option<EntryBody> {
        &mut *self.body.get()
    }

    pub fn owner(&self) -> usize {
        self.owner.load(Ordering::Acquire)
    }

    pub fn phase(&self) -> DispatchPhase {
        DispatchPhase::from_bits(self.state.load(Ordering::Acquire))
    }

    fn swap_phase(&self, phase: DispatchPhase) {
        let mut bits = self.state.load(Ordering::Acquire);
        loop {
            let next = (bits & !PHASE_MASK) | phase.bits();
            match self.state.compare_exchange_weak(
                bits,
                next,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return,
                Err(current) => bits = current,
            }
        }
    }

    /// React to a push that made the mailbox non-empty. Returns `true`
    /// when the caller must enqueue the mailbox on the scheduler.
    ///
    /// Called under the mailbox lock.
    pub fn note_message_arrival(&self) -> bool {
        match self.phase() {
            DispatchPhase::Idle => {
                self.swap_phase(DispatchPhase::Scheduled);
                true
            }
            DispatchPhase::Dispatching => {
                // the dispatcher re-enqueues when it finishes
                self.swap_phase(DispatchPhase::DispatchingDirty);
                false
            }
            DispatchPhase::Scheduled | DispatchPhase::DispatchingDirty => false,
        }
    }

    /// Claim the entry for dispatch. Returns `false` when the entry is
    /// not in the `Scheduled` phase (stale or vacated slot).
    ///
    /// Called under the mailbox lock.
    pub fn begin_dispatch(&self) -> bool {
        if self.phase() != DispatchPhase::Scheduled {
            return false;
        }
        self.swap_phase(DispatchPhase::Dispatching);
        true
    }

    /// Leave the dispatch phase. Called under the mailbox lock.
    pub fn finish_dispatch(&self, requeue: bool) {
        debug_assert!(matches!(
            self.phase(),
            DispatchPhase::Dispatching | DispatchPhase::DispatchingDirty
        ));
        self.swap_phase(if requeue {
            DispatchPhase::Scheduled
        } else {
            DispatchPhase::Idle
        });
    }

    /// True when the entry may be destroyed (given an empty mailbox).
    pub fn is_quiescent(&self) -> bool {
        let bits = self.state.load(Ordering::Acquire);
        DispatchPhase::from_bits(bits) == DispatchPhase::Idle && bits & FLAG_REFERENCED == 0
    }

    /// Set the destruction-inhibiting flag. Returns the previous value.
    pub fn set_referenced(&self, referenced: bool) -> bool {
        let previous = if referenced {
            self.state.fetch_or(FLAG_REFERENCED, Ordering::AcqRel)
        } else {
            self.state.fetch_and(!FLAG_REFERENCED, Ordering::AcqRel)
        };
        previous & FLAG_REFERENCED != 0
    }

    pub fn alloc_handler_id(&self) -> HandlerId {
        HandlerId(self.next_handler_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Queue a handler-table edit and mark the table dirty.
    pub fn push_pending<F: FnOnce(&mut PendingOps)>(&self, edit: F) {
        let mut pending = self.pending.lock();
        edit(&mut pending);
        if !pending.is_empty() {
            self.state.fetch_or(FLAG_HANDLERS_DIRTY, Ordering::AcqRel);
        }
    }

    /// Apply pending handler-table edits if the dirty flag is set.
    ///
    /// # Safety
    /// Caller must hold the `Dispatching` phase for this entry.
    pub unsafe fn reconcile_handlers(&self) {
        let dirty = self.state.fetch_and(!FLAG_HANDLERS_DIRTY, Ordering::AcqRel);
        if dirty & FLAG_HANDLERS_DIRTY == 0 {
            return;
        }
        let mut ops = std::mem::take(&mut *self.pending.lock());
        let Some(body) = (*self.body.get()).as_mut() else {
            return;
        };
        if !ops.removals.is_empty() {
            // a removal may target a registration from the same batch
            body.handlers
                .retain(|record| !ops.removals.contains(&record.id));
            ops.adds.retain(|record| !ops.removals.contains(&record.id));
        }
        body.handlers.append(&mut ops.adds);
        if let Some(default) = ops.set_default.take() {
            body.default_handler = default;
        }
    }
}
