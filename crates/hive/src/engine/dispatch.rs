// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Mailbox dispatch.
//!
//! One dispatch processes exactly one envelope: claim the entry, pop the
//! oldest envelope, run matching handlers in registration order, fall
//! back to the actor default and then the framework fallback, reclaim
//! the envelope through the worker's cache, and requeue the mailbox if
//! more arrived meanwhile. Popping one envelope rather than the whole
//! queue keeps long-bursting actors from starving their neighbours.
//!
//! The final requeue uses `local_hint = true`: combined with the local
//! slot's promotion rule, the *last* mailbox messaged by the handler
//! stays on this worker while earlier ones compete through the shared
//! queue.
//!
//! # Hot path
//!
//! This function runs for every message in the system. The mailbox
//! spinlock is held only around queue operations, never across handler
//! execution; the directory mutex is never taken here.

use crate::directory;
use crate::engine::envelope;
use crate::engine::scheduler;
use crate::framework::{FrameworkShared, HandlerContext, MessageInfo};
use std::sync::atomic::Ordering;
use std::sync::Arc;

pub(crate) fn dispatch_mailbox(shared: &Arc<FrameworkShared>, index: u32) {
    let Some(slot) = directory::actors().get(index) else {
        debug_assert!(false, "scheduled mailbox index {} has no slot", index);
        return;
    };

    // Claim the entry and pop one envelope.
    let mut mailbox = slot.mailbox.lock();
    let address = mailbox.address();
    if address.is_null() {
        // The occupant vanished between scheduling and dispatch; drain
        // the backlog to the fallback handler.
        let mut orphans = Vec::new();
        while let Some(orphan) = mailbox.pop() {
            orphans.push(orphan);
        }
        drop(mailbox);
        for orphan in orphans {
            FrameworkShared::consume_fallback(shared, orphan);
            shared.scheduler.note_message_done();
        }
        return;
    }
    if !slot.entry.begin_dispatch() {
        // a queued mailbox is always in the Scheduled phase; leave it to
        // whoever owns the phase
        debug_assert!(false, "mailbox {} dispatched outside the Scheduled phase", index);
        drop(mailbox);
        return;
    }
    let Some(env) = mailbox.pop() else {
        debug_assert!(false, "dispatch on empty mailbox {}", index);
        slot.entry.finish_dispatch(false);
        drop(mailbox);
        return;
    };
    let depth = u64::from(mailbox.count()) + 1;
    drop(mailbox);

    if let Some(ctx) = scheduler::current_context_for(shared.scheduler.id()) {
        ctx.counters.messages_processed.fetch_add(1, Ordering::Relaxed);
        ctx.counters.max_mailbox_depth.fetch_max(depth, Ordering::Relaxed);
    }

    // Reconcile deferred handler-table edits before selection.
    // SAFETY: we hold the Dispatching phase claimed above.
    unsafe { slot.entry.reconcile_handlers() };

    // SAFETY: the envelope was popped under the lock and is exclusively
    // ours until reclaimed below.
    let envelope_ref = unsafe { env.as_ref() };
    let tag = envelope_ref.tag();
    let mut handled = false;

    // Handler panics are isolated: the envelope still gets reclaimed,
    // the mailbox still gets requeued, and the worker survives.
    let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        // SAFETY: Dispatching phase grants exclusive access to the body.
        if let Some(body) = unsafe { slot.entry.body_mut() }.as_mut() {
            let context = HandlerContext::new(shared, address, envelope_ref.sender());
            let crate::directory::entry::EntryBody {
                actor,
                handlers,
                default_handler,
            } = body;

            for record in handlers.iter_mut() {
                if record.tag.matches(tag) {
                    handled |= (record.func)(actor.as_mut(), envelope_ref, &context);
                }
            }
            if !handled {
                if let Some(default) = default_handler.as_mut() {
                    let info = MessageInfo::new(envelope_ref.sender(), envelope_ref.type_name());
                    default(actor.as_mut(), &info, &context);
                    handled = true;
                }
            }
        }
    }));
    match outcome {
        Ok(()) => {
            if !handled {
                let info = MessageInfo::new(envelope_ref.sender(), envelope_ref.type_name());
                FrameworkShared::notify_fallback(shared, &info);
            }
        }
        Err(_) => log::error!(
            "[dispatch] handler panicked processing '{}' for {:?}",
            envelope_ref.type_name(),
            address
        ),
    }

    // Destruct the payload in place and return the block to this
    // worker's cache.
    scheduler::with_worker_cache(|cache| match cache {
        // SAFETY: the envelope is ours; no reference to it survives the
        // handler loop above.
        Some(cache) => unsafe { envelope::free_with_cache(env, cache) },
        None => unsafe { envelope::free_with(env, &*shared.allocator) },
    });
    shared.scheduler.note_message_done();

    // Requeue if more envelopes arrived during dispatch.
    let mut mailbox = slot.mailbox.lock();
    let requeue = !mailbox.is_empty();
    slot.entry.finish_dispatch(requeue);
    if requeue {
        shared.scheduler.push(index, true);
    }
    drop(mailbox);
}
