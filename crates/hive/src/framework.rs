// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Framework facade.
//!
//! A [`Framework`] owns one scheduler, one worker pool, one fallback
//! handler slot, and quota accounting; the entity directories are
//! process-wide, so addresses route between frameworks transparently.
//! Actors are created with an opaque state value, wired up with typed
//! handlers, and messaged with plain values:
//!
//! ```
//! use hive::{Framework, FrameworkConfig};
//!
//! let framework = Framework::new(FrameworkConfig::default())?;
//! let counter = framework.create_actor(0u64)?;
//! framework.register_handler(counter, |count: &mut u64, step: &u32, _ctx| {
//!     *count += u64::from(*step);
//! })?;
//!
//! let probe = framework.create_receiver()?;
//! framework.send(probe.address(), counter, 3u32)?;
//! # Ok::<(), hive::Error>(())
//! ```
//!
//! Every mutating operation is also reachable from inside a handler
//! through [`HandlerContext`]; handler-table edits on the actor being
//! dispatched are deferred and reconciled between dispatches, never
//! applied to the in-flight message.
//!
//! # Delivery
//!
//! `send` builds the envelope from the calling thread's message cache
//! (workers carry a private cache; everyone else shares one), then
//! routes it: receiver addresses push straight onto the receiver's
//! queue, actor addresses push under the destination mailbox's spinlock
//! and enqueue the mailbox on its framework's scheduler only on the
//! empty-to-non-empty transition. One scheduler push per burst.
//!
//! Failed deliveries keep their promise to the allocator: the envelope
//! is surfaced to the fallback handler and its block reclaimed before
//! `send` returns `AddressStale`.

use crate::config::FrameworkConfig;
use crate::core::alloc::{get_allocator, CachingAllocator, RawAllocator};
use crate::core::sync::SpinGuard;
use crate::core::types::{Address, TypeTag};
use crate::directory::entry::{self, EntryBody, HandlerId, HandlerRecord};
use crate::directory::{self, ActorSlot};
use crate::engine::envelope::{self, Envelope};
use crate::engine::mailbox::{MailboxState, SchedulerBinding};
use crate::engine::metrics::{CounterSnapshot, FrameworkCounters};
use crate::engine::scheduler::condvar::CondvarScheduler;
use crate::engine::scheduler::spin::SpinScheduler;
use crate::engine::scheduler::{self, Scheduler};
use crate::engine::workers::{PoolControl, WorkerManager};
use crate::error::{Error, Result};
use crate::receiver::Receiver;
use arc_swap::ArcSwapOption;
use parking_lot::Mutex;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;

/// Metadata describing a message to default and fallback handlers.
#[derive(Debug, Clone, Copy)]
pub struct MessageInfo {
    sender: Address,
    type_name: &'static str,
}

impl MessageInfo {
    pub(crate) fn new(sender: Address, type_name: &'static str) -> Self {
        Self { sender, type_name }
    }

    /// Address the message was sent from.
    pub fn sender(&self) -> Address {
        self.sender
    }

    /// Name of the payload type (registered name or compiler path).
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }
}

/// Framework-level handler for undeliverable or unhandled messages.
pub(crate) type FallbackFn = dyn Fn(&MessageInfo) + Send + Sync;

/// Context handed to message handlers.
///
/// Exposes the addresses involved in the current delivery and the
/// framework operations handlers are allowed to perform: sending
/// (including to the actor itself), creating actors, and editing
/// handler tables. Edits to the dispatching actor's own table take
/// effect between dispatches.
pub struct HandlerContext<'a> {
    shared: &'a Arc<FrameworkShared>,
    self_address: Address,
    sender: Address,
}

impl<'a> HandlerContext<'a> {
    pub(crate) fn new(
        shared: &'a Arc<FrameworkShared>,
        self_address: Address,
        sender: Address,
    ) -> Self {
        Self {
            shared,
            self_address,
            sender,
        }
    }

    /// Address of the actor the handler runs on behalf of.
    pub fn self_address(&self) -> Address {
        self.self_address
    }

    /// Address the current message came from.
    pub fn sender(&self) -> Address {
        self.sender
    }

    /// Send `value` to `to`, from this actor.
    pub fn send<T: Send + 'static>(&self, to: Address, value: T) -> Result<()> {
        self.shared.send(self.self_address, to, value)
    }

    /// Send `value` back to the sender of the current message.
    pub fn reply<T: Send + 'static>(&self, value: T) -> Result<()> {
        self.send(self.sender, value)
    }

    /// Create another actor in this framework.
    pub fn create_actor<S: Send + 'static>(&self, state: S) -> Result<Address> {
        self.shared.create_actor(state)
    }

    /// Destroy a quiescent actor. Destroying the actor currently being
    /// dispatched always fails (it is not idle).
    pub fn destroy_actor(&self, address: Address) -> bool {
        self.shared.destroy_actor(address)
    }

    /// Register a handler; on the dispatching actor it starts matching
    /// with the next dispatch.
    pub fn register_handler<S, T, F>(&self, address: Address, handler: F) -> Result<HandlerId>
    where
        S: Send + 'static,
        T: Send + 'static,
        F: FnMut(&mut S, &T, &HandlerContext<'_>) + Send + 'static,
    {
        self.shared.register_handler(address, handler)
    }

    /// Deregister a handler; on the dispatching actor it still sees the
    /// in-flight message and stops matching afterwards.
    pub fn deregister_handler(&self, address: Address, id: HandlerId) -> bool {
        self.shared.deregister_handler(address, id)
    }
}

static NEXT_FRAMEWORK_ID: AtomicUsize = AtomicUsize::new(1);

/// State shared between the facade, its workers, and handler contexts.
pub(crate) struct FrameworkShared {
    pub id: usize,
    pub config: FrameworkConfig,
    pub scheduler: Arc<dyn Scheduler>,
    pub allocator: Arc<dyn RawAllocator>,
    /// Message cache for senders that are not worker threads.
    pub shared_cache: Mutex<CachingAllocator>,
    pub fallback: ArcSwapOption<Box<FallbackFn>>,
    pub counters: FrameworkCounters,
    pub control: PoolControl,
    pub live_actors: AtomicU32,
    pub live_receivers: AtomicU32,
}

impl FrameworkShared {
    /// Construct an envelope from the calling thread's message cache.
    fn build_envelope<T: Send + 'static>(
        &self,
        from: Address,
        value: T,
    ) -> Option<NonNull<Envelope>> {
        scheduler::with_worker_cache(|cache| match cache {
            Some(cache) => Envelope::build(cache, from, value),
            None => Envelope::build(&mut self.shared_cache.lock(), from, value),
        })
    }

    /// Reclaim an envelope this side of delivery (failed sends, orphan
    /// drains).
    fn reclaim_envelope(&self, env: NonNull<Envelope>) {
        scheduler::with_worker_cache(|cache| match cache {
            // SAFETY: the caller owns the envelope.
            Some(cache) => unsafe { envelope::free_with_cache(env, cache) },
            None => unsafe { envelope::free_with(env, &*self.allocator) },
        });
    }

    /// Invoke the fallback handler for a message that will not reach a
    /// user handler.
    pub(crate) fn notify_fallback(shared: &Arc<FrameworkShared>, info: &MessageInfo) {
        shared
            .counters
            .fallback_messages
            .fetch_add(1, Ordering::Relaxed);
        match shared.fallback.load_full() {
            Some(fallback) => (**fallback)(info),
            None => log::debug!(
                "[framework {}] message '{}' from {:?} fell through unhandled",
                shared.id,
                info.type_name(),
                info.sender()
            ),
        }
    }

    /// Surface an owned envelope to the fallback handler, then reclaim
    /// its block.
    pub(crate) fn consume_fallback(shared: &Arc<FrameworkShared>, env: NonNull<Envelope>) {
        // SAFETY: the caller owns the envelope until reclaimed below.
        let info = {
            let envelope_ref = unsafe { env.as_ref() };
            MessageInfo::new(envelope_ref.sender(), envelope_ref.type_name())
        };
        Self::notify_fallback(shared, &info);
        shared.reclaim_envelope(env);
    }

    /// Build and deliver in one step; the facade and in-handler send
    /// paths both land here.
    pub(crate) fn send<T: Send + 'static>(
        self: &Arc<Self>,
        from: Address,
        to: Address,
        value: T,
    ) -> Result<()> {
        let env = self.build_envelope(from, value).ok_or(Error::AllocationFailure)?;
        match Self::deliver(to, env) {
            Ok(()) => Ok(()),
            Err(env) => {
                self.counters.stale_sends.fetch_add(1, Ordering::Relaxed);
                Self::consume_fallback(self, env);
                Err(Error::AddressStale)
            }
        }
    }

    /// Route an envelope to `to`. On failure the envelope is handed
    /// back and the caller keeps ownership.
    fn deliver(to: Address, env: NonNull<Envelope>) -> std::result::Result<(), NonNull<Envelope>> {
        if to.is_null() {
            return Err(env);
        }
        if to.is_receiver() {
            let Some(slot) = directory::receivers().resolve(to.index(), to.sequence()) else {
                return Err(env);
            };
            return slot.push_if(to, env);
        }

        // generational filter: rejects reused slots without any lock
        let Some(slot) = directory::actors().resolve(to.index(), to.sequence()) else {
            return Err(env);
        };
        let mut mailbox = slot.mailbox.lock();
        // the mailbox address, re-read under the lock, stays the
        // authoritative identity: it goes null on destroy, while the
        // slot sequence only advances on reuse
        if mailbox.address() != to {
            return Err(env);
        }
        let was_empty = mailbox.is_empty();
        mailbox.push(env);
        match mailbox.binding() {
            Some(binding) => {
                binding.scheduler.note_message_queued();
                if was_empty && slot.entry.note_message_arrival() {
                    let local_hint = scheduler::current_scheduler_id() == Some(binding.id);
                    binding.scheduler.push(to.index(), local_hint);
                }
            }
            None => debug_assert!(false, "bound mailbox without a scheduler"),
        }
        Ok(())
    }

    /// Create an actor owning `state`.
    pub(crate) fn create_actor<S: Send + 'static>(self: &Arc<Self>, state: S) -> Result<Address> {
        let quota = self.config.max_actors;
        if self
            .live_actors
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |live| {
                (live < quota).then_some(live + 1)
            })
            .is_err()
        {
            return Err(Error::CapacityExhausted);
        }

        let (index, sequence) = match directory::actors().allocate() {
            Ok(pair) => pair,
            Err(_) => {
                self.live_actors.fetch_sub(1, Ordering::AcqRel);
                return Err(Error::CapacityExhausted);
            }
        };
        let Some(slot) = directory::actors().get(index) else {
            // a freshly allocated index always has a page
            directory::actors().free(index);
            self.live_actors.fetch_sub(1, Ordering::AcqRel);
            return Err(Error::CapacityExhausted);
        };

        let address = Address::actor(index, sequence);
        // SAFETY: the slot was just allocated and its address is not yet
        // published; nothing else can reach the body.
        unsafe {
            slot.entry.init(
                EntryBody {
                    actor: Box::new(state),
                    handlers: Vec::new(),
                    default_handler: None,
                },
                self.id,
            );
        }
        slot.mailbox.lock().bind(
            address,
            SchedulerBinding {
                id: self.scheduler.id(),
                scheduler: Arc::clone(&self.scheduler),
            },
        );
        Ok(address)
    }

    /// Destroy the actor at `address` if it is quiescent and owned by
    /// this framework.
    pub(crate) fn destroy_actor(&self, address: Address) -> bool {
        if address.is_null() || address.is_receiver() {
            return false;
        }
        let Some(slot) = directory::actors().resolve(address.index(), address.sequence()) else {
            return false;
        };

        let remains = {
            let mut mailbox = slot.mailbox.lock();
            if mailbox.address() != address {
                return false;
            }
            if slot.entry.owner() != self.id {
                log::debug!(
                    "[framework {}] refusing to destroy actor owned by framework {}",
                    self.id,
                    slot.entry.owner()
                );
                return false;
            }
            if !mailbox.is_empty() || !slot.entry.is_quiescent() {
                return false;
            }
            mailbox.unbind();
            // SAFETY: quiescence verified under the mailbox lock; no
            // dispatcher holds the entry and new sends now fail the
            // address check.
            unsafe { slot.entry.clear() }
        };

        directory::actors().free(address.index());
        self.live_actors.fetch_sub(1, Ordering::AcqRel);
        // user state drops outside every runtime lock, so its Drop may
        // re-enter the directory
        drop(remains);
        true
    }

    pub(crate) fn register_handler<S, T, F>(&self, address: Address, mut handler: F) -> Result<HandlerId>
    where
        S: Send + 'static,
        T: Send + 'static,
        F: FnMut(&mut S, &T, &HandlerContext<'_>) + Send + 'static,
    {
        let Some((slot, mailbox)) = locked_slot(address) else {
            return Err(Error::AddressStale);
        };
        let id = slot.entry.alloc_handler_id();
        let tag = TypeTag::of::<T>();
        let func: entry::HandlerFn = Box::new(move |actor, env, ctx| {
            let Some(payload) = env.payload_ref::<T>() else {
                // name-matched tags may still carry a different Rust
                // payload type; that cannot be downcast and stays
                // unhandled here
                log::debug!(
                    "[framework] message '{}' name-matched a handler with a different payload type",
                    env.type_name()
                );
                return false;
            };
            let Some(state) = actor.downcast_mut::<S>() else {
                log::warn!(
                    "[framework] handler state type mismatch dispatching '{}'",
                    env.type_name()
                );
                return false;
            };
            handler(state, payload, ctx);
            true
        });
        slot.entry
            .push_pending(|ops| ops.adds.push(HandlerRecord { id, tag, func }));
        drop(mailbox);
        Ok(id)
    }

    pub(crate) fn deregister_handler(&self, address: Address, id: HandlerId) -> bool {
        let Some((slot, mailbox)) = locked_slot(address) else {
            return false;
        };
        slot.entry.push_pending(|ops| ops.removals.push(id));
        drop(mailbox);
        true
    }

    pub(crate) fn set_default_handler<S, F>(&self, address: Address, mut handler: F) -> Result<()>
    where
        S: Send + 'static,
        F: FnMut(&mut S, &MessageInfo, &HandlerContext<'_>) + Send + 'static,
    {
        let Some((slot, mailbox)) = locked_slot(address) else {
            return Err(Error::AddressStale);
        };
        let func: entry::DefaultHandlerFn = Box::new(move |actor, info, ctx| {
            if let Some(state) = actor.downcast_mut::<S>() {
                handler(state, info, ctx);
            }
        });
        slot.entry
            .push_pending(|ops| ops.set_default = Some(Some(func)));
        drop(mailbox);
        Ok(())
    }
}

/// Resolve an actor address to its slot with the mailbox lock held and
/// the generational identity re-verified under it.
fn locked_slot(
    address: Address,
) -> Option<(&'static ActorSlot, SpinGuard<'static, MailboxState>)> {
    if address.is_null() || address.is_receiver() {
        return None;
    }
    let slot = directory::actors().resolve(address.index(), address.sequence())?;
    let mailbox = slot.mailbox.lock();
    (mailbox.address() == address).then_some((slot, mailbox))
}

/// An actor runtime instance: scheduler, worker pool, and facade.
///
/// Dropping the framework drains every queued message, stops the
/// workers, and destroys the actors it still owns.
pub struct Framework {
    shared: Arc<FrameworkShared>,
    manager: Option<WorkerManager>,
}

impl Framework {
    /// Build a framework and start its manager thread.
    pub fn new(config: FrameworkConfig) -> Result<Self> {
        config.validate()?;
        let scheduler: Arc<dyn Scheduler> = if config.yield_strategy.is_spinning() {
            Arc::new(SpinScheduler::new(config.yield_strategy))
        } else {
            Arc::new(CondvarScheduler::new())
        };
        let allocator = get_allocator();
        let shared = Arc::new(FrameworkShared {
            id: NEXT_FRAMEWORK_ID.fetch_add(1, Ordering::Relaxed),
            control: PoolControl::new(config.initial_target()),
            config,
            scheduler,
            shared_cache: Mutex::new(CachingAllocator::new(Arc::clone(&allocator))),
            allocator,
            fallback: ArcSwapOption::const_empty(),
            counters: FrameworkCounters::new(),
            live_actors: AtomicU32::new(0),
            live_receivers: AtomicU32::new(0),
        });
        let manager = WorkerManager::spawn(Arc::clone(&shared)).map_err(|err| {
            log::warn!("[framework] manager spawn failed: {}", err);
            Error::AllocationFailure
        })?;
        Ok(Self {
            shared,
            manager: Some(manager),
        })
    }

    /// Create an actor owning `state`. Handlers are registered
    /// separately and may be added from inside other handlers.
    pub fn create_actor<S: Send + 'static>(&self, state: S) -> Result<Address> {
        self.shared.create_actor(state)
    }

    /// Destroy the actor at `address`.
    ///
    /// Succeeds only for a quiescent actor owned by this framework:
    /// idle, unreferenced, mailbox drained. Returns `false` otherwise.
    /// The actor's state drops outside every runtime lock, so its
    /// `Drop` impl may create or destroy other actors.
    pub fn destroy_actor(&self, address: Address) -> bool {
        self.shared.destroy_actor(address)
    }

    /// Register a typed handler on an actor. The handler starts seeing
    /// messages with the next dispatch; registrations made during a
    /// dispatch of the same actor never affect the in-flight message.
    pub fn register_handler<S, T, F>(&self, address: Address, handler: F) -> Result<HandlerId>
    where
        S: Send + 'static,
        T: Send + 'static,
        F: FnMut(&mut S, &T, &HandlerContext<'_>) + Send + 'static,
    {
        self.shared.register_handler(address, handler)
    }

    /// Remove a handler by id. During a dispatch of the same actor the
    /// handler still sees the in-flight message; it stops matching from
    /// the next dispatch on.
    pub fn deregister_handler(&self, address: Address, id: HandlerId) -> bool {
        self.shared.deregister_handler(address, id)
    }

    /// Install the actor-level default handler, invoked when no
    /// registered handler matches a message.
    pub fn set_default_handler<S, F>(&self, address: Address, handler: F) -> Result<()>
    where
        S: Send + 'static,
        F: FnMut(&mut S, &MessageInfo, &HandlerContext<'_>) + Send + 'static,
    {
        self.shared.set_default_handler(address, handler)
    }

    /// Remove the actor-level default handler.
    pub fn clear_default_handler(&self, address: Address) -> bool {
        let Some((slot, mailbox)) = locked_slot(address) else {
            return false;
        };
        slot.entry.push_pending(|ops| ops.set_default = Some(None));
        drop(mailbox);
        true
    }

    /// Mark the actor referenced, inhibiting destruction until
    /// [`release`](Self::release). Returns `false` for stale addresses.
    pub fn retain(&self, address: Address) -> bool {
        let Some((slot, mailbox)) = locked_slot(address) else {
            return false;
        };
        slot.entry.set_referenced(true);
        drop(mailbox);
        true
    }

    /// Clear the referenced mark set by [`retain`](Self::retain).
    pub fn release(&self, address: Address) -> bool {
        let Some((slot, mailbox)) = locked_slot(address) else {
            return false;
        };
        slot.entry.set_referenced(false);
        drop(mailbox);
        true
    }

    /// Install the framework fallback handler: it sees messages sent to
    /// stale addresses and messages no handler matched.
    pub fn set_fallback_handler<F>(&self, handler: F)
    where
        F: Fn(&MessageInfo) + Send + Sync + 'static,
    {
        let handler: Box<FallbackFn> = Box::new(handler);
        self.shared.fallback.store(Some(Arc::new(handler)));
    }

    /// Remove the framework fallback handler.
    pub fn clear_fallback_handler(&self) {
        self.shared.fallback.store(None);
    }

    /// Send `value` from `from` to `to`.
    ///
    /// `from` is carried in the envelope for the destination to reply
    /// to; it is not authenticated. On `AddressStale` the envelope has
    /// already been surfaced to the fallback handler and reclaimed.
    pub fn send<T: Send + 'static>(&self, from: Address, to: Address, value: T) -> Result<()> {
        self.shared.send(from, to, value)
    }

    /// Create an external receiver for non-actor threads.
    pub fn create_receiver(&self) -> Result<Receiver> {
        let quota = self.shared.config.max_receivers;
        if self
            .shared
            .live_receivers
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |live| {
                (live < quota).then_some(live + 1)
            })
            .is_err()
        {
            return Err(Error::CapacityExhausted);
        }
        let (index, sequence) = match directory::receivers().allocate() {
            Ok(pair) => pair,
            Err(_) => {
                self.shared.live_receivers.fetch_sub(1, Ordering::AcqRel);
                return Err(Error::CapacityExhausted);
            }
        };
        let Some(slot) = directory::receivers().get(index) else {
            directory::receivers().free(index);
            self.shared.live_receivers.fetch_sub(1, Ordering::AcqRel);
            return Err(Error::CapacityExhausted);
        };
        let address = Address::receiver(index, sequence);
        slot.bind(address);
        Ok(Receiver::attach(Arc::clone(&self.shared), slot, address))
    }

    /// Retarget the worker pool; the manager converges on the clamped
    /// value on its next pass. A target of 0 parks all workers once the
    /// queues drain.
    pub fn set_worker_target(&self, target: u32) {
        self.shared.control.set_target(target);
    }

    /// Workers currently live.
    pub fn worker_count(&self) -> u32 {
        self.shared.control.live()
    }

    /// Highest live worker count observed.
    pub fn peak_workers(&self) -> u32 {
        self.shared.control.peak()
    }

    /// Actors currently owned by this framework.
    pub fn live_actors(&self) -> u32 {
        self.shared.live_actors.load(Ordering::Acquire)
    }

    /// Per-worker counter snapshots, in worker start order.
    pub fn worker_counters(&self) -> Vec<CounterSnapshot> {
        self.shared
            .scheduler
            .contexts()
            .iter()
            .map(|ctx| ctx.counters.snapshot())
            .collect()
    }

    /// Aggregate counters across all workers.
    pub fn counters(&self) -> CounterSnapshot {
        let mut total = CounterSnapshot::default();
        for snapshot in self.worker_counters() {
            total.merge(&snapshot);
        }
        total
    }

    /// Zero every worker and framework counter.
    pub fn reset_counters(&self) {
        for ctx in self.shared.scheduler.contexts() {
            ctx.counters.reset();
        }
        self.shared.counters.stale_sends.store(0, Ordering::Relaxed);
        self.shared
            .counters
            .fallback_messages
            .store(0, Ordering::Relaxed);
    }

    /// Sends that failed to resolve their destination.
    pub fn stale_sends(&self) -> u64 {
        self.shared.counters.stale_sends.load(Ordering::Relaxed)
    }

    /// Envelopes handed to the fallback handler.
    pub fn fallback_messages(&self) -> u64 {
        self.shared.counters.fallback_messages.load(Ordering::Relaxed)
    }

    fn shutdown(&mut self) {
        let Some(manager) = self.manager.take() else {
            return;
        };
        self.shared.control.request_shutdown();
        self.shared.scheduler.wake_all();
        manager.join();

        // destroy surviving actors owned by this framework
        let bound = directory::actors().index_bound();
        for index in 0..bound {
            let Some(slot) = directory::actors().get(index) else {
                continue;
            };
            if slot.entry.owner() != self.shared.id {
                continue;
            }
            let address = slot.mailbox.lock().address();
            if !address.is_null() && !self.destroy_actor(address) {
                log::warn!(
                    "[framework {}] actor {:?} survived shutdown (referenced or busy)",
                    self.shared.id,
                    address
                );
            }
        }
        self.shared.shared_cache.lock().clear();
    }
}

impl Drop for Framework {
    fn drop(&mut self) {
        self.shutdown();
    }
}
