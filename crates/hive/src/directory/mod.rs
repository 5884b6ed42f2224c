// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Entity directories.
//!
//! Two process-wide paged pools map dense integer indices to actor
//! slots and to external receivers; bit 31 of an address's index word
//! tells the two namespaces apart. The pools are shared by every
//! framework in the process so addresses route across frameworks;
//! per-framework quotas are enforced above this layer, at create time.
//!
//! Directory mutation (allocate/free) is rare and guarded by the pool's
//! own mutex; lookups on the message path are lock-free, with the
//! mailbox's generational address - always checked under its spinlock -
//! as the final arbiter of slot identity.

pub mod entry;
pub mod receivers;

use crate::config::{ENTRIES_PER_PAGE, MAX_PAGES};
use crate::core::pool::PagedPool;
use crate::engine::mailbox::Mailbox;
use entry::ActorEntry;
use receivers::ReceiverSlot;
use std::sync::OnceLock;

pub use entry::HandlerId;

/// Directory slot for one actor: its mailbox and its entry share the
/// index, so a queued mailbox index resolves to both.
#[derive(Default)]
pub(crate) struct ActorSlot {
    pub mailbox: Mailbox,
    pub entry: ActorEntry,
}

const DIRECTORY_CAPACITY: u32 = (MAX_PAGES * ENTRIES_PER_PAGE) as u32;

static ACTORS: OnceLock<PagedPool<ActorSlot>> = OnceLock::new();
static RECEIVERS: OnceLock<PagedPool<ReceiverSlot>> = OnceLock::new();

/// Process-wide actor directory.
pub(crate) fn actors() -> &'static PagedPool<ActorSlot> {
    ACTORS.get_or_init(|| PagedPool::new(DIRECTORY_CAPACITY))
}

/// Process-wide receiver directory.
pub(crate) fn receivers() -> &'static PagedPool<ReceiverSlot> {
    RECEIVERS.get_or_init(|| PagedPool::new(DIRECTORY_CAPACITY))
}
