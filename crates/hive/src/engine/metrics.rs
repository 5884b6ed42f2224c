// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Scheduler and framework counters.
//!
//! All fields use relaxed atomics, which is sufficient because consumers
//! only need monotonic snapshots for observability.

use std::sync::atomic::{AtomicU64, Ordering};

/// Per-worker event counters, owned by the worker's scheduler context
/// and readable by anyone.
#[derive(Debug)]
pub struct WorkerCounters {
    /// Envelopes dispatched by this worker.
    pub messages_processed: AtomicU64,
    /// Mailboxes this worker parked in its local slot.
    pub local_pushes: AtomicU64,
    /// Mailboxes this worker pushed (or promoted) to the shared queue.
    pub shared_pushes: AtomicU64,
    /// Empty-queue visits that invoked the yield policy.
    pub yields: AtomicU64,
    /// Deepest mailbox observed by this worker at dispatch time.
    pub max_mailbox_depth: AtomicU64,
}

impl WorkerCounters {
    #[inline]
    pub fn new() -> Self {
        Self {
            messages_processed: AtomicU64::new(0),
            local_pushes: AtomicU64::new(0),
            shared_pushes: AtomicU64::new(0),
            yields: AtomicU64::new(0),
            max_mailbox_depth: AtomicU64::new(0),
        }
    }

    /// Current values without synchronisation penalties.
    #[inline]
    #[must_use]
    pub fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            messages_processed: self.messages_processed.load(Ordering::Relaxed),
            local_pushes: self.local_pushes.load(Ordering::Relaxed),
            shared_pushes: self.shared_pushes.load(Ordering::Relaxed),
            yields: self.yields.load(Ordering::Relaxed),
            max_mailbox_depth: self.max_mailbox_depth.load(Ordering::Relaxed),
        }
    }

    pub fn reset(&self) {
        self.messages_processed.store(0, Ordering::Relaxed);
        self.local_pushes.store(0, Ordering::Relaxed);
        self.shared_pushes.store(0, Ordering::Relaxed);
        self.yields.store(0, Ordering::Relaxed);
        self.max_mailbox_depth.store(0, Ordering::Relaxed);
    }
}

impl Default for WorkerCounters {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time copy of one worker's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CounterSnapshot {
    pub messages_processed: u64,
    pub local_pushes: u64,
    pub shared_pushes: u64,
    pub yields: u64,
    pub max_mailbox_depth: u64,
}

impl CounterSnapshot {
    /// Merge another worker's snapshot into this one (sums, except the
    /// depth high-water mark).
    pub fn merge(&mut self, other: &CounterSnapshot) {
        self.messages_processed += other.messages_processed;
        self.local_pushes += other.local_pushes;
        self.shared_pushes += other.shared_pushes;
        self.yields += other.yields;
        self.max_mailbox_depth = self.max_mailbox_depth.max(other.max_mailbox_depth);
    }
}

/// Framework-level counters for paths not attributable to a worker.
#[derive(Debug, Default)]
pub struct FrameworkCounters {
    /// Sends that failed to resolve their destination.
    pub stale_sends: AtomicU64,
    /// Envelopes handed to the fallback handler.
    pub fallback_messages: AtomicU64,
}

impl FrameworkCounters {
    pub fn new() -> Self {
        Self::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_and_reset() {
        let counters = WorkerCounters::new();
        counters.messages_processed.fetch_add(3, Ordering::Relaxed);
        counters.max_mailbox_depth.fetch_max(17, Ordering::Relaxed);

        let snap = counters.snapshot();
        assert_eq!(snap.messages_processed, 3);
        assert_eq!(snap.max_mailbox_depth, 17);

        counters.reset();
        assert_eq!(counters.snapshot(), CounterSnapshot::default());
    }

    #[test]
    fn merge_sums_and_maxes() {
        let mut total = CounterSnapshot {
            messages_processed: 10,
            local_pushes: 1,
            shared_pushes: 2,
            yields: 3,
            max_mailbox_depth: 5,
        };
        total.merge(&CounterSnapshot {
            messages_processed: 7,
            local_pushes: 1,
            shared_pushes: 1,
            yields: 0,
            max_mailbox_depth: 4,
        });
        assert_eq!(total.messages_processed, 17);
        assert_eq!(total.max_mailbox_depth, 5);
    }
}
