// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Hive Global Configuration - Single Source of Truth
//!
//! This module centralizes ALL runtime constants and per-framework
//! configuration. **NEVER hardcode elsewhere!**
//!
//! # Architecture
//!
//! - **Level 1 (Static)**: Compile-time constants (directory geometry,
//!   allocator pool shape, scheduler backoff thresholds, manager cadence)
//! - **Level 2 (Dynamic)**: [`FrameworkConfig`] for per-framework runtime
//!   configuration (yield strategy, worker bounds, affinity, quotas)

use crate::engine::policy::YieldStrategy;
use std::time::Duration;

// =======================================================================
// Directory geometry
// =======================================================================

/// Number of slots per directory page.
///
/// Pages are materialized on first use; a page is one allocation of 64
/// slots, so the live set stays dense at low indices.
pub const ENTRIES_PER_PAGE: usize = 64;

/// Maximum number of pages per directory.
///
/// Hard process-wide capacity: `MAX_PAGES * ENTRIES_PER_PAGE` entities per
/// directory. Per-framework quotas ([`FrameworkConfig::max_actors`],
/// [`FrameworkConfig::max_receivers`]) are enforced below this ceiling.
pub const MAX_PAGES: usize = 1024;

// =======================================================================
// Caching allocator shape
// =======================================================================

/// Number of small-block size classes.
///
/// Class `k` serves blocks of `(k + 1) * 4` bytes; block sizes are always
/// rounded up to a multiple of 4 so the class index is `size / 4 - 1`.
pub const POOL_COUNT: usize = 32;

/// Maximum cached free blocks per size class; overflow defers to the
/// wrapped allocator.
pub const MAX_CACHED_BLOCKS: usize = 16;

// =======================================================================
// Scheduler backoff thresholds
// =======================================================================

/// Empty-queue visits served with pause hints before escalating.
pub const SPIN_VISITS: u32 = 64;

/// Additional empty-queue visits served with `yield_now` before the
/// POLITE strategy starts sleeping.
pub const YIELD_VISITS: u32 = 64;

/// Upper bound on a single POLITE sleep.
pub const POLITE_SLEEP: Duration = Duration::from_millis(1);

/// Pause-hint repetitions per spin visit.
pub const SPIN_PAUSE_REPS: u32 = 16;

// =======================================================================
// Worker manager cadence
// =======================================================================

/// Interval between manager passes while the framework is running.
pub const MANAGER_PASS_INTERVAL: Duration = Duration::from_millis(100);

/// Interval between manager passes while draining for shutdown.
pub const DRAIN_PASS_INTERVAL: Duration = Duration::from_millis(1);

// =======================================================================
// Per-framework configuration
// =======================================================================

/// Per-framework runtime configuration.
///
/// Construct with [`FrameworkConfig::default`] and refine with the
/// chainable `with_*` methods:
///
/// ```
/// use hive::{FrameworkConfig, YieldStrategy};
///
/// let config = FrameworkConfig::default()
///     .with_yield_strategy(YieldStrategy::Blocking)
///     .with_worker_bounds(1, 8)
///     .with_max_actors(1024);
/// ```
#[derive(Debug, Clone)]
pub struct FrameworkConfig {
    /// Worker backoff behavior; `Blocking` selects the condition-variable
    /// scheduler, everything else the non-blocking one.
    pub yield_strategy: YieldStrategy,
    /// Lower bound maintained by the manager for non-zero targets.
    pub thread_count_min: u32,
    /// Upper bound maintained by the manager.
    pub thread_count_max: u32,
    /// Initial worker target; 0 means "one per available CPU, clamped".
    pub thread_count: u32,
    /// NUMA node affinity bitmask (bit n = node n). All-ones disables the
    /// node filter.
    pub node_mask: u64,
    /// Logical processor affinity bitmask (bit n = CPU n). All-ones
    /// disables the processor filter.
    pub processor_mask: u64,
    /// Per-framework actor quota; creates beyond it fail with
    /// `CapacityExhausted`.
    pub max_actors: u32,
    /// Per-framework receiver quota.
    pub max_receivers: u32,
}

impl Default for FrameworkConfig {
    fn default() -> Self {
        Self {
            yield_strategy: YieldStrategy::Polite,
            thread_count_min: 1,
            thread_count_max: 64,
            thread_count: 0,
            node_mask: u64::MAX,
            processor_mask: u64::MAX,
            max_actors: 65_536,
            max_receivers: 4_096,
        }
    }
}

impl FrameworkConfig {
    /// Select the worker backoff strategy.
    #[must_use]
    pub fn with_yield_strategy(mut self, strategy: YieldStrategy) -> Self {
        self.yield_strategy = strategy;
        self
    }

    /// Set the worker-count bounds maintained by the manager.
    #[must_use]
    pub fn with_worker_bounds(mut self, min: u32, max: u32) -> Self {
        self.thread_count_min = min;
        self.thread_count_max = max;
        self
    }

    /// Set the initial worker target (clamped into the bounds).
    #[must_use]
    pub fn with_workers(mut self, count: u32) -> Self {
        self.thread_count = count;
        self
    }

    /// Restrict workers to the NUMA nodes set in `mask`.
    #[must_use]
    pub fn with_node_mask(mut self, mask: u64) -> Self {
        self.node_mask = mask;
        self
    }

    /// Restrict workers to the logical processors set in `mask`.
    #[must_use]
    pub fn with_processor_mask(mut self, mask: u64) -> Self {
        self.processor_mask = mask;
        self
    }

    /// Cap the number of live actors this framework may own.
    #[must_use]
    pub fn with_max_actors(mut self, max: u32) -> Self {
        self.max_actors = max;
        self
    }

    /// Cap the number of live receivers this framework may own.
    #[must_use]
    pub fn with_max_receivers(mut self, max: u32) -> Self {
        self.max_receivers = max;
        self
    }

    /// Resolved initial worker target: explicit count, or one per
    /// available CPU, clamped into `[thread_count_min, thread_count_max]`.
    pub(crate) fn initial_target(&self) -> u32 {
        let raw = if self.thread_count > 0 {
            self.thread_count
        } else {
            std::thread::available_parallelism()
                .map(|n| n.get() as u32)
                .unwrap_or(1)
        };
        raw.clamp(self.thread_count_min.max(1), self.thread_count_max)
    }

    pub(crate) fn validate(&self) -> Result<(), crate::Error> {
        if self.thread_count_max == 0 || self.thread_count_min > self.thread_count_max {
            return Err(crate::Error::InvalidConfig(
                "worker bounds must satisfy 0 < min <= max",
            ));
        }
        if self.processor_mask == 0 || self.node_mask == 0 {
            return Err(crate::Error::InvalidConfig(
                "affinity masks must have at least one bit set",
            ));
        }
        Ok(())
    }
}
