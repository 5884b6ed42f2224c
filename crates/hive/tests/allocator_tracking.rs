// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Allocator round trip: every envelope allocated is freed, whether it
//! was dispatched, dropped undelivered, or drained by the fallback.
//!
//! Installs a counting facade, so this file holds exactly one test: the
//! facade is process-wide and must be in place before first use.

use hive::{Framework, FrameworkConfig, RawAllocator, YieldStrategy};
use std::ptr::NonNull;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

struct CountingAllocator {
    inner: hive::DefaultAllocator,
    allocs: AtomicUsize,
    frees: AtomicUsize,
}

impl CountingAllocator {
    fn new() -> Self {
        Self {
            inner: hive::DefaultAllocator,
            allocs: AtomicUsize::new(0),
            frees: AtomicUsize::new(0),
        }
    }
}

impl RawAllocator for CountingAllocator {
    fn allocate_aligned(&self, size: usize, align: usize) -> Option<NonNull<u8>> {
        let block = self.inner.allocate_aligned(size, align);
        if block.is_some() {
            self.allocs.fetch_add(1, Ordering::SeqCst);
        }
        block
    }

    unsafe fn free(&self, ptr: NonNull<u8>, size: usize, align: usize) {
        self.frees.fetch_add(1, Ordering::SeqCst);
        self.inner.free(ptr, size, align);
    }
}

#[test]
fn every_envelope_returns_to_the_facade() {
    let counting = Arc::new(CountingAllocator::new());
    assert!(
        hive::init_allocator(Arc::clone(&counting) as Arc<dyn RawAllocator>),
        "facade already installed; this test must run alone in its binary"
    );

    let seen = Arc::new(AtomicU32::new(0));
    {
        let framework = Framework::new(
            FrameworkConfig::default()
                .with_yield_strategy(YieldStrategy::Blocking)
                .with_worker_bounds(1, 2),
        )
        .expect("framework construction failed");

        let echo = framework.create_actor(()).expect("create failed");
        framework
            .register_handler(echo, {
                let seen = Arc::clone(&seen);
                move |_state: &mut (), value: &u64, ctx| {
                    seen.fetch_add(1, Ordering::AcqRel);
                    let _ = ctx.reply(*value);
                }
            })
            .expect("register failed");

        let receiver = framework.create_receiver().expect("receiver failed");
        for value in 0..500u64 {
            framework
                .send(receiver.address(), echo, value)
                .expect("send failed");
        }

        // consume some replies, leave the rest as receiver backlog
        for _ in 0..100 {
            let delivery = receiver
                .wait_timeout(Duration::from_secs(5))
                .expect("reply missing");
            let _ = delivery.take::<u64>().expect("take failed");
        }

        let deadline = Instant::now() + Duration::from_secs(10);
        while seen.load(Ordering::Acquire) < 500 {
            assert!(Instant::now() < deadline, "handlers starved");
            std::thread::sleep(Duration::from_millis(1));
        }

        // a failed send must reclaim its envelope too
        let doomed = framework.create_actor(()).expect("create failed");
        assert!(framework.destroy_actor(doomed));
        assert!(framework.send(receiver.address(), doomed, 1u8).is_err());

        drop(receiver);
        drop(framework);
    }

    assert_eq!(seen.load(Ordering::Acquire), 500);
    assert_eq!(
        counting.allocs.load(Ordering::SeqCst),
        counting.frees.load(Ordering::SeqCst),
        "leaked or double-freed blocks"
    );
}
