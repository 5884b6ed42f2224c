// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Quiescent shutdown: every queued message is dispatched before the
//! workers exit and the framework destructor returns.

use hive::{Framework, FrameworkConfig, YieldStrategy};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

const BACKLOG: u32 = 10_000;

fn drain_on_drop(strategy: YieldStrategy) {
    let framework = Framework::new(
        FrameworkConfig::default()
            .with_yield_strategy(strategy)
            .with_worker_bounds(1, 4),
    )
    .expect("framework construction failed");

    let seen = Arc::new(AtomicU32::new(0));
    let actor = framework.create_actor(()).expect("create failed");
    framework
        .register_handler(actor, {
            let seen = Arc::clone(&seen);
            move |_state: &mut (), _value: &u32, _ctx| {
                seen.fetch_add(1, Ordering::AcqRel);
            }
        })
        .expect("register failed");

    let receiver = framework.create_receiver().expect("receiver failed");
    for value in 0..BACKLOG {
        framework
            .send(receiver.address(), actor, value)
            .expect("send failed");
    }

    // the destructor drains, stops the workers, and only then returns
    drop(framework);
    assert_eq!(seen.load(Ordering::Acquire), BACKLOG);
}

#[test]
fn drop_drains_blocking() {
    drain_on_drop(YieldStrategy::Blocking);
}

#[test]
fn drop_drains_polite() {
    drain_on_drop(YieldStrategy::Polite);
}

#[test]
fn target_zero_parks_workers_after_drain() {
    let framework = Framework::new(
        FrameworkConfig::default()
            .with_yield_strategy(YieldStrategy::Blocking)
            .with_worker_bounds(1, 4)
            .with_workers(2),
    )
    .expect("framework construction failed");

    let seen = Arc::new(AtomicU32::new(0));
    let actor = framework.create_actor(()).expect("create failed");
    framework
        .register_handler(actor, {
            let seen = Arc::clone(&seen);
            move |_state: &mut (), _value: &u32, _ctx| {
                seen.fetch_add(1, Ordering::AcqRel);
            }
        })
        .expect("register failed");

    let receiver = framework.create_receiver().expect("receiver failed");
    for value in 0..1_000u32 {
        framework
            .send(receiver.address(), actor, value)
            .expect("send failed");
    }
    framework.set_worker_target(0);

    // workers park only after the backlog is fully dispatched
    let deadline = Instant::now() + Duration::from_secs(10);
    while framework.worker_count() > 0 {
        assert!(Instant::now() < deadline, "workers never parked");
        std::thread::sleep(Duration::from_millis(2));
    }
    assert_eq!(seen.load(Ordering::Acquire), 1_000);
    assert!(framework.peak_workers() >= 2);

    // retargeting revives the pool
    framework.set_worker_target(2);
    framework
        .send(receiver.address(), actor, 7u32)
        .expect("send failed");
    let deadline = Instant::now() + Duration::from_secs(10);
    while seen.load(Ordering::Acquire) < 1_001 {
        assert!(Instant::now() < deadline, "revived pool never dispatched");
        std::thread::sleep(Duration::from_millis(2));
    }
}
