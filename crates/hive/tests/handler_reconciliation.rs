// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Handler-table edits made during dispatch: deferred, reconciled
//! between dispatches, never applied to the in-flight message.

use hive::{Framework, FrameworkConfig, HandlerId, YieldStrategy};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

fn wait_for(counter: &AtomicU32, expected: u32) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while counter.load(Ordering::Acquire) < expected {
        assert!(Instant::now() < deadline, "timed out waiting for handlers");
        std::thread::sleep(Duration::from_millis(1));
    }
}

fn single_worker_framework() -> Framework {
    Framework::new(
        FrameworkConfig::default()
            .with_yield_strategy(YieldStrategy::Blocking)
            .with_worker_bounds(1, 1)
            .with_workers(1),
    )
    .expect("framework construction failed")
}

#[test]
fn deregistered_handler_finishes_the_current_envelope() {
    let framework = single_worker_framework();
    let actor = framework.create_actor(()).expect("create failed");

    let first_hits = Arc::new(AtomicU32::new(0));
    let second_hits = Arc::new(AtomicU32::new(0));
    let victim: Arc<OnceLock<HandlerId>> = Arc::new(OnceLock::new());

    // registration order matters: the deregistering handler runs first
    framework
        .register_handler(actor, {
            let first_hits = Arc::clone(&first_hits);
            let victim = Arc::clone(&victim);
            move |_state: &mut (), _value: &u32, ctx| {
                if first_hits.fetch_add(1, Ordering::AcqRel) == 0 {
                    let id = *victim.get().expect("victim id not published");
                    assert!(ctx.deregister_handler(ctx.self_address(), id));
                }
            }
        })
        .expect("register failed");
    let second_id = framework
        .register_handler(actor, {
            let second_hits = Arc::clone(&second_hits);
            move |_state: &mut (), _value: &u32, _ctx| {
                second_hits.fetch_add(1, Ordering::AcqRel);
            }
        })
        .expect("register failed");
    victim.set(second_id).expect("victim id already set");

    let receiver = framework.create_receiver().expect("receiver failed");
    framework
        .send(receiver.address(), actor, 1u32)
        .expect("send failed");
    wait_for(&first_hits, 1);
    // deregistered mid-dispatch, but its tag matched the current
    // envelope: it still runs this once
    wait_for(&second_hits, 1);

    framework
        .send(receiver.address(), actor, 2u32)
        .expect("send failed");
    wait_for(&first_hits, 2);
    assert_eq!(second_hits.load(Ordering::Acquire), 1);
}

#[test]
fn handler_registered_during_dispatch_starts_next_envelope() {
    let framework = single_worker_framework();
    let actor = framework.create_actor(()).expect("create failed");

    let driver_hits = Arc::new(AtomicU32::new(0));
    let late_hits = Arc::new(AtomicU32::new(0));

    framework
        .register_handler(actor, {
            let driver_hits = Arc::clone(&driver_hits);
            let late_hits = Arc::clone(&late_hits);
            move |_state: &mut (), _value: &u32, ctx| {
                if driver_hits.fetch_add(1, Ordering::AcqRel) == 0 {
                    let late_hits = Arc::clone(&late_hits);
                    ctx.register_handler(ctx.self_address(), {
                        move |_state: &mut (), _value: &u32, _ctx| {
                            late_hits.fetch_add(1, Ordering::AcqRel);
                        }
                    })
                    .expect("in-dispatch registration failed");
                }
            }
        })
        .expect("register failed");

    let receiver = framework.create_receiver().expect("receiver failed");
    framework
        .send(receiver.address(), actor, 1u32)
        .expect("send failed");
    wait_for(&driver_hits, 1);
    // registered during the dispatch of message 1: must not see it
    assert_eq!(late_hits.load(Ordering::Acquire), 0);

    framework
        .send(receiver.address(), actor, 2u32)
        .expect("send failed");
    wait_for(&driver_hits, 2);
    wait_for(&late_hits, 1);
}

#[test]
fn default_handler_catches_unmatched_types() {
    let framework = single_worker_framework();
    let actor = framework.create_actor(0u32).expect("create failed");

    let typed_hits = Arc::new(AtomicU32::new(0));
    let default_hits = Arc::new(AtomicU32::new(0));
    let fallback_hits = Arc::new(AtomicU32::new(0));

    framework.set_fallback_handler({
        let fallback_hits = Arc::clone(&fallback_hits);
        move |_info| {
            fallback_hits.fetch_add(1, Ordering::AcqRel);
        }
    });
    framework
        .register_handler(actor, {
            let typed_hits = Arc::clone(&typed_hits);
            move |_state: &mut u32, _value: &u32, _ctx| {
                typed_hits.fetch_add(1, Ordering::AcqRel);
            }
        })
        .expect("register failed");
    framework
        .set_default_handler(actor, {
            let default_hits = Arc::clone(&default_hits);
            move |_state: &mut u32, _info, _ctx| {
                default_hits.fetch_add(1, Ordering::AcqRel);
            }
        })
        .expect("set_default failed");

    let receiver = framework.create_receiver().expect("receiver failed");
    // unmatched type: actor default, not the framework fallback
    framework
        .send(receiver.address(), actor, String::from("odd"))
        .expect("send failed");
    wait_for(&default_hits, 1);
    assert_eq!(fallback_hits.load(Ordering::Acquire), 0);

    // matched type: typed handler, default stays out of it
    framework
        .send(receiver.address(), actor, 5u32)
        .expect("send failed");
    wait_for(&typed_hits, 1);
    assert_eq!(default_hits.load(Ordering::Acquire), 1);
}

#[test]
fn name_matched_foreign_payload_reaches_fallback() {
    struct FrameV1(#[allow(dead_code)] u32);
    struct FrameV2(#[allow(dead_code)] u32);
    hive::register_message_name::<FrameV1>("frame.v1v2");
    hive::register_message_name::<FrameV2>("frame.v1v2");

    let framework = single_worker_framework();
    let actor = framework.create_actor(()).expect("create failed");

    let typed_hits = Arc::new(AtomicU32::new(0));
    let fallback_hits = Arc::new(AtomicU32::new(0));
    framework.set_fallback_handler({
        let fallback_hits = Arc::clone(&fallback_hits);
        move |_info| {
            fallback_hits.fetch_add(1, Ordering::AcqRel);
        }
    });
    framework
        .register_handler(actor, {
            let typed_hits = Arc::clone(&typed_hits);
            move |_state: &mut (), _value: &FrameV1, _ctx| {
                typed_hits.fetch_add(1, Ordering::AcqRel);
            }
        })
        .expect("register failed");

    let receiver = framework.create_receiver().expect("receiver failed");
    // same registered name, different Rust type: the handler is selected
    // by name but cannot downcast, so the message falls through
    framework
        .send(receiver.address(), actor, FrameV2(9))
        .expect("send failed");
    wait_for(&fallback_hits, 1);
    assert_eq!(typed_hits.load(Ordering::Acquire), 0);

    framework
        .send(receiver.address(), actor, FrameV1(9))
        .expect("send failed");
    wait_for(&typed_hits, 1);
    assert_eq!(fallback_hits.load(Ordering::Acquire), 1);
}

#[test]
fn unmatched_without_default_reaches_fallback() {
    let framework = single_worker_framework();
    let actor = framework.create_actor(()).expect("create failed");

    let fallback_hits = Arc::new(AtomicU32::new(0));
    framework.set_fallback_handler({
        let fallback_hits = Arc::clone(&fallback_hits);
        move |info| {
            assert!(info.type_name().contains("String"));
            fallback_hits.fetch_add(1, Ordering::AcqRel);
        }
    });

    let receiver = framework.create_receiver().expect("receiver failed");
    framework
        .send(receiver.address(), actor, String::from("nobody home"))
        .expect("send failed");
    wait_for(&fallback_hits, 1);
    assert_eq!(framework.fallback_messages(), 1);
}
