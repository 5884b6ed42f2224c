// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! End-to-end throughput: bursts through a counter actor on a live
//! worker pool, measured per round trip of the whole burst.

use criterion::{criterion_group, criterion_main, Criterion, Throughput};
use hive::{Framework, FrameworkConfig, YieldStrategy};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

const BURST: u64 = 1_000;

fn bench_throughput(c: &mut Criterion) {
    let mut group = c.benchmark_group("dispatch_throughput");
    group.throughput(Throughput::Elements(BURST));
    group.measurement_time(Duration::from_secs(10));

    for (name, strategy) in [
        ("strong", YieldStrategy::Strong),
        ("blocking", YieldStrategy::Blocking),
    ] {
        let framework = Framework::new(
            FrameworkConfig::default()
                .with_yield_strategy(strategy)
                .with_worker_bounds(2, 2)
                .with_workers(2),
        )
        .expect("framework construction failed");

        let seen = Arc::new(AtomicU64::new(0));
        let actor = framework.create_actor(()).expect("create failed");
        framework
            .register_handler(actor, {
                let seen = Arc::clone(&seen);
                move |_state: &mut (), _value: &u64, _ctx| {
                    seen.fetch_add(1, Ordering::AcqRel);
                }
            })
            .expect("register failed");
        let receiver = framework.create_receiver().expect("receiver failed");
        let from = receiver.address();

        group.bench_function(name, |b| {
            b.iter(|| {
                let start = seen.load(Ordering::Acquire);
                for value in 0..BURST {
                    framework.send(from, actor, value).expect("send failed");
                }
                while seen.load(Ordering::Acquire) < start + BURST {
                    std::hint::spin_loop();
                }
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_throughput);
criterion_main!(benches);
