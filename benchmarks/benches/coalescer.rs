//! Coalescer benchmarks using Criterion

use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use editorlink_benchmarks::{noop_sink, query_payload, waiters};
use editorlink_core::{Action, BusySet, CoalesceKey, Coalescer};
use serde_json::json;

const KEY: &str = "blueprint_create:/Game/Foo/Bar";

fn coalescer_benchmarks(c: &mut Criterion) {
    let mut group = c.benchmark_group("coalescer");
    let sink = noop_sink();

    group.bench_function("lead_and_complete", |b| {
        let coalescer = Coalescer::new();
        let leader = waiters(1, &sink).remove(0);
        b.iter(|| {
            coalescer.try_begin_or_join(KEY, leader.clone()).unwrap();
            black_box(coalescer.complete(KEY, Ok(json!(true)), &leader));
        })
    });

    group.throughput(Throughput::Elements(64));
    group.bench_function("fan_out_64_waiters", |b| {
        let coalescer = Coalescer::new();
        let all = waiters(64, &sink);
        b.iter(|| {
            for waiter in &all {
                coalescer.try_begin_or_join(KEY, waiter.clone()).unwrap();
            }
            black_box(coalescer.complete(KEY, Ok(json!({"path": "/Game/Foo/Bar"})), &all[0]));
        })
    });
    group.finish();

    let mut group = c.benchmark_group("keys");
    let payload = query_payload();
    group.bench_function("derive_query_key", |b| {
        b.iter(|| black_box(CoalesceKey::for_query("list_assets", &payload).unwrap()))
    });

    let create = json!({"name": "BP_Hero", "savePath": "\\Content\\Blueprints\\"});
    group.bench_function("derive_asset_key", |b| {
        b.iter(|| black_box(Action::BlueprintCreate.coalesce_key(&create).unwrap()))
    });
    group.finish();

    c.bench_function("busy_mark_and_release", |b| {
        let busy = Arc::new(BusySet::new());
        b.iter(|| black_box(busy.try_mark("/Game/Blueprints/BP_Hero").unwrap()))
    });
}

criterion_group!(benches, coalescer_benchmarks);
criterion_main!(benches);
