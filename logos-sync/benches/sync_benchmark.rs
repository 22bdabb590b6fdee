use criterion::{criterion_group, criterion_main, Criterion};
use std::hint::black_box;
use logos_sync::{ClientId, Instance, InstanceConfig, SubmitRequest, TextDocument};
use serde_json::json;
use std::sync::Arc;

fn new_instance() -> Arc<Instance> {
    Arc::new(Instance::new(
        "bench",
        Box::new(TextDocument::default()),
        InstanceConfig::default(),
    ))
}

fn submit(version: u64) -> SubmitRequest {
    SubmitRequest {
        version,
        steps: vec![json!({"from": 0, "to": 0, "text": "x"})],
        aux_delta: Vec::new(),
        client_id: ClientId::Number(1),
    }
}

fn bench_add_events(c: &mut Criterion) {
    c.bench_function("add_events_1000_versions", |b| {
        b.iter(|| {
            let inst = new_instance();
            for v in 0..1000 {
                black_box(inst.add_events(submit(v)).unwrap());
            }
        })
    });
}

fn bench_catch_up(c: &mut Criterion) {
    let inst = new_instance();
    for v in 0..1000 {
        inst.add_events(submit(v)).unwrap();
    }

    c.bench_function("get_events_behind_1000", |b| {
        b.iter(|| {
            black_box(inst.get_events(black_box(0), 0).unwrap());
        })
    });
}

fn bench_wake_100_readers(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();

    c.bench_function("publish_wakes_100_readers", |b| {
        b.iter(|| {
            rt.block_on(async {
                let inst = new_instance();
                let readers: Vec<_> = (0..100)
                    .map(|_| {
                        let inst = inst.clone();
                        tokio::spawn(async move { inst.wait_for_events(0, 0, None).await })
                    })
                    .collect();
                while inst.waiter_count() < 100 {
                    tokio::task::yield_now().await;
                }

                inst.add_events(submit(0)).unwrap();
                for reader in readers {
                    black_box(reader.await.unwrap().unwrap());
                }
            });
        })
    });
}

criterion_group!(benches, bench_add_events, bench_catch_up, bench_wake_100_readers);
criterion_main!(benches);
