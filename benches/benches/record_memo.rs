// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

use criterion::{BatchSize, Criterion, black_box, criterion_group, criterion_main};
use understory_record::{Record, RecordFactory, Value};

fn gen_record(width: usize) -> Record {
    let factory = RecordFactory::new(
        "Wide",
        (0..width).map(|i| (format!("f{i}"), Value::from(i as i64))),
    );
    factory.create()
}

fn bench_equality(c: &mut Criterion) {
    let mut group = c.benchmark_group("record_equality");
    for &width in &[8_usize, 64, 512] {
        group.bench_function(format!("fresh_pair_w{}", width), |b| {
            b.iter_batched(
                || {
                    let left = gen_record(width);
                    let right = left.factory().create_with([("f0", 0_i64)]).unwrap();
                    (left.set("f1", 99_i64).unwrap(), right.set("f1", 99_i64).unwrap())
                },
                |(left, right)| black_box(left == right),
                BatchSize::SmallInput,
            );
        });

        let a = gen_record(width).set("f0", 42_i64).unwrap();
        let b = a.factory().create().set("f0", 42_i64).unwrap();
        let _ = a == b;
        group.bench_function(format!("remembered_pair_w{}", width), |bench| {
            bench.iter(|| black_box(a == b));
        });
    }
    group.finish();
}

fn bench_set_in(c: &mut Criterion) {
    let leaf = RecordFactory::new("Leaf", [("value", 0_i64)]);
    let mid = RecordFactory::new("Mid", [("leaf", leaf.create())]);
    let root = RecordFactory::new(
        "Root",
        (0..64).map(|i| (format!("m{i}"), Value::from(mid.create()))),
    );
    let state = root.create();
    c.bench_function("record_set_in_depth3", |b| {
        let mut v = 0_i64;
        b.iter(|| {
            v += 1;
            black_box(state.set_in(&["m7", "leaf", "value"], v).unwrap());
        });
    });
}

fn bench_get_or_calculate(c: &mut Criterion) {
    let record = gen_record(64);
    let other = gen_record(8);
    c.bench_function("memo_hit_two_deps", |b| {
        b.iter(|| {
            let v: i64 = record
                .get_or_calculate("sum", &[&record, &other], || {
                    record.iter().filter_map(|(_, v)| v.as_int()).sum()
                })
                .unwrap();
            black_box(v);
        });
    });
    c.bench_function("memo_miss_fresh_dep", |b| {
        b.iter_batched(
            || record.set("f0", 1_000_i64).unwrap(),
            |fresh| {
                let v: i64 = fresh
                    .get_or_calculate_self("sum", || {
                        fresh.iter().filter_map(|(_, v)| v.as_int()).sum()
                    })
                    .unwrap();
                black_box(v);
            },
            BatchSize::SmallInput,
        );
    });
}

criterion_group!(benches, bench_equality, bench_set_in, bench_get_or_calculate);
criterion_main!(benches);
