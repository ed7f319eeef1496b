// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

use std::rc::Rc;

use criterion::{BatchSize, Criterion, Throughput, black_box, criterion_group, criterion_main};
use understory_record::{Record, RecordFactory};
use understory_store::{ConnectOptions, Connection, Store, Subscriber};

type Field = Connection<Record, i64, i64>;
type Sub = Subscriber<Record, i64, i64>;

fn gen_fields(n: usize) -> Vec<Rc<str>> {
    (0..n).map(|i| Rc::from(format!("f{i}"))).collect()
}

fn gen_store(fields: &[Rc<str>]) -> Store<Record> {
    let factory = RecordFactory::new("Wide", fields.iter().map(|k| (k.clone(), 0_i64)));
    Store::new(factory.create())
}

fn connect_field(store: &Store<Record>, key: Rc<str>) -> Field {
    let read = key.clone();
    store.connect(ConnectOptions::scoped(
        move |r: &Record| r.get_int(&read).unwrap_or_default(),
        move |r: &Record, v: i64| r.set(&key, v).unwrap_or_else(|_| r.clone()),
        |v: &i64, _: &()| *v,
        |_: &i64, v: i64| v,
    ))
}

/// `groups` scoped connections with `per_group` mounted subscribers each.
fn gen_mounted(groups: usize, per_group: usize) -> (Store<Record>, Vec<Rc<str>>, Vec<Sub>) {
    let fields = gen_fields(groups);
    let store = gen_store(&fields);
    let mut subs = Vec::with_capacity(groups * per_group);
    for key in &fields {
        let conn = connect_field(&store, key.clone());
        for _ in 0..per_group {
            let sub = conn.subscriber(());
            sub.mount().unwrap();
            subs.push(sub);
        }
    }
    (store, fields, subs)
}

fn bench_dispatch_one_group(c: &mut Criterion) {
    let mut group = c.benchmark_group("dispatch_one_group");
    for &n in &[16_usize, 256, 1024] {
        let (store, fields, _subs) = gen_mounted(n, 4);
        let key = fields[n / 2].clone();
        group.throughput(Throughput::Elements(n as u64));
        group.bench_function(format!("groups_n{}", n), |b| {
            let mut v = 0_i64;
            b.iter(|| {
                v += 1;
                let key = key.clone();
                let report = store.send_update(move |r| r.set(&key, v).unwrap_or_else(|_| r.clone()));
                black_box(report.notified.len());
            });
        });
    }
    group.finish();
}

fn bench_dispatch_noop(c: &mut Criterion) {
    let mut group = c.benchmark_group("dispatch_noop");
    for &n in &[16_usize, 256, 1024] {
        let (store, fields, _subs) = gen_mounted(n, 4);
        let key = fields[0].clone();
        group.throughput(Throughput::Elements(n as u64));
        group.bench_function(format!("groups_n{}", n), |b| {
            b.iter(|| {
                let key = key.clone();
                let report = store.send_update(move |r| r.set(&key, 0).unwrap_or_else(|_| r.clone()));
                black_box(report.skipped);
            });
        });
    }
    group.finish();
}

fn bench_mount_unmount(c: &mut Criterion) {
    let mut group = c.benchmark_group("mount_unmount");
    for &n in &[64_usize, 512] {
        let fields = gen_fields(8);
        let store = gen_store(&fields);
        let conns: Vec<Field> = fields
            .iter()
            .map(|k| connect_field(&store, k.clone()))
            .collect();
        group.throughput(Throughput::Elements(n as u64));
        group.bench_function(format!("subscribers_n{}", n), |b| {
            b.iter_batched(
                || {
                    (0..n)
                        .map(|i| conns[i % conns.len()].subscriber(()))
                        .collect::<Vec<_>>()
                },
                |subs| {
                    for s in &subs {
                        s.mount().unwrap();
                    }
                    black_box(store.group_count());
                    drop(subs);
                },
                BatchSize::SmallInput,
            );
        });
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_dispatch_one_group,
    bench_dispatch_noop,
    bench_mount_unmount,
);
criterion_main!(benches);
