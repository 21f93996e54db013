//! Overhead of the timing path.
//!
//! Every measurement brackets one kernel call with two clock reads and is preceded by a
//! pin, so these costs bound how short a timed region can usefully be.

use std::hint::black_box;

use criterion::{criterion_group, criterion_main, Criterion};

use peakflops::affinity::{current_cores, Affinity, OsAffinity};
use peakflops::clock::{read_time, Clock, HardwareClock};
use peakflops::pagemap::virt_to_phys_self;

fn bench_clock(c: &mut Criterion) {
    let mut group = c.benchmark_group("clock");

    group.bench_function("read_time", |b| b.iter(|| black_box(read_time())));

    let clock = HardwareClock;
    group.bench_function("hardware_clock_pair", |b| {
        b.iter(|| {
            let start = clock.now_ns();
            let end = clock.now_ns();
            black_box(end.saturating_sub(start))
        })
    });

    group.finish();
}

fn bench_pin(c: &mut Criterion) {
    // leaves the bench thread pinned to its first allowed core
    let Some(core) = current_cores().ok().and_then(|cores| cores.first().copied()) else {
        return;
    };
    c.bench_function("sched_setaffinity", |b| {
        b.iter(|| black_box(OsAffinity.pin_current(black_box(core))))
    });
}

fn bench_pagemap(c: &mut Criterion) {
    let values = vec![1.0f64; 512];
    let virt = values.as_ptr() as usize;
    if virt_to_phys_self(virt).is_err() {
        return;
    }
    c.bench_function("virt_to_phys", |b| {
        b.iter(|| black_box(virt_to_phys_self(black_box(virt))))
    });
}

criterion_group!(benches, bench_clock, bench_pin, bench_pagemap);
criterion_main!(benches);
