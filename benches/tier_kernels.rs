//! Tile kernel throughput per cache tier.
//!
//! Runs each tier's depth on a single thread with buffers carved from an aligned heap
//! arena, exactly as a worker would see them. Criterion reports elements (tile steps)
//! per second; multiply by 192 for FLOPS.

use std::hint::black_box;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use peakflops::kernel::{Kernel, ThreadBuffers};
use peakflops::memory::{partition, Arena};
use peakflops::simd::scalar::ScalarKernel;
use peakflops::simd::NativeKernel;
use peakflops::workload::CacheTier;
use peakflops::ALIGN;

/// Tile steps per measured iteration, the same for every tier.
const STEPS: u64 = 1 << 16;

fn bench_kernel<K: Kernel>(c: &mut Criterion, name: &str, kernel: &K) {
    let tile = kernel.tile();
    let footprint = tile.a_bytes(CacheTier::L3.unroll()).max(tile.b_bytes(CacheTier::L3.unroll()));
    let mut a = Arena::heap(footprint, ALIGN).expect("arena A");
    let mut b = Arena::heap(footprint, ALIGN).expect("arena B");
    let parts = partition(footprint, 1).expect("single partition");

    let mut group = c.benchmark_group(name);
    group.throughput(Throughput::Elements(STEPS));

    for tier in CacheTier::ALL {
        let depth = tier.unroll();
        let loops = STEPS / depth as u64;

        let mut a_parts = a.split(&parts).expect("split A");
        let mut b_parts = b.split(&parts).expect("split B");
        let mut buffers = ThreadBuffers::new(0, &mut *a_parts[0], &mut *b_parts[0]);

        group.bench_with_input(BenchmarkId::from_parameter(tier), &depth, |bencher, &depth| {
            bencher.iter(|| kernel.execute(black_box(&mut buffers), black_box(loops), depth))
        });
    }

    group.finish();
}

fn bench_tiers(c: &mut Criterion) {
    bench_kernel(c, "native_kernel", &NativeKernel::default());
    bench_kernel(c, "scalar_kernel", &ScalarKernel);
}

criterion_group!(benches, bench_tiers);
criterion_main!(benches);
