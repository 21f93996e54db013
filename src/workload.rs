//! Cache-tier workloads: sizing, timing and GFLOPS derivation.
//!
//! The three tiers run the same tile kernel and differ only in how deep each pass sweeps
//! through `A` and `B`. Depth 1 keeps one tile step (176 bytes) hot in L1; depth 640
//! sweeps 110 KiB, which fits L2; depth 4096 sweeps 704 KiB, which only fits L3. Total
//! tile iterations stay constant across tiers, so runs take comparable time.

use std::fmt;
use std::str::FromStr;

use crate::affinity::Affinity;
use crate::clock::Clock;
use crate::error::{config_error, BenchError, Result};
use crate::kernel::{Kernel, ThreadBuffers, TileShape};

/// Cache level the working set is sized for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheTier {
    L1,
    L2,
    L3,
}

impl CacheTier {
    pub const ALL: [CacheTier; 3] = [CacheTier::L1, CacheTier::L2, CacheTier::L3];

    /// Tile steps per kernel pass (inner unroll factor).
    pub const fn unroll(&self) -> usize {
        match self {
            CacheTier::L1 => 1,
            CacheTier::L2 => 640,
            CacheTier::L3 => 4096,
        }
    }

    pub const fn label(&self) -> &'static str {
        match self {
            CacheTier::L1 => "L1",
            CacheTier::L2 => "L2",
            CacheTier::L3 => "L3",
        }
    }
}

impl fmt::Display for CacheTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for CacheTier {
    type Err = BenchError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "l1" => Ok(CacheTier::L1),
            "l2" => Ok(CacheTier::L2),
            "l3" => Ok(CacheTier::L3),
            other => Err(config_error(format!(
                "unknown cache tier '{}' (expected l1, l2 or l3)",
                other
            ))),
        }
    }
}

/// Immutable constants of one tier, shared read-only by all threads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheTierConfig {
    pub tier: CacheTier,
    pub label: &'static str,
    /// Kernel passes per thread.
    pub loops: u64,
    /// Tile steps per pass.
    pub unroll: usize,
}

impl CacheTierConfig {
    pub fn for_tier(tier: CacheTier, total_loops: u64) -> Self {
        CacheTierConfig {
            tier,
            label: tier.label(),
            loops: total_loops / tier.unroll() as u64,
            unroll: tier.unroll(),
        }
    }

    /// Tile steps executed per thread.
    pub fn iterations(&self) -> u64 {
        self.loops * self.unroll as u64
    }

    /// Bytes of `A` and `B` one pass touches.
    pub fn footprint(&self, tile: TileShape) -> (usize, usize) {
        (tile.a_bytes(self.unroll), tile.b_bytes(self.unroll))
    }
}

/// Average nanoseconds per tile step.
pub fn avg_ns_per_iteration(elapsed_ns: u64, iterations: u64) -> f64 {
    // a zero reading would make throughput infinite
    elapsed_ns.max(1) as f64 / iterations.max(1) as f64
}

/// Throughput in GFLOPS (operations per nanosecond).
pub fn gflops(flops_per_iteration: f64, avg_ns: f64) -> f64 {
    flops_per_iteration / avg_ns
}

/// Measured throughput as a percentage of `peak_gflops`, unclamped.
pub fn peak_ratio(gflops: f64, peak_gflops: f64) -> f64 {
    gflops / peak_gflops * 100.0
}

/// One thread's measurement. Derived right after the timed region, never aggregated.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BenchmarkResult {
    pub thread: usize,
    pub label: &'static str,
    pub elapsed_ns: u64,
    pub avg_ns: f64,
    pub gflops: f64,
    pub peak_ratio: f64,
}

impl BenchmarkResult {
    pub fn from_elapsed(
        thread: usize,
        tier: &CacheTierConfig,
        tile: TileShape,
        elapsed_ns: u64,
        peak_gflops: f64,
    ) -> Self {
        let avg_ns = avg_ns_per_iteration(elapsed_ns, tier.iterations());
        let gflops = gflops(tile.flops_per_iteration(), avg_ns);
        BenchmarkResult {
            thread,
            label: tier.label,
            elapsed_ns,
            avg_ns,
            gflops,
            peak_ratio: peak_ratio(gflops, peak_gflops),
        }
    }
}

impl fmt::Display for BenchmarkResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "When {} cache hit, thread NUM {} peak performance is {:.2} GFlops, peak floating-point performance ratio {:.2} %",
            self.label, self.thread, self.gflops, self.peak_ratio
        )
    }
}

/// Pins, times and measures one kernel invocation for one thread.
pub struct CacheTierWorkload<'r, K, C, A> {
    pub tier: CacheTierConfig,
    pub peak_gflops: f64,
    kernel: &'r K,
    clock: &'r C,
    affinity: &'r A,
}

impl<'r, K: Kernel, C: Clock, A: Affinity> CacheTierWorkload<'r, K, C, A> {
    pub fn new(
        tier: CacheTierConfig,
        peak_gflops: f64,
        kernel: &'r K,
        clock: &'r C,
        affinity: &'r A,
    ) -> Self {
        CacheTierWorkload {
            tier,
            peak_gflops,
            kernel,
            clock,
            affinity,
        }
    }

    /// Pins the calling thread to `buffers.thread`, then times one kernel call.
    ///
    /// The clock starts after pinning, so affinity latency is never measured. A pinning
    /// failure aborts before the timed region.
    pub fn run(&self, buffers: &mut ThreadBuffers<'_>) -> Result<BenchmarkResult> {
        self.affinity.pin_current(buffers.thread)?;

        let start = self.clock.now_ns();
        self.kernel.execute(buffers, self.tier.loops, self.tier.unroll);
        let end = self.clock.now_ns();

        Ok(BenchmarkResult::from_elapsed(
            buffers.thread,
            &self.tier,
            self.kernel.tile(),
            end.saturating_sub(start),
            self.peak_gflops,
        ))
    }
}
