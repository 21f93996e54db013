//! Multi-core floating-point throughput harness.
//!
//! `peakflops` drives a fixed-shape SIMD tile kernel from N core-pinned threads, each on
//! its own disjoint slice of memory, and reports the sustained GFLOPS every core reaches
//! while its working set sits in L1, L2 or L3.
//!
//! ```no_run
//! use peakflops::{config::BenchConfig, orchestrator::Orchestrator, simd::NativeKernel};
//!
//! let config = BenchConfig::from_env()?;
//! let kernel = NativeKernel::default();
//! let mut orchestrator = Orchestrator::new(config, &kernel)?;
//! orchestrator.run()?;
//! # Ok::<(), peakflops::error::BenchError>(())
//! ```

pub mod affinity;
pub mod clock;
pub mod config;
pub mod error;
pub mod kernel;
pub mod memory;
pub mod orchestrator;
pub mod pagemap;
pub mod simd;
pub mod utils;
pub mod workload;

pub use error::{BenchError, Result};

/// Worker threads, one per core index `0..NUM_THREADS`.
pub const NUM_THREADS: usize = 16;

/// Total tile iterations per thread; tiers divide it by their unroll depth.
pub const LOOPS: u64 = 4_194_304_000;

/// Minimum alignment of every buffer handed to a kernel.
pub const ALIGN: usize = 64;

/// Shared arena size for each of the `A` and `B` buffers.
pub const MEM: usize = 100 << 20;

/// Per-thread slice of the shared arena.
pub const OFFSET: usize = MEM / NUM_THREADS;

/// Huge page size used to round mapping lengths.
pub const HUGE_PAGE_SIZE: usize = 2 << 20;

/// Theoretical per-core peak in GFLOPS.
#[cfg(feature = "la3c5000")]
pub const MAX_PEAK: f64 = 35.2;

/// Theoretical per-core peak in GFLOPS.
#[cfg(not(feature = "la3c5000"))]
pub const MAX_PEAK: f64 = 40.0;
