//! FMA micro-kernel for the 16x6 `f64` tile using AVX2 256-bit vectors.
//!
//! The tile is the computational core of a packed GEMM: one 16-element column of `A`
//! times one 6-element row of `B`, accumulated into a 16x6 block of `C` that never
//! leaves the register file. The harness only cares about its throughput.

use std::arch::x86_64::*;
use std::hint::black_box;

use crate::kernel::{Kernel, ThreadBuffers, TileShape};
use crate::simd::scalar::ScalarKernel;

const MR: usize = TileShape::REFERENCE.rows;
const NR: usize = TileShape::REFERENCE.cols;

/// `f64` lanes per 256-bit register.
const LANE_COUNT: usize = 4;

/// Registers holding one 16-row column of `A` (and of `C`).
const A_REGS: usize = MR / LANE_COUNT;

/// AVX2 + FMA kernel for the 16x6 tile.
///
/// # Performance Characteristics
/// - **Arithmetic Intensity**: 192 FLOPs per step (16×6×2 for FMA)
/// - **Memory Traffic**: 176 bytes loaded per step (128 from `A`, 48 from `B`)
/// - **Register Use**: 24 accumulators, 4 `A` vectors, 1 broadcast
#[derive(Debug, Default, Clone, Copy)]
pub struct Fma16x6Kernel;

impl Kernel for Fma16x6Kernel {
    fn tile(&self) -> TileShape {
        TileShape::REFERENCE
    }

    fn execute(&self, buffers: &mut ThreadBuffers<'_>, loops: u64, depth: usize) {
        if !(is_x86_feature_detected!("avx2") && is_x86_feature_detected!("fma")) {
            return ScalarKernel.execute(buffers, loops, depth);
        }

        let a = &buffers.a[..MR * depth];
        let b = &buffers.b[..NR * depth];

        // SAFETY: AVX2 and FMA were detected above; slice bounds were checked.
        unsafe { kernel_16x6(a, b, loops, depth) }
    }
}

/// Runs `loops` passes of `depth` outer-product steps.
///
/// # Safety
/// - The CPU must support AVX2 and FMA.
/// - `a` must hold `16 * depth` elements and `b` must hold `6 * depth`.
#[target_feature(enable = "avx2,fma")]
unsafe fn kernel_16x6(a: &[f64], b: &[f64], loops: u64, depth: usize) {
    debug_assert!(a.len() >= MR * depth);
    debug_assert!(b.len() >= NR * depth);

    let mut c = [[_mm256_setzero_pd(); A_REGS]; NR];

    for _ in 0..loops {
        let mut a_ptr = a.as_ptr();
        let mut b_ptr = b.as_ptr();

        for _ in 0..depth {
            let a0 = _mm256_loadu_pd(a_ptr);
            let a1 = _mm256_loadu_pd(a_ptr.add(LANE_COUNT));
            let a2 = _mm256_loadu_pd(a_ptr.add(2 * LANE_COUNT));
            let a3 = _mm256_loadu_pd(a_ptr.add(3 * LANE_COUNT));

            // C[0:15][j] += A[0:15] * B[j]
            for (j, c_col) in c.iter_mut().enumerate() {
                let b_broadcast = _mm256_broadcast_sd(&*b_ptr.add(j));
                c_col[0] = _mm256_fmadd_pd(a0, b_broadcast, c_col[0]);
                c_col[1] = _mm256_fmadd_pd(a1, b_broadcast, c_col[1]);
                c_col[2] = _mm256_fmadd_pd(a2, b_broadcast, c_col[2]);
                c_col[3] = _mm256_fmadd_pd(a3, b_broadcast, c_col[3]);
            }

            a_ptr = a_ptr.add(MR);
            b_ptr = b_ptr.add(NR);
        }

        c = black_box(c);
    }
}
