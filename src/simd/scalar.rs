//! Portable 16x6 tile kernel.
//!
//! Plain multiply-add over a fixed-size accumulator array. The compiler vectorizes the
//! inner row loop for whatever SIMD width the target offers, so this is both the
//! fallback for hosts without a hand-written kernel and a reference for the operation
//! count.

use std::hint::black_box;

use crate::kernel::{Kernel, ThreadBuffers, TileShape};

const MR: usize = TileShape::REFERENCE.rows;
const NR: usize = TileShape::REFERENCE.cols;

/// Scalar-source 16x6 `f64` kernel.
#[derive(Debug, Default, Clone, Copy)]
pub struct ScalarKernel;

impl Kernel for ScalarKernel {
    fn tile(&self) -> TileShape {
        TileShape::REFERENCE
    }

    fn execute(&self, buffers: &mut ThreadBuffers<'_>, loops: u64, depth: usize) {
        let a = &buffers.a[..MR * depth];
        let b = &buffers.b[..NR * depth];

        let mut c = [[0.0f64; MR]; NR];

        for _ in 0..loops {
            for (a_step, b_step) in a.chunks_exact(MR).zip(b.chunks_exact(NR)) {
                for (c_col, &b_val) in c.iter_mut().zip(b_step) {
                    for (c_val, &a_val) in c_col.iter_mut().zip(a_step) {
                        *c_val += a_val * b_val;
                    }
                }
            }
            c = black_box(c);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_runs_on_exact_footprint() {
        let depth = 8;
        let mut a = vec![1.0; MR * depth];
        let mut b = vec![2.0; NR * depth];
        let mut buffers = ThreadBuffers::new(0, &mut a, &mut b);

        ScalarKernel.execute(&mut buffers, 3, depth);

        // read-only on its inputs
        assert!(a.iter().all(|&v| v == 1.0));
        assert!(b.iter().all(|&v| v == 2.0));
    }

    #[test]
    fn test_zero_loops_is_a_no_op() {
        let mut a = vec![0.0; MR];
        let mut b = vec![0.0; NR];
        ScalarKernel.execute(&mut ThreadBuffers::new(3, &mut a, &mut b), 0, 1);
    }

    #[test]
    #[should_panic]
    fn test_undersized_buffer_panics_instead_of_overrunning() {
        let mut a = vec![0.0; MR];
        let mut b = vec![0.0; NR];
        ScalarKernel.execute(&mut ThreadBuffers::new(0, &mut a, &mut b), 1, 2);
    }
}
