//! The compute-kernel capability driven by every benchmark thread.
//!
//! A kernel performs a fixed number of floating-point operations per tile iteration,
//! reading and writing only the buffers it is handed. The harness knows nothing else
//! about it, which is what lets the timing protocol be tested against a deterministic
//! stub.

/// Register tile of a micro-kernel, in `f64` elements.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileShape {
    /// Rows of the tile, consumed from buffer `A` per step.
    pub rows: usize,
    /// Columns of the tile, consumed from buffer `B` per step.
    pub cols: usize,
}

impl TileShape {
    /// The 16x6 tile of the reference kernels.
    pub const REFERENCE: TileShape = TileShape { rows: 16, cols: 6 };

    /// Floating-point operations per tile step, counting a fused multiply-add as two.
    pub const fn flops_per_iteration(&self) -> f64 {
        (self.rows * self.cols * 2) as f64
    }

    /// Bytes of `A` swept by `depth` steps.
    pub const fn a_bytes(&self, depth: usize) -> usize {
        self.rows * depth * std::mem::size_of::<f64>()
    }

    /// Bytes of `B` swept by `depth` steps.
    pub const fn b_bytes(&self, depth: usize) -> usize {
        self.cols * depth * std::mem::size_of::<f64>()
    }
}

/// The `A` and `B` buffers owned by one worker thread for the duration of a run.
#[derive(Debug)]
pub struct ThreadBuffers<'a> {
    /// Index of the owning thread (also its core id).
    pub thread: usize,
    pub a: &'a mut [f64],
    pub b: &'a mut [f64],
}

impl<'a> ThreadBuffers<'a> {
    pub fn new(thread: usize, a: &'a mut [f64], b: &'a mut [f64]) -> Self {
        ThreadBuffers { thread, a, b }
    }
}

/// A fixed-shape floating-point tile routine.
pub trait Kernel: Sync {
    /// Tile computed per step; determines the operation count per iteration.
    fn tile(&self) -> TileShape;

    /// Runs `loops` passes, each sweeping `depth` tile steps through `A` and `B`.
    ///
    /// `A` holds at least `tile().rows * depth` elements and `B` at least
    /// `tile().cols * depth`.
    fn execute(&self, buffers: &mut ThreadBuffers<'_>, loops: u64, depth: usize);
}

impl<K: Kernel + ?Sized> Kernel for &K {
    fn tile(&self) -> TileShape {
        (**self).tile()
    }

    fn execute(&self, buffers: &mut ThreadBuffers<'_>, loops: u64, depth: usize) {
        (**self).execute(buffers, loops, depth)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reference_tile_flops() {
        assert_eq!(TileShape::REFERENCE.flops_per_iteration(), 192.0);
    }

    #[test]
    fn test_tile_footprints_match_cache_tiers() {
        let tile = TileShape::REFERENCE;
        // L1: A + B = 128B + 48B
        assert_eq!((tile.a_bytes(1), tile.b_bytes(1)), (128, 48));
        // L2: A + B = 80KB + 30KB
        assert_eq!((tile.a_bytes(640), tile.b_bytes(640)), (80 << 10, 30 << 10));
        // L3: A + B = 512KB + 192KB
        assert_eq!((tile.a_bytes(4096), tile.b_bytes(4096)), (512 << 10, 192 << 10));
    }
}
