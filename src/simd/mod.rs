//! Concrete tile kernels.
//!
//! `build.rs` selects the kernel for the host: `cfg(avx2)` when the build machine has
//! AVX2 and FMA, `cfg(fallback)` otherwise.

#[cfg(avx2)]
pub mod avx2;

pub mod scalar;

/// The kernel selected for this build.
#[cfg(avx2)]
pub type NativeKernel = avx2::kernels::Fma16x6Kernel;

/// The kernel selected for this build.
#[cfg(fallback)]
pub type NativeKernel = scalar::ScalarKernel;
