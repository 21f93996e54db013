//! AVX2 tile kernels.
//!
//! Only compiled when `build.rs` found AVX2 and FMA on the build host. The kernels still
//! check the running CPU and fall back to the scalar kernel when either is missing, so
//! a binary copied to an older machine measures slowly instead of faulting.

pub mod kernels;
