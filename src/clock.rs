//! High resolution monotonic clock.
//!
//! On LoongArch the stable counter (`rdtime.d`) ticks at a constant 100 MHz, so one tick
//! is exactly 10 ns and a read is a single instruction. Other targets fall back to the
//! vDSO-backed monotonic clock measured from a process-wide epoch.

/// Source of monotonic nanosecond timestamps.
///
/// Implementations must be callable from any thread without synchronization.
pub trait Clock: Sync {
    /// Current timestamp in nanoseconds.
    fn now_ns(&self) -> u64;
}

/// Nanoseconds per counter tick on LoongArch (100 MHz stable counter).
pub const COUNTER_SCALE: u64 = 10;

/// The hardware counter of the host CPU.
#[derive(Debug, Default, Clone, Copy)]
pub struct HardwareClock;

impl Clock for HardwareClock {
    #[inline(always)]
    fn now_ns(&self) -> u64 {
        read_time()
    }
}

/// Reads the counter and scales it to nanoseconds.
#[cfg(target_arch = "loongarch64")]
#[inline(always)]
pub fn read_time() -> u64 {
    let ticks: u64;
    let _id: u64;
    // SAFETY: rdtime.d only reads the stable counter and the counter id.
    unsafe {
        std::arch::asm!(
            "rdtime.d {0}, {1}",
            out(reg) ticks,
            out(reg) _id,
            options(nostack),
        );
    }
    ticks * COUNTER_SCALE
}

/// Reads the monotonic clock in nanoseconds since the first call in this process.
#[cfg(not(target_arch = "loongarch64"))]
#[inline(always)]
pub fn read_time() -> u64 {
    use std::sync::OnceLock;
    use std::time::Instant;

    static EPOCH: OnceLock<Instant> = OnceLock::new();
    let epoch = EPOCH.get_or_init(Instant::now);
    epoch.elapsed().as_nanos() as u64
}
