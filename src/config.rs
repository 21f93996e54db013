//! Run configuration.
//!
//! The build-time constants in the crate root are the defaults. Tier and provisioning
//! strategy are ordinary values, so one binary measures any combination.

use std::env;

use crate::error::{config_error, Result};
use crate::kernel::TileShape;
use crate::memory::{HugePageMode, ProvisioningStrategy};
use crate::utils::{divides_evenly, round_up};
use crate::workload::{CacheTier, CacheTierConfig};
use crate::{ALIGN, HUGE_PAGE_SIZE, LOOPS, MAX_PEAK, MEM, NUM_THREADS};

/// Environment variable selecting the cache tier (`l1`, `l2`, `l3`).
pub const TIER_ENV: &str = "PEAKFLOPS_TIER";

/// Environment variable selecting the provisioning strategy.
pub const STRATEGY_ENV: &str = "PEAKFLOPS_STRATEGY";

/// Suggested base addresses of the fixed `A` and `B` mappings.
pub const FIXED_ADDRESSES: (usize, usize) = (0x4000_0000_0000, 0x4100_0000_0000);

/// Everything one benchmark run needs to know.
#[derive(Debug, Clone, PartialEq)]
pub struct BenchConfig {
    pub threads: usize,
    pub tier: CacheTier,
    pub strategy: ProvisioningStrategy,
    pub huge_pages: HugePageMode,
    /// Tile iterations per thread before dividing by the tier's unroll depth.
    pub total_loops: u64,
    /// Size of each shared arena (`A` and `B`) for the shared strategies.
    pub arena_bytes: usize,
    pub peak_gflops: f64,
    /// Base addresses of the `A` and `B` mappings for the fixed-address strategy.
    pub fixed_addresses: (usize, usize),
    /// Size of each private mapping for the per-thread strategy.
    pub per_thread_bytes: usize,
    /// Where `B` starts inside a per-thread mapping, as a fraction of its size.
    pub b_offset_ratio: f64,
    /// Print virtual/physical addresses of per-thread buffers.
    pub report_physical: bool,
}

impl Default for BenchConfig {
    fn default() -> Self {
        BenchConfig {
            threads: NUM_THREADS,
            tier: CacheTier::L1,
            strategy: ProvisioningStrategy::HeapAligned,
            huge_pages: HugePageMode::HugeTlb,
            total_loops: LOOPS,
            arena_bytes: MEM,
            peak_gflops: MAX_PEAK,
            fixed_addresses: FIXED_ADDRESSES,
            per_thread_bytes: HUGE_PAGE_SIZE,
            b_offset_ratio: 0.5,
            report_physical: true,
        }
    }
}

impl BenchConfig {
    /// Defaults with tier and strategy taken from the environment when set.
    pub fn from_env() -> Result<Self> {
        let mut config = BenchConfig::default();
        if let Ok(tier) = env::var(TIER_ENV) {
            config.tier = tier.parse()?;
        }
        if let Ok(strategy) = env::var(STRATEGY_ENV) {
            config.strategy = strategy.parse()?;
        }
        Ok(config)
    }

    pub fn with_tier(mut self, tier: CacheTier) -> Self {
        self.tier = tier;
        self
    }

    pub fn with_strategy(mut self, strategy: ProvisioningStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Constants of the selected tier.
    pub fn tier_config(&self) -> CacheTierConfig {
        CacheTierConfig::for_tier(self.tier, self.total_loops)
    }

    /// Offset of `B` inside a per-thread mapping, rounded up to [`ALIGN`].
    pub fn b_offset(&self) -> usize {
        round_up(
            (self.per_thread_bytes as f64 * self.b_offset_ratio) as usize,
            ALIGN,
        )
    }

    /// Checks that every thread gets aligned buffers large enough for the tier.
    pub fn validate(&self, tile: TileShape) -> Result<()> {
        if self.threads == 0 {
            return Err(config_error("at least one thread is required"));
        }
        if !(self.peak_gflops > 0.0) {
            return Err(config_error(format!(
                "peak must be positive, got {}",
                self.peak_gflops
            )));
        }

        let tier = self.tier_config();
        let need_a = tile.a_bytes(tier.unroll);
        let need_b = tile.b_bytes(tier.unroll);

        if tier.loops == 0 {
            return Err(config_error(format!(
                "{} total loops are fewer than one {} pass of depth {}",
                self.total_loops, tier.label, tier.unroll
            )));
        }

        if self.strategy.is_shared() {
            if !divides_evenly(self.arena_bytes, self.threads * ALIGN) {
                return Err(config_error(format!(
                    "{} byte arena does not split into {} partitions aligned to {} bytes",
                    self.arena_bytes, self.threads, ALIGN
                )));
            }
            let share = self.arena_bytes / self.threads;
            if share < need_a.max(need_b) {
                return Err(config_error(format!(
                    "{} byte partitions cannot hold the {} working set ({} + {} bytes)",
                    share, tier.label, need_a, need_b
                )));
            }
        }

        if self.strategy == ProvisioningStrategy::FixedHugePage {
            let (addr_a, addr_b) = self.fixed_addresses;
            if addr_a % HUGE_PAGE_SIZE != 0 || addr_b % HUGE_PAGE_SIZE != 0 {
                return Err(config_error(format!(
                    "fixed addresses {:#x} and {:#x} must be {} byte aligned",
                    addr_a, addr_b, HUGE_PAGE_SIZE
                )));
            }
            let mapped = round_up(self.arena_bytes, HUGE_PAGE_SIZE);
            if addr_a < addr_b + mapped && addr_b < addr_a + mapped {
                return Err(config_error("fixed A and B mappings overlap"));
            }
        }

        if self.strategy == ProvisioningStrategy::PerThreadHugePage {
            if !(self.b_offset_ratio > 0.0 && self.b_offset_ratio < 1.0) {
                return Err(config_error(format!(
                    "B offset ratio must be inside (0, 1), got {}",
                    self.b_offset_ratio
                )));
            }
            let mapped = round_up(self.per_thread_bytes, HUGE_PAGE_SIZE);
            let b_offset = self.b_offset();
            if b_offset < need_a || mapped.saturating_sub(b_offset) < need_b {
                return Err(config_error(format!(
                    "{} byte per-thread mapping split at {} cannot hold the {} working set ({} + {} bytes)",
                    mapped, b_offset, tier.label, need_a, need_b
                )));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BenchError;

    #[test]
    fn test_defaults_are_valid_for_every_tier_and_strategy() {
        for tier in CacheTier::ALL {
            for strategy in ProvisioningStrategy::ALL {
                let config = BenchConfig::default().with_tier(tier).with_strategy(strategy);
                assert!(
                    config.validate(TileShape::REFERENCE).is_ok(),
                    "{} / {} rejected",
                    tier,
                    strategy
                );
            }
        }
    }

    #[test]
    fn test_zero_threads_rejected() {
        let config = BenchConfig {
            threads: 0,
            ..BenchConfig::default()
        };
        assert!(matches!(
            config.validate(TileShape::REFERENCE),
            Err(BenchError::ConfigError { .. })
        ));
    }

    #[test]
    fn test_unaligned_partition_rejected() {
        let config = BenchConfig {
            threads: 3,
            arena_bytes: 3 * 1000,
            ..BenchConfig::default()
        };
        assert!(config.validate(TileShape::REFERENCE).is_err());
    }

    #[test]
    fn test_partition_too_small_for_tier_rejected() {
        let config = BenchConfig {
            threads: 4,
            arena_bytes: 4 * 4096,
            ..BenchConfig::default()
        }
        .with_tier(CacheTier::L3);
        let err = config.validate(TileShape::REFERENCE).unwrap_err();
        assert!(err.to_string().contains("L3"));
    }

    #[test]
    fn test_b_offset_is_aligned_half() {
        let config = BenchConfig::default();
        assert_eq!(config.b_offset(), HUGE_PAGE_SIZE / 2);

        let skewed = BenchConfig {
            b_offset_ratio: 0.3,
            ..BenchConfig::default()
        };
        assert_eq!(skewed.b_offset() % ALIGN, 0);
        assert!(skewed.b_offset() >= (HUGE_PAGE_SIZE as f64 * 0.3) as usize);
    }

    #[test]
    fn test_bad_ratio_rejected() {
        for ratio in [0.0, 1.0, -0.5, f64::NAN] {
            let config = BenchConfig {
                b_offset_ratio: ratio,
                ..BenchConfig::default()
            }
            .with_strategy(ProvisioningStrategy::PerThreadHugePage);
            assert!(config.validate(TileShape::REFERENCE).is_err(), "ratio {}", ratio);
        }
    }

    #[test]
    fn test_l3_does_not_fit_small_b_half() {
        let config = BenchConfig {
            b_offset_ratio: 0.95,
            ..BenchConfig::default()
        }
        .with_tier(CacheTier::L3)
        .with_strategy(ProvisioningStrategy::PerThreadHugePage);
        assert!(config.validate(TileShape::REFERENCE).is_err());
    }

    #[test]
    fn test_overlapping_fixed_addresses_rejected() {
        let config = BenchConfig {
            fixed_addresses: (0x4000_0000_0000, 0x4000_0020_0000),
            ..BenchConfig::default()
        }
        .with_strategy(ProvisioningStrategy::FixedHugePage);
        assert!(config.validate(TileShape::REFERENCE).is_err());
    }

    #[test]
    fn test_too_few_loops_rejected() {
        let config = BenchConfig {
            total_loops: 100,
            ..BenchConfig::default()
        }
        .with_tier(CacheTier::L3);
        assert!(config.validate(TileShape::REFERENCE).is_err());
    }
}
