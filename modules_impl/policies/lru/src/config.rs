//! # Reclaim Configuration
//!
//! Tunables of the LRU policy and its background reclaimer.

use core::time::Duration;

use dime_modules::{DimeError, DimeResult};

/// Default background reclaimer period
pub const DEFAULT_KSWAPD_SLEEP_MS: u32 = 1;

/// Default cap on the free pool target
pub const DEFAULT_FREE_LIST_MAX_SIZE: usize = 4000;

/// Default share of local memory kept in the free pool
pub const DEFAULT_MIN_FREE_PERCENT: usize = 25;

/// Default number of full tier-chain passes before giving up on a fault
pub const DEFAULT_MAX_VICTIM_RETRIES: u32 = 1 << 20;

/// LRU policy configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReclaimConfig {
    /// Sleep between background reclaim cycles
    pub kswapd_sleep_ms: u32,
    /// Upper bound on the free pool target
    pub free_list_max_size: usize,
    /// Free pool target as a percentage of the local budget
    pub min_free_percent: usize,
    /// Tier-chain passes before a fault fails with `VictimExhausted`
    pub max_victim_retries: u32,
}

impl Default for ReclaimConfig {
    fn default() -> Self {
        Self {
            kswapd_sleep_ms: DEFAULT_KSWAPD_SLEEP_MS,
            free_list_max_size: DEFAULT_FREE_LIST_MAX_SIZE,
            min_free_percent: DEFAULT_MIN_FREE_PERCENT,
            max_victim_retries: DEFAULT_MAX_VICTIM_RETRIES,
        }
    }
}

impl ReclaimConfig {
    /// Set the reclaimer period
    pub fn with_kswapd_sleep_ms(mut self, ms: u32) -> Self {
        self.kswapd_sleep_ms = ms;
        self
    }

    /// Set the free pool cap
    pub fn with_free_list_max_size(mut self, pages: usize) -> Self {
        self.free_list_max_size = pages;
        self
    }

    /// Set the free pool percentage
    pub fn with_min_free_percent(mut self, percent: usize) -> Self {
        self.min_free_percent = percent;
        self
    }

    /// Set the fault-path retry cap
    pub fn with_max_victim_retries(mut self, passes: u32) -> Self {
        self.max_victim_retries = passes;
        self
    }

    /// Check every value is in range
    pub fn validate(&self) -> DimeResult<()> {
        if self.kswapd_sleep_ms == 0 {
            return Err(DimeError::InvalidConfig("kswapd_sleep_ms must be non-zero"));
        }
        if self.min_free_percent > 100 {
            return Err(DimeError::InvalidConfig("min_free_percent above 100"));
        }
        if self.max_victim_retries == 0 {
            return Err(DimeError::InvalidConfig("max_victim_retries must be non-zero"));
        }
        Ok(())
    }

    /// Reclaimer period
    #[inline]
    pub fn kswapd_interval(&self) -> Duration {
        Duration::from_millis(u64::from(self.kswapd_sleep_ms))
    }

    /// Free pool target for an instance budget
    #[inline]
    pub fn required_free(&self, local_npages: usize) -> usize {
        let by_share = self.min_free_percent.saturating_mul(local_npages) / 100;
        by_share.min(self.free_list_max_size)
    }
}
