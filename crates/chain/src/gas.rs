//! EIP-1559 fee tracking.
//!
//! The block loop refreshes the cached base/priority fee once per tick;
//! everything else reads the cache. max_fee = base * multiplier + priority,
//! capped.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::client::FeeData;

/// Default priority fee: 1 gwei.
const DEFAULT_PRIORITY_FEE: u64 = 1_000_000_000;
/// Default base fee assumed before the first refresh: 30 gwei.
const DEFAULT_BASE_FEE: u64 = 30_000_000_000;
/// Hard cap on max_fee_per_gas: 500 gwei.
const MAX_FEE_CAP: u128 = 500_000_000_000;

/// Cached EIP-1559 fee state.
#[derive(Debug)]
pub struct FeeTracker {
    max_fee_multiplier: f64,
    cached_base_fee: AtomicU64,
    cached_priority_fee: AtomicU64,
}

impl FeeTracker {
    pub fn new(max_fee_multiplier: f64) -> Self {
        Self {
            max_fee_multiplier,
            cached_base_fee: AtomicU64::new(DEFAULT_BASE_FEE),
            cached_priority_fee: AtomicU64::new(DEFAULT_PRIORITY_FEE),
        }
    }

    /// Record freshly observed fees.
    pub fn update(&self, base_fee: u128, priority_fee: u128) {
        self.cached_base_fee
            .store(base_fee.min(u64::MAX as u128) as u64, Ordering::Relaxed);
        self.cached_priority_fee
            .store(priority_fee.min(u64::MAX as u128) as u64, Ordering::Relaxed);
    }

    /// Current fee view from the cache.
    pub fn fee_data(&self) -> FeeData {
        let base = self.cached_base_fee.load(Ordering::Relaxed) as u128;
        let priority = self.cached_priority_fee.load(Ordering::Relaxed) as u128;
        let max_fee = (((base as f64) * self.max_fee_multiplier) as u128 + priority).min(MAX_FEE_CAP);

        FeeData {
            base_fee_per_gas: base,
            max_fee_per_gas: max_fee,
            max_priority_fee_per_gas: priority,
        }
    }
}

impl Default for FeeTracker {
    fn default() -> Self {
        Self::new(2.0)
    }
}
