//! Core context: the one place that owns shared state.
//!
//! The registry, the aggregator, the asset registry, and the process-wide
//! counters are constructed here once at startup and handed around as
//! references, never as hidden singletons.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use alloy::primitives::{Address, U256};
use anyhow::Result;
use parking_lot::RwLock;
use smallvec::SmallVec;
use tracing::info;

use vigil_api::{Notifier, SwapQuoter};
use vigil_chain::ChainClient;

use crate::assets::AssetRegistry;
use crate::config::Config;
use crate::prices::PriceAggregator;
use crate::registry::BorrowerRegistry;
use crate::state::{Bands, BorrowerState};

/// A discovered borrower handed over by the seed scan.
#[derive(Debug, Clone)]
pub struct SeedBorrower {
    pub address: Address,
    pub collateral: Vec<(Address, U256)>,
    pub debt: Vec<(Address, U256)>,
}

/// Holds one unit of the global execution budget; dropping it returns the
/// unit on every exit path.
pub struct ExecutionSlot {
    counter: Arc<AtomicUsize>,
}

impl Drop for ExecutionSlot {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::SeqCst);
    }
}

pub struct CoreContext {
    config: RwLock<Arc<Config>>,
    pub registry: BorrowerRegistry,
    pub prices: Arc<PriceAggregator>,
    pub assets: AssetRegistry,
    pub chain: Arc<dyn ChainClient>,
    pub quoter: Arc<dyn SwapQuoter>,
    pub notifier: Arc<dyn Notifier>,
    active_executions: Arc<AtomicUsize>,
}

impl CoreContext {
    pub fn new(
        config: Config,
        chain: Arc<dyn ChainClient>,
        quoter: Arc<dyn SwapQuoter>,
        notifier: Arc<dyn Notifier>,
    ) -> Result<Arc<Self>> {
        config.validate()?;

        let assets = AssetRegistry::new(
            config.asset_infos()?,
            config.collateral_asset_addresses()?,
            config.debt_asset_addresses()?,
            config.known_decimals(),
        );

        let prices = PriceAggregator::new(
            !config.binance_symbols.is_empty(),
            !config.pyth_feed_ids.is_empty(),
            config.price_stale(),
            config.price_debounce(),
        );

        Ok(Arc::new(Self {
            config: RwLock::new(Arc::new(config)),
            registry: BorrowerRegistry::new(),
            prices,
            assets,
            chain,
            quoter,
            notifier,
            active_executions: Arc::new(AtomicUsize::new(0)),
        }))
    }

    /// Current configuration snapshot.
    pub fn config(&self) -> Arc<Config> {
        self.config.read().clone()
    }

    pub fn bands(&self) -> Bands {
        self.config.read().bands()
    }

    /// Hot-reload the mutable subset of the configuration.
    pub fn reload(&self, next: Config) -> Result<()> {
        let current = self.config();
        next.validate_reload(&current)?;

        self.prices
            .set_timing(next.price_stale(), next.price_debounce());
        *self.config.write() = Arc::new(next);
        info!("configuration reloaded");
        Ok(())
    }

    /// Number of in-flight executions.
    pub fn active_executions(&self) -> usize {
        self.active_executions.load(Ordering::SeqCst)
    }

    /// Whether the execution budget has room. A cheap pre-check; the slot
    /// acquisition at dispatch is the authoritative one.
    pub fn has_execution_capacity(&self) -> bool {
        self.active_executions() < self.config().max_concurrent_tx
    }

    /// Claim one execution unit, or None when the budget is exhausted.
    pub fn try_begin_execution(&self) -> Option<ExecutionSlot> {
        let max = self.config().max_concurrent_tx;
        let mut current = self.active_executions.load(Ordering::SeqCst);
        loop {
            if current >= max {
                return None;
            }
            match self.active_executions.compare_exchange(
                current,
                current + 1,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => {
                    return Some(ExecutionSlot {
                        counter: Arc::clone(&self.active_executions),
                    })
                }
                Err(observed) => current = observed,
            }
        }
    }

    /// One-time bootstrap of discovered borrowers. Inserted SAFE and
    /// unhydrated; the first authoritative chain event hydrates them.
    pub fn seed(&self, borrowers: Vec<SeedBorrower>) {
        let mut inserted = 0usize;
        for seed in borrowers {
            if self.registry.upsert(seed.address, BorrowerState::Safe, false) {
                inserted += 1;
            }
            self.registry.with_mut(&seed.address, |b| {
                let collateral: SmallVec<[(Address, U256); 4]> = seed
                    .collateral
                    .iter()
                    .filter(|(_, amount)| !amount.is_zero())
                    .copied()
                    .collect();
                let debt: SmallVec<[(Address, U256); 4]> = seed
                    .debt
                    .iter()
                    .filter(|(_, amount)| !amount.is_zero())
                    .copied()
                    .collect();
                b.set_balances(collateral, debt);
            });
        }
        info!(inserted, "seed scan applied");
    }
}
