//! Core coordination engine for the liquidation agent.
//!
//! This crate provides:
//! - The borrower registry with per-borrower advisory locks
//! - Health-factor band classification and the transition log
//! - The off-chain HF engine and liquidation profit estimation
//! - The multi-source price aggregator with debounce and the policy gate
//! - The pool-event router and recompute fan-out
//! - The prepare/execute pipeline with cached transactions
//! - The periodic block loop

mod assets;
mod block_loop;
mod borrower;
pub mod config;
mod context;
mod hf;
pub mod math;
mod pipeline;
mod prices;
mod registry;
mod router;
mod state;

#[cfg(test)]
pub(crate) mod testutil;

pub use assets::{AssetInfo, AssetRegistry, DEFAULT_LIQUIDATION_THRESHOLD};
pub use block_loop::BlockLoop;
pub use borrower::{Borrower, CachedTx, SkipReason, StateTransition, TxMode, MAX_HISTORY};
pub use config::{Config, ConfigError};
pub use context::{CoreContext, ExecutionSlot, SeedBorrower};
pub use hf::{
    best_liquidation, estimate_liquidation, oracle_total_debt_usd, predicted_health_factor,
    LiquidationEstimate,
};
pub use pipeline::{Outcome, Pipeline};
pub use prices::{Price, PriceAggregator};
pub use registry::{BorrowerLock, BorrowerRegistry, RegistryStats};
pub use router::{EventRouter, MissReason};
pub use state::{classify, Bands, BorrowerState};
