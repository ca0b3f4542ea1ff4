//! Borrower record and the prepared-transaction artifact that rides on it.

use std::collections::VecDeque;

use alloy::primitives::{Address, Bytes, U256};
use chrono::{DateTime, Utc};
use smallvec::SmallVec;

use crate::state::BorrowerState;

/// Bound on the per-borrower transition history.
pub const MAX_HISTORY: usize = 100;

/// Why a prepare/execute attempt did not reach dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    NotInWatchSet,
    BelowMinDebt,
    Raced,
    OracleNotLiquidatable,
    ProfitFloor,
    GasGuard,
    SimulationFailed,
    PriceFeedPolicy,
    StalePrices,
    Deferred,
    WrongState,
    LockHeld,
    NoViablePair,
    Unknown,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotInWatchSet => "not_in_watch_set",
            Self::BelowMinDebt => "below_min_debt",
            Self::Raced => "raced",
            Self::OracleNotLiquidatable => "oracle_not_liquidatable",
            Self::ProfitFloor => "profit_floor",
            Self::GasGuard => "gas_guard",
            Self::SimulationFailed => "simulation_failed",
            Self::PriceFeedPolicy => "price_feed_policy",
            Self::StalePrices => "stale_prices",
            Self::Deferred => "deferred",
            Self::WrongState => "wrong_state",
            Self::LockHeld => "lock_held",
            Self::NoViablePair => "no_viable_pair",
            Self::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Execution mode baked into a prepared transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TxMode {
    /// Direct `Pool.liquidationCall` from our own balance.
    Direct,
    /// Flash-loan host call carrying the pre-quoted swap leg.
    Flash {
        swap_payload: Bytes,
        min_out: U256,
    },
}

/// A fully built liquidation call, ready to simulate again or broadcast.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedTx {
    pub to: Address,
    pub calldata: Bytes,
    pub value: U256,
    pub gas_limit: u64,
    pub max_fee_per_gas: u128,
    pub max_priority_fee_per_gas: u128,
    /// Liquidation bonus value, before gas.
    pub expected_profit_usd: f64,
    pub gas_cost_usd: f64,
    pub prepared_at: DateTime<Utc>,
    pub mode: TxMode,
}

/// One recorded state transition.
#[derive(Debug, Clone, Copy)]
pub struct StateTransition {
    pub state: BorrowerState,
    pub at: DateTime<Utc>,
    pub hf: f64,
}

/// The tracked borrower. Mutated only through the registry.
#[derive(Debug, Clone)]
pub struct Borrower {
    pub address: Address,
    pub state: BorrowerState,
    /// At most one entry per asset; zero balances are omitted.
    pub collateral: SmallVec<[(Address, U256); 4]>,
    pub debt: SmallVec<[(Address, U256); 4]>,
    /// Off-chain predicted health factor; +inf while debt is zero.
    pub predicted_hf: f64,
    /// Last on-chain oracle health factor, when fetched.
    pub oracle_hf: f64,
    /// False until the first authoritative balance refresh. Monotonic.
    pub hydrated: bool,
    pub history: VecDeque<StateTransition>,
    pub cached_tx: Option<CachedTx>,
    /// Block height the cached transaction was built at.
    pub prepared_block: Option<u64>,
    pub last_skip_reason: Option<SkipReason>,
    pub last_execution_attempt_at: Option<DateTime<Utc>>,
    pub first_seen_at: DateTime<Utc>,
    pub last_updated_at: DateTime<Utc>,
    pub last_event_at: Option<DateTime<Utc>>,
}

impl Borrower {
    pub fn new(address: Address, state: BorrowerState, hydrated: bool) -> Self {
        let now = Utc::now();
        let mut history = VecDeque::with_capacity(8);
        history.push_back(StateTransition {
            state,
            at: now,
            hf: f64::INFINITY,
        });

        Self {
            address,
            state,
            collateral: SmallVec::new(),
            debt: SmallVec::new(),
            predicted_hf: f64::INFINITY,
            oracle_hf: f64::INFINITY,
            hydrated,
            history,
            cached_tx: None,
            prepared_block: None,
            last_skip_reason: None,
            last_execution_attempt_at: None,
            first_seen_at: now,
            last_updated_at: now,
            last_event_at: None,
        }
    }

    pub fn collateral_balance(&self, asset: &Address) -> Option<U256> {
        self.collateral
            .iter()
            .find(|(a, _)| a == asset)
            .map(|(_, amount)| *amount)
    }

    pub fn debt_balance(&self, asset: &Address) -> Option<U256> {
        self.debt
            .iter()
            .find(|(a, _)| a == asset)
            .map(|(_, amount)| *amount)
    }

    /// Replace both balance sheets. Zero entries are dropped by the caller.
    pub fn set_balances(
        &mut self,
        collateral: SmallVec<[(Address, U256); 4]>,
        debt: SmallVec<[(Address, U256); 4]>,
    ) {
        self.collateral = collateral;
        self.debt = debt;
        self.last_updated_at = Utc::now();
    }

    pub fn has_zero_debt(&self) -> bool {
        self.debt.iter().all(|(_, amount)| amount.is_zero())
    }

    /// Whether a price change on `asset` affects this borrower.
    pub fn holds_asset(&self, asset: &Address) -> bool {
        self.collateral.iter().any(|(a, _)| a == asset)
            || self.debt.iter().any(|(a, _)| a == asset)
    }

    /// Append a transition, evicting the oldest past the bound.
    pub fn record_transition(&mut self, state: BorrowerState, hf: f64) {
        self.history.push_back(StateTransition {
            state,
            at: Utc::now(),
            hf,
        });
        while self.history.len() > MAX_HISTORY {
            self.history.pop_front();
        }
    }

    /// Drop the prepared transaction and everything derived from it.
    pub fn clear_cached_tx(&mut self) {
        self.cached_tx = None;
        self.prepared_block = None;
    }
}
