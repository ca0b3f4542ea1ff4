//! Prepare/execute pipeline.
//!
//! `prepare` builds and simulates the exact transaction that would be
//! broadcast, then caches it on the borrower. `execute` runs the gate
//! ladder and dispatches. Gate ordering is load-bearing: cheap predicates
//! come before RPC calls, and the on-chain oracle HF is the final authority
//! before dispatch. Both operations run under the borrower's advisory lock
//! and release it on every exit path.

use alloy::primitives::{Address, B256, U256};
use tracing::{debug, info, warn};

use vigil_api::QuoteRequest;
use vigil_chain::{encode_flash_execute, encode_liquidation_call, PreparedCall};

use crate::borrower::{CachedTx, SkipReason, TxMode};
use crate::context::CoreContext;
use crate::hf;
use crate::math::u256_to_f64;
use crate::state::BorrowerState;
use std::sync::Arc;

/// How a prepare/execute attempt resolved. The caller logs and moves on;
/// only `Fatal` escalates.
#[derive(Debug)]
pub enum Outcome<T> {
    Done(T),
    Skip(SkipReason),
    Transient(anyhow::Error),
    Fatal(anyhow::Error),
}

impl<T> Outcome<T> {
    pub fn is_done(&self) -> bool {
        matches!(self, Self::Done(_))
    }

    pub fn skip_reason(&self) -> Option<SkipReason> {
        match self {
            Self::Skip(reason) => Some(*reason),
            _ => None,
        }
    }
}

/// Early-return helper for the transient arm.
macro_rules! try_rpc {
    ($expr:expr) => {
        match $expr {
            Ok(value) => value,
            Err(e) => return Outcome::Transient(e),
        }
    };
}

pub struct Pipeline {
    ctx: Arc<CoreContext>,
}

impl Pipeline {
    pub fn new(ctx: Arc<CoreContext>) -> Self {
        Self { ctx }
    }

    pub fn context(&self) -> &Arc<CoreContext> {
        &self.ctx
    }

    /// Recompute the predicted HF for one hydrated borrower and reclassify.
    /// Returns the transition when the band changed.
    pub fn recompute(&self, address: &Address) -> Option<(BorrowerState, BorrowerState)> {
        let borrower = self.ctx.registry.get(address)?;
        if !borrower.hydrated {
            debug!(borrower = %address, "recompute skipped, not hydrated");
            return None;
        }

        let predicted = hf::predicted_health_factor(&borrower, &self.ctx.prices, &self.ctx.assets);
        self.ctx
            .registry
            .update_hf(address, predicted, None, &self.ctx.bands())
    }

    /// Build, simulate, and cache the liquidation transaction for a
    /// critical borrower.
    pub async fn prepare(&self, address: Address) -> Outcome<()> {
        let Some(borrower) = self.ctx.registry.get(&address) else {
            return Outcome::Skip(SkipReason::NotInWatchSet);
        };
        if borrower.state != BorrowerState::Critical || !borrower.hydrated {
            return Outcome::Skip(SkipReason::WrongState);
        }

        let config = self.ctx.config();
        let oracle_debt = try_rpc!(
            hf::oracle_total_debt_usd(&borrower, self.ctx.chain.as_ref(), &self.ctx.assets).await
        );
        if oracle_debt < config.min_debt_usd {
            return self.record_skip(&address, SkipReason::BelowMinDebt);
        }

        // Non-blocking: a duplicate schedule finds the lock held and leaves.
        let Some(_guard) = self.ctx.registry.try_lock(address) else {
            return Outcome::Skip(SkipReason::LockHeld);
        };

        self.prepare_gates(address).await
    }

    /// The locked portion of prepare. The caller holds the advisory lock
    /// and has vetted the borrower's band.
    async fn prepare_gates(&self, address: Address) -> Outcome<()> {
        let config = self.ctx.config();
        let Some(borrower) = self.ctx.registry.get(&address) else {
            return Outcome::Skip(SkipReason::NotInWatchSet);
        };

        // Stale or silent feeds abort preparation without a failure record.
        if self.ctx.prices.is_stale() || self.ctx.prices.all_disconnected() {
            warn!(borrower = %address, "prepare aborted, price feeds stale or absent");
            return Outcome::Skip(SkipReason::StalePrices);
        }

        let Some(estimate) = hf::best_liquidation(
            &borrower,
            &self.ctx.prices,
            &self.ctx.assets,
            config.liquidation_bonus_bps,
        ) else {
            debug!(borrower = %address, "no viable liquidation pair");
            return Outcome::Skip(SkipReason::NoViablePair);
        };

        // Build the exact payload that would later be broadcast.
        let (to, calldata, mode) = if config.flash_mode() {
            let flash = match config.flash_liquidator() {
                Ok(addr) => addr,
                Err(e) => return Outcome::Fatal(e.into()),
            };
            let quote = try_rpc!(self
                .ctx
                .quoter
                .quote(QuoteRequest {
                    sell_asset: estimate.collateral_asset,
                    buy_asset: estimate.debt_asset,
                    amount_in: estimate.required_collateral,
                    recipient: flash,
                })
                .await
                .map_err(anyhow::Error::from));

            let calldata = encode_flash_execute(
                address,
                estimate.debt_asset,
                estimate.collateral_asset,
                estimate.debt_amount,
                quote.payload.clone(),
            );
            (
                flash,
                calldata,
                TxMode::Flash {
                    swap_payload: quote.payload,
                    min_out: quote.min_out,
                },
            )
        } else {
            let pool = match config.pool() {
                Ok(addr) => addr,
                Err(e) => return Outcome::Fatal(e.into()),
            };
            let calldata = encode_liquidation_call(
                estimate.collateral_asset,
                estimate.debt_asset,
                address,
                estimate.debt_amount,
                false,
            );
            (pool, calldata, TxMode::Direct)
        };

        let call = PreparedCall::new(to, calldata);

        if let Err(e) = self.ctx.chain.static_call(&call).await {
            warn!(borrower = %address, error = %e, "simulation rejected");
            return self.record_skip(&address, SkipReason::SimulationFailed);
        }

        let gas = try_rpc!(self.ctx.chain.estimate_gas(&call).await);
        let fees = try_rpc!(self.ctx.chain.fee_data().await);
        let gas_cost_usd = try_rpc!(self.gas_cost_usd(fees.cost_wei(gas)).await);
        if gas_cost_usd > config.max_gas_usd {
            return self.record_skip(&address, SkipReason::GasGuard);
        }

        if estimate.profit_usd < config.min_profit_usd {
            return self.record_skip(&address, SkipReason::ProfitFloor);
        }

        let prepared_block = try_rpc!(self.ctx.chain.block_number().await);

        let cached = CachedTx {
            to: call.to,
            calldata: call.data,
            value: U256::ZERO,
            gas_limit: gas,
            max_fee_per_gas: fees.max_fee_per_gas,
            max_priority_fee_per_gas: fees.max_priority_fee_per_gas,
            expected_profit_usd: estimate.profit_usd,
            gas_cost_usd,
            prepared_at: chrono::Utc::now(),
            mode,
        };

        let stored = self
            .ctx
            .registry
            .with_mut(&address, |b| {
                // A concurrent recompute may have relaxed the band; a cached
                // tx only rides on critical or liquidatable borrowers.
                if matches!(
                    b.state,
                    BorrowerState::Critical | BorrowerState::Liquidatable
                ) {
                    b.cached_tx = Some(cached);
                    b.prepared_block = Some(prepared_block);
                    true
                } else {
                    false
                }
            })
            .unwrap_or(false);

        if !stored {
            debug!(borrower = %address, "prepared tx discarded, borrower recovered");
            return Outcome::Skip(SkipReason::WrongState);
        }

        info!(
            borrower = %address,
            debt = %estimate.debt_asset,
            collateral = %estimate.collateral_asset,
            profit_usd = estimate.profit_usd,
            gas_usd = gas_cost_usd,
            block = prepared_block,
            "liquidation prepared"
        );
        Outcome::Done(())
    }

    /// Run the execute gate ladder and dispatch the cached transaction.
    pub async fn execute(&self, address: Address) -> Outcome<Option<B256>> {
        let Some(borrower) = self.ctx.registry.get(&address) else {
            return Outcome::Skip(SkipReason::NotInWatchSet);
        };
        if borrower.state != BorrowerState::Liquidatable || !borrower.hydrated {
            return Outcome::Skip(SkipReason::WrongState);
        }

        let Some(_guard) = self.ctx.registry.try_lock(address) else {
            return Outcome::Skip(SkipReason::LockHeld);
        };

        // Fresh snapshot now that the lock is held.
        let Some(borrower) = self.ctx.registry.get(&address) else {
            return Outcome::Skip(SkipReason::NotInWatchSet);
        };
        let config = self.ctx.config();

        // 1. Below the protocol floor, not worth the gas anywhere.
        let oracle_debt = try_rpc!(
            hf::oracle_total_debt_usd(&borrower, self.ctx.chain.as_ref(), &self.ctx.assets).await
        );
        if oracle_debt < config.min_debt_usd {
            return self.record_skip(&address, SkipReason::BelowMinDebt);
        }

        // 2. Fail-closed policy gate: one live source suffices, silence
        //    forbids.
        if !self.ctx.prices.can_execute() {
            return self.record_skip(&address, SkipReason::PriceFeedPolicy);
        }

        // 3. Staleness warn-signal.
        if self.ctx.prices.is_stale() {
            warn!(borrower = %address, "execute aborted, stale price source");
            return Outcome::Skip(SkipReason::StalePrices);
        }

        // 4. Global concurrency budget.
        if !self.ctx.has_execution_capacity() {
            debug!(borrower = %address, "execute deferred, budget exhausted");
            return Outcome::Skip(SkipReason::Deferred);
        }

        // 5./6. Cache presence and TTL; rebuild under the held lock.
        let current_block = try_rpc!(self.ctx.chain.block_number().await);
        if borrower.cached_tx.is_none() {
            let prepared = self.prepare_gates(address).await;
            debug!(borrower = %address, done = prepared.is_done(), "prepared from execute path");
            return Outcome::Skip(SkipReason::Deferred);
        }
        if self
            .ctx
            .registry
            .is_cache_stale(&address, current_block, config.tx_cache_ttl_blocks)
        {
            self.ctx.registry.invalidate_cache(&address, "ttl_expired");
            let prepared = self.prepare_gates(address).await;
            debug!(borrower = %address, done = prepared.is_done(), "re-prepared after ttl expiry");
            return Outcome::Skip(SkipReason::Deferred);
        }

        // 7. The on-chain oracle has the last word.
        let account = try_rpc!(self.ctx.chain.user_account_data(address).await);
        let oracle_hf = account.health_factor_f64();
        self.ctx
            .registry
            .with_mut(&address, |b| b.oracle_hf = oracle_hf);
        if oracle_hf >= 1.0 || oracle_hf > config.hf_liquidatable {
            return self.record_skip(&address, SkipReason::OracleNotLiquidatable);
        }

        let Some(cached) = self.ctx.registry.get(&address).and_then(|b| b.cached_tx) else {
            return Outcome::Skip(SkipReason::Deferred);
        };

        // 8./9. Economics re-checked against the cached artifact.
        let net_profit = cached.expected_profit_usd - cached.gas_cost_usd;
        if net_profit < config.min_profit_usd
            || cached.expected_profit_usd < config.min_profit_usd
        {
            return self.record_skip(&address, SkipReason::ProfitFloor);
        }
        if cached.gas_cost_usd > config.max_gas_usd {
            return self.record_skip(&address, SkipReason::GasGuard);
        }

        // 10. Kill switches.
        if !config.enable_execution || config.dry_run {
            info!(
                borrower = %address,
                profit_usd = cached.expected_profit_usd,
                gas_usd = cached.gas_cost_usd,
                net_usd = net_profit,
                mode = dry_mode(&cached.mode),
                "dry run, liquidation not dispatched"
            );
            return Outcome::Done(None);
        }

        // 11. Claim a slot, dispatch, confirm. The slot returns to the
        //     budget when dropped, success or failure.
        let Some(_slot) = self.ctx.try_begin_execution() else {
            return Outcome::Skip(SkipReason::Deferred);
        };

        let fees = try_rpc!(self.ctx.chain.fee_data().await);
        let call = PreparedCall {
            to: cached.to,
            data: cached.calldata.clone(),
            value: cached.value,
            gas_limit: Some(cached.gas_limit),
        };

        self.ctx
            .registry
            .with_mut(&address, |b| b.last_execution_attempt_at = Some(chrono::Utc::now()));

        let tx_hash = match self.ctx.chain.send(&call, &fees).await {
            Ok(hash) => hash,
            Err(e) => {
                // Broadcast failure leaves the cached tx alone: the TTL or
                // the next price update clears it.
                warn!(borrower = %address, error = %e, "broadcast failed");
                return Outcome::Transient(e);
            }
        };

        info!(
            borrower = %address,
            tx = %tx_hash,
            profit_usd = cached.expected_profit_usd,
            gas_usd = cached.gas_cost_usd,
            net_usd = net_profit,
            "liquidation dispatched"
        );

        match self
            .ctx
            .chain
            .wait_confirmation(tx_hash, config.tx_timeout())
            .await
        {
            Ok(true) => {
                info!(borrower = %address, tx = %tx_hash, "liquidation confirmed");
                Outcome::Done(Some(tx_hash))
            }
            Ok(false) => {
                warn!(borrower = %address, tx = %tx_hash, "liquidation reverted on-chain");
                Outcome::Done(Some(tx_hash))
            }
            Err(e) => {
                warn!(borrower = %address, tx = %tx_hash, error = %e, "receipt wait failed");
                Outcome::Transient(e)
            }
        }
    }

    /// Worst-case gas cost in USD via the chain-native asset price. The
    /// aggregator's price is preferred; the protocol oracle is the
    /// fallback.
    async fn gas_cost_usd(&self, cost_wei: U256) -> anyhow::Result<f64> {
        let native = self
            .ctx
            .assets
            .native_asset()
            .ok_or_else(|| anyhow::anyhow!("no native asset configured"))?;

        let native_usd = match self.ctx.prices.price_usd(&native) {
            Some(usd) => usd,
            None => {
                let fixed = self.ctx.chain.oracle_price(native).await?;
                u256_to_f64(fixed) / 1e8
            }
        };

        Ok(u256_to_f64(cost_wei) / 1e18 * native_usd)
    }

    fn record_skip<T>(&self, address: &Address, reason: SkipReason) -> Outcome<T> {
        self.ctx
            .registry
            .with_mut(address, |b| b.last_skip_reason = Some(reason));
        warn!(borrower = %address, reason = %reason, "attempt skipped");
        Outcome::Skip(reason)
    }
}

fn dry_mode(mode: &TxMode) -> &'static str {
    match mode {
        TxMode::Direct => "direct",
        TxMode::Flash { .. } => "flash",
    }
}
