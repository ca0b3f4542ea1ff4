//! Event router: pool events in, registry updates and recompute fan-out.
//!
//! On-chain events are the authoritative source of balance changes. Every
//! handled event refreshes the touched borrower's balances from the
//! interest-bearing and variable-debt tokens, hydrates the record, and
//! notifies the fan-out. Price notifications from the aggregator join the
//! same fan-out: invalidate armed caches on the touched asset, then
//! recompute the affected borrowers.

use std::sync::Arc;

use alloy::primitives::{Address, U256};
use anyhow::{Context, Result};
use smallvec::SmallVec;
use tokio::sync::{broadcast, watch};
use tracing::{debug, info, warn};

use vigil_chain::PoolEvent;

use crate::borrower::{Borrower, SkipReason};
use crate::context::CoreContext;
use crate::pipeline::{Outcome, Pipeline};
use crate::state::BorrowerState;

/// Audit classification for a liquidation we observed but did not win.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MissReason {
    NotInWatchSet,
    BelowMinDebt,
    Raced,
    OracleNotLiquidatable,
    FilteredByProfit,
    FilteredByGas,
    Unknown,
}

impl MissReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotInWatchSet => "not_in_watch_set",
            Self::BelowMinDebt => "below_min_debt",
            Self::Raced => "raced",
            Self::OracleNotLiquidatable => "oracle_not_liquidatable",
            Self::FilteredByProfit => "filtered_by_profit",
            Self::FilteredByGas => "filtered_by_gas",
            Self::Unknown => "unknown",
        }
    }

    fn from_record(borrower: &Borrower) -> Self {
        match borrower.last_skip_reason {
            Some(SkipReason::ProfitFloor) => Self::FilteredByProfit,
            Some(SkipReason::GasGuard) => Self::FilteredByGas,
            Some(SkipReason::BelowMinDebt) => Self::BelowMinDebt,
            Some(SkipReason::OracleNotLiquidatable) => Self::OracleNotLiquidatable,
            _ => match borrower.state {
                BorrowerState::Critical | BorrowerState::Liquidatable => Self::Raced,
                _ => Self::Unknown,
            },
        }
    }
}

pub struct EventRouter {
    ctx: Arc<CoreContext>,
    pipeline: Arc<Pipeline>,
    borrower_tx: broadcast::Sender<Address>,
}

impl EventRouter {
    pub fn new(ctx: Arc<CoreContext>, pipeline: Arc<Pipeline>) -> Arc<Self> {
        let (borrower_tx, _) = broadcast::channel(4_096);
        Arc::new(Self {
            ctx,
            pipeline,
            borrower_tx,
        })
    }

    /// Borrower-updated notifications, one per successfully handled event.
    pub fn subscribe_borrower_updates(&self) -> broadcast::Receiver<Address> {
        self.borrower_tx.subscribe()
    }

    /// Process one pool event to completion. Never fatal: RPC failures are
    /// logged and retried on the next trigger.
    pub async fn handle_event(&self, event: PoolEvent) {
        let address = event.borrower();
        debug!(borrower = %address, kind = event.kind(), block = event.block_number(), "pool event");

        if let PoolEvent::LiquidationCall { .. } = event {
            self.handle_liquidation_call(&event).await;
            return;
        }

        // Repay only acts on borrowers we already track.
        if matches!(event, PoolEvent::Repay { .. }) && !self.ctx.registry.contains(&address) {
            debug!(borrower = %address, "repay for untracked borrower ignored");
            return;
        }

        let was_new = self
            .ctx
            .registry
            .upsert(address, BorrowerState::Safe, false);

        if let Err(e) = self.refresh_balances(address).await {
            // Transient: the borrower stays, unhydrated if it was new.
            warn!(borrower = %address, error = %e, "balance refresh failed");
            return;
        }
        self.ctx.registry.mark_hydrated(&address);
        self.ctx
            .registry
            .with_mut(&address, |b| b.last_event_at = Some(chrono::Utc::now()));

        // Newly observed borrowers below the debt floor are not worth
        // tracking. A failed oracle read keeps them: transient failures
        // must never remove.
        if was_new && !matches!(event, PoolEvent::Repay { .. }) {
            if let Some(borrower) = self.ctx.registry.get(&address) {
                match crate::hf::oracle_total_debt_usd(
                    &borrower,
                    self.ctx.chain.as_ref(),
                    &self.ctx.assets,
                )
                .await
                {
                    Ok(debt_usd) if debt_usd < self.ctx.config().min_debt_usd => {
                        debug!(borrower = %address, debt_usd, "new borrower below debt floor, dropped");
                        self.ctx.registry.remove(&address);
                        return;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!(borrower = %address, error = %e, "debt floor check failed, keeping borrower");
                    }
                }
            }
        }

        let _ = self.borrower_tx.send(address);
    }

    /// LiquidationCall is authoritative: someone settled (part of) the
    /// position. Refresh, classify the miss, and drop the record when the
    /// debt is gone.
    async fn handle_liquidation_call(&self, event: &PoolEvent) {
        let address = event.borrower();

        let Some(before) = self.ctx.registry.get(&address) else {
            self.emit_audit(event, MissReason::NotInWatchSet);
            return;
        };

        let classification = MissReason::from_record(&before);
        self.emit_audit(event, classification);

        if let Err(e) = self.refresh_balances(address).await {
            warn!(borrower = %address, error = %e, "post-liquidation refresh failed");
            return;
        }
        self.ctx.registry.mark_hydrated(&address);
        self.ctx
            .registry
            .with_mut(&address, |b| b.last_event_at = Some(chrono::Utc::now()));

        let closed = self
            .ctx
            .registry
            .get(&address)
            .map(|b| b.has_zero_debt())
            .unwrap_or(false);

        if closed {
            info!(borrower = %address, reason = classification.as_str(), "position closed by competing liquidation");
            self.ctx.registry.remove(&address);
        } else {
            let _ = self.borrower_tx.send(address);
        }
    }

    /// Read every configured aToken and variable-debt-token balance for the
    /// borrower. Zero balances are omitted; any read failure aborts the
    /// whole refresh so the record never holds a half-written sheet.
    async fn refresh_balances(&self, address: Address) -> Result<()> {
        let mut collateral: SmallVec<[(Address, U256); 4]> = SmallVec::new();
        for asset in self.ctx.assets.collateral_assets() {
            let a_token = self
                .ctx
                .assets
                .a_token(asset)
                .context("collateral asset missing from registry")?;
            let balance = self.ctx.chain.token_balance(a_token, address).await?;
            if !balance.is_zero() {
                collateral.push((*asset, balance));
            }
        }

        let mut debt: SmallVec<[(Address, U256); 4]> = SmallVec::new();
        for asset in self.ctx.assets.debt_assets() {
            let vdebt = self
                .ctx
                .assets
                .variable_debt_token(asset)
                .context("debt asset missing from registry")?;
            let balance = self.ctx.chain.token_balance(vdebt, address).await?;
            if !balance.is_zero() {
                debt.push((*asset, balance));
            }
        }

        self.ctx
            .registry
            .with_mut(&address, |b| b.set_balances(collateral, debt));
        Ok(())
    }

    /// Best-effort audit emission; spawned so it can never block the event
    /// path.
    fn emit_audit(&self, event: &PoolEvent, classification: MissReason) {
        let PoolEvent::LiquidationCall {
            collateral_asset,
            debt_asset,
            user,
            debt_to_cover,
            liquidator,
            block_number,
            ..
        } = event
        else {
            return;
        };

        info!(
            borrower = %user,
            liquidator = %liquidator,
            classification = classification.as_str(),
            "liquidation observed"
        );

        let body = serde_json::json!({
            "borrower": user.to_string(),
            "liquidator": liquidator.to_string(),
            "collateral_asset": collateral_asset.to_string(),
            "debt_asset": debt_asset.to_string(),
            "debt_to_cover": debt_to_cover.to_string(),
            "classification": classification.as_str(),
            "block": block_number,
        });
        let notifier = self.ctx.notifier.clone();
        tokio::spawn(async move {
            notifier.notify("liquidation_observed", body).await;
        });
    }

    /// Recompute fan-out: consumes borrower-updated and debounced
    /// price-updated notifications until shutdown.
    pub async fn run_fanout(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut borrower_rx = self.borrower_tx.subscribe();
        let mut price_rx = self.ctx.prices.subscribe();

        loop {
            tokio::select! {
                _ = shutdown.changed() => return,
                received = borrower_rx.recv() => match received {
                    Ok(address) => self.recompute_and_schedule(address).await,
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        warn!(missed, "borrower fan-out lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => return,
                },
                received = price_rx.recv() => match received {
                    Ok(asset) => self.on_price_updated(asset).await,
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        warn!(missed, "price fan-out lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => return,
                },
            }
        }
    }

    /// A touched asset voids armed caches first, then drives recomputation
    /// for every hydrated borrower holding it.
    pub(crate) async fn on_price_updated(&self, asset: Address) {
        for borrower in self
            .ctx
            .registry
            .by_states(&[BorrowerState::Critical, BorrowerState::Liquidatable])
        {
            if borrower.holds_asset(&asset) && borrower.cached_tx.is_some() {
                self.ctx
                    .registry
                    .invalidate_cache(&borrower.address, "price_update");
            }
        }

        for borrower in self.ctx.registry.all() {
            if !borrower.hydrated || !borrower.holds_asset(&asset) {
                continue;
            }
            self.recompute_and_schedule(borrower.address).await;
        }
    }

    /// Recompute one borrower; a critical borrower without a cached tx gets
    /// a prepare scheduled. Duplicate schedules die on the advisory lock.
    pub(crate) async fn recompute_and_schedule(&self, address: Address) {
        self.pipeline.recompute(&address);

        let Some(borrower) = self.ctx.registry.get(&address) else {
            return;
        };
        if borrower.state == BorrowerState::Critical && borrower.cached_tx.is_none() {
            let pipeline = Arc::clone(&self.pipeline);
            tokio::spawn(async move {
                match pipeline.prepare(address).await {
                    Outcome::Transient(e) => {
                        warn!(borrower = %address, error = %e, "prepare failed, will retry on next trigger")
                    }
                    Outcome::Fatal(e) => {
                        warn!(borrower = %address, error = %e, "prepare hit fatal error")
                    }
                    _ => {}
                }
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{
        insert_borrower, push_price, test_harness, TestHarness, A_WETH, BORROWER, USDC,
        VDEBT_USDC, WETH,
    };
    use crate::math::pow10;

    fn borrow_event(on_behalf_of: Address) -> PoolEvent {
        PoolEvent::Borrow {
            reserve: USDC,
            on_behalf_of,
            amount: U256::from(1u64),
            block_number: 1_001,
        }
    }

    fn repay_event(user: Address) -> PoolEvent {
        PoolEvent::Repay {
            reserve: USDC,
            user,
            repayer: user,
            amount: U256::from(1u64),
            block_number: 1_002,
        }
    }

    fn liquidation_event(user: Address) -> PoolEvent {
        PoolEvent::LiquidationCall {
            collateral_asset: WETH,
            debt_asset: USDC,
            user,
            debt_to_cover: U256::from(1u64),
            liquidated_collateral: U256::from(1u64),
            liquidator: Address::repeat_byte(0x99),
            block_number: 1_003,
        }
    }

    fn router(harness: &TestHarness) -> Arc<EventRouter> {
        let pipeline = Arc::new(Pipeline::new(harness.ctx.clone()));
        EventRouter::new(harness.ctx.clone(), pipeline)
    }

    /// Script on-chain balances: collateral in WETH whole tokens, debt in
    /// whole USDC.
    fn script_balances(harness: &TestHarness, owner: Address, weth: u64, usdc: u64) {
        harness.chain.balances.insert(
            (A_WETH, owner),
            U256::from(weth) * pow10(18),
        );
        harness
            .chain
            .balances
            .insert((VDEBT_USDC, owner), U256::from(usdc) * pow10(6));
    }

    #[tokio::test]
    async fn test_borrow_event_inserts_and_hydrates() {
        let harness = test_harness(|_| {});
        harness.chain.set_oracle_price(USDC, 1.0);
        script_balances(&harness, BORROWER, 10, 10_000);

        let router = router(&harness);
        let mut updates = router.subscribe_borrower_updates();
        router.handle_event(borrow_event(BORROWER)).await;

        let borrower = harness.ctx.registry.get(&BORROWER).unwrap();
        assert!(borrower.hydrated);
        assert_eq!(borrower.collateral_balance(&WETH), Some(U256::from(10u64) * pow10(18)));
        assert_eq!(
            borrower.debt_balance(&USDC),
            Some(U256::from(10_000u64) * pow10(6))
        );
        assert_eq!(updates.try_recv().unwrap(), BORROWER);
    }

    #[tokio::test]
    async fn test_new_borrower_below_debt_floor_removed() {
        let harness = test_harness(|config| config.min_debt_usd = 50.0);
        harness.chain.set_oracle_price(USDC, 1.0);
        script_balances(&harness, BORROWER, 10, 20); // $20 debt

        let router = router(&harness);
        router.handle_event(borrow_event(BORROWER)).await;

        assert!(harness.ctx.registry.get(&BORROWER).is_none());
    }

    #[tokio::test]
    async fn test_debt_floor_check_failure_keeps_borrower() {
        let harness = test_harness(|_| {});
        // no oracle price scripted: the floor check errors
        script_balances(&harness, BORROWER, 10, 20);

        let router = router(&harness);
        router.handle_event(borrow_event(BORROWER)).await;

        assert!(harness.ctx.registry.get(&BORROWER).is_some());
    }

    #[tokio::test]
    async fn test_known_borrower_below_floor_not_removed() {
        let harness = test_harness(|_| {});
        harness.chain.set_oracle_price(USDC, 1.0);
        insert_borrower(&harness.ctx, BORROWER, 10, 10_000, true);
        script_balances(&harness, BORROWER, 10, 20);

        let router = router(&harness);
        router.handle_event(borrow_event(BORROWER)).await;

        // the floor removal applies to newly observed borrowers only
        assert!(harness.ctx.registry.get(&BORROWER).is_some());
    }

    #[tokio::test]
    async fn test_repay_ignores_unknown_borrower() {
        let harness = test_harness(|_| {});
        let router = router(&harness);

        router.handle_event(repay_event(BORROWER)).await;
        assert!(harness.ctx.registry.get(&BORROWER).is_none());
    }

    #[tokio::test]
    async fn test_transient_refresh_failure_keeps_record_unhydrated() {
        let harness = test_harness(|_| {});
        harness
            .chain
            .fail_balance_reads
            .store(true, std::sync::atomic::Ordering::SeqCst);

        let router = router(&harness);
        router.handle_event(borrow_event(BORROWER)).await;

        let borrower = harness.ctx.registry.get(&BORROWER).unwrap();
        assert!(!borrower.hydrated, "failed refresh must not hydrate");
    }

    #[tokio::test]
    async fn test_liquidation_call_removes_cleared_position() {
        let harness = test_harness(|_| {});
        insert_borrower(&harness.ctx, BORROWER, 10, 10_000, true);
        // post-liquidation chain state: no debt left
        script_balances(&harness, BORROWER, 5, 0);

        let router = router(&harness);
        router.handle_event(liquidation_event(BORROWER)).await;

        assert!(harness.ctx.registry.get(&BORROWER).is_none());
    }

    #[tokio::test]
    async fn test_liquidation_call_keeps_partial_position() {
        let harness = test_harness(|_| {});
        insert_borrower(&harness.ctx, BORROWER, 10, 10_000, true);
        script_balances(&harness, BORROWER, 5, 4_000);

        let router = router(&harness);
        let mut updates = router.subscribe_borrower_updates();
        router.handle_event(liquidation_event(BORROWER)).await;

        let borrower = harness.ctx.registry.get(&BORROWER).unwrap();
        assert_eq!(
            borrower.debt_balance(&USDC),
            Some(U256::from(4_000u64) * pow10(6))
        );
        assert_eq!(updates.try_recv().unwrap(), BORROWER);
    }

    #[tokio::test]
    async fn test_miss_classification() {
        let harness = test_harness(|_| {});
        insert_borrower(&harness.ctx, BORROWER, 10, 16_200, true);

        let mut borrower = harness.ctx.registry.get(&BORROWER).unwrap();
        borrower.last_skip_reason = Some(SkipReason::ProfitFloor);
        assert_eq!(
            MissReason::from_record(&borrower),
            MissReason::FilteredByProfit
        );

        borrower.last_skip_reason = Some(SkipReason::GasGuard);
        assert_eq!(MissReason::from_record(&borrower), MissReason::FilteredByGas);

        borrower.last_skip_reason = None;
        borrower.state = BorrowerState::Liquidatable;
        assert_eq!(MissReason::from_record(&borrower), MissReason::Raced);

        borrower.state = BorrowerState::Safe;
        assert_eq!(MissReason::from_record(&borrower), MissReason::Unknown);
    }

    #[tokio::test]
    async fn test_price_update_invalidates_armed_caches() {
        let harness = test_harness(|_| {});
        harness.chain.set_oracle_price(USDC, 1.0);
        harness.chain.set_oracle_price(WETH, 2000.0);
        insert_borrower(&harness.ctx, BORROWER, 10, 16_200, true);
        push_price(&harness.ctx.prices, WETH, 2000.0);
        push_price(&harness.ctx.prices, USDC, 1.0);

        let router = router(&harness);
        let pipeline = Pipeline::new(harness.ctx.clone());
        pipeline.recompute(&BORROWER);
        assert!(pipeline.prepare(BORROWER).await.is_done());

        // a touched asset voids the cache before recomputation
        push_price(&harness.ctx.prices, WETH, 1_999.0);
        router.on_price_updated(WETH).await;

        let borrower = harness.ctx.registry.get(&BORROWER).unwrap();
        assert_eq!(borrower.state, BorrowerState::Critical);
        assert!(borrower.cached_tx.is_none(), "price update cleared the cache");
    }

    #[tokio::test]
    async fn test_price_update_skips_unhydrated() {
        let harness = test_harness(|_| {});
        insert_borrower(&harness.ctx, BORROWER, 10, 16_200, false);
        push_price(&harness.ctx.prices, WETH, 2000.0);
        push_price(&harness.ctx.prices, USDC, 1.0);

        let router = router(&harness);
        router.on_price_updated(WETH).await;

        let borrower = harness.ctx.registry.get(&BORROWER).unwrap();
        assert_eq!(borrower.state, BorrowerState::Safe);
        assert!(borrower.predicted_hf.is_infinite());
    }

    #[tokio::test]
    async fn test_hydration_via_event_unblocks_recompute() {
        let harness = test_harness(|_| {});
        harness.chain.set_oracle_price(USDC, 1.0);
        harness.chain.set_oracle_price(WETH, 2000.0);

        // seeded unhydrated with dummy balances
        harness.ctx.seed(vec![crate::context::SeedBorrower {
            address: BORROWER,
            collateral: vec![(WETH, U256::from(10u64) * pow10(18))],
            debt: vec![(USDC, U256::from(16_200u64) * pow10(6))],
        }]);
        push_price(&harness.ctx.prices, WETH, 2000.0);
        push_price(&harness.ctx.prices, USDC, 1.0);

        let router = router(&harness);

        // price fan-out does nothing while unhydrated
        router.on_price_updated(WETH).await;
        assert_eq!(
            harness.ctx.registry.get(&BORROWER).unwrap().state,
            BorrowerState::Safe
        );

        // the borrow event hydrates and the recompute lands
        script_balances(&harness, BORROWER, 10, 16_200);
        router.handle_event(borrow_event(BORROWER)).await;
        router.recompute_and_schedule(BORROWER).await;

        let borrower = harness.ctx.registry.get(&BORROWER).unwrap();
        assert!(borrower.hydrated);
        assert_eq!(borrower.state, BorrowerState::Critical);
    }
}
