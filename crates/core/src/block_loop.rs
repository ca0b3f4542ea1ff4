//! Periodic health-factor refresh over the watch set.
//!
//! A timer reads block height and fee conditions each tick, recomputes
//! every hydrated WATCH/CRITICAL borrower from cached prices, and hands
//! borrowers that cross into LIQUIDATABLE to the execute path. Preparation
//! is never initiated here; that is the event fan-out's job.

use std::sync::Arc;

use tokio::sync::watch;
use tokio::time::interval;
use tracing::{debug, info, warn};

use crate::context::CoreContext;
use crate::pipeline::{Outcome, Pipeline};
use crate::state::BorrowerState;

/// Stats cadence in blocks.
const STATS_EVERY_BLOCKS: u64 = 100;

pub struct BlockLoop {
    ctx: Arc<CoreContext>,
    pipeline: Arc<Pipeline>,
}

impl BlockLoop {
    pub fn new(ctx: Arc<CoreContext>, pipeline: Arc<Pipeline>) -> Self {
        Self { ctx, pipeline }
    }

    /// Run until shutdown.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = interval(self.ctx.config().block_poll());
        let mut last_stats_block = 0u64;

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    info!("block loop stopped");
                    return;
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.tick(&mut last_stats_block).await {
                        warn!(error = %e, "block tick failed");
                    }
                }
            }
        }
    }

    /// One tick: refresh chain context, sweep the watch set.
    pub async fn tick(&self, last_stats_block: &mut u64) -> anyhow::Result<()> {
        let block = self.ctx.chain.block_number().await?;
        // keeps the fee cache warm for prepare/execute
        let _ = self.ctx.chain.fee_data().await?;

        let watched = self
            .ctx
            .registry
            .by_states(&[BorrowerState::Watch, BorrowerState::Critical]);

        let mut entered_liquidatable = Vec::new();
        for borrower in &watched {
            if !borrower.hydrated {
                continue;
            }
            if let Some((_, to)) = self.pipeline.recompute(&borrower.address) {
                if to == BorrowerState::Liquidatable {
                    entered_liquidatable.push(borrower.address);
                }
            }
        }

        for address in entered_liquidatable {
            match self.pipeline.execute(address).await {
                Outcome::Done(Some(tx)) => {
                    info!(borrower = %address, tx = %tx, block, "liquidation executed from block loop")
                }
                Outcome::Done(None) => {}
                Outcome::Skip(reason) => {
                    debug!(borrower = %address, reason = %reason, "execute skipped")
                }
                Outcome::Transient(e) => {
                    warn!(borrower = %address, error = %e, "execute failed, next block retries")
                }
                Outcome::Fatal(e) => return Err(e),
            }
        }

        if block.saturating_sub(*last_stats_block) >= STATS_EVERY_BLOCKS {
            *last_stats_block = block;
            let stats = self.ctx.registry.stats();
            info!(
                block,
                safe = stats.safe,
                watch = stats.watch,
                critical = stats.critical,
                liquidatable = stats.liquidatable,
                total = stats.total(),
                in_flight = self.ctx.active_executions(),
                "registry stats"
            );
        }

        Ok(())
    }
}
